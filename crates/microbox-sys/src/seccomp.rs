//! Syscall name resolution for seccomp filter construction.
//!
//! Seccomp filters are expressed in syscall numbers, but the launcher's
//! deny-list policy is expressed in names. This module maps names to the
//! numbers of the compile target. A name that does not exist on the target
//! architecture resolves to `None` and is skipped by the filter builder:
//! user intent about syscalls is necessarily kernel- and arch-dependent, so
//! unresolved names are soft failures (unknown capability names, by
//! contrast, are hard errors).
//!
//! The table covers every name in the default deny list plus the syscalls a
//! user is likely to name in `--allow-syscall`/`--deny-syscall` overrides.

/// Returns the syscall number for `name` on the target architecture.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn resolve_syscall(name: &str) -> Option<i64> {
    Some(match name {
        // module & kexec
        "init_module" => libc::SYS_init_module,
        "finit_module" => libc::SYS_finit_module,
        "delete_module" => libc::SYS_delete_module,
        "kexec_load" => libc::SYS_kexec_load,
        "kexec_file_load" => libc::SYS_kexec_file_load,
        #[cfg(target_arch = "x86_64")]
        "create_module" => libc::SYS_create_module,

        // keyring & bpf
        "add_key" => libc::SYS_add_key,
        "request_key" => libc::SYS_request_key,
        "keyctl" => libc::SYS_keyctl,
        "bpf" => libc::SYS_bpf,

        // ptrace & process vm
        "ptrace" => libc::SYS_ptrace,
        "process_vm_readv" => libc::SYS_process_vm_readv,
        "process_vm_writev" => libc::SYS_process_vm_writev,
        "kcmp" => libc::SYS_kcmp,

        // clock tampering
        "adjtimex" => libc::SYS_adjtimex,
        "clock_adjtime" => libc::SYS_clock_adjtime,
        "clock_settime" => libc::SYS_clock_settime,
        "settimeofday" => libc::SYS_settimeofday,

        // reboot, quotas, accounting, legacy
        "reboot" => libc::SYS_reboot,
        "quotactl" => libc::SYS_quotactl,
        "nfsservctl" => libc::SYS_nfsservctl,
        "acct" => libc::SYS_acct,
        "personality" => libc::SYS_personality,
        #[cfg(target_arch = "x86_64")]
        "_sysctl" => libc::SYS__sysctl,
        #[cfg(target_arch = "x86_64")]
        "sysfs" => libc::SYS_sysfs,
        #[cfg(target_arch = "x86_64")]
        "uselib" => libc::SYS_uselib,

        // mount & root switching
        "mount" => libc::SYS_mount,
        "umount2" => libc::SYS_umount2,
        "pivot_root" => libc::SYS_pivot_root,
        "chroot" => libc::SYS_chroot,
        "open_tree" => libc::SYS_open_tree,
        "move_mount" => libc::SYS_move_mount,
        "fsopen" => libc::SYS_fsopen,
        "fsconfig" => libc::SYS_fsconfig,
        "fsmount" => libc::SYS_fsmount,
        "fspick" => libc::SYS_fspick,
        "mount_setattr" => libc::SYS_mount_setattr,

        // namespaces
        "setns" => libc::SYS_setns,
        "unshare" => libc::SYS_unshare,

        // file-handle bypasses
        "open_by_handle_at" => libc::SYS_open_by_handle_at,
        "name_to_handle_at" => libc::SYS_name_to_handle_at,
        "lookup_dcookie" => libc::SYS_lookup_dcookie,

        // observability & faults
        "perf_event_open" => libc::SYS_perf_event_open,
        "fanotify_init" => libc::SYS_fanotify_init,
        "fanotify_mark" => libc::SYS_fanotify_mark,
        "userfaultfd" => libc::SYS_userfaultfd,

        // low-level I/O privileges
        #[cfg(target_arch = "x86_64")]
        "iopl" => libc::SYS_iopl,
        #[cfg(target_arch = "x86_64")]
        "ioperm" => libc::SYS_ioperm,
        #[cfg(target_arch = "x86_64")]
        "modify_ldt" => libc::SYS_modify_ldt,

        // memory policy & page moving
        "set_mempolicy" => libc::SYS_set_mempolicy,
        "get_mempolicy" => libc::SYS_get_mempolicy,
        "mbind" => libc::SYS_mbind,
        "move_pages" => libc::SYS_move_pages,
        "migrate_pages" => libc::SYS_migrate_pages,

        // io_uring
        "io_uring_setup" => libc::SYS_io_uring_setup,
        "io_uring_enter" => libc::SYS_io_uring_enter,
        "io_uring_register" => libc::SYS_io_uring_register,

        // networking
        "socket" => libc::SYS_socket,
        "socketpair" => libc::SYS_socketpair,
        "connect" => libc::SYS_connect,
        "accept" => libc::SYS_accept,
        "accept4" => libc::SYS_accept4,
        "bind" => libc::SYS_bind,
        "listen" => libc::SYS_listen,
        "sendto" => libc::SYS_sendto,
        "recvfrom" => libc::SYS_recvfrom,
        "sendmsg" => libc::SYS_sendmsg,
        "recvmsg" => libc::SYS_recvmsg,
        "sendmmsg" => libc::SYS_sendmmsg,
        "recvmmsg" => libc::SYS_recvmmsg,
        "shutdown" => libc::SYS_shutdown,
        "getsockname" => libc::SYS_getsockname,
        "getpeername" => libc::SYS_getpeername,
        "setsockopt" => libc::SYS_setsockopt,
        "getsockopt" => libc::SYS_getsockopt,

        // process lifecycle
        "clone" => libc::SYS_clone,
        "clone3" => libc::SYS_clone3,
        #[cfg(target_arch = "x86_64")]
        "fork" => libc::SYS_fork,
        #[cfg(target_arch = "x86_64")]
        "vfork" => libc::SYS_vfork,
        "execve" => libc::SYS_execve,
        "execveat" => libc::SYS_execveat,
        "exit" => libc::SYS_exit,
        "exit_group" => libc::SYS_exit_group,
        "wait4" => libc::SYS_wait4,
        "waitid" => libc::SYS_waitid,
        "kill" => libc::SYS_kill,
        "tkill" => libc::SYS_tkill,
        "tgkill" => libc::SYS_tgkill,
        "pidfd_open" => libc::SYS_pidfd_open,
        "pidfd_getfd" => libc::SYS_pidfd_getfd,
        "pidfd_send_signal" => libc::SYS_pidfd_send_signal,
        "process_madvise" => libc::SYS_process_madvise,
        "prctl" => libc::SYS_prctl,
        "seccomp" => libc::SYS_seccomp,
        "setpriority" => libc::SYS_setpriority,
        "sched_setaffinity" => libc::SYS_sched_setaffinity,
        "sched_setattr" => libc::SYS_sched_setattr,
        "sched_setscheduler" => libc::SYS_sched_setscheduler,

        // identity
        "setuid" => libc::SYS_setuid,
        "setgid" => libc::SYS_setgid,
        "setreuid" => libc::SYS_setreuid,
        "setregid" => libc::SYS_setregid,
        "setresuid" => libc::SYS_setresuid,
        "setresgid" => libc::SYS_setresgid,
        "setgroups" => libc::SYS_setgroups,
        "capset" => libc::SYS_capset,
        "capget" => libc::SYS_capget,

        // filesystem mutation
        #[cfg(target_arch = "x86_64")]
        "open" => libc::SYS_open,
        "openat" => libc::SYS_openat,
        "openat2" => libc::SYS_openat2,
        #[cfg(target_arch = "x86_64")]
        "creat" => libc::SYS_creat,
        #[cfg(target_arch = "x86_64")]
        "unlink" => libc::SYS_unlink,
        "unlinkat" => libc::SYS_unlinkat,
        #[cfg(target_arch = "x86_64")]
        "rename" => libc::SYS_rename,
        "renameat" => libc::SYS_renameat,
        "renameat2" => libc::SYS_renameat2,
        #[cfg(target_arch = "x86_64")]
        "mkdir" => libc::SYS_mkdir,
        "mkdirat" => libc::SYS_mkdirat,
        #[cfg(target_arch = "x86_64")]
        "rmdir" => libc::SYS_rmdir,
        #[cfg(target_arch = "x86_64")]
        "mknod" => libc::SYS_mknod,
        "mknodat" => libc::SYS_mknodat,
        #[cfg(target_arch = "x86_64")]
        "chmod" => libc::SYS_chmod,
        "fchmod" => libc::SYS_fchmod,
        "fchmodat" => libc::SYS_fchmodat,
        #[cfg(target_arch = "x86_64")]
        "chown" => libc::SYS_chown,
        "fchown" => libc::SYS_fchown,
        "fchownat" => libc::SYS_fchownat,
        "truncate" => libc::SYS_truncate,
        "ftruncate" => libc::SYS_ftruncate,
        #[cfg(target_arch = "x86_64")]
        "link" => libc::SYS_link,
        "linkat" => libc::SYS_linkat,
        #[cfg(target_arch = "x86_64")]
        "symlink" => libc::SYS_symlink,
        "symlinkat" => libc::SYS_symlinkat,
        "setxattr" => libc::SYS_setxattr,
        "lsetxattr" => libc::SYS_lsetxattr,
        "fsetxattr" => libc::SYS_fsetxattr,
        "removexattr" => libc::SYS_removexattr,
        "lremovexattr" => libc::SYS_lremovexattr,
        "fremovexattr" => libc::SYS_fremovexattr,
        "fallocate" => libc::SYS_fallocate,
        "memfd_create" => libc::SYS_memfd_create,
        "swapon" => libc::SYS_swapon,
        "swapoff" => libc::SYS_swapoff,
        "syslog" => libc::SYS_syslog,
        "vhangup" => libc::SYS_vhangup,
        "getrandom" => libc::SYS_getrandom,
        "landlock_create_ruleset" => libc::SYS_landlock_create_ruleset,
        "landlock_add_rule" => libc::SYS_landlock_add_rule,
        "landlock_restrict_self" => libc::SYS_landlock_restrict_self,

        // basic I/O
        "read" => libc::SYS_read,
        "write" => libc::SYS_write,
        "close" => libc::SYS_close,
        "lseek" => libc::SYS_lseek,
        "pread64" => libc::SYS_pread64,
        "pwrite64" => libc::SYS_pwrite64,
        "readv" => libc::SYS_readv,
        "writev" => libc::SYS_writev,
        "preadv" => libc::SYS_preadv,
        "pwritev" => libc::SYS_pwritev,
        "preadv2" => libc::SYS_preadv2,
        "pwritev2" => libc::SYS_pwritev2,
        "sendfile" => libc::SYS_sendfile,
        "splice" => libc::SYS_splice,
        "tee" => libc::SYS_tee,
        "vmsplice" => libc::SYS_vmsplice,
        "copy_file_range" => libc::SYS_copy_file_range,
        "dup" => libc::SYS_dup,
        "dup3" => libc::SYS_dup3,
        #[cfg(target_arch = "x86_64")]
        "dup2" => libc::SYS_dup2,
        "fcntl" => libc::SYS_fcntl,
        "ioctl" => libc::SYS_ioctl,
        "flock" => libc::SYS_flock,
        "fsync" => libc::SYS_fsync,
        "fdatasync" => libc::SYS_fdatasync,
        "sync" => libc::SYS_sync,
        "syncfs" => libc::SYS_syncfs,
        "sync_file_range" => libc::SYS_sync_file_range,
        "close_range" => libc::SYS_close_range,
        "pipe2" => libc::SYS_pipe2,
        #[cfg(target_arch = "x86_64")]
        "pipe" => libc::SYS_pipe,

        // filesystem queries
        "fstat" => libc::SYS_fstat,
        "newfstatat" => libc::SYS_newfstatat,
        #[cfg(target_arch = "x86_64")]
        "stat" => libc::SYS_stat,
        #[cfg(target_arch = "x86_64")]
        "lstat" => libc::SYS_lstat,
        "statx" => libc::SYS_statx,
        "statfs" => libc::SYS_statfs,
        "fstatfs" => libc::SYS_fstatfs,
        "getdents64" => libc::SYS_getdents64,
        "getcwd" => libc::SYS_getcwd,
        "chdir" => libc::SYS_chdir,
        "fchdir" => libc::SYS_fchdir,
        #[cfg(target_arch = "x86_64")]
        "readlink" => libc::SYS_readlink,
        "readlinkat" => libc::SYS_readlinkat,
        #[cfg(target_arch = "x86_64")]
        "access" => libc::SYS_access,
        "faccessat" => libc::SYS_faccessat,
        "faccessat2" => libc::SYS_faccessat2,
        "getxattr" => libc::SYS_getxattr,
        "lgetxattr" => libc::SYS_lgetxattr,
        "fgetxattr" => libc::SYS_fgetxattr,
        "listxattr" => libc::SYS_listxattr,
        "llistxattr" => libc::SYS_llistxattr,
        "flistxattr" => libc::SYS_flistxattr,
        "umask" => libc::SYS_umask,
        "utimensat" => libc::SYS_utimensat,

        // memory
        "mmap" => libc::SYS_mmap,
        "mprotect" => libc::SYS_mprotect,
        "munmap" => libc::SYS_munmap,
        "mremap" => libc::SYS_mremap,
        "brk" => libc::SYS_brk,
        "madvise" => libc::SYS_madvise,
        "mincore" => libc::SYS_mincore,
        "msync" => libc::SYS_msync,
        "mlock" => libc::SYS_mlock,
        "mlock2" => libc::SYS_mlock2,
        "munlock" => libc::SYS_munlock,
        "mlockall" => libc::SYS_mlockall,
        "munlockall" => libc::SYS_munlockall,
        "remap_file_pages" => libc::SYS_remap_file_pages,
        "pkey_alloc" => libc::SYS_pkey_alloc,
        "pkey_free" => libc::SYS_pkey_free,
        "pkey_mprotect" => libc::SYS_pkey_mprotect,

        // signals
        "rt_sigaction" => libc::SYS_rt_sigaction,
        "rt_sigprocmask" => libc::SYS_rt_sigprocmask,
        "rt_sigreturn" => libc::SYS_rt_sigreturn,
        "rt_sigpending" => libc::SYS_rt_sigpending,
        "rt_sigtimedwait" => libc::SYS_rt_sigtimedwait,
        "rt_sigqueueinfo" => libc::SYS_rt_sigqueueinfo,
        "rt_tgsigqueueinfo" => libc::SYS_rt_tgsigqueueinfo,
        "rt_sigsuspend" => libc::SYS_rt_sigsuspend,
        "sigaltstack" => libc::SYS_sigaltstack,
        "signalfd4" => libc::SYS_signalfd4,

        // polling & events
        "epoll_create1" => libc::SYS_epoll_create1,
        "epoll_ctl" => libc::SYS_epoll_ctl,
        "epoll_pwait" => libc::SYS_epoll_pwait,
        "epoll_pwait2" => libc::SYS_epoll_pwait2,
        #[cfg(target_arch = "x86_64")]
        "epoll_wait" => libc::SYS_epoll_wait,
        #[cfg(target_arch = "x86_64")]
        "poll" => libc::SYS_poll,
        #[cfg(target_arch = "x86_64")]
        "select" => libc::SYS_select,
        "ppoll" => libc::SYS_ppoll,
        "pselect6" => libc::SYS_pselect6,
        "eventfd2" => libc::SYS_eventfd2,
        #[cfg(target_arch = "x86_64")]
        "eventfd" => libc::SYS_eventfd,
        "inotify_init1" => libc::SYS_inotify_init1,
        "inotify_add_watch" => libc::SYS_inotify_add_watch,
        "inotify_rm_watch" => libc::SYS_inotify_rm_watch,
        #[cfg(target_arch = "x86_64")]
        "inotify_init" => libc::SYS_inotify_init,

        // time & timers
        "clock_gettime" => libc::SYS_clock_gettime,
        "clock_getres" => libc::SYS_clock_getres,
        "clock_nanosleep" => libc::SYS_clock_nanosleep,
        "gettimeofday" => libc::SYS_gettimeofday,
        "nanosleep" => libc::SYS_nanosleep,
        "getitimer" => libc::SYS_getitimer,
        "setitimer" => libc::SYS_setitimer,
        "timer_create" => libc::SYS_timer_create,
        "timer_settime" => libc::SYS_timer_settime,
        "timer_gettime" => libc::SYS_timer_gettime,
        "timer_getoverrun" => libc::SYS_timer_getoverrun,
        "timer_delete" => libc::SYS_timer_delete,
        "timerfd_create" => libc::SYS_timerfd_create,
        "timerfd_settime" => libc::SYS_timerfd_settime,
        "timerfd_gettime" => libc::SYS_timerfd_gettime,
        #[cfg(target_arch = "x86_64")]
        "alarm" => libc::SYS_alarm,

        // process queries & scheduling
        "getpid" => libc::SYS_getpid,
        "getppid" => libc::SYS_getppid,
        "gettid" => libc::SYS_gettid,
        "getuid" => libc::SYS_getuid,
        "geteuid" => libc::SYS_geteuid,
        "getgid" => libc::SYS_getgid,
        "getegid" => libc::SYS_getegid,
        "getgroups" => libc::SYS_getgroups,
        "getresuid" => libc::SYS_getresuid,
        "getresgid" => libc::SYS_getresgid,
        "getpgid" => libc::SYS_getpgid,
        "getsid" => libc::SYS_getsid,
        "setpgid" => libc::SYS_setpgid,
        "setsid" => libc::SYS_setsid,
        "getrusage" => libc::SYS_getrusage,
        "getrlimit" => libc::SYS_getrlimit,
        "setrlimit" => libc::SYS_setrlimit,
        "prlimit64" => libc::SYS_prlimit64,
        "getpriority" => libc::SYS_getpriority,
        "sched_yield" => libc::SYS_sched_yield,
        "sched_getaffinity" => libc::SYS_sched_getaffinity,
        "sched_getparam" => libc::SYS_sched_getparam,
        "sched_getscheduler" => libc::SYS_sched_getscheduler,
        "sched_getattr" => libc::SYS_sched_getattr,
        "sched_get_priority_max" => libc::SYS_sched_get_priority_max,
        "sched_get_priority_min" => libc::SYS_sched_get_priority_min,
        "sched_rr_get_interval" => libc::SYS_sched_rr_get_interval,
        "getcpu" => libc::SYS_getcpu,
        "sysinfo" => libc::SYS_sysinfo,
        "times" => libc::SYS_times,
        "uname" => libc::SYS_uname,
        "futex" => libc::SYS_futex,
        "set_tid_address" => libc::SYS_set_tid_address,
        "set_robust_list" => libc::SYS_set_robust_list,
        "get_robust_list" => libc::SYS_get_robust_list,
        "restart_syscall" => libc::SYS_restart_syscall,
        "membarrier" => libc::SYS_membarrier,
        "rseq" => libc::SYS_rseq,
        #[cfg(target_arch = "x86_64")]
        "arch_prctl" => libc::SYS_arch_prctl,

        // System V & POSIX IPC
        "shmget" => libc::SYS_shmget,
        "shmat" => libc::SYS_shmat,
        "shmdt" => libc::SYS_shmdt,
        "shmctl" => libc::SYS_shmctl,
        "semget" => libc::SYS_semget,
        "semop" => libc::SYS_semop,
        "semctl" => libc::SYS_semctl,
        "semtimedop" => libc::SYS_semtimedop,
        "msgget" => libc::SYS_msgget,
        "msgsnd" => libc::SYS_msgsnd,
        "msgrcv" => libc::SYS_msgrcv,
        "msgctl" => libc::SYS_msgctl,
        "mq_open" => libc::SYS_mq_open,
        "mq_unlink" => libc::SYS_mq_unlink,
        "mq_timedsend" => libc::SYS_mq_timedsend,
        "mq_timedreceive" => libc::SYS_mq_timedreceive,
        "mq_notify" => libc::SYS_mq_notify,
        "mq_getsetattr" => libc::SYS_mq_getsetattr,

        // async I/O
        "io_setup" => libc::SYS_io_setup,
        "io_destroy" => libc::SYS_io_destroy,
        "io_submit" => libc::SYS_io_submit,
        "io_cancel" => libc::SYS_io_cancel,
        "io_getevents" => libc::SYS_io_getevents,
        "readahead" => libc::SYS_readahead,
        "fadvise64" => libc::SYS_fadvise64,

        _ => return None,
    })
}

/// True if the kernel has seccomp filtering compiled in.
#[must_use]
pub fn seccomp_available() -> bool {
    // SAFETY: PR_GET_SECCOMP has no arguments beyond the option itself.
    unsafe { libc::prctl(libc::PR_GET_SECCOMP, 0, 0, 0, 0) >= 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_names() {
        assert_eq!(resolve_syscall("mount"), Some(libc::SYS_mount));
        assert_eq!(resolve_syscall("socket"), Some(libc::SYS_socket));
        assert_eq!(resolve_syscall("io_uring_setup"), Some(libc::SYS_io_uring_setup));
    }

    #[test]
    fn unknown_names_are_skipped() {
        // nsenter is a tool, not a syscall; stime/vm86 do not exist on
        // 64-bit targets. All must resolve to None without erroring.
        assert_eq!(resolve_syscall("nsenter"), None);
        assert_eq!(resolve_syscall("stime"), None);
        assert_eq!(resolve_syscall("vm86"), None);
        assert_eq!(resolve_syscall("definitely_not_a_syscall"), None);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn legacy_x86_64_names() {
        assert!(resolve_syscall("create_module").is_some());
        assert!(resolve_syscall("iopl").is_some());
    }
}
