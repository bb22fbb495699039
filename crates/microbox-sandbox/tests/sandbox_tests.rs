//! End-to-end sandbox tests.
//!
//! Most of these spawn real sandboxes and therefore need root (cgroup
//! writes, bridge networking); they are marked `#[ignore]`.
//!
//! ```bash
//! # Unprivileged validation tests
//! cargo test -p microbox-sandbox
//!
//! # Full suite
//! sudo -E cargo test -p microbox-sandbox --test sandbox_tests -- --ignored
//! ```
//!
//! Shell-based assertions are encoded in the sandboxed command's exit code:
//! the sandbox inherits stdio, so `test "$(...)" = expected` inside the
//! child is the observable.

use microbox_sandbox::{Error, FsMode, MountSpec, NetMode, Plan, spawn};

fn is_root() -> bool {
    // SAFETY: geteuid cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// A tmpfs-rooted plan with enough of the host bound in to run `/bin/sh`.
fn shell_plan(script: &str) -> Plan {
    let mut plan = Plan::new(["/bin/sh", "-c", script])
        .mount(MountSpec::ro("/bin", "/bin"))
        .mount(MountSpec::ro("/usr", "/usr"));
    for lib in ["/lib", "/lib64", "/lib32"] {
        if std::path::Path::new(lib).exists() {
            plan = plan.mount(MountSpec::ro(lib, lib));
        }
    }
    plan
}

fn run(plan: Plan) -> i32 {
    let process = spawn(&plan).expect("spawn");
    process.wait().expect("wait")
}

#[test]
fn host_fs_with_mounts_is_rejected() {
    let plan = Plan::new(["/bin/true"])
        .fs(FsMode::Host)
        .mount(MountSpec::ro("/etc", "/etc"));
    match spawn(&plan) {
        Err(Error::InvalidOption(msg)) => assert!(msg.contains("host"), "{msg}"),
        other => panic!("expected InvalidOption, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn empty_argv_is_rejected() {
    let plan = Plan::new(Vec::<String>::new());
    assert!(matches!(spawn(&plan), Err(Error::InvalidOption(_))));
}

#[test]
fn bridge_requires_root() {
    if is_root() {
        return;
    }
    let plan = Plan::new(["/bin/true"]).net(NetMode::Bridge);
    assert!(matches!(spawn(&plan), Err(Error::PrivilegeRequired(_))));
}

#[test]
#[ignore]
fn exit_code_is_propagated() {
    assert_eq!(run(shell_plan("exit 42")), 42);
    assert_eq!(run(shell_plan("true")), 0);
}

#[test]
#[ignore]
fn signal_death_maps_to_128_plus_signum() {
    assert_eq!(run(shell_plan("kill -9 $$")), 128 + 9);
}

#[test]
#[ignore]
fn kill_terminates_the_sandbox() {
    let process = spawn(&shell_plan("sleep 60")).expect("spawn");
    process.kill().expect("kill");
    assert_eq!(process.wait().expect("wait"), 128 + 9);
}

#[test]
#[ignore]
fn missing_binary_exits_127() {
    assert_eq!(run(Plan::new(["/no/such/binary"])), 127);
}

#[test]
#[ignore]
fn private_root_is_tmpfs() {
    // The sandbox root must be the fresh tmpfs, not the host's filesystem.
    let code = run(shell_plan("test \"$(stat -f -c %T /)\" = tmpfs"));
    assert_eq!(code, 0);
}

#[test]
#[ignore]
fn memory_limit_is_visible_inside() {
    let plan = shell_plan("test \"$(cat /sys/fs/cgroup/memory.max)\" = 67108864")
        .memory(64 * 1024 * 1024);
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn cpu_limit_is_visible_inside() {
    let plan =
        shell_plan("test \"$(cat /sys/fs/cgroup/cpu.max)\" = \"50000 100000\"").cpus(0.5);
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn unlimited_cpu_writes_max() {
    let plan = shell_plan("test \"$(cat /sys/fs/cgroup/cpu.max)\" = \"max 100000\"");
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn hostname_is_applied() {
    let plan = shell_plan("test \"$(cat /proc/sys/kernel/hostname)\" = alpha").hostname("alpha");
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn resolv_conf_carries_nameservers() {
    let plan = shell_plan("grep -q 'nameserver 9.9.9.9' /etc/resolv.conf")
        .nameserver("9.9.9.9".parse().unwrap());
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn denied_syscall_returns_enosys_not_death() {
    // mount fails, but the shell keeps running and reports the failure.
    let plan = shell_plan(
        "mount -t tmpfs none /tmp 2>/dev/null; status=$?; test $status -ne 0",
    );
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn allowed_syscall_override_lifts_deny() {
    // With mount allowed again (and CAP_SYS_ADMIN present inside the
    // namespace) the tmpfs mount succeeds.
    let plan = shell_plan("mount -t tmpfs none /tmp")
        .allow_syscall("mount")
        .capabilities(microbox_sandbox::CapabilityOpts {
            add: vec![caps::Capability::CAP_SYS_ADMIN],
            drop: vec![],
            drop_all: false,
        });
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn readonly_root_rejects_writes() {
    let plan = shell_plan("touch /somefile 2>/dev/null; test $? -ne 0").read_only(true);
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn proc_masking_hides_kcore() {
    // Masked by a read-only /dev/null bind, so it reads as empty.
    let plan = shell_plan("test ! -s /proc/kcore");
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn child_is_pid_one() {
    assert_eq!(run(shell_plan("test $$ -eq 1")), 0);
}

#[test]
#[ignore]
fn environment_order_and_overrides() {
    use microbox_sandbox::EnvVar;

    let plan = shell_plan(
        "test \"$HOME\" = /tmp && test \"$TERM\" = xterm && test \"$ZEBRA\" = stripes",
    )
    .environment(&[
        EnvVar::new("ZEBRA", "stripes"),
        EnvVar::new("HOME", "/tmp"),
    ]);
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn container_root_is_mapped() {
    assert_eq!(run(shell_plan("test \"$(id -u)\" = 0")), 0);
}

#[test]
#[ignore]
fn dev_is_populated() {
    let plan = shell_plan(
        "test -c /dev/null && test -c /dev/zero && test -c /dev/urandom \
         && test -L /dev/fd && test -d /dev/shm && test -d /dev/pts",
    );
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn default_nameservers_when_unconfigured() {
    let plan = shell_plan("grep -q 'nameserver 8.8.8.8' /etc/resolv.conf");
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn readonly_bind_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("probe"), "x").unwrap();

    let plan = shell_plan("touch /data/probe 2>/dev/null; test $? -ne 0")
        .mount(MountSpec::ro(dir.path(), "/data"));
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn rw_bind_writes_reach_the_host() {
    let dir = tempfile::tempdir().unwrap();

    let plan = shell_plan("echo payload > /data/out").mount(MountSpec::rw(dir.path(), "/data"));
    assert_eq!(run(plan), 0);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out")).unwrap(),
        "payload\n"
    );
}

#[test]
#[ignore]
fn ipc_namespace_is_fresh() {
    // A fresh IPC namespace has no System V shared memory segments.
    let plan = shell_plan("test \"$(grep -c . /proc/sysvipc/shm)\" = 1");
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn bridge_interface_and_route_exist() {
    if !is_root() {
        return;
    }
    let plan = shell_plan(
        "grep -q eth0 /proc/net/dev && grep -q 00000000 /proc/net/route",
    )
    .net(NetMode::Bridge);
    assert_eq!(run(plan), 0);
}

#[test]
#[ignore]
fn host_veth_is_gone_after_wait() {
    if !is_root() {
        return;
    }
    let plan = shell_plan("true").net(NetMode::Bridge);
    let process = spawn(&plan).expect("spawn");
    let pid = process.pid();
    let veth = format!("vmbx{pid}");

    assert_eq!(process.wait().expect("wait"), 0);
    let devices = std::fs::read_to_string("/proc/net/dev").unwrap();
    assert!(!devices.contains(&veth), "{veth} leaked");
}
