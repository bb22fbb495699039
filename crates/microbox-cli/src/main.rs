//! microbox - lightweight sandboxes for Linux.
//!
//! Parses the flag surface into a [`Plan`], spawns the sandbox, waits, and
//! propagates the child's exit code (`128 + signum` for a signal death).
//! Parent-side failures print one diagnostic and exit 1.

use std::net::IpAddr;

use anyhow::{Context, bail};
use clap::Parser;
use microbox_sandbox::isolation::capabilities;
use microbox_sandbox::{CapabilityOpts, EnvVar, FsMode, NetMode, Plan, UserNsMode, env};

#[derive(Parser)]
#[command(
    name = "microbox",
    version,
    about = "Lightweight sandboxes for Linux",
    arg_required_else_help = false
)]
struct Cli {
    /// Root filesystem (host|tmpfs|<directory path>)
    #[arg(long, default_value = "tmpfs", value_name = "MODE")]
    fs: String,

    /// Network mode (none|host|bridge)
    #[arg(long, default_value = "none", value_name = "MODE")]
    net: String,

    /// Read-only bind mount from the host (repeatable)
    #[arg(long = "mount-ro", value_name = "HOST:DEST")]
    mount_ro: Vec<String>,

    /// Read-write bind mount from the host (repeatable)
    #[arg(long = "mount-rw", value_name = "HOST:DEST")]
    mount_rw: Vec<String>,

    /// Remount the sandbox root filesystem read-only
    #[arg(long)]
    readonly: bool,

    /// Set an environment variable in the sandbox (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Sandbox hostname (default: derived from the sandbox id)
    #[arg(long, value_name = "NAME")]
    hostname: Option<String>,

    /// Fractional CPU cores to allocate (0 = unlimited)
    #[arg(long, default_value_t = 0.0, value_name = "N")]
    cpus: f64,

    /// Memory to allocate, with K/M/G suffixes (0 = unlimited)
    #[arg(long, default_value = "0", value_name = "SIZE")]
    memory: String,

    /// Storage for the in-memory root, with K/M/G suffixes
    #[arg(long, default_value = "512M", value_name = "SIZE")]
    storage: String,

    /// DNS nameserver for the sandbox (repeatable)
    #[arg(long = "dns", value_name = "IP")]
    dns: Vec<IpAddr>,

    /// Allow a syscall otherwise denied by the seccomp filter (repeatable)
    #[arg(long = "allow-syscall", value_name = "NAME")]
    allow_syscall: Vec<String>,

    /// Deny an additional syscall in the seccomp filter (repeatable)
    #[arg(long = "deny-syscall", value_name = "NAME")]
    deny_syscall: Vec<String>,

    /// Add a capability to the sandbox, e.g. NET_ADMIN (repeatable)
    #[arg(long = "cap-add", value_name = "NAME")]
    cap_add: Vec<String>,

    /// Drop a capability from the sandbox; ALL empties the baseline
    #[arg(long = "cap-drop", value_name = "NAME")]
    cap_drop: Vec<String>,

    /// User namespace mode (isolated|host)
    #[arg(long, default_value = "isolated", value_name = "MODE")]
    userns: String,

    /// Log verbosity (info|warn|error)
    #[arg(long = "log-level", default_value = "error", value_name = "LEVEL")]
    log_level: String,

    /// Log output format (text|json)
    #[arg(long = "log-format", default_value = "text", value_name = "FORMAT")]
    log_format: String,

    /// Command to run in the sandbox, after `--`
    #[arg(last = true, value_name = "COMMAND")]
    argv: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level, &cli.log_format) {
        eprintln!("microbox: {e}");
        std::process::exit(1);
    }

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("microbox: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let plan = build_plan(cli)?;
    tracing::info!(id = %plan.id, fs = %plan.fs, net = %plan.net, "launching sandbox");

    let process = microbox_sandbox::spawn(&plan)?;
    let code = process.wait()?;
    Ok(code)
}

fn build_plan(cli: Cli) -> anyhow::Result<Plan> {
    let mut plan = Plan::new(cli.argv)
        .fs(parse_fs(&cli.fs))
        .net(parse_net(&cli.net)?)
        .user_ns(parse_userns(&cli.userns)?)
        .read_only(cli.readonly)
        .cpus(cli.cpus)
        .memory(parse_size(&cli.memory).context("bad --memory")?)
        .storage(parse_size(&cli.storage).context("bad --storage")?)
        .capabilities(parse_caps(&cli.cap_add, &cli.cap_drop)?);

    plan.hostname = cli
        .hostname
        .unwrap_or_else(|| format!("box-{}", &plan.id.simple().to_string()[..8]));
    plan.nameservers = cli.dns;
    plan.allow_syscalls = cli.allow_syscall;
    plan.deny_syscalls = cli.deny_syscall;

    for spec in &cli.mount_ro {
        let (host, dest) = parse_mount(spec)?;
        plan = plan.mount(microbox_sandbox::MountSpec::ro(host, dest));
    }
    for spec in &cli.mount_rw {
        let (host, dest) = parse_mount(spec)?;
        plan = plan.mount(microbox_sandbox::MountSpec::rw(host, dest));
    }

    let user_env: Vec<EnvVar> = cli
        .env
        .iter()
        .map(|kv| env::parse(kv))
        .collect::<Result<_, _>>()?;
    Ok(plan.environment(&user_env))
}

fn parse_fs(mode: &str) -> FsMode {
    match mode {
        "tmpfs" => FsMode::Tmpfs,
        "host" => FsMode::Host,
        path => FsMode::Rootfs(path.into()),
    }
}

fn parse_net(mode: &str) -> anyhow::Result<NetMode> {
    match mode {
        "none" => Ok(NetMode::None),
        "host" => Ok(NetMode::Host),
        "bridge" => Ok(NetMode::Bridge),
        other => bail!("bad --net {other:?} (none|host|bridge)"),
    }
}

fn parse_userns(mode: &str) -> anyhow::Result<UserNsMode> {
    match mode {
        "isolated" => Ok(UserNsMode::Isolated),
        "host" => Ok(UserNsMode::Host),
        other => bail!("bad --userns {other:?} (isolated|host)"),
    }
}

fn parse_mount(spec: &str) -> anyhow::Result<(&str, &str)> {
    match spec.split_once(':') {
        Some((host, dest)) if !host.is_empty() && !dest.is_empty() => Ok((host, dest)),
        _ => bail!("bad mount {spec:?} (expected HOST:DEST)"),
    }
}

fn parse_caps(add: &[String], drop: &[String]) -> anyhow::Result<CapabilityOpts> {
    let mut opts = CapabilityOpts::default();
    for name in add {
        opts.add.push(capabilities::parse_cap(name).context("bad --cap-add")?);
    }
    for name in drop {
        if capabilities::is_all(name) {
            opts.drop_all = true;
            continue;
        }
        opts.drop
            .push(capabilities::parse_cap(name).context("bad --cap-drop")?);
    }
    Ok(opts)
}

/// Parses a byte size with optional binary K/M/G/T suffix ("64M", "1.5G").
fn parse_size(input: &str) -> anyhow::Result<u64> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid size {input:?}"))?;

    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        other => bail!("invalid size suffix {other:?} in {input:?}"),
    };

    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        bail!("size {input:?} out of range");
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(bytes.round() as u64)
}

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let level = match level {
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        other => bail!("bad --log-level {other:?} (info|warn|error)"),
    };

    // RUST_LOG, when set, refines the flag-selected default.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    match format {
        "text" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        other => bail!("bad --log-format {other:?} (text|json)"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_parsing() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("64M").unwrap(), 67_108_864);
        assert_eq!(parse_size("512MB").unwrap(), 536_870_912);
        assert_eq!(parse_size("1G").unwrap(), 1_073_741_824);
        assert_eq!(parse_size("1.5G").unwrap(), 1_610_612_736);
        assert_eq!(parse_size("2k").unwrap(), 2048);
    }

    #[test]
    fn size_parsing_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("12X").is_err());
        assert!(parse_size("M").is_err());
        assert!(parse_size("-5M").is_err());
    }

    #[test]
    fn mount_spec_parsing() {
        assert_eq!(parse_mount("/etc:/mnt/etc").unwrap(), ("/etc", "/mnt/etc"));
        assert!(parse_mount("/etc").is_err());
        assert!(parse_mount(":/dest").is_err());
        assert!(parse_mount("/src:").is_err());
    }

    #[test]
    fn fs_mode_parsing() {
        assert_eq!(parse_fs("tmpfs"), FsMode::Tmpfs);
        assert_eq!(parse_fs("host"), FsMode::Host);
        assert_eq!(parse_fs("/srv/rootfs"), FsMode::Rootfs("/srv/rootfs".into()));
    }

    #[test]
    fn cap_parsing() {
        let opts = parse_caps(
            &["NET_ADMIN".to_string()],
            &["all".to_string(), "CAP_CHOWN".to_string()],
        )
        .unwrap();
        assert!(opts.drop_all);
        assert_eq!(opts.add.len(), 1);
        assert_eq!(opts.drop.len(), 1);

        assert!(parse_caps(&["CAP_BOGUS".to_string()], &[]).is_err());
    }

    #[test]
    fn cli_parses_scenario_invocations() {
        let cli = Cli::parse_from([
            "microbox", "--fs", "tmpfs", "--memory", "64M", "--", "/bin/sh", "-c", "echo hi",
        ]);
        assert_eq!(cli.fs, "tmpfs");
        assert_eq!(cli.memory, "64M");
        assert_eq!(cli.argv, ["/bin/sh", "-c", "echo hi"]);

        let cli = Cli::parse_from([
            "microbox",
            "--cpus",
            "0.5",
            "--hostname",
            "alpha",
            "--deny-syscall",
            "mount",
            "--",
            "/bin/true",
        ]);
        assert_eq!(cli.cpus, 0.5);
        assert_eq!(cli.hostname.as_deref(), Some("alpha"));
        assert_eq!(cli.deny_syscall, ["mount"]);
    }
}
