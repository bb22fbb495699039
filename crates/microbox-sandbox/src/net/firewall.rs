//! NAT and forwarding rules for bridged sandboxes.
//!
//! Prefers the `iptables` binary, falling back to `nft`. Every invocation
//! is idempotent: iptables rules are probed with `-C` before an `-I chain 1`
//! insert (top of chain, so the sandbox's rules win over Docker's), and the
//! nft backend owns a dedicated table it can flush and rebuild. Rules are
//! left in place at teardown; re-running a sandbox converges to the same
//! rule set.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

enum Backend {
    Iptables(PathBuf),
    Nft(PathBuf),
}

fn detect_backend() -> Result<Backend> {
    if let Some(path) = find_in_path("iptables") {
        return Ok(Backend::Iptables(path));
    }
    if let Some(path) = find_in_path("nft") {
        return Ok(Backend::Nft(path));
    }
    Err(Error::FirewallFailed(
        "neither iptables nor nft found; install the iptables or nftables package".into(),
    ))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .chain([PathBuf::from("/usr/sbin"), PathBuf::from("/sbin")])
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Allows forwarding between `bridge` and the default egress interface and
/// masquerades traffic leaving `subnet`.
pub fn install_rules(bridge: &str, subnet: &str) -> Result<()> {
    let egress = default_interface()?;
    match detect_backend()? {
        Backend::Iptables(bin) => install_iptables(&bin, bridge, subnet, &egress),
        Backend::Nft(bin) => install_nft(&bin, bridge, subnet, &egress),
    }
}

/// Turns on host IPv4 forwarding; without it the bridge is a dead end.
pub fn enable_ipv4_forwarding() -> Result<()> {
    std::fs::write("/proc/sys/net/ipv4/ip_forward", "1\n")
        .map_err(|e| Error::FirewallFailed(format!("enable ipv4 forwarding: {e}")))
}

/// One iptables rule body, bound to a table and chain.
struct IptRule {
    table: &'static str,
    chain: &'static str,
    body: Vec<String>,
    required: bool,
}

/// The rule set for one bridge/egress pair.
fn iptables_rules(bridge: &str, subnet: &str, egress: &str) -> Vec<IptRule> {
    let args = |list: &[&str]| list.iter().map(|s| (*s).to_string()).collect();
    vec![
        // Outbound: bridge -> egress.
        IptRule {
            table: "filter",
            chain: "FORWARD",
            body: args(&["-i", bridge, "-o", egress, "-j", "ACCEPT"]),
            required: true,
        },
        // Return traffic for established flows.
        IptRule {
            table: "filter",
            chain: "FORWARD",
            body: args(&[
                "-i", egress, "-o", bridge, "-m", "conntrack", "--ctstate",
                "RELATED,ESTABLISHED", "-j", "ACCEPT",
            ]),
            required: true,
        },
        // Intra-bridge traffic between sandboxes; optional.
        IptRule {
            table: "filter",
            chain: "FORWARD",
            body: args(&[
                "-i", bridge, "-o", bridge, "-s", subnet, "-d", subnet, "-j", "ACCEPT",
            ]),
            required: false,
        },
        // Masquerade anything from the subnet not staying on the bridge.
        IptRule {
            table: "nat",
            chain: "POSTROUTING",
            body: args(&["-s", subnet, "!", "-o", bridge, "-j", "MASQUERADE"]),
            required: true,
        },
    ]
}

fn install_iptables(bin: &Path, bridge: &str, subnet: &str, egress: &str) -> Result<()> {
    for rule in iptables_rules(bridge, subnet, egress) {
        match ensure_iptables_rule(bin, &rule) {
            Ok(()) => {}
            Err(e) if rule.required => return Err(e),
            Err(e) => tracing::debug!(error = %e, "optional rule skipped"),
        }
    }
    Ok(())
}

/// Check-then-insert at position 1.
fn ensure_iptables_rule(bin: &Path, rule: &IptRule) -> Result<()> {
    let exists = Command::new(bin)
        .args(["-t", rule.table, "-C", rule.chain])
        .args(&rule.body)
        .output()
        .map_err(|e| Error::FirewallFailed(format!("{}: {e}", bin.display())))?
        .status
        .success();
    if exists {
        return Ok(());
    }

    run(bin, |cmd| {
        cmd.args(["-t", rule.table, "-I", rule.chain, "1"]).args(&rule.body);
    })
}

/// The nft backend owns table `ip microbox` outright: recreate the chains
/// at a priority ahead of the standard hooks, flush, and repopulate.
fn install_nft(bin: &Path, bridge: &str, subnet: &str, egress: &str) -> Result<()> {
    run(bin, |c| {
        c.args(["add", "table", "ip", "microbox"]);
    })?;
    run(bin, |c| {
        c.args([
            "add", "chain", "ip", "microbox", "forward",
            "{ type filter hook forward priority -10 ; policy accept ; }",
        ]);
    })?;
    run(bin, |c| {
        c.args([
            "add", "chain", "ip", "microbox", "postrouting",
            "{ type nat hook postrouting priority 90 ; }",
        ]);
    })?;
    run(bin, |c| {
        c.args(["flush", "table", "ip", "microbox"]);
    })?;

    run(bin, |c| {
        c.args(["add", "rule", "ip", "microbox", "forward"])
            .args(["iifname", bridge, "oifname", egress, "accept"]);
    })?;
    run(bin, |c| {
        c.args(["add", "rule", "ip", "microbox", "forward"])
            .args(["iifname", egress, "oifname", bridge])
            .args(["ct", "state", "related,established", "accept"]);
    })?;
    run(bin, |c| {
        c.args(["add", "rule", "ip", "microbox", "forward"])
            .args(["iifname", bridge, "oifname", bridge])
            .args(["ip", "saddr", subnet, "ip", "daddr", subnet, "accept"]);
    })?;
    run(bin, |c| {
        c.args(["add", "rule", "ip", "microbox", "postrouting"])
            .args(["ip", "saddr", subnet, "oifname", "!=", bridge, "masquerade"]);
    })
}

fn run(bin: &Path, configure: impl FnOnce(&mut Command)) -> Result<()> {
    let mut cmd = Command::new(bin);
    configure(&mut cmd);
    let output = cmd
        .output()
        .map_err(|e| Error::FirewallFailed(format!("{}: {e}", bin.display())))?;
    if !output.status.success() {
        return Err(Error::FirewallFailed(format!(
            "{} exited with {}: {}",
            bin.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Name of the interface carrying the default route, from the main
/// routing table (`/proc/net/route`).
pub fn default_interface() -> Result<String> {
    let table = std::fs::read_to_string("/proc/net/route")
        .map_err(|e| Error::FirewallFailed(format!("read /proc/net/route: {e}")))?;
    parse_default_interface(&table)
        .ok_or_else(|| Error::FirewallFailed("default route interface not found".into()))
}

fn parse_default_interface(table: &str) -> Option<String> {
    const RTF_UP: u32 = 0x1;

    for line in table.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let iface = fields.next()?;
        let dest = fields.next()?;
        let _gateway = fields.next()?;
        let flags = u32::from_str_radix(fields.next()?, 16).ok()?;
        if dest == "00000000" && flags & RTF_UP != 0 {
            return Some(iface.to_string());
        }
    }
    None
}

/// True if `ip` falls inside `subnet` (dotted CIDR). Used by integration
/// tests to validate leases against the bridge subnet.
#[must_use]
pub fn subnet_contains(subnet: &str, ip: Ipv4Addr) -> bool {
    let Some((net, prefix)) = subnet.split_once('/') else {
        return false;
    };
    let (Ok(net), Ok(prefix)) = (net.parse::<Ipv4Addr>(), prefix.parse::<u8>()) else {
        return false;
    };
    if prefix > 32 {
        return false;
    }
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    u32::from(ip) & mask == u32::from(net) & mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_route_parsing() {
        let table = "Iface\tDestination\tGateway\tFlags\tRefCnt\tUse\tMetric\tMask\n\
                     eth0\t00000000\t0101A8C0\t0003\t0\t0\t100\t00000000\n\
                     eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\n";
        assert_eq!(parse_default_interface(table), Some("eth0".to_string()));
    }

    #[test]
    fn no_default_route() {
        let table = "Iface\tDestination\tGateway\tFlags\tRefCnt\tUse\tMetric\tMask\n\
                     eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\n";
        assert_eq!(parse_default_interface(table), None);
    }

    #[test]
    fn down_default_route_is_ignored() {
        let table = "Iface\tDestination\tGateway\tFlags\tRefCnt\tUse\tMetric\tMask\n\
                     tun0\t00000000\t0101A8C0\t0000\t0\t0\t100\t00000000\n";
        assert_eq!(parse_default_interface(table), None);
    }

    #[test]
    fn iptables_rule_set_shape() {
        let rules = iptables_rules("mbx0", "10.44.0.0/24", "eth0");
        assert_eq!(rules.len(), 4);

        // Forwarding rules live in filter/FORWARD, NAT in nat/POSTROUTING.
        assert!(rules[..3].iter().all(|r| (r.table, r.chain) == ("filter", "FORWARD")));
        assert_eq!((rules[3].table, rules[3].chain), ("nat", "POSTROUTING"));
        assert!(rules[3].body.contains(&"MASQUERADE".to_string()));

        // Only the intra-bridge rule is optional.
        let optional: Vec<bool> = rules.iter().map(|r| !r.required).collect();
        assert_eq!(optional, [false, false, true, false]);
    }

    #[test]
    fn iptables_rules_name_the_interfaces() {
        let rules = iptables_rules("br7", "10.9.0.0/24", "wan0");
        for rule in &rules {
            let joined = rule.body.join(" ");
            assert!(
                joined.contains("br7") || joined.contains("10.9.0.0/24"),
                "{joined}"
            );
        }
    }

    #[test]
    fn subnet_membership() {
        let ip = "10.44.0.17".parse().unwrap();
        assert!(subnet_contains("10.44.0.0/24", ip));
        assert!(!subnet_contains("10.45.0.0/24", ip));
        assert!(!subnet_contains("garbage", ip));
    }
}
