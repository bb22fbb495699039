//! Bridged networking for sandboxes.
//!
//! One shared bridge (`mbx0`, 10.44.0.0/24) serves every sandbox on the
//! host; each launch gets a veth pair, an address leased from the
//! persistent allocator, and NAT egress through the default interface.
//!
//! The split across the process boundary:
//!
//! - **pre-clone** (parent): lease the address and derive the
//!   [`NetConfig`], so the child inherits it through its copied address
//!   space (the wake byte carries no payload).
//! - **post-clone** (parent): bridge, veth pair, peer moved into the child
//!   netns, forwarding and firewall rules. All before the wake byte.
//! - **post-wake** (child): wait for the peer, rename to `eth0`, assign the
//!   lease, default-route via the bridge.
//!
//! Teardown deletes the host veth (killing the pair) and releases the
//! lease. The bridge and firewall rules are shared and stay.

pub mod firewall;
pub mod ipam;
pub mod link;

use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::Result;

/// Fixed bridge shared by all sandboxes.
pub const BRIDGE_NAME: &str = "mbx0";
/// Sandbox subnet.
pub const SUBNET_CIDR: &str = "10.44.0.0/24";
/// Gateway address carried by the bridge.
pub const BRIDGE_IP: Ipv4Addr = Ipv4Addr::new(10, 44, 0, 1);
/// Prefix length of the sandbox subnet.
pub const PREFIX_LEN: u8 = 24;

/// Everything both sides need to plumb one sandbox's network.
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub bridge_name: String,
    pub subnet_cidr: String,
    pub bridge_ip: Ipv4Addr,
    pub container_ip: Ipv4Addr,
    pub prefix: u8,
}

/// Host-side network state owned by the parent.
pub struct NetworkHandle {
    pub config: NetConfig,
    lease: ipam::IpamLease,
    host_veth: Option<String>,
}

/// Leases an address and derives the per-sandbox [`NetConfig`].
///
/// Called before `clone3` so the child inherits the result.
pub fn allocate(db_path: &Path) -> Result<NetworkHandle> {
    let lease = ipam::allocate(SUBNET_CIDR, db_path, &[BRIDGE_IP])?;
    let config = NetConfig {
        bridge_name: BRIDGE_NAME.to_string(),
        subnet_cidr: SUBNET_CIDR.to_string(),
        bridge_ip: BRIDGE_IP,
        container_ip: lease.ip(),
        prefix: PREFIX_LEN,
    };
    Ok(NetworkHandle {
        config,
        lease,
        host_veth: None,
    })
}

impl NetworkHandle {
    /// Host-side plumbing: bridge, veth pair, peer handoff, forwarding,
    /// firewall. Runs in the parent while the child blocks on the pipe.
    pub fn setup_host_side(&mut self, child_pid: i32) -> Result<()> {
        let host_veth = link::setup_host_side(&self.config, child_pid)?;
        self.host_veth = Some(host_veth);

        firewall::enable_ipv4_forwarding()?;
        firewall::install_rules(&self.config.bridge_name, &self.config.subnet_cidr)?;
        Ok(())
    }

    /// Removes the veth pair and returns the lease. Each step is
    /// best-effort; failures are logged and the rest proceeds.
    pub fn teardown(mut self) {
        if let Some(host_veth) = self.host_veth.take() {
            if let Err(e) = link::delete_host_veth(&host_veth) {
                tracing::warn!(veth = host_veth, error = %e, "veth cleanup failed");
            }
        }
        if let Err(e) = self.lease.release() {
            tracing::warn!(ip = %self.lease.ip(), error = %e, "lease release failed");
        }
    }
}

/// Child-side finalization inside the new netns.
pub fn configure_child(config: &NetConfig) -> Result<()> {
    link::configure_child(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_constants_are_consistent() {
        assert!(firewall::subnet_contains(SUBNET_CIDR, BRIDGE_IP));
        assert!(BRIDGE_NAME.len() <= 15);
    }

    #[test]
    fn allocation_derives_config() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("ipam.db");

        let handle = allocate(&db).unwrap();
        assert_eq!(handle.config.bridge_ip, BRIDGE_IP);
        assert_ne!(handle.config.container_ip, BRIDGE_IP);
        assert!(firewall::subnet_contains(
            SUBNET_CIDR,
            handle.config.container_ip
        ));

        // Teardown releases the lease even without host-side setup. The
        // veth deletion is skipped because none was created.
        handle.teardown();
        let again = allocate(&db).unwrap();
        assert_eq!(again.config.container_ip, Ipv4Addr::new(10, 44, 0, 2));
        again.teardown();
    }
}
