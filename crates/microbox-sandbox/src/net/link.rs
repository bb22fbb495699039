//! Bridge and veth plumbing over rtnetlink.
//!
//! Network-namespace state is per-thread on Linux, so every operation here
//! runs on a scoped current-thread runtime owned by the calling process:
//! the parent for host-side plumbing, the child (already inside its netns)
//! for interface finalization. No runtime exists at clone time.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use futures::TryStreamExt;
use rtnetlink::Handle;

use crate::error::{Error, Result};
use crate::net::NetConfig;

/// In-sandbox name of the container interface.
const CONTAINER_IFNAME: &str = "eth0";

/// Bounded wait for the veth peer to appear in the child netns.
const LINK_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const LINK_WAIT_POLL: Duration = Duration::from_millis(50);

/// Host-side veth name for a child PID (15-char interface limit safe).
#[must_use]
pub fn host_veth_name(child_pid: i32) -> String {
    format!("vmbx{child_pid}")
}

/// Peer veth name as created on the host, before the move.
#[must_use]
pub fn peer_veth_name(child_pid: i32) -> String {
    format!("cvmbx{child_pid}")
}

fn netlink_err(what: impl std::fmt::Display, e: impl std::fmt::Display) -> Error {
    Error::NetlinkFailed(format!("{what}: {e}"))
}

/// EEXIST from the kernel is fine everywhere we create shared objects.
fn ok_if_exists(result: std::result::Result<(), rtnetlink::Error>) -> std::result::Result<(), rtnetlink::Error> {
    match result {
        Err(rtnetlink::Error::NetlinkError(ref msg)) if msg.raw_code() == -libc::EEXIST => Ok(()),
        other => other,
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .map_err(|e| netlink_err("tokio runtime", e))
}

fn connect() -> Result<Handle> {
    let (connection, handle, _) =
        rtnetlink::new_connection().map_err(|e| netlink_err("netlink socket", e))?;
    tokio::spawn(connection);
    Ok(handle)
}

/// Index of a link by name, or `None` when the kernel doesn't know it.
async fn link_index(handle: &Handle, name: &str) -> Option<u32> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(Some(msg)) => Some(msg.header.index),
        _ => None,
    }
}

/// Host side: ensures the bridge, creates the veth pair, enslaves and
/// raises the host end, and pushes the peer into the child's netns.
///
/// Returns the host veth name for later teardown.
pub fn setup_host_side(cfg: &NetConfig, child_pid: i32) -> Result<String> {
    let rt = runtime()?;
    rt.block_on(async {
        let handle = connect()?;

        let bridge_index = ensure_bridge(&handle, cfg).await?;

        let host_name = host_veth_name(child_pid);
        let peer_name = peer_veth_name(child_pid);
        ok_if_exists(
            handle
                .link()
                .add()
                .veth(host_name.clone(), peer_name.clone())
                .execute()
                .await,
        )
        .map_err(|e| netlink_err(format!("create veth {host_name}"), e))?;

        let host_index = link_index(&handle, &host_name)
            .await
            .ok_or_else(|| netlink_err(&host_name, "host veth did not appear"))?;
        let peer_index = link_index(&handle, &peer_name)
            .await
            .ok_or_else(|| netlink_err(&peer_name, "peer veth did not appear"))?;

        handle
            .link()
            .set(host_index)
            .master(bridge_index)
            .execute()
            .await
            .map_err(|e| netlink_err(format!("enslave {host_name}"), e))?;
        handle
            .link()
            .set(host_index)
            .up()
            .execute()
            .await
            .map_err(|e| netlink_err(format!("bring up {host_name}"), e))?;

        #[allow(clippy::cast_sign_loss)]
        handle
            .link()
            .set(peer_index)
            .setns_by_pid(child_pid as u32)
            .execute()
            .await
            .map_err(|e| netlink_err(format!("move {peer_name} to pid {child_pid}"), e))?;

        tracing::debug!(bridge = cfg.bridge_name, host = host_name, "host networking ready");
        Ok(host_name)
    })
}

/// Create-if-absent bridge carrying the gateway address, up.
async fn ensure_bridge(handle: &Handle, cfg: &NetConfig) -> Result<u32> {
    let index = match link_index(handle, &cfg.bridge_name).await {
        Some(index) => index,
        None => {
            ok_if_exists(
                handle
                    .link()
                    .add()
                    .bridge(cfg.bridge_name.clone())
                    .execute()
                    .await,
            )
            .map_err(|e| netlink_err(format!("create bridge {}", cfg.bridge_name), e))?;
            link_index(handle, &cfg.bridge_name)
                .await
                .ok_or_else(|| netlink_err(&cfg.bridge_name, "bridge did not appear"))?
        }
    };

    handle
        .link()
        .set(index)
        .up()
        .execute()
        .await
        .map_err(|e| netlink_err(format!("bring up {}", cfg.bridge_name), e))?;

    ok_if_exists(
        handle
            .address()
            .add(index, IpAddr::V4(cfg.bridge_ip), cfg.prefix)
            .execute()
            .await,
    )
    .map_err(|e| netlink_err(format!("address {} on {}", cfg.bridge_ip, cfg.bridge_name), e))?;

    Ok(index)
}

/// Deletes the host veth; its peer dies with it.
pub fn delete_host_veth(name: &str) -> Result<()> {
    let rt = runtime()?;
    rt.block_on(async {
        let handle = connect()?;
        let Some(index) = link_index(&handle, name).await else {
            // Already gone (the kernel removes the pair when the netns dies).
            return Ok(());
        };
        handle
            .link()
            .del(index)
            .execute()
            .await
            .map_err(|e| netlink_err(format!("delete {name}"), e))
    })
}

/// Child side, inside the new netns: waits for the moved peer, renames it
/// `eth0`, raises loopback and the peer, assigns the leased address and
/// routes everything through the bridge.
pub fn configure_child(cfg: &NetConfig) -> Result<()> {
    let rt = runtime()?;
    rt.block_on(async {
        let handle = connect()?;

        let peer_index = wait_for_peer(&handle).await?;

        handle
            .link()
            .set(peer_index)
            .name(CONTAINER_IFNAME.to_string())
            .execute()
            .await
            .map_err(|e| netlink_err("rename container interface", e))?;

        if let Some(lo) = link_index(&handle, "lo").await {
            let _ = handle.link().set(lo).up().execute().await;
        }

        // Up before address assignment; some drivers ENODEV otherwise.
        handle
            .link()
            .set(peer_index)
            .up()
            .execute()
            .await
            .map_err(|e| netlink_err("bring up container interface", e))?;

        let addr = IpAddr::V4(cfg.container_ip);
        let assign = handle.address().add(peer_index, addr, cfg.prefix);
        if let Err(first) = ok_if_exists(assign.execute().await) {
            // Transient ENODEV race right after the move; one retry.
            tokio::time::sleep(Duration::from_millis(100)).await;
            ok_if_exists(
                handle
                    .address()
                    .add(peer_index, addr, cfg.prefix)
                    .execute()
                    .await,
            )
            .map_err(|_| netlink_err(format!("assign {addr}"), first))?;
        }

        ok_if_exists(
            handle
                .route()
                .add()
                .v4()
                .gateway(cfg.bridge_ip)
                .execute()
                .await,
        )
        .map_err(|e| netlink_err(format!("default route via {}", cfg.bridge_ip), e))?;

        Ok(())
    })
}

/// The moved peer appears asynchronously; poll for the first
/// non-loopback link.
async fn wait_for_peer(handle: &Handle) -> Result<u32> {
    let deadline = Instant::now() + LINK_WAIT_TIMEOUT;
    loop {
        let mut links = handle.link().get().execute();
        while let Ok(Some(msg)) = links.try_next().await {
            if msg.header.link_layer_type != libc::ARPHRD_LOOPBACK {
                return Ok(msg.header.index);
            }
        }
        if Instant::now() >= deadline {
            return Err(Error::NetlinkFailed(
                "container interface did not appear".into(),
            ));
        }
        tokio::time::sleep(LINK_WAIT_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn veth_names_fit_interface_limit() {
        // PIDs go up to 2^22 (7 digits); names must stay under 15 chars.
        let host = host_veth_name(4_194_304);
        let peer = peer_veth_name(4_194_304);
        assert!(host.len() <= 15, "{host}");
        assert!(peer.len() <= 15, "{peer}");
        assert_ne!(host, peer);
    }

    #[test]
    fn veth_names_are_per_pid() {
        assert_ne!(host_veth_name(100), host_veth_name(101));
    }
}
