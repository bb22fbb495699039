//! Persistent IPv4 address leases.
//!
//! Allocations live in a single-file transactional store (redb), one table
//! per subnet CIDR, keyed by dotted-quad string with a one-byte value. The
//! database is opened per operation rather than held for the sandbox's
//! lifetime: concurrent launches then serialize on short write transactions
//! instead of blocking each other for seconds. An open that cannot win the
//! file lock within two seconds reports busy.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{Error, Result};

/// Where leases persist across runs.
pub const DEFAULT_DB_PATH: &str = "/var/run/microbox/ipam.db";

const OPEN_TIMEOUT: Duration = Duration::from_secs(2);
const OPEN_RETRY: Duration = Duration::from_millis(50);

/// A single allocated IPv4 address inside a subnet.
///
/// The store entry survives until [`IpamLease::release`] or process death;
/// leaked entries from crashed runs are reclaimed by releasing them with a
/// fresh lease value.
#[derive(Debug)]
pub struct IpamLease {
    db_path: PathBuf,
    subnet: String,
    ip: Ipv4Addr,
    prefix: u8,
    released: bool,
}

/// Reserves the first free address in `subnet_cidr`.
///
/// The network and broadcast addresses are never handed out; `reserved`
/// adds further exclusions (typically the bridge IP).
///
/// # Errors
///
/// `InvalidOption` for a malformed or non-IPv4 CIDR, `IpamBusy` when the
/// store stays locked past the timeout, `IpamExhausted` when every address
/// is taken.
pub fn allocate(subnet_cidr: &str, db_path: &Path, reserved: &[Ipv4Addr]) -> Result<IpamLease> {
    let (network, prefix) = parse_cidr(subnet_cidr)?;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::IpamBusy(format!("mkdir {}: {e}", parent.display())))?;
    }

    let db = open_db(db_path)?;
    let table: TableDefinition<&str, &[u8]> = TableDefinition::new(subnet_cidr);

    let tx = db
        .begin_write()
        .map_err(|e| Error::IpamBusy(e.to_string()))?;
    let picked = {
        let mut entries = tx
            .open_table(table)
            .map_err(|e| Error::IpamBusy(e.to_string()))?;

        let mut picked = None;
        for candidate in host_addresses(network, prefix) {
            if reserved.contains(&candidate) {
                continue;
            }
            let key = candidate.to_string();
            let taken = entries
                .get(key.as_str())
                .map_err(|e| Error::IpamBusy(e.to_string()))?
                .is_some();
            if taken {
                continue;
            }
            entries
                .insert(key.as_str(), [1u8].as_slice())
                .map_err(|e| Error::IpamBusy(e.to_string()))?;
            picked = Some(candidate);
            break;
        }
        picked
    };
    tx.commit().map_err(|e| Error::IpamBusy(e.to_string()))?;

    let Some(ip) = picked else {
        return Err(Error::IpamExhausted(subnet_cidr.to_string()));
    };

    tracing::debug!(%ip, subnet = subnet_cidr, "address leased");
    Ok(IpamLease {
        db_path: db_path.to_path_buf(),
        subnet: subnet_cidr.to_string(),
        ip,
        prefix,
        released: false,
    })
}

impl IpamLease {
    /// The leased address.
    #[must_use]
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// The leased address in CIDR notation.
    #[must_use]
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.ip, self.prefix)
    }

    /// Returns the address to the pool. Safe to call more than once.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let db = open_db(&self.db_path)?;
        let table: TableDefinition<&str, &[u8]> = TableDefinition::new(&self.subnet);

        let tx = db
            .begin_write()
            .map_err(|e| Error::IpamBusy(e.to_string()))?;
        {
            let mut entries = tx
                .open_table(table)
                .map_err(|e| Error::IpamBusy(e.to_string()))?;
            entries
                .remove(self.ip.to_string().as_str())
                .map_err(|e| Error::IpamBusy(e.to_string()))?;
        }
        tx.commit().map_err(|e| Error::IpamBusy(e.to_string()))?;

        self.released = true;
        Ok(())
    }
}

/// Opens the store, retrying lock conflicts until the timeout.
fn open_db(path: &Path) -> Result<Database> {
    let deadline = Instant::now() + OPEN_TIMEOUT;
    loop {
        match Database::create(path) {
            Ok(db) => return Ok(db),
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err(Error::IpamBusy(format!("{}: {e}", path.display())));
                }
                std::thread::sleep(OPEN_RETRY);
            }
        }
    }
}

/// Parses an IPv4 CIDR into its network address and prefix length.
fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let bad = || Error::InvalidOption(format!("invalid subnet CIDR {cidr:?}"));

    let (addr, prefix) = cidr.split_once('/').ok_or_else(bad)?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| bad())?;
    let prefix: u8 = prefix.parse().map_err(|_| bad())?;
    if prefix > 32 {
        return Err(bad());
    }

    let mask = prefix_mask(prefix);
    Ok((Ipv4Addr::from(u32::from(addr) & mask), prefix))
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

/// Addresses strictly between network and broadcast, in order.
fn host_addresses(network: Ipv4Addr, prefix: u8) -> impl Iterator<Item = Ipv4Addr> {
    let base = u32::from(network);
    let broadcast = base | !prefix_mask(prefix);
    let first = base.saturating_add(1);
    (first..broadcast).map(Ipv4Addr::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_parsing() {
        assert_eq!(
            parse_cidr("10.44.0.0/24").unwrap(),
            (Ipv4Addr::new(10, 44, 0, 0), 24)
        );
        // Host bits are masked off.
        assert_eq!(
            parse_cidr("10.44.0.17/24").unwrap(),
            (Ipv4Addr::new(10, 44, 0, 0), 24)
        );
        assert!(parse_cidr("10.44.0.0").is_err());
        assert!(parse_cidr("10.44.0.0/33").is_err());
        assert!(parse_cidr("fe80::/64").is_err());
    }

    #[test]
    fn host_range_excludes_network_and_broadcast() {
        let addrs: Vec<_> = host_addresses(Ipv4Addr::new(10, 0, 0, 0), 30).collect();
        assert_eq!(
            addrs,
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)]
        );

        // /31 and /32 have no allocatable hosts under this scheme.
        assert_eq!(host_addresses(Ipv4Addr::new(10, 0, 0, 0), 31).count(), 0);
        assert_eq!(host_addresses(Ipv4Addr::new(10, 0, 0, 0), 32).count(), 0);
    }

    #[test]
    fn allocate_and_release_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("ipam.db");

        let mut a = allocate("10.90.0.0/24", &db, &[]).unwrap();
        let mut b = allocate("10.90.0.0/24", &db, &[]).unwrap();
        assert_eq!(a.ip(), Ipv4Addr::new(10, 90, 0, 1));
        assert_eq!(b.ip(), Ipv4Addr::new(10, 90, 0, 2));
        assert_eq!(a.cidr(), "10.90.0.1/24");

        a.release().unwrap();
        let c = allocate("10.90.0.0/24", &db, &[]).unwrap();
        assert_eq!(c.ip(), Ipv4Addr::new(10, 90, 0, 1));

        b.release().unwrap();
        // Releasing again is a no-op.
        b.release().unwrap();
    }

    #[test]
    fn reserved_addresses_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("ipam.db");
        let bridge = Ipv4Addr::new(10, 91, 0, 1);

        let lease = allocate("10.91.0.0/24", &db, &[bridge]).unwrap();
        assert_eq!(lease.ip(), Ipv4Addr::new(10, 91, 0, 2));
    }

    #[test]
    fn exhaustion_on_slash30() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("ipam.db");
        let bridge = Ipv4Addr::new(10, 92, 0, 1);

        // A /30 with the bridge reserved leaves exactly one address.
        let lease = allocate("10.92.0.0/30", &db, &[bridge]).unwrap();
        assert_eq!(lease.ip(), Ipv4Addr::new(10, 92, 0, 2));

        match allocate("10.92.0.0/30", &db, &[bridge]) {
            Err(Error::IpamExhausted(subnet)) => assert_eq!(subnet, "10.92.0.0/30"),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn subnets_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("ipam.db");

        let a = allocate("10.93.0.0/24", &db, &[]).unwrap();
        let b = allocate("10.94.0.0/24", &db, &[]).unwrap();
        assert_eq!(a.ip(), Ipv4Addr::new(10, 93, 0, 1));
        assert_eq!(b.ip(), Ipv4Addr::new(10, 94, 0, 1));
    }
}
