//! Environment assembly for the sandboxed command.
//!
//! The child's environment is computed once, before spawn: the baseline keys
//! in a fixed order first (with user overrides applied in place), then any
//! extra user keys in sorted order. Repeated merges of the same inputs are
//! byte-identical, which keeps launches reproducible.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Baseline environment, in the order it appears in the child.
pub const BASELINE: &[(&str, &str)] = &[
    ("PATH", "/usr/bin:/bin:/usr/sbin:/sbin:/usr/local/bin"),
    ("HOME", "/root"),
    ("TERM", "xterm"),
    ("LANG", "C.UTF-8"),
];

/// One environment entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Parses a `KEY=VALUE` specification.
///
/// # Errors
///
/// Returns `InvalidOption` when the `=` is missing or the key is empty.
pub fn parse(kv: &str) -> Result<EnvVar> {
    match kv.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok(EnvVar::new(key, value)),
        _ => Err(Error::InvalidOption(format!(
            "bad --env {kv:?} (expected KEY=VALUE)"
        ))),
    }
}

/// Merges the baseline with user entries.
///
/// Baseline keys come first in their fixed order, carrying user overrides;
/// remaining user keys follow in sorted order. Later duplicates among the
/// user entries win.
#[must_use]
pub fn merge(user: &[EnvVar]) -> Vec<EnvVar> {
    let mut merged: BTreeMap<&str, &str> = BASELINE.iter().copied().collect();
    for var in user {
        merged.insert(&var.key, &var.value);
    }

    let mut out = Vec::with_capacity(merged.len());
    for (key, _) in BASELINE {
        if let Some(value) = merged.remove(key) {
            out.push(EnvVar::new(*key, value));
        }
    }
    // BTreeMap iteration gives the extra user keys in sorted order.
    for (key, value) in merged {
        out.push(EnvVar::new(key, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid() {
        let var = parse("FOO=bar").unwrap();
        assert_eq!(var, EnvVar::new("FOO", "bar"));
        // Empty values are allowed, as are values containing '='.
        assert_eq!(parse("FOO=").unwrap(), EnvVar::new("FOO", ""));
        assert_eq!(parse("A=b=c").unwrap(), EnvVar::new("A", "b=c"));
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse("NOEQUALS").is_err());
        assert!(parse("=value").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn merge_baseline_order_and_overrides() {
        let user = [EnvVar::new("ZEBRA", "1"), EnvVar::new("HOME", "/tmp")];
        let merged = merge(&user);

        let keys: Vec<&str> = merged.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["PATH", "HOME", "TERM", "LANG", "ZEBRA"]);
        assert_eq!(merged[1].value, "/tmp");
    }

    #[test]
    fn merge_extra_keys_sorted() {
        let user = [
            EnvVar::new("B", "2"),
            EnvVar::new("A", "1"),
            EnvVar::new("C", "3"),
        ];
        let keys: Vec<String> = merge(&user).into_iter().map(|e| e.key).collect();
        assert_eq!(keys[4..], ["A", "B", "C"]);
    }

    #[test]
    fn merge_is_stable() {
        let user = [EnvVar::new("X", "1"), EnvVar::new("HOME", "/elsewhere")];
        assert_eq!(merge(&user), merge(&user));
    }
}
