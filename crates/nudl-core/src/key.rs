//! Label key encoding
//!
//! Every label this system writes has the form `<prefix>/<token>`. The token is
//! derived from a USB vendor/product pair (raw hex or resolved names) or from a
//! kernel module name. Keys are limited to `[A-Za-z0-9._-]` plus the single `/`
//! and must not exceed [`MAX_KEY_LEN`] characters.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::device::HardwareId;

/// Hard ceiling on label key length imposed by the cluster
pub const MAX_KEY_LEN: usize = 63;

/// Namespace used when no prefix is configured
pub const DEFAULT_PREFIX: &str = "nudl.squat.ai";

/// Length of a raw token (`vvvv_pppp`)
const RAW_TOKEN_LEN: usize = 9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("No vendor/product name known for {0}")]
    NameNotFound(HardwareId),
    #[error("Label key {key:?} is {len} characters long, limit is {MAX_KEY_LEN}")]
    KeyTooLong { key: String, len: usize },
    #[error("Invalid label prefix {0:?}")]
    InvalidPrefix(String),
    #[error("Invalid label token {0:?}")]
    InvalidToken(String),
}

/// How device tokens are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// `8086_0044`
    Raw,
    /// `Intel-Corp._CPU-DRAM-Controller`, falling back to raw
    #[default]
    Human,
}

/// Looks up human-readable vendor and product names
pub trait NameResolver: Send + Sync {
    /// Returns `(vendor, product)` when both names are known
    fn resolve(&self, id: HardwareId) -> Option<(String, String)>;
}

/// Turns hardware identifiers and module names into label keys
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
    forbidden: Regex,
}

impl KeyCodec {
    /// Create a codec for the given prefix.
    ///
    /// The prefix must itself be label-safe and leave room for a raw token, so
    /// that [`KeyCodec::raw`] can never produce an overlong key.
    pub fn new(prefix: &str) -> Result<Self, KeyError> {
        let forbidden = Regex::new(r"[^A-Za-z0-9._-]")
            .map_err(|_| KeyError::InvalidPrefix(prefix.to_string()))?;

        if prefix.is_empty()
            || forbidden.is_match(prefix)
            || prefix.len() + 1 + RAW_TOKEN_LEN > MAX_KEY_LEN
        {
            return Err(KeyError::InvalidPrefix(prefix.to_string()));
        }

        Ok(Self {
            prefix: prefix.to_string(),
            forbidden,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Replace every character outside `[A-Za-z0-9._-]` with `-`
    pub fn sanitize(&self, value: &str) -> String {
        self.forbidden.replace_all(value, "-").into_owned()
    }

    /// Raw hex key, always valid
    pub fn raw(&self, id: HardwareId) -> String {
        self.qualify(&id.raw_token())
    }

    /// Key built from resolved vendor and product names
    pub fn human(&self, id: HardwareId, names: &dyn NameResolver) -> Result<String, KeyError> {
        let (vendor, product) = names.resolve(id).ok_or(KeyError::NameNotFound(id))?;
        let token = format!("{}_{}", self.sanitize(vendor.trim()), self.sanitize(product.trim()));
        let token = trim_token(&token);
        if token.is_empty() {
            return Err(KeyError::NameNotFound(id));
        }

        self.checked(self.qualify(token))
    }

    pub fn encode(
        &self,
        id: HardwareId,
        mode: KeyMode,
        names: &dyn NameResolver,
    ) -> Result<String, KeyError> {
        match mode {
            KeyMode::Raw => Ok(self.raw(id)),
            KeyMode::Human => self.human(id, names),
        }
    }

    /// Encode in the requested mode, falling back to the raw key when names
    /// cannot be resolved or the result would be too long
    pub fn encode_or_raw(&self, id: HardwareId, mode: KeyMode, names: &dyn NameResolver) -> String {
        match self.encode(id, mode, names) {
            Ok(key) => key,
            Err(e) => {
                debug!(device = %id, reason = %e, "Falling back to raw label key");
                self.raw(id)
            }
        }
    }

    /// Key for a kernel module filter entry
    pub fn module(&self, name: &str) -> Result<String, KeyError> {
        let sanitized = self.sanitize(name.trim());
        let token = trim_token(&sanitized);
        if token.is_empty() {
            return Err(KeyError::InvalidToken(name.to_string()));
        }

        self.checked(self.qualify(token))
    }

    fn qualify(&self, token: &str) -> String {
        format!("{}/{}", self.prefix, token)
    }

    fn checked(&self, key: String) -> Result<String, KeyError> {
        if key.len() > MAX_KEY_LEN {
            let len = key.len();
            return Err(KeyError::KeyTooLong { key, len });
        }
        Ok(key)
    }
}

/// Whether `key` is under `<prefix>/`
pub fn is_managed_key(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Label names must start and end with an alphanumeric character
fn trim_token(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    struct NoNames;

    impl NameResolver for NoNames {
        fn resolve(&self, _id: HardwareId) -> Option<(String, String)> {
            None
        }
    }

    struct Table(HashMap<HardwareId, (String, String)>);

    impl Table {
        fn with(entries: &[(u16, u16, &str, &str)]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|&(v, p, vn, pn)| {
                        (HardwareId::new(v, p), (vn.to_string(), pn.to_string()))
                    })
                    .collect(),
            )
        }
    }

    impl NameResolver for Table {
        fn resolve(&self, id: HardwareId) -> Option<(String, String)> {
            self.0.get(&id).cloned()
        }
    }

    fn codec() -> KeyCodec {
        KeyCodec::new(DEFAULT_PREFIX).unwrap()
    }

    #[test]
    fn test_raw_key() {
        let key = codec().raw(HardwareId::new(0x8086, 0x0044));
        assert_eq!(key, "nudl.squat.ai/8086_0044");
    }

    #[test]
    fn test_human_key() {
        let names = Table::with(&[(0x8086, 0x0044, "Intel Corp.", "CPU DRAM Controller")]);
        let key = codec()
            .encode(HardwareId::new(0x8086, 0x0044), KeyMode::Human, &names)
            .unwrap();
        assert_eq!(key, "nudl.squat.ai/Intel-Corp._CPU-DRAM-Controller");
    }

    #[test]
    fn test_human_key_too_long_falls_back() {
        let names = Table::with(&[(
            0x8086,
            0x0200,
            "Intel Corp.",
            "82542 Gigabit Ethernet Controller (Fiber) with a very long name",
        )]);
        let id = HardwareId::new(0x8086, 0x0200);
        let codec = codec();

        assert!(matches!(
            codec.human(id, &names),
            Err(KeyError::KeyTooLong { .. })
        ));
        assert_eq!(
            codec.encode_or_raw(id, KeyMode::Human, &names),
            "nudl.squat.ai/8086_0200"
        );
    }

    #[test]
    fn test_human_key_unknown_names_fall_back() {
        let id = HardwareId::new(0xdead, 0xbeef);
        assert_eq!(codec().human(id, &NoNames), Err(KeyError::NameNotFound(id)));
        assert_eq!(
            codec().encode_or_raw(id, KeyMode::Human, &NoNames),
            "nudl.squat.ai/dead_beef"
        );
    }

    #[test]
    fn test_human_key_trims_edges() {
        let names = Table::with(&[(0x1d6b, 0x0002, "(Linux Foundation)", "2.0 root hub ")]);
        let key = codec().human(HardwareId::new(0x1d6b, 0x0002), &names).unwrap();
        assert_eq!(key, "nudl.squat.ai/Linux-Foundation-_2.0-root-hub");
    }

    #[test]
    fn test_module_key() {
        assert_eq!(codec().module("wireguard").unwrap(), "nudl.squat.ai/wireguard");
        assert_eq!(codec().module("nf conntrack").unwrap(), "nudl.squat.ai/nf-conntrack");
        assert!(matches!(codec().module("   "), Err(KeyError::InvalidToken(_))));
        assert!(matches!(
            codec().module(&"x".repeat(60)),
            Err(KeyError::KeyTooLong { .. })
        ));
    }

    #[test]
    fn test_invalid_prefixes() {
        assert!(KeyCodec::new("").is_err());
        assert!(KeyCodec::new("has space").is_err());
        assert!(KeyCodec::new("a/b").is_err());
        assert!(KeyCodec::new(&"p".repeat(54)).is_err());
        assert!(KeyCodec::new(&"p".repeat(53)).is_ok());
    }

    #[test]
    fn test_human_key_drops_trailing_dot() {
        let names = Table::with(&[
            (0x1234, 0x0001, "Foo", "Bar Inc."),
            (0x1234, 0x0002, "Foo Inc.", ""),
        ]);
        let codec = codec();

        assert_eq!(
            codec.human(HardwareId::new(0x1234, 0x0001), &names).unwrap(),
            "nudl.squat.ai/Foo_Bar-Inc"
        );
        assert_eq!(
            codec.human(HardwareId::new(0x1234, 0x0002), &names).unwrap(),
            "nudl.squat.ai/Foo-Inc"
        );
        assert_eq!(codec.module("nf_conntrack.").unwrap(), "nudl.squat.ai/nf_conntrack");
    }

    #[test]
    fn test_is_managed_key() {
        assert!(is_managed_key("nudl.squat.ai/8086_0044", DEFAULT_PREFIX));
        assert!(!is_managed_key("nudl.squat.ai.other/x", DEFAULT_PREFIX));
        assert!(!is_managed_key("kubernetes.io/hostname", DEFAULT_PREFIX));
    }

    proptest! {
        #[test]
        fn raw_keys_are_always_valid(vendor in any::<u16>(), product in any::<u16>()) {
            let key = codec().raw(HardwareId::new(vendor, product));
            prop_assert!(key.len() <= MAX_KEY_LEN);

            let token = key.strip_prefix("nudl.squat.ai/").unwrap();
            let (v, p) = token.split_once('_').unwrap();
            prop_assert_eq!(v.len(), 4);
            prop_assert_eq!(p.len(), 4);
            prop_assert!(token
                .chars()
                .all(|c| c == '_' || c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }

        #[test]
        fn human_keys_are_label_safe(vendor in ".{0,40}", product in ".{0,40}") {
            let names = Table::with(&[(1, 2, vendor.as_str(), product.as_str())]);
            let key = codec().encode_or_raw(HardwareId::new(1, 2), KeyMode::Human, &names);
            prop_assert!(key.len() <= MAX_KEY_LEN);

            let token = key.strip_prefix("nudl.squat.ai/").unwrap();
            prop_assert!(!token.is_empty());
            prop_assert!(token
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));
        }
    }
}
