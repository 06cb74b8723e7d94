//! Identity keys: hex ids/pubkeys and `(kind, pubkey, d-tag)` addresses.

use std::fmt;

use crate::error::{GraphError, Result};
use crate::event::{is_addressable_kind, Event};

/// Event id or public key as 64 lowercase hex characters.
pub type HexKey = String;

/// Upper bound for string components in address range scans.
pub const MAX_SENTINEL: &str = "\u{10FFFF}";

/// Validate and normalize a 32-byte hex identifier.
pub fn parse_hex_key(input: &str) -> Result<HexKey> {
    let trimmed = input.trim();
    if trimmed.len() != 64 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(GraphError::InvalidHex(input.to_string()));
    }
    Ok(trimmed.to_ascii_lowercase())
}

pub fn is_hex_key(input: &str) -> bool {
    parse_hex_key(input).is_ok()
}

/// Logical identity of a replaceable or addressable event.
///
/// Field order matters: the derived ordering sorts by kind, then author, then
/// d-tag, so all addresses of one kind form a contiguous range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    pub kind: u32,
    pub pubkey: HexKey,
    pub d_tag: String,
}

impl Address {
    pub fn new(kind: u32, pubkey: impl Into<String>, d_tag: impl Into<String>) -> Self {
        Self {
            kind,
            pubkey: pubkey.into(),
            d_tag: d_tag.into(),
        }
    }

    /// Address of an event if its kind is replaceable or addressable.
    pub fn of(event: &Event) -> Option<Self> {
        if !is_addressable_kind(event.kind) {
            return None;
        }
        Some(Self::new(event.kind, event.pubkey.clone(), event.d_tag()))
    }

    /// Parse an `a` tag value: `kind:pubkey:d-tag`. The d-tag may contain `:`.
    pub fn parse(tag: &str) -> Result<Self> {
        let mut parts = tag.splitn(3, ':');
        let kind = parts
            .next()
            .and_then(|k| k.parse::<u32>().ok())
            .ok_or_else(|| GraphError::InvalidAddress(tag.to_string()))?;
        let pubkey = parts
            .next()
            .ok_or_else(|| GraphError::InvalidAddress(tag.to_string()))
            .and_then(|p| {
                parse_hex_key(p).map_err(|_| GraphError::InvalidAddress(tag.to_string()))
            })?;
        let d_tag = parts.next().unwrap_or("");
        Ok(Self::new(kind, pubkey, d_tag))
    }

    /// Lowest address for a kind (and optionally an author).
    pub fn min_key(kind: u32, pubkey: Option<&str>) -> Self {
        Self::new(kind, pubkey.unwrap_or(""), "")
    }

    /// Highest address for a kind (and optionally an author).
    pub fn max_key(kind: u32, pubkey: Option<&str>) -> Self {
        Self::new(kind, pubkey.unwrap_or(MAX_SENTINEL), MAX_SENTINEL)
    }

    pub fn to_tag(&self) -> String {
        format!("{}:{}:{}", self.kind, self.pubkey, self.d_tag)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_keys_are_validated_and_lowercased() {
        let upper = "AB".repeat(32);
        assert_eq!(parse_hex_key(&upper).unwrap(), "ab".repeat(32));
        assert!(parse_hex_key("abc").is_err());
        assert!(parse_hex_key(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn parses_address_with_colons_in_d_tag() {
        let pk = "cd".repeat(32);
        let a = Address::parse(&format!("30023:{pk}:a:b")).unwrap();
        assert_eq!(a.kind, 30023);
        assert_eq!(a.d_tag, "a:b");
        assert_eq!(a.to_tag(), format!("30023:{pk}:a:b"));
        assert!(Address::parse("x:y:z").is_err());
        assert!(Address::parse("1:short:z").is_err());
    }

    #[test]
    fn kind_bounds_enclose_every_address_of_that_kind() {
        let pk = "ef".repeat(32);
        let a = Address::new(30023, pk.clone(), "zzz");
        assert!(Address::min_key(30023, None) <= a);
        assert!(a <= Address::max_key(30023, None));
        assert!(a <= Address::max_key(30023, Some(&pk)));
        assert!(Address::max_key(30022, None) < a);
        assert!(a < Address::min_key(30024, None));
    }
}
