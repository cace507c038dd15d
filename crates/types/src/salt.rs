//! Spend salts and their binary-tree derivation.

use num_bigint::BigUint;
use num_traits::One;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt;
use std::str::FromStr;

/// Unique identifier of a spend note.
///
/// Salts form a binary tree: spending a note salted `s` produces successors
/// at `left(s) = 2s` and `right(s) = 2s + 1`. The generator only ever follows
/// the left branch; the right branch is reserved for a change output and is
/// intentionally left unused so every generated note stays on one chain.
///
/// Salts double on each hop, so they are arbitrary precision. They travel as
/// decimal strings on the wire.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub struct Salt(BigUint);

impl Salt {
    /// Root salt of a deposit note.
    pub fn root() -> Self {
        Self(BigUint::one())
    }

    /// Left successor, `2s`.
    pub fn left(&self) -> Self {
        Self(&self.0 << 1u32)
    }

    /// Right successor, `2s + 1`.
    pub fn right(&self) -> Self {
        Self((&self.0 << 1u32) + 1u32)
    }

    /// Salt reached after following the left branch `hops` times.
    pub fn left_n(&self, hops: u32) -> Self {
        Self(&self.0 << hops)
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    /// Big-endian bytes, for hashing.
    pub fn to_bytes_be(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }
}

impl From<u64> for Salt {
    fn from(value: u64) -> Self {
        Self(BigUint::from(value))
    }
}

impl From<BigUint> for Salt {
    fn from(value: BigUint) -> Self {
        Self(value)
    }
}

impl fmt::Display for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", self.0)
    }
}

impl FromStr for Salt {
    type Err = SaltParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BigUint::from_str(s)
            .map(Self)
            .map_err(|_| SaltParseError(s.to_string()))
    }
}

/// A salt string that is not a non-negative decimal integer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid salt: {0:?}")]
pub struct SaltParseError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_derivation() {
        let s = Salt::from(5);
        assert_eq!(s.left(), Salt::from(10));
        assert_eq!(s.right(), Salt::from(11));
        assert_eq!(Salt::root().left_n(3), Salt::from(8));
    }

    #[test]
    fn test_left_chain_does_not_overflow() {
        let far = Salt::root().left_n(200);
        assert_eq!(far.left(), Salt::root().left_n(201));
        assert_eq!(far.as_biguint().bits(), 201);
    }

    #[test]
    fn test_parse_and_display() {
        let s: Salt = "123456789012345678901234567890".parse().unwrap();
        assert_eq!(s.to_string(), "123456789012345678901234567890");
        assert!("-1".parse::<Salt>().is_err());
        assert!("abc".parse::<Salt>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Salt::from(42)).unwrap();
        assert_eq!(json, "\"42\"");
        let back: Salt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Salt::from(42));
    }
}
