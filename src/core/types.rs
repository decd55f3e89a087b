//! Common types used across chainpulse modules.

use crate::core::error::Error;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Longest accepted hash, in hex digits.
const MAX_HASH_DIGITS: usize = 64;

/// A transaction hash in normalised form: `0x` followed by lower-case hex.
///
/// Any non-empty run of up to 64 hex digits is accepted; whether the chain
/// knows the hash is decided by polling, not by parsing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHash(String);

impl TxHash {
    /// Create a full-length hash from bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    /// Normalised `0x`-prefixed lower-case hex.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to `0x`-prefixed lower-case hex.
    pub fn to_hex(&self) -> String {
        self.0.clone()
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() {
            return Err(Error::InvalidHash(format!("empty hash: {:?}", s)));
        }
        if digits.len() > MAX_HASH_DIGITS {
            return Err(Error::InvalidHash(format!("hash longer than 32 bytes: {}", s)));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidHash(format!("non-hex characters in {}", s)));
        }
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }
}

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TxHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for TxHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every guarded collection in this crate holds plain values that stay
/// consistent between statements, so a poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_hash_hex_roundtrip() {
        let hash = TxHash::new([0xab; 32]);
        let hex_str = hash.to_hex();
        assert!(hex_str.starts_with("0x"));
        assert_eq!(hex_str.len(), 66);
        assert_eq!(TxHash::from_hex(&hex_str).unwrap(), hash);
    }

    #[test]
    fn test_tx_hash_accepts_unprefixed_and_uppercase() {
        let upper = format!("0X{}", "AB".repeat(32));
        let bare = "ab".repeat(32);
        assert_eq!(TxHash::from_hex(&upper).unwrap(), TxHash::from_hex(&bare).unwrap());
    }

    #[test]
    fn test_tx_hash_accepts_short_hex() {
        let hash = TxHash::from_hex("0xABC").unwrap();
        assert_eq!(hash.as_str(), "0xabc");
        assert_eq!(hash, TxHash::from_hex("abc").unwrap());
    }

    #[test]
    fn test_tx_hash_rejects_malformed() {
        assert!(matches!(TxHash::from_hex("0x"), Err(Error::InvalidHash(_))));
        assert!(matches!(TxHash::from_hex(""), Err(Error::InvalidHash(_))));
        assert!(matches!(TxHash::from_hex("0xzz"), Err(Error::InvalidHash(_))));
        let too_long = format!("0x{}", "a".repeat(65));
        assert!(matches!(TxHash::from_hex(&too_long), Err(Error::InvalidHash(_))));
    }

    #[test]
    fn test_tx_hash_serde() {
        let hash = TxHash::new([1u8; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "01".repeat(32)));
        let back: TxHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_lock_recovers_from_poison() {
        let mutex = std::sync::Arc::new(Mutex::new(5));
        let clone = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex), 5);
    }
}
