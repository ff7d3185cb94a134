//! Unguessable segment tokens and name derivation.
//!
//! A segment's OS name is derived from a 128-bit random token. The
//! token travels only over the already-authenticated session channel;
//! guessing a segment name from outside is defeated by token entropy,
//! and every segment recreation (resize) mints a fresh token.

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MiraError;

/// Token length in bytes (128 bits).
pub const TOKEN_LEN: usize = 16;

/// Random identity of one shared segment.
///
/// Serialized as a 32-character lowercase hex string so it can travel
/// in token-exchange messages.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentToken([u8; TOKEN_LEN]);

impl SegmentToken {
    /// Mint a fresh token from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Hex form used on the wire and in the segment name.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(TOKEN_LEN * 2);
        for b in self.0 {
            use fmt::Write;
            let _ = write!(s, "{b:02x}");
        }
        s
    }

    /// Parse the hex form back into a token.
    pub fn from_hex(hex: &str) -> Result<Self, MiraError> {
        if hex.len() != TOKEN_LEN * 2 || !hex.is_ascii() {
            return Err(MiraError::InvalidToken);
        }
        let mut bytes = [0u8; TOKEN_LEN];
        for (i, chunk) in hex.as_bytes().chunks_exact(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| MiraError::InvalidToken)?;
            bytes[i] = u8::from_str_radix(pair, 16).map_err(|_| MiraError::InvalidToken)?;
        }
        Ok(Self(bytes))
    }

    /// The OS object name this token maps to. Both sides of the
    /// transport must use this exact derivation.
    pub fn segment_name(&self) -> String {
        format!("mira-frame-{}", self.to_hex())
    }
}

impl fmt::Display for SegmentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SegmentToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full tokens gate segment access; keep them out of logs.
        write!(f, "SegmentToken({}…)", &self.to_hex()[..4])
    }
}

impl Serialize for SegmentToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SegmentToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SegmentToken::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ── Tests ────────────────────────────────────────────────────────
