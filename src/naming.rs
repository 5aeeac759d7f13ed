//! Short file name generation.
//!
//! Names are derived from the current time plus a little randomness. They are
//! not guaranteed unique on their own: the ingest pipeline re-checks the
//! content directory and appends `_1`, `_2`, ... via [`with_suffix`] on collision.

use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const BASE62: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NamingStrategy {
    /// Last 6 timestamp digits, 3 random chars, last 3 nanosecond digits.
    /// e.g. `950414k3x118.png`
    #[default]
    #[serde(rename = "short")]
    ShortSuffix,
    /// Base62 millisecond timestamp plus 2 random chars. e.g. `1xFq9Wp7ab.png`
    #[serde(rename = "base62")]
    Base62,
    /// First 8 hex chars of a hash over time and randomness. e.g. `a3b9c2d1.png`
    #[serde(rename = "hash")]
    HashedShort,
    /// Full millisecond timestamp. e.g. `1761369950414.png`
    #[serde(rename = "counter", alias = "timestamp")]
    RawTimestamp,
}

impl NamingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NamingStrategy::ShortSuffix => "short",
            NamingStrategy::Base62 => "base62",
            NamingStrategy::HashedShort => "hash",
            NamingStrategy::RawTimestamp => "counter",
        }
    }

    /// Generate a base name (no extension) for the instant `now`.
    pub fn base_name<R: Rng + ?Sized>(&self, now: DateTime<Utc>, rng: &mut R) -> String {
        let millis = now.timestamp_millis().max(0) as u64;
        match self {
            NamingStrategy::ShortSuffix => {
                let digits = millis.to_string();
                let tail = &digits[digits.len().saturating_sub(6)..];
                let micro = now.nanosecond() % 1_000;
                format!("{}{}{:03}", tail, random_chars(rng, BASE36, 3), micro)
            }
            NamingStrategy::Base62 => {
                format!("{}{}", base62_encode(millis), random_chars(rng, BASE36, 2))
            }
            NamingStrategy::HashedShort => {
                let seed = format!("{}{}", millis, rng.gen::<u64>());
                let digest = blake3::hash(seed.as_bytes()).to_hex();
                digest.as_str()[..8].to_string()
            }
            NamingStrategy::RawTimestamp => millis.to_string(),
        }
    }

    /// Generate a full file name. `ext` includes the leading dot or is empty.
    pub fn generate<R: Rng + ?Sized>(&self, ext: &str, now: DateTime<Utc>, rng: &mut R) -> String {
        format!("{}{}", self.base_name(now, rng), ext)
    }
}

impl fmt::Display for NamingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NamingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(NamingStrategy::ShortSuffix),
            "base62" => Ok(NamingStrategy::Base62),
            "hash" => Ok(NamingStrategy::HashedShort),
            "counter" | "timestamp" => Ok(NamingStrategy::RawTimestamp),
            other => Err(format!("unknown naming strategy '{}'", other)),
        }
    }
}

/// Radix-62 encoding of `num`, most significant digit first.
pub fn base62_encode(mut num: u64) -> String {
    if num == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while num > 0 {
        out.push(BASE62[(num % 62) as usize]);
        num /= 62;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn random_chars<R: Rng + ?Sized>(rng: &mut R, alphabet: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Split `name` into stem and extension (with dot). `a.b.png` → (`a.b`, `.png`).
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

/// Collision variant of `name`: attempt 0 is the name itself, attempt `n`
/// inserts `_n` before the extension.
pub fn with_suffix(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    format!("{}_{}{}", stem, attempt, ext)
}

/// Lowercased extension of an uploaded file name, restricted to `[a-z0-9]`.
/// Returns it with a leading dot, or `None` if there is no usable extension.
pub fn sanitized_extension(file_name: &str) -> Option<String> {
    let (_, ext) = split_extension(file_name);
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    if ext.is_empty() || ext.len() > 10 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", ext))
}

/// Whether `name` is safe to use as a single path component in the content
/// directory.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}
