//! Human-entered byte sizes.
//!
//! Retention limits arrive as strings like `500m` or `2G`. Suffixes are
//! powers of 1024; a bare number is bytes.

use std::fmt;
use std::str::FromStr;

/// A byte count parsed from a size string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
    /// The raw byte count.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty size string".to_string());
        }

        let (digits, multiplier) = match s.as_bytes()[s.len() - 1] {
            b'k' | b'K' => (&s[..s.len() - 1], 1u64 << 10),
            b'm' | b'M' => (&s[..s.len() - 1], 1 << 20),
            b'g' | b'G' => (&s[..s.len() - 1], 1 << 30),
            b't' | b'T' => (&s[..s.len() - 1], 1 << 40),
            _ => (s, 1),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid size string: {s}"));
        }

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("size out of range: {s}"))?;
        value
            .checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| format!("size out of range: {s}"))
    }
}
