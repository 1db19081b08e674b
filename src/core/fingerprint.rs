use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

const WORD_BITS: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("Fingerprint length mismatch: {left} bits vs {right} bits")]
    LengthMismatch { left: usize, right: usize },

    #[error("Invalid fingerprint character {found:?} at position {position}")]
    InvalidCharacter { position: usize, found: char },

    #[error("Fingerprint must contain at least one bit")]
    Empty,
}

/// Fixed-length bit string used for approximate visual comparison.
///
/// Bits are packed most-significant first into `u64` words, so a 64-bit
/// fingerprint renders as the same `0`/`1` string as its single word.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    len: usize,
    words: Vec<u64>,
}

impl Fingerprint {
    /// Build a fingerprint from bits in order.
    pub fn from_bits<I: IntoIterator<Item = bool>>(bits: I) -> Result<Self, FingerprintError> {
        let mut words = Vec::new();
        let mut len = 0;
        for bit in bits {
            if len % WORD_BITS == 0 {
                words.push(0);
            }
            if bit {
                let shift = WORD_BITS - 1 - (len % WORD_BITS);
                if let Some(word) = words.last_mut() {
                    *word |= 1u64 << shift;
                }
            }
            len += 1;
        }
        if len == 0 {
            return Err(FingerprintError::Empty);
        }
        Ok(Self { len, words })
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            len: WORD_BITS,
            words: vec![value],
        }
    }

    /// The packed value of a 64-bit fingerprint.
    pub fn as_u64(&self) -> Option<u64> {
        match (self.len, self.words.as_slice()) {
            (WORD_BITS, [word]) => Some(*word),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bit(&self, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        let word = self.words[index / WORD_BITS];
        let shift = WORD_BITS - 1 - (index % WORD_BITS);
        Some((word >> shift) & 1 == 1)
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).filter_map(move |i| self.bit(i))
    }

    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Hamming distance between two fingerprints of equal length.
    pub fn distance(&self, other: &Fingerprint) -> Result<u32, FingerprintError> {
        self.check_len(other)?;
        Ok(self
            .words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| (a ^ b).count_ones())
            .sum())
    }

    /// Position-wise XOR of two fingerprints of equal length.
    pub fn xor(&self, other: &Fingerprint) -> Result<Fingerprint, FingerprintError> {
        self.check_len(other)?;
        Ok(Fingerprint {
            len: self.len,
            words: self
                .words
                .iter()
                .zip(&other.words)
                .map(|(a, b)| a ^ b)
                .collect(),
        })
    }

    fn check_len(&self, other: &Fingerprint) -> Result<(), FingerprintError> {
        if self.len != other.len {
            return Err(FingerprintError::LengthMismatch {
                left: self.len,
                right: other.len,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.bits() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bits = s
            .chars()
            .enumerate()
            .map(|(position, c)| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                found => Err(FingerprintError::InvalidCharacter { position, found }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Fingerprint::from_bits(bits)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A discovered file and its fingerprint, if one could be extracted.
#[derive(Debug, Clone, Serialize)]
pub struct FingerprintedFile {
    pub path: PathBuf,
    pub fingerprint: Option<Fingerprint>,
}

impl FingerprintedFile {
    pub fn new(path: PathBuf, fingerprint: Option<Fingerprint>) -> Self {
        Self { path, fingerprint }
    }

    pub fn is_clusterable(&self) -> bool {
        self.fingerprint.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(s: &str) -> Fingerprint {
        s.parse().unwrap()
    }

    #[test]
    fn test_string_round_trip_keeps_bit_order() {
        let s = "1011000010";
        assert_eq!(fp(s).to_string(), s);
        assert_eq!(fp(s).len(), 10);
        assert_eq!(fp(s).bit(0), Some(true));
        assert_eq!(fp(s).bit(1), Some(false));
        assert_eq!(fp(s).bit(10), None);
    }

    #[test]
    fn test_u64_matches_string_rendering() {
        let f = Fingerprint::from_u64(0x8000_0000_0000_0001);
        let rendered = f.to_string();
        assert_eq!(rendered.len(), 64);
        assert!(rendered.starts_with('1'));
        assert!(rendered.ends_with('1'));
        assert_eq!(rendered.matches('1').count(), 2);
        assert_eq!(fp(&rendered).as_u64(), Some(0x8000_0000_0000_0001));
    }

    #[test]
    fn test_distance_is_symmetric_and_zero_only_for_equal() {
        let a = Fingerprint::from_u64(0b1011);
        let b = Fingerprint::from_u64(0b0110);
        assert_eq!(a.distance(&b).unwrap(), 3);
        assert_eq!(b.distance(&a).unwrap(), 3);
        assert_eq!(a.distance(&a).unwrap(), 0);
        assert_ne!(a.distance(&b).unwrap(), 0);
    }

    #[test]
    fn test_distance_spans_multiple_words() {
        let a = fp(&"0".repeat(100));
        let mut bits = "0".repeat(100);
        bits.replace_range(3..4, "1");
        bits.replace_range(70..71, "1");
        bits.replace_range(99..100, "1");
        let b = fp(&bits);
        assert_eq!(a.distance(&b).unwrap(), 3);
        assert_eq!(b.count_ones(), 3);
    }

    #[test]
    fn test_unequal_lengths_error() {
        let short = fp("0101");
        let long = fp("01010");
        assert_eq!(
            short.distance(&long),
            Err(FingerprintError::LengthMismatch { left: 4, right: 5 })
        );
        assert!(short.xor(&long).is_err());
    }

    #[test]
    fn test_xor() {
        let a = fp("1100");
        let b = fp("1010");
        assert_eq!(a.xor(&b).unwrap(), fp("0110"));
        assert_eq!(a.xor(&a).unwrap().count_ones(), 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            "10x1".parse::<Fingerprint>(),
            Err(FingerprintError::InvalidCharacter {
                position: 2,
                found: 'x'
            })
        );
        assert_eq!("".parse::<Fingerprint>(), Err(FingerprintError::Empty));
    }

    #[test]
    fn test_serializes_as_bit_string() {
        let f = fp("0110");
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(json, "\"0110\"");
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
