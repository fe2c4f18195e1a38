//! Compact integer text encoding used by `dictd` index files.
//!
//! Offsets and sizes are written as a positional base-64 number, most
//! significant digit first, over the standard alphabet
//! `A–Z a–z 0–9 + /`. This is arithmetic base 64, not the byte-oriented
//! base64 of RFC 4648: `"BA"` is 64, `"A"` is 0.

use crate::error::{Error, Result};

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const INVALID: u8 = 99;

/// Digit value of every byte; `INVALID` outside the alphabet.
const DIGIT_VALUES: [u8; 256] = {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
};

/// Decode a compact base-64 integer.
///
/// Digits beyond bit 63 are tolerated only when they are zero. The 64-bit
/// accumulator is returned as `i64`, so a value with the top bit set comes
/// back negative. The empty string decodes to 0.
pub fn decode(text: &str) -> Result<i64> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for c in text.chars().rev() {
        let digit = if c.is_ascii() {
            DIGIT_VALUES[c as usize]
        } else {
            INVALID
        };
        if digit == INVALID {
            return Err(Error::IllegalCharacter(c));
        }

        let digit = digit as u64;
        let placed = digit.checked_shl(shift).unwrap_or(0);
        if placed.checked_shr(shift).unwrap_or(0) != digit {
            return Err(Error::Overflow(text.to_string()));
        }
        value |= placed;
        shift = shift.saturating_add(6);
    }

    Ok(value as i64)
}

/// Decode a value that must be non-negative as `i64`.
pub fn decode_unsigned(text: &str) -> Result<u64> {
    let value = decode(text)?;
    u64::try_from(value).map_err(|_| Error::Negative(text.to_string()))
}

/// Encode `value` in the shortest form, without leading zero digits.
pub fn encode(mut value: u64) -> String {
    if value == 0 {
        return (ALPHABET[0] as char).to_string();
    }
    let mut digits = Vec::with_capacity(11);
    while value > 0 {
        digits.push(ALPHABET[(value & 63) as usize]);
        value >>= 6;
    }
    digits.iter().rev().map(|&d| d as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_values() {
        assert_eq!(encode(0), "A");
        assert_eq!(encode(1), "B");
        assert_eq!(encode(63), "/");
        assert_eq!(encode(64), "BA");
        assert_eq!(encode(58315), "OPL");
        assert_eq!(decode("A").unwrap(), 0);
        assert_eq!(decode("/").unwrap(), 63);
        assert_eq!(decode("BA").unwrap(), 64);
        assert_eq!(decode("OPL").unwrap(), 58315);
        assert_eq!(decode("").unwrap(), 0);
    }

    #[test]
    fn round_trips() {
        for n in [
            0u64,
            1,
            62,
            63,
            64,
            4095,
            4096,
            150_000,
            u32::MAX as u64,
            1 << 40,
            i64::MAX as u64,
        ] {
            let text = encode(n);
            assert_eq!(decode(&text).unwrap(), n as i64, "{n} -> {text}");
            assert_eq!(decode_unsigned(&text).unwrap(), n);
        }
    }

    #[test]
    fn shortest_form() {
        assert_eq!(encode(i64::MAX as u64), "H//////////");
        assert_eq!(encode(u64::MAX), "P//////////");
        assert!(!encode(123_456_789).starts_with('A'));
    }

    #[test]
    fn leading_zero_digits_are_ignored() {
        assert_eq!(decode("AAAB").unwrap(), 1);
        assert_eq!(decode("AAAAAAAAAAAAAAB").unwrap(), 1);
    }

    #[test]
    fn top_bit_reads_as_negative() {
        assert_eq!(decode("P//////////").unwrap(), -1);
        assert!(matches!(
            decode_unsigned("P//////////"),
            Err(Error::Negative(_))
        ));
    }

    #[test]
    fn overflow_detected() {
        let err = decode("Q//////////").unwrap_err();
        assert!(matches!(err, Error::Overflow(_)));
        assert!(err.is_encoding());
        assert!(matches!(decode("BAAAAAAAAAAA"), Err(Error::Overflow(_))));
    }

    #[test]
    fn illegal_characters_rejected() {
        for bad in ["ab-c", "a=", "A B", "\0", "é", "BA\n"] {
            let err = decode(bad).unwrap_err();
            assert!(matches!(err, Error::IllegalCharacter(_)), "{bad:?}: {err}");
            assert!(err.is_encoding());
        }
        assert!(matches!(decode("x_y"), Err(Error::IllegalCharacter('_'))));
    }
}
