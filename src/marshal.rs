//! Conversion between 16-bit wire words and typed [`Value`]s.
//!
//! Word index 0 is always the first word transferred on the wire. The word order differs
//! between kinds of the same width and these differences are what the devices actually send:
//!
//! | kind      | words → value                                      |
//! |-----------|----------------------------------------------------|
//! | `uint16`  | `w[0]`                                             |
//! | `int16`   | `w[0] as i16`                                      |
//! | `uint32`  | `w[0] << 16 \| w[1]`                               |
//! | `int32`   | `(w[1] << 16 \| w[0]) as i32`                      |
//! | `acc32`   | `w[1] << 16 \| w[0]`                               |
//! | `uint64`  | `w[0] \| w[1] << 16 \| w[2] << 32 \| w[3] << 48`   |
//! | `float32` | `f32::from_bits(w[1] << 16 \| w[0])`               |
//! | `string*` | bytes swapped within each word, read as ASCII      |
//!
//! In particular `uint32` and `acc32` are *not* the same layout. Do not unify them.

use crate::value::{Kind, Value};
use tracing::trace;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("a {kind} register is {expected} words long, got {actual} words")]
    LengthMismatch { kind: Kind, expected: u16, actual: usize },
    #[error("{0} bytes cannot be split into {1}-byte elements")]
    Unaligned(usize, usize),
    #[error("byte {0:#04x} at offset {1} is not 7-bit ASCII")]
    NotAscii(u8, usize),
    #[error("a {0} register holds at most {1} ASCII bytes, got {2} bytes of text")]
    TextTooLong(Kind, usize, usize),
    #[error("a {0} value cannot be stored in a {1} register")]
    KindMismatch(Kind, Kind),
}

/// Decode the words read for a register of the given kind.
///
/// `words` must be exactly [`Kind::words`] long.
pub fn decode(kind: Kind, words: &[u16]) -> Result<Value, Error> {
    trace!(message = "decoding", %kind, ?words);
    Ok(match kind {
        Kind::Uint16 => Value::Uint16(decode_u16(words)?),
        Kind::Int16 => Value::Int16(decode_i16(words)?),
        Kind::Uint32 => Value::Uint32(decode_u32(words)?),
        Kind::Int32 => Value::Int32(decode_i32(words)?),
        Kind::Acc32 => Value::Acc32(decode_acc32(words)?),
        Kind::Uint64 => Value::Uint64(decode_u64(words)?),
        Kind::Float32 => Value::Float32(decode_f32(words)?),
        Kind::String16 => Value::String16(decode_text(Kind::String16, words)?),
        Kind::String32 => Value::String32(decode_text(Kind::String32, words)?),
    })
}

/// Produce the words to write for `value`, using the inverse of [`decode`] for its kind.
pub fn encode(value: &Value) -> Result<Vec<u16>, Error> {
    Ok(match *value {
        Value::Uint16(n) => vec![n],
        Value::Int16(n) => vec![n as u16],
        Value::Uint32(n) => split_high_first(n).to_vec(),
        Value::Int32(n) => split_low_first(n as u32).to_vec(),
        Value::Acc32(n) => split_low_first(n).to_vec(),
        Value::Uint64(n) => vec![n as u16, (n >> 16) as u16, (n >> 32) as u16, (n >> 48) as u16],
        Value::Float32(n) => split_low_first(n.to_bits()).to_vec(),
        Value::String16(ref s) => encode_text(Kind::String16, s)?,
        Value::String32(ref s) => encode_text(Kind::String32, s)?,
    })
}

/// Encode `value` for a register documented as `kind`.
pub fn encode_as(kind: Kind, value: &Value) -> Result<Vec<u16>, Error> {
    if value.kind() != kind {
        return Err(Error::KindMismatch(value.kind(), kind));
    }
    encode(value)
}

fn exact<const N: usize>(kind: Kind, words: &[u16]) -> Result<[u16; N], Error> {
    debug_assert_eq!(usize::from(kind.words()), N);
    words.try_into().map_err(|_| Error::LengthMismatch {
        kind,
        expected: kind.words(),
        actual: words.len(),
    })
}

pub fn decode_u16(words: &[u16]) -> Result<u16, Error> {
    let [w] = exact(Kind::Uint16, words)?;
    Ok(w)
}

pub fn decode_i16(words: &[u16]) -> Result<i16, Error> {
    let [w] = exact(Kind::Int16, words)?;
    Ok(w as i16)
}

pub fn decode_u32(words: &[u16]) -> Result<u32, Error> {
    let [high, low] = exact(Kind::Uint32, words)?;
    Ok(u32::from(high) << 16 | u32::from(low))
}

pub fn decode_i32(words: &[u16]) -> Result<i32, Error> {
    let [low, high] = exact(Kind::Int32, words)?;
    Ok((u32::from(high) << 16 | u32::from(low)) as i32)
}

pub fn decode_acc32(words: &[u16]) -> Result<u32, Error> {
    let [low, high] = exact(Kind::Acc32, words)?;
    Ok(u32::from(high) << 16 | u32::from(low))
}

pub fn decode_u64(words: &[u16]) -> Result<u64, Error> {
    let words: [u16; 4] = exact(Kind::Uint64, words)?;
    Ok(words.iter().rev().fold(0, |acc, w| acc << 16 | u64::from(*w)))
}

pub fn decode_f32(words: &[u16]) -> Result<f32, Error> {
    let [low, high] = exact(Kind::Float32, words)?;
    Ok(f32::from_bits(u32::from(high) << 16 | u32::from(low)))
}

fn split_high_first(n: u32) -> [u16; 2] {
    [(n >> 16) as u16, n as u16]
}

fn split_low_first(n: u32) -> [u16; 2] {
    [n as u16, (n >> 16) as u16]
}

/// Reverse the byte order inside every `element`-sized chunk of `bytes`.
///
/// Applying this twice restores the input.
pub fn swap_within(bytes: &mut [u8], element: usize) -> Result<(), Error> {
    if element == 0 || bytes.len() % element != 0 {
        return Err(Error::Unaligned(bytes.len(), element));
    }
    for chunk in bytes.chunks_exact_mut(element) {
        chunk.reverse();
    }
    Ok(())
}

/// Decode a fixed-size text register.
///
/// NUL padding is kept: a `string16` register always decodes to 16 characters.
pub fn decode_text(kind: Kind, words: &[u16]) -> Result<String, Error> {
    if usize::from(kind.words()) != words.len() {
        return Err(Error::LengthMismatch { kind, expected: kind.words(), actual: words.len() });
    }
    let mut bytes = words.iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<u8>>();
    swap_within(&mut bytes, 2)?;
    if let Some(offset) = bytes.iter().position(|b| !b.is_ascii()) {
        return Err(Error::NotAscii(bytes[offset], offset));
    }
    // All bytes are ASCII at this point.
    Ok(bytes.into_iter().map(char::from).collect())
}

fn encode_text(kind: Kind, text: &str) -> Result<Vec<u16>, Error> {
    let capacity = usize::from(kind.words()) * 2;
    let mut bytes = text.as_bytes().to_vec();
    if let Some(offset) = bytes.iter().position(|b| !b.is_ascii()) {
        return Err(Error::NotAscii(bytes[offset], offset));
    }
    if bytes.len() > capacity {
        return Err(Error::TextTooLong(kind, capacity, bytes.len()));
    }
    bytes.resize(capacity, 0);
    swap_within(&mut bytes, 2)?;
    Ok(bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::VariantArray as _;

    #[test]
    fn uint32_and_acc32_word_orders_differ() {
        assert_eq!(decode(Kind::Uint32, &[0x0001, 0x0002]).unwrap(), Value::Uint32(0x0001_0002));
        assert_eq!(decode(Kind::Acc32, &[0x0001, 0x0002]).unwrap(), Value::Acc32(0x0002_0001));
    }

    #[test]
    fn float32_low_word_first() {
        let Value::Float32(v) = decode(Kind::Float32, &[0x0000, 0x4048]).unwrap() else {
            panic!("not a float");
        };
        assert_eq!(v.to_bits(), 0x4048_0000);
        assert_eq!(v, 3.125);
        assert_eq!(decode(Kind::Float32, &[0x0000, 0x42F6]).unwrap(), Value::Float32(123.0));
    }

    #[test]
    fn signed_reinterpretation() {
        assert_eq!(decode(Kind::Int16, &[0xFFFE]).unwrap(), Value::Int16(-2));
        assert_eq!(decode(Kind::Uint16, &[0xFFFE]).unwrap(), Value::Uint16(0xFFFE));
        assert_eq!(decode(Kind::Int32, &[0xFFFF, 0xFFFF]).unwrap(), Value::Int32(-1));
        assert_eq!(decode(Kind::Int32, &[0x0000, 0x8000]).unwrap(), Value::Int32(i32::MIN));
        assert_eq!(decode(Kind::Int32, &[0x0001, 0x0000]).unwrap(), Value::Int32(1));
    }

    #[test]
    fn uint64_ascending_words() {
        assert_eq!(
            decode(Kind::Uint64, &[0x4444, 0x3333, 0x2222, 0x1111]).unwrap(),
            Value::Uint64(0x1111_2222_3333_4444)
        );
    }

    #[test]
    fn text_swaps_bytes_and_keeps_padding() {
        // "SunSpec" as the device stores it, one big-endian character pair per word.
        let words = [0x5375, 0x6E53, 0x7065, 0x6300, 0, 0, 0, 0];
        let Value::String16(text) = decode(Kind::String16, &words).unwrap() else {
            panic!("not a string16");
        };
        assert_eq!(text.len(), 16);
        assert_eq!(text.trim_end_matches('\0'), "SunSpec");
    }

    #[test]
    fn text_rejects_non_ascii() {
        let mut words = [0u16; 8];
        words[2] = 0x41C3;
        assert_eq!(decode_text(Kind::String16, &words), Err(Error::NotAscii(0xC3, 5)));
    }

    #[test]
    fn swap_is_self_inverse() {
        let original = (0u8..24).collect::<Vec<_>>();
        for element in [1, 2, 4, 8] {
            let mut bytes = original.clone();
            swap_within(&mut bytes, element).unwrap();
            if element > 1 {
                assert_ne!(bytes, original);
            }
            swap_within(&mut bytes, element).unwrap();
            assert_eq!(bytes, original);
        }
        assert_eq!(swap_within(&mut [0u8; 5], 2), Err(Error::Unaligned(5, 2)));
    }

    #[test]
    fn wrong_word_count_never_decodes() {
        for &kind in Kind::VARIANTS {
            let expected = usize::from(kind.words());
            for len in [0, expected - 1, expected + 1] {
                let words = vec![0x2020; len];
                assert_eq!(
                    decode(kind, &words),
                    Err(Error::LengthMismatch { kind, expected: kind.words(), actual: len }),
                    "{kind} with {len} words"
                );
            }
        }
    }

    #[test]
    fn round_trips() {
        let values = [
            Value::Uint16(0xBEEF),
            Value::Int16(-12345),
            Value::Uint32(0xDEAD_BEEF),
            Value::Int32(-7_654_321),
            Value::Acc32(4_000_000_001),
            Value::Uint64(0x0123_4567_89AB_CDEF),
            Value::Float32(-0.15625),
            Value::String16("Fronius Symo 5.0".into()),
            Value::String32("0123456789abcdefghijklmnopqrstuv".into()),
        ];
        for value in values {
            let words = encode(&value).unwrap();
            assert_eq!(words.len(), usize::from(value.kind().words()));
            assert_eq!(decode(value.kind(), &words).unwrap(), value);
        }
    }

    #[test]
    fn write_words_mirror_read_order() {
        assert_eq!(encode(&Value::Uint32(0x0001_0002)).unwrap(), [0x0001, 0x0002]);
        assert_eq!(encode(&Value::Acc32(0x0002_0001)).unwrap(), [0x0001, 0x0002]);
        assert_eq!(encode(&Value::Float32(123.0)).unwrap(), [0x0000, 0x42F6]);
    }

    #[test]
    fn short_text_is_padded() {
        let words = encode(&Value::String16("AB".into())).unwrap();
        assert_eq!(words, [0x4142, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            encode(&Value::String16("x".repeat(17))),
            Err(Error::TextTooLong(Kind::String16, 16, 17))
        );
    }

    #[test]
    fn encode_as_checks_kind() {
        assert_eq!(
            encode_as(Kind::Acc32, &Value::Uint32(1)),
            Err(Error::KindMismatch(Kind::Uint32, Kind::Acc32))
        );
        assert_eq!(encode_as(Kind::Acc32, &Value::Acc32(1)).unwrap(), [1, 0]);
    }
}
