//! Huffman string decoding for QPACK (RFC 7541 Appendix B).
//!
//! The code is canonical: codes of equal length are consecutive and ordered
//! by symbol, so the per-symbol bit lengths below determine every code. The
//! decoder walks one length at a time, comparing against the first code of
//! each length, and needs no tree.

use std::sync::OnceLock;

use crate::error::H3Error;

const EOS: u16 = 256;
const MAX_CODE_LEN: usize = 30;

/// Code length in bits for symbols 0..=255 and EOS (256).
static CODE_LENGTHS: [u8; 257] = [
    13, 23, 28, 28, 28, 28, 28, 28, 28, 24, 30, 28, 28, 30, 28, 28,
    28, 28, 28, 28, 28, 28, 30, 28, 28, 28, 28, 28, 28, 28, 28, 28,
    6, 10, 10, 12, 13, 6, 8, 11, 10, 10, 8, 11, 8, 6, 6, 6,
    5, 5, 5, 6, 6, 6, 6, 6, 6, 6, 7, 8, 15, 6, 12, 10,
    13, 6, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 8, 7, 8, 13, 19, 13, 14, 6,
    15, 5, 6, 5, 6, 5, 6, 6, 6, 5, 7, 7, 6, 6, 6, 5,
    6, 7, 6, 5, 5, 6, 7, 7, 7, 7, 7, 15, 11, 14, 13, 28,
    20, 22, 20, 20, 22, 22, 22, 23, 22, 23, 23, 23, 23, 23, 24, 23,
    24, 24, 22, 23, 24, 23, 23, 23, 23, 21, 22, 23, 22, 23, 23, 24,
    22, 21, 20, 22, 22, 23, 23, 21, 23, 22, 22, 24, 21, 22, 23, 23,
    21, 21, 22, 21, 23, 22, 23, 23, 20, 22, 22, 22, 23, 22, 22, 23,
    26, 26, 20, 19, 22, 23, 22, 25, 26, 26, 26, 27, 27, 26, 24, 25,
    19, 21, 26, 27, 27, 26, 27, 24, 21, 21, 26, 26, 28, 27, 27, 27,
    20, 24, 20, 21, 22, 21, 21, 23, 22, 22, 25, 25, 24, 24, 26, 23,
    26, 27, 26, 26, 27, 27, 27, 27, 27, 28, 27, 27, 27, 27, 27, 26,
    30,
];

struct Canonical {
    /// Number of codes of each bit length.
    counts: [u16; MAX_CODE_LEN + 1],
    /// Symbols ordered by (code length, symbol).
    symbols: Vec<u16>,
}

fn canonical() -> &'static Canonical {
    static TABLE: OnceLock<Canonical> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut counts = [0u16; MAX_CODE_LEN + 1];
        for &len in &CODE_LENGTHS {
            counts[len as usize] += 1;
        }
        let mut symbols: Vec<u16> = (0..=EOS).collect();
        symbols.sort_by_key(|&sym| (CODE_LENGTHS[sym as usize], sym));
        Canonical { counts, symbols }
    })
}

/// Decode a Huffman-coded string literal.
///
/// Trailing padding must be shorter than a byte and consist of 1 bits (a
/// prefix of EOS); an explicit EOS symbol is an error.
pub(crate) fn decode(data: &[u8]) -> Result<Vec<u8>, H3Error> {
    let table = canonical();
    let mut out = Vec::with_capacity(data.len() + data.len() / 2);

    // State of the code being assembled.
    let mut code: u32 = 0;
    let mut len = 0usize;
    let mut first: u32 = 0;
    let mut index = 0usize;
    let mut all_ones = true;

    for &byte in data {
        for shift in (0..8).rev() {
            let bit = u32::from((byte >> shift) & 1);
            code = (code << 1) | bit;
            len += 1;
            all_ones &= bit == 1;

            let count = u32::from(table.counts[len]);
            if code < first + count {
                let sym = table.symbols[index + (code - first) as usize];
                if sym == EOS {
                    return Err(H3Error::QpackDecodingFailed);
                }
                out.push(sym as u8);
                code = 0;
                len = 0;
                first = 0;
                index = 0;
                all_ones = true;
            } else {
                if len == MAX_CODE_LEN {
                    return Err(H3Error::QpackDecodingFailed);
                }
                index += count as usize;
                first = (first + count) << 1;
            }
        }
    }

    if len > 7 || !all_ones {
        return Err(H3Error::QpackDecodingFailed);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn rfc7541_examples() {
        assert_eq!(decode(&hex("f1e3c2e5f23a6ba0ab90f4ff")).unwrap(), b"www.example.com");
        assert_eq!(decode(&hex("a8eb10649cbf")).unwrap(), b"no-cache");
        assert_eq!(decode(&hex("25a849e95ba97d7f")).unwrap(), b"custom-key");
        assert_eq!(decode(&hex("6402")).unwrap(), b"302");
    }

    #[test]
    fn content_range_value() {
        assert_eq!(
            decode(&hex("8fd24a8500b3efb010001f")).unwrap(),
            b"bytes 0-99/1000"
        );
    }

    #[test]
    fn empty_input() {
        assert!(decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn padding_rules() {
        // A full byte of ones is EOS-prefix padding longer than 7 bits.
        assert!(decode(&[0xff]).is_err());
        // '3' is 011001 (6 bits); zero padding is not an EOS prefix.
        assert!(decode(&[0b0110_0100]).is_err());
        assert_eq!(decode(&[0b0110_0111]).unwrap(), b"3");
    }

    #[test]
    fn explicit_eos_is_rejected() {
        // EOS is thirty 1 bits; pad to a byte boundary with ones.
        assert!(decode(&[0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn code_lengths_form_a_complete_code() {
        // Kraft sum of a complete prefix code is exactly 1.
        let sum: u64 = CODE_LENGTHS
            .iter()
            .map(|&len| 1u64 << (MAX_CODE_LEN - len as usize))
            .sum();
        assert_eq!(sum, 1u64 << MAX_CODE_LEN);
    }
}
