//! Timing derivation, the capped bit buffer, and the decoded `Packet` record.

use std::fmt::Write as _;

/// The largest number of bits a single data or check buffer may hold before
/// the read is abandoned as a fatal [`crate::demod::DemodError::TooManyBits`].
pub const MAX_BITS: usize = 1024;

/// Timing parameters derived once per packet from the calibrated bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingParams {
    pub bit_width: u32,
    pub one: u32,
    pub zero: u32,
    pub preamble: u32,
    pub end: u32,
    pub timeout: u32,
}

impl TimingParams {
    pub fn from_bit_width(bit_width: u32) -> Self {
        TimingParams {
            bit_width,
            one: bit_width,
            zero: bit_width / 2,
            preamble: bit_width * 2,
            end: bit_width * 4,
            timeout: bit_width * 8,
        }
    }
}

/// Returns `true` iff `actual` is strictly within `tolerance` of `expected`.
/// Exact boundary matches fail.
pub fn within_range(actual: u32, expected: u32, tolerance: f64) -> bool {
    let actual = actual as f64;
    let expected = expected as f64;
    let min = expected * (1.0 - tolerance);
    let max = expected * (1.0 + tolerance);
    actual > min && actual < max
}

/// An ordered sequence of decoded bits, capped at [`MAX_BITS`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitBuffer {
    bits: Vec<bool>,
}

impl BitBuffer {
    pub fn new() -> Self {
        BitBuffer { bits: Vec::new() }
    }

    /// Appends `bit`. Returns `false` if this would exceed [`MAX_BITS`] (the
    /// bit is not appended in that case - the caller raises `TooManyBits`).
    #[must_use]
    pub fn push(&mut self, bit: bool) -> bool {
        if self.bits.len() >= MAX_BITS {
            return false;
        }
        self.bits.push(bit);
        true
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    /// MSB-first packing into bytes, trailing bits zero-padded.
    pub fn to_bytes(&self) -> Vec<u8> {
        let byte_count = self.bits.len().div_ceil(8);
        let mut out = vec![0u8; byte_count];
        for (i, &bit) in self.bits.iter().enumerate() {
            if bit {
                out[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        out
    }
}

/// A decoded packet record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub bit_count: usize,
    pub sync_count: u32,
    pub valid_check: bool,
    pub pretty: String,
    pub phy_pretty: String,
}

impl Packet {
    pub(crate) fn build(sync_count: u32, data_bits: &BitBuffer, check_bits: &BitBuffer) -> Packet {
        let valid_check = data_bits.len() == check_bits.len()
            && data_bits
                .as_slice()
                .iter()
                .zip(check_bits.as_slice())
                .all(|(a, b)| a == b);

        let data = data_bits.to_bytes();
        let bit_count = data_bits.len();
        let pretty = format_pretty(sync_count, bit_count, valid_check, &data);
        let phy_pretty = format_phy_pretty(sync_count, data_bits, check_bits);

        Packet {
            data,
            bit_count,
            sync_count,
            valid_check,
            pretty,
            phy_pretty,
        }
    }
}

fn format_pretty(sync_count: u32, bit_count: usize, valid_check: bool, data: &[u8]) -> String {
    let mark = if valid_check { '\u{2713}' } else { '\u{2717}' };
    let hex = data
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{sync_count:02}S {bit_count:03}B {mark} {hex}")
}

fn format_phy_pretty(sync_count: u32, data_bits: &BitBuffer, check_bits: &BitBuffer) -> String {
    let mut out = String::new();
    for _ in 0..sync_count {
        out.push('S');
    }
    out.push_str("P ");

    let data = data_bits.as_slice();
    let check = check_bits.as_slice();
    let len = data.len().max(check.len());
    for idx in 0..len {
        let c = match (data.get(idx), check.get(idx)) {
            (Some(d), Some(k)) if d == k => {
                if *d {
                    '1'
                } else {
                    '0'
                }
            }
            (Some(_), Some(_)) => 'X',
            (None, Some(_)) => 'D',
            (Some(_), None) => 'C',
            (None, None) => unreachable!("idx < len"),
        };
        let _ = write!(out, "{c}");
        if (idx + 1) % 4 == 0 {
            out.push(' ');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_params_derive_from_bit_width() {
        let t = TimingParams::from_bit_width(100);
        assert_eq!(t.one, 100);
        assert_eq!(t.zero, 50);
        assert_eq!(t.preamble, 200);
        assert_eq!(t.end, 400);
        assert_eq!(t.timeout, 800);
    }

    #[test]
    fn within_range_is_strict_at_boundaries() {
        assert!(!within_range(90, 100, 0.10));
        assert!(!within_range(110, 100, 0.10));
        assert!(within_range(91, 100, 0.10));
        assert!(within_range(109, 100, 0.10));
    }

    #[test]
    fn bit_buffer_caps_at_max_bits() {
        let mut buf = BitBuffer::new();
        for _ in 0..MAX_BITS {
            assert!(buf.push(true));
        }
        assert!(!buf.push(true));
        assert_eq!(buf.len(), MAX_BITS);
    }

    #[test]
    fn to_bytes_is_msb_first_with_trailing_zero_pad() {
        let mut buf = BitBuffer::new();
        for bit in [true, false, true, false, false, false, false, false, true] {
            buf.push(bit);
        }
        let bytes = buf.to_bytes();
        assert_eq!(bytes, vec![0b1010_0000, 0b1000_0000]);
    }

    #[test]
    fn packet_build_reports_valid_check_on_equal_buffers() {
        let mut data = BitBuffer::new();
        let mut check = BitBuffer::new();
        for bit in [true, false, true, false, false, false, false, false] {
            data.push(bit);
            check.push(bit);
        }
        let packet = Packet::build(25, &data, &check);
        assert!(packet.valid_check);
        assert_eq!(packet.data, vec![0xa0]);
        assert_eq!(packet.bit_count, 8);
        assert!(packet.pretty.contains("a0"));
    }

    #[test]
    fn packet_build_reports_invalid_check_on_mismatch() {
        let mut data = BitBuffer::new();
        let mut check = BitBuffer::new();
        for bit in [true, false, true, false] {
            data.push(bit);
        }
        for bit in [true, false, true, true] {
            check.push(bit);
        }
        let packet = Packet::build(20, &data, &check);
        assert!(!packet.valid_check);
        assert!(packet.phy_pretty.contains('X'));
    }
}
