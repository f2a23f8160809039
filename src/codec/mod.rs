//! Compact Unit Codec
//!
//! Packs a day of 1-minute candles or an hour of ticks into a
//! self-describing delta stream, then runs it through the dictionary
//! compressor. Layout shared by both unit kinds:
//!
//! ```text
//! [reg_a: u8] [reg_b: u8] [base_price] [base_volume]? [samples...]
//! ```
//!
//! `reg_a` nibble-packs the decimal scales (low = price, high = volume).
//! `reg_b` packs four 2-bit width codes, each mapping to {1, 2, 4, 8} bytes:
//! bits 0-1 base price (unsigned), 2-3 price delta (signed), 4-5 base volume
//! (unsigned, candle units only), 6-7 volume delta (candles) or time delta
//! (ticks), signed.
//!
//! Absent candles are marked by writing the most-negative value of the
//! signed delta width into every field of the slot; the width chooser works
//! on delta magnitudes, so a real delta can never collide with the sentinel.

pub mod candles;
pub mod ticks;

use crate::compress;
use crate::error::CodecError;
use crate::time::MS_PER_SEC;
use crate::types::{CandleDay, ShortTick};
use std::collections::BTreeMap;

/// Candle-payload dictionary. The bytes are part of the on-disk format:
/// replacing them invalidates every candle blob already stored.
pub static CANDLE_DICTIONARY: &[u8] = include_bytes!("dicts/candles.dict");

/// Tick-payload dictionary. Same compatibility contract as the candle one.
pub static TICK_DICTIONARY: &[u8] = include_bytes!("dicts/ticks.dict");

// =============================================================================
// FIELD PRIMITIVES
// =============================================================================

/// Width code for an unsigned value: 0,1,2,3 -> 1,2,4,8 bytes.
#[inline]
pub(crate) fn unsigned_width_code(v: u64) -> u8 {
    if v >> 32 != 0 {
        3
    } else if v >> 16 != 0 {
        2
    } else if v >> 8 != 0 {
        1
    } else {
        0
    }
}

/// Width code for a signed value by magnitude. The bounds stop one short of
/// each type's minimum, which keeps the sentinel unreachable by real deltas.
#[inline]
pub(crate) fn signed_width_code(magnitude: u64) -> u8 {
    if magnitude <= 127 {
        0
    } else if magnitude <= 32_767 {
        1
    } else if magnitude <= 2_147_483_647 {
        2
    } else {
        3
    }
}

#[inline]
pub(crate) fn width_bytes(code: u8) -> usize {
    match code & 0x03 {
        0 => 1,
        1 => 2,
        2 => 4,
        _ => 8,
    }
}

/// Most-negative value of the signed width; the absent-sample marker.
#[inline]
pub(crate) fn sentinel_value(code: u8) -> i64 {
    match code & 0x03 {
        0 => i8::MIN as i64,
        1 => i16::MIN as i64,
        2 => i32::MIN as i64,
        _ => i64::MIN,
    }
}

#[inline]
pub(crate) fn put_uint(buf: &mut [u8], offset: usize, code: u8, v: u64) -> usize {
    match code & 0x03 {
        0 => buf[offset] = v as u8,
        1 => buf[offset..offset + 2].copy_from_slice(&(v as u16).to_le_bytes()),
        2 => buf[offset..offset + 4].copy_from_slice(&(v as u32).to_le_bytes()),
        _ => buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes()),
    }
    offset + width_bytes(code)
}

#[inline]
pub(crate) fn get_uint(buf: &[u8], offset: usize, code: u8) -> (u64, usize) {
    let v = match code & 0x03 {
        0 => buf[offset] as u64,
        1 => u16::from_le_bytes([buf[offset], buf[offset + 1]]) as u64,
        2 => u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as u64,
        _ => u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap()),
    };
    (v, offset + width_bytes(code))
}

#[inline]
pub(crate) fn put_int(buf: &mut [u8], offset: usize, code: u8, v: i64) -> usize {
    match code & 0x03 {
        0 => buf[offset] = v as i8 as u8,
        1 => buf[offset..offset + 2].copy_from_slice(&(v as i16).to_le_bytes()),
        2 => buf[offset..offset + 4].copy_from_slice(&(v as i32).to_le_bytes()),
        _ => buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes()),
    }
    offset + width_bytes(code)
}

#[inline]
pub(crate) fn get_int(buf: &[u8], offset: usize, code: u8) -> (i64, usize) {
    let v = match code & 0x03 {
        0 => buf[offset] as i8 as i64,
        1 => i16::from_le_bytes([buf[offset], buf[offset + 1]]) as i64,
        2 => i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as i64,
        _ => i64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap()),
    };
    (v, offset + width_bytes(code))
}

#[inline]
pub(crate) fn put_sentinel(buf: &mut [u8], offset: usize, code: u8) -> usize {
    put_int(buf, offset, code, sentinel_value(code))
}

#[inline]
pub(crate) fn is_sentinel(buf: &[u8], offset: usize, code: u8) -> bool {
    get_int(buf, offset, code).0 == sentinel_value(code)
}

/// Power-of-ten scale factor for a decimal count.
#[inline]
pub(crate) fn pow10(scale: u8) -> u64 {
    10u64.pow(scale as u32)
}

/// Quantize onto the decimal grid. Prices and volumes are non-negative.
#[inline]
pub(crate) fn quantize(v: f64, factor: u64) -> i64 {
    (v * factor as f64).round() as i64
}

#[inline]
pub(crate) fn dequantize(v: i64, factor: u64) -> f64 {
    v as f64 / factor as f64
}

// =============================================================================
// UNIT CODEC
// =============================================================================

/// Pack/unpack of whole units: delta encoding composed with dictionary
/// compression. Decoding always trusts the scales stored in the blob header,
/// never the caller's digits.
#[derive(Debug, Clone)]
pub struct DataCodec {
    pub compress_level: i32,
    pub candle_dict: &'static [u8],
    pub tick_dict: &'static [u8],
}

impl Default for DataCodec {
    fn default() -> Self {
        Self {
            compress_level: compress::max_level(),
            candle_dict: CANDLE_DICTIONARY,
            tick_dict: TICK_DICTIONARY,
        }
    }
}

impl DataCodec {
    /// Encode and compress a day of candles. `None` when every minute is
    /// empty; such units are never stored.
    pub fn pack_candles(
        &self,
        day: &CandleDay,
        price_scale: u8,
        volume_scale: u8,
    ) -> Result<Option<Vec<u8>>, CodecError> {
        let raw = candles::encode(day, price_scale, volume_scale);
        if raw.is_empty() {
            return Ok(None);
        }
        compress::compress_with_dict(&raw, self.candle_dict, self.compress_level).map(Some)
    }

    /// Decompress and decode a day of candles keyed by `day_start` seconds.
    pub fn unpack_candles(
        &self,
        day_start: u64,
        blob: &[u8],
    ) -> Result<Box<CandleDay>, CodecError> {
        let raw = compress::decompress_with_dict(blob, self.candle_dict)?;
        candles::decode(&raw, day_start)
    }

    /// Encode and compress an hour of ticks. `None` when the hour is empty.
    pub fn pack_ticks(
        &self,
        hour_start: u64,
        ticks: &BTreeMap<u64, ShortTick>,
        price_scale: u8,
    ) -> Result<Option<Vec<u8>>, CodecError> {
        let raw = ticks::encode(ticks, price_scale, hour_start * MS_PER_SEC);
        if raw.is_empty() {
            return Ok(None);
        }
        compress::compress_with_dict(&raw, self.tick_dict, self.compress_level).map(Some)
    }

    /// Decompress and decode an hour of ticks keyed by `hour_start` seconds.
    pub fn unpack_ticks(
        &self,
        hour_start: u64,
        blob: &[u8],
    ) -> Result<BTreeMap<u64, ShortTick>, CodecError> {
        let raw = compress::decompress_with_dict(blob, self.tick_dict)?;
        ticks::decode(&raw, hour_start * MS_PER_SEC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_codes() {
        assert_eq!(unsigned_width_code(0), 0);
        assert_eq!(unsigned_width_code(255), 0);
        assert_eq!(unsigned_width_code(256), 1);
        assert_eq!(unsigned_width_code(65_535), 1);
        assert_eq!(unsigned_width_code(65_536), 2);
        assert_eq!(unsigned_width_code(u32::MAX as u64), 2);
        assert_eq!(unsigned_width_code(u32::MAX as u64 + 1), 3);

        assert_eq!(signed_width_code(127), 0);
        assert_eq!(signed_width_code(128), 1);
        assert_eq!(signed_width_code(32_767), 1);
        assert_eq!(signed_width_code(32_768), 2);
        assert_eq!(signed_width_code(2_147_483_647), 2);
        assert_eq!(signed_width_code(2_147_483_648), 3);
    }

    #[test]
    fn test_int_field_roundtrip() {
        let mut buf = vec![0u8; 8];
        for code in 0..4u8 {
            for v in [-1i64, 0, 1, -127, 127] {
                put_int(&mut buf, 0, code, v);
                assert_eq!(get_int(&buf, 0, code).0, v, "code {}", code);
            }
        }
        put_int(&mut buf, 0, 1, -32_000);
        assert_eq!(get_int(&buf, 0, 1).0, -32_000);
        put_int(&mut buf, 0, 2, -2_000_000_000);
        assert_eq!(get_int(&buf, 0, 2).0, -2_000_000_000);
    }

    #[test]
    fn test_sentinel_detection() {
        let mut buf = vec![0u8; 8];
        for code in 0..4u8 {
            put_sentinel(&mut buf, 0, code);
            assert!(is_sentinel(&buf, 0, code));
            // the magnitude rule keeps real deltas one above the sentinel
            put_int(&mut buf, 0, code, sentinel_value(code) + 1);
            assert!(!is_sentinel(&buf, 0, code));
        }
    }

    #[test]
    fn test_dictionaries_embedded() {
        assert!(!CANDLE_DICTIONARY.is_empty());
        assert!(!TICK_DICTIONARY.is_empty());
        assert_ne!(CANDLE_DICTIONARY, TICK_DICTIONARY);
    }

    #[test]
    fn test_packed_candle_unit_roundtrip() {
        let codec = DataCodec::default();
        let day_start = 1_699_920_000u64;

        let mut day = crate::types::empty_candle_day();
        day[17] = crate::types::Candle::new(1.1, 1.2, 1.0, 1.15, 3.0, day_start + 17 * 60);

        let blob = codec.pack_candles(&day, 5, 0).unwrap().expect("one live minute");
        let decoded = codec.unpack_candles(day_start, &blob).unwrap();
        assert!((decoded[17].close - 1.15).abs() < 1e-5);
        assert!(decoded[16].is_empty());

        let empty = crate::types::empty_candle_day();
        assert!(codec.pack_candles(&empty, 5, 0).unwrap().is_none());
    }

    #[test]
    fn test_packed_tick_unit_roundtrip() {
        let codec = DataCodec::default();
        let hour_start = 1_699_999_200u64;

        let mut hour = BTreeMap::new();
        hour.insert(hour_start * 1000 + 250, ShortTick::new(1.08, 1.0801));

        let blob = codec.pack_ticks(hour_start, &hour, 5).unwrap().expect("one tick");
        let decoded = codec.unpack_ticks(hour_start, &blob).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!((decoded[&(hour_start * 1000 + 250)].ask - 1.0801).abs() < 1e-5);

        assert!(codec.pack_ticks(hour_start, &BTreeMap::new(), 5).unwrap().is_none());
    }
}
