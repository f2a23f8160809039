//! Day-of-candles delta stream.
//!
//! A unit always carries 1440 minute slots. Every price delta (open, high,
//! low, close) runs against the previous written candle's quantized close,
//! seeded by the first non-empty candle; the volume delta runs the same way
//! against quantized volume. Absent minutes carry the sentinel in all five
//! fields. The absolute day is not embedded; the blob key supplies it.

use super::{
    dequantize, get_int, get_uint, is_sentinel, pow10, put_int, put_sentinel, put_uint, quantize,
    signed_width_code, unsigned_width_code, width_bytes,
};
use crate::error::CodecError;
use crate::time::{minute_of_day, MINUTES_IN_DAY, SECS_PER_MIN};
use crate::types::{empty_candle_day, Candle, CandleDay};

/// Encode a day. Returns an empty vector when no minute holds data.
pub fn encode(day: &CandleDay, price_scale: u8, volume_scale: u8) -> Vec<u8> {
    let price_factor = pow10(price_scale);
    let volume_factor = pow10(volume_scale);

    let mut live = day.iter().filter(|c| !c.is_empty());
    let seed = match live.next() {
        Some(c) => c,
        None => return Vec::new(),
    };

    let base_price = quantize(seed.close, price_factor);
    let base_volume = quantize(seed.volume, volume_factor);

    // Width scan in the quantized domain so the chosen width provably fits
    // every delta the write loop will emit.
    let mut max_price_mag: u64 = 0;
    let mut max_volume_mag: u64 = 0;
    let mut last_close = base_price;
    let mut last_volume = base_volume;
    for c in day.iter().filter(|c| !c.is_empty()) {
        let qo = quantize(c.open, price_factor);
        let qh = quantize(c.high, price_factor);
        let ql = quantize(c.low, price_factor);
        let qc = quantize(c.close, price_factor);
        let qv = quantize(c.volume, volume_factor);

        for q in [qo, qh, ql, qc] {
            max_price_mag = max_price_mag.max((q - last_close).unsigned_abs());
        }
        max_volume_mag = max_volume_mag.max((qv - last_volume).unsigned_abs());
        last_close = qc;
        last_volume = qv;
    }

    let b0 = unsigned_width_code(base_price as u64);
    let b1 = signed_width_code(max_price_mag);
    let b2 = unsigned_width_code(base_volume as u64);
    let b3 = signed_width_code(max_volume_mag);

    let reg_a = (price_scale & 0x0F) | ((volume_scale & 0x0F) << 4);
    let reg_b = (b3 << 6) | (b2 << 4) | (b1 << 2) | b0;

    let sample_size = 4 * width_bytes(b1) + width_bytes(b3);
    let header = 2 + width_bytes(b0) + width_bytes(b2);
    let mut data = vec![0u8; header + MINUTES_IN_DAY * sample_size];

    data[0] = reg_a;
    data[1] = reg_b;
    let offset = put_uint(&mut data, 2, b0, base_price as u64);
    let samples_start = put_uint(&mut data, offset, b2, base_volume as u64);

    // Mark every slot absent, then overwrite the minutes that exist.
    for i in 0..MINUTES_IN_DAY {
        let mut p = samples_start + i * sample_size;
        for _ in 0..4 {
            p = put_sentinel(&mut data, p, b1);
        }
        put_sentinel(&mut data, p, b3);
    }

    let mut last_close = base_price;
    let mut last_volume = base_volume;
    for c in day.iter().filter(|c| !c.is_empty()) {
        let qo = quantize(c.open, price_factor);
        let qh = quantize(c.high, price_factor);
        let ql = quantize(c.low, price_factor);
        let qc = quantize(c.close, price_factor);
        let qv = quantize(c.volume, volume_factor);

        let slot = minute_of_day(c.timestamp);
        let mut p = samples_start + slot * sample_size;
        p = put_int(&mut data, p, b1, qo - last_close);
        p = put_int(&mut data, p, b1, qh - last_close);
        p = put_int(&mut data, p, b1, ql - last_close);
        p = put_int(&mut data, p, b1, qc - last_close);
        put_int(&mut data, p, b3, qv - last_volume);

        last_close = qc;
        last_volume = qv;
    }

    data
}

/// Decode a day keyed by `day_start` seconds.
pub fn decode(data: &[u8], day_start: u64) -> Result<Box<CandleDay>, CodecError> {
    if data.len() < 2 {
        return Err(CodecError::Corrupt("candle unit shorter than header"));
    }

    let price_scale = data[0] & 0x0F;
    let volume_scale = (data[0] >> 4) & 0x0F;
    let price_factor = pow10(price_scale);
    let volume_factor = pow10(volume_scale);

    let b0 = data[1] & 0x03;
    let b1 = (data[1] >> 2) & 0x03;
    let b2 = (data[1] >> 4) & 0x03;
    let b3 = (data[1] >> 6) & 0x03;

    let sample_size = 4 * width_bytes(b1) + width_bytes(b3);
    let header = 2 + width_bytes(b0) + width_bytes(b2);
    if data.len() != header + MINUTES_IN_DAY * sample_size {
        return Err(CodecError::Corrupt("candle unit length mismatch"));
    }

    let (base_price, offset) = get_uint(data, 2, b0);
    let (base_volume, samples_start) = get_uint(data, offset, b2);

    let mut day = empty_candle_day();
    let mut last_close = base_price as i64;
    let mut last_volume = base_volume as i64;

    for (i, slot) in day.iter_mut().enumerate() {
        let p = samples_start + i * sample_size;
        if is_sentinel(data, p, b1) {
            continue;
        }

        let (d_open, p) = get_int(data, p, b1);
        let (d_high, p) = get_int(data, p, b1);
        let (d_low, p) = get_int(data, p, b1);
        let (d_close, p) = get_int(data, p, b1);
        let (d_volume, _) = get_int(data, p, b3);

        let qc = last_close + d_close;
        let qv = last_volume + d_volume;

        *slot = Candle::new(
            dequantize(last_close + d_open, price_factor),
            dequantize(last_close + d_high, price_factor),
            dequantize(last_close + d_low, price_factor),
            dequantize(qc, price_factor),
            dequantize(qv, volume_factor),
            day_start + i as u64 * SECS_PER_MIN,
        );

        last_close = qc;
        last_volume = qv;
    }

    Ok(day)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_START: u64 = 1_699_920_000;

    fn candle_at(minute: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle::new(
            open,
            high,
            low,
            close,
            volume,
            DAY_START + minute as u64 * 60,
        )
    }

    fn assert_day_eq(a: &CandleDay, b: &CandleDay, digits: u8) {
        let tol = 10f64.powi(-(digits as i32));
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            assert_eq!(x.is_empty(), y.is_empty(), "minute {}", i);
            if x.is_empty() {
                continue;
            }
            assert_eq!(x.timestamp, y.timestamp, "minute {}", i);
            assert!((x.open - y.open).abs() < tol, "open at minute {}", i);
            assert!((x.high - y.high).abs() < tol, "high at minute {}", i);
            assert!((x.low - y.low).abs() < tol, "low at minute {}", i);
            assert!((x.close - y.close).abs() < tol, "close at minute {}", i);
            assert!((x.volume - y.volume).abs() < 1.0, "volume at minute {}", i);
        }
    }

    #[test]
    fn test_empty_day_encodes_to_nothing() {
        let day = empty_candle_day();
        assert!(encode(&day, 5, 0).is_empty());
    }

    #[test]
    fn test_sparse_day_roundtrip() {
        let mut day = empty_candle_day();
        day[0] = candle_at(0, 1.10000, 1.10010, 1.09990, 1.10000, 12.0);
        day[4] = candle_at(4, 1.10020, 1.10060, 1.10040, 1.10050, 7.0);
        day[1439] = candle_at(1439, 1.09980, 1.10000, 1.09950, 1.09970, 3.0);

        let raw = encode(&day, 5, 0);
        let decoded = decode(&raw, DAY_START).unwrap();
        assert_day_eq(&day, &decoded, 5);
    }

    #[test]
    fn test_absent_minutes_stay_absent() {
        let mut day = empty_candle_day();
        for m in [10usize, 11, 600, 601, 602] {
            day[m] = candle_at(m, 1.2, 1.21, 1.19, 1.2, 1.0);
        }

        let raw = encode(&day, 5, 0);
        let decoded = decode(&raw, DAY_START).unwrap();
        for m in 0..MINUTES_IN_DAY {
            assert_eq!(day[m].is_empty(), decoded[m].is_empty(), "minute {}", m);
        }
    }

    #[test]
    fn test_width_sweep() {
        // deltas sized to force each signed width tier in turn
        let cases: &[(f64, usize)] = &[
            (0.00100, 1), // |dq| ~ 100 -> i8
            (0.25000, 2), // ~ 25_000 -> i16
            (20.0, 4),    // ~ 2_000_000 -> i32
        ];
        for &(step, expected_bytes) in cases {
            let mut day = empty_candle_day();
            let base = 100.0;
            day[0] = candle_at(0, base, base, base, base, 1.0);
            day[1] = candle_at(1, base + step, base + step, base + step, base + step, 1.0);

            let raw = encode(&day, 5, 0);
            let b1 = (raw[1] >> 2) & 0x03;
            assert_eq!(width_bytes(b1), expected_bytes, "step {}", step);

            let decoded = decode(&raw, DAY_START).unwrap();
            assert_day_eq(&day, &decoded, 5);
        }
    }

    #[test]
    fn test_wide_price_range_day() {
        // enough spread across the day to exercise the running-close chain
        let mut day = empty_candle_day();
        let mut price = 1.10000;
        for m in 0..MINUTES_IN_DAY {
            let open = price;
            price += if m % 2 == 0 { 0.00013 } else { -0.00007 };
            day[m] = candle_at(
                m,
                open,
                open.max(price) + 0.00002,
                open.min(price) - 0.00002,
                price,
                (m % 50) as f64,
            );
        }

        let raw = encode(&day, 5, 0);
        let decoded = decode(&raw, DAY_START).unwrap();
        assert_day_eq(&day, &decoded, 5);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let mut day = empty_candle_day();
        day[3] = candle_at(3, 1.1, 1.1, 1.1, 1.1, 1.0);
        let mut raw = encode(&day, 5, 0);
        raw.truncate(raw.len() - 1);
        assert!(matches!(
            decode(&raw, DAY_START),
            Err(CodecError::Corrupt(_))
        ));
    }
}
