//! Hour-of-ticks delta stream.
//!
//! Samples are `(Δbid, Δask, Δt_ms)` in ascending time order. Both price
//! deltas run against the previous tick's quantized bid, seeded by the first
//! tick; the time delta runs against the previous tick's millisecond stamp,
//! seeded by the hour start (supplied, never stored). The sample count is
//! implicit in the byte length.

use super::{
    dequantize, get_int, get_uint, pow10, put_int, put_uint, quantize, signed_width_code,
    unsigned_width_code, width_bytes,
};
use crate::error::CodecError;
use crate::types::ShortTick;
use std::collections::BTreeMap;

/// Encode an hour map keyed by `t_ms`. Returns an empty vector for an empty
/// hour.
pub fn encode(ticks: &BTreeMap<u64, ShortTick>, price_scale: u8, hour_start_ms: u64) -> Vec<u8> {
    let first = match ticks.values().next() {
        Some(t) => t,
        None => return Vec::new(),
    };

    let price_factor = pow10(price_scale);
    let base_price = quantize(first.bid, price_factor);

    let mut max_price_mag: u64 = 0;
    let mut max_time_mag: u64 = 0;
    let mut last_bid = base_price;
    let mut last_t = hour_start_ms as i64;
    for (&t_ms, tick) in ticks {
        let qb = quantize(tick.bid, price_factor);
        let qa = quantize(tick.ask, price_factor);
        max_price_mag = max_price_mag.max((qb - last_bid).unsigned_abs());
        max_price_mag = max_price_mag.max((qa - last_bid).unsigned_abs());
        max_time_mag = max_time_mag.max((t_ms as i64 - last_t).unsigned_abs());
        last_bid = qb;
        last_t = t_ms as i64;
    }

    let b0 = unsigned_width_code(base_price as u64);
    let b1 = signed_width_code(max_price_mag);
    let b3 = signed_width_code(max_time_mag);

    let reg_a = price_scale & 0x0F;
    let reg_b = (b3 << 6) | (b1 << 2) | b0;

    let sample_size = 2 * width_bytes(b1) + width_bytes(b3);
    let header = 2 + width_bytes(b0);
    let mut data = vec![0u8; header + ticks.len() * sample_size];

    data[0] = reg_a;
    data[1] = reg_b;
    let samples_start = put_uint(&mut data, 2, b0, base_price as u64);

    let mut last_bid = base_price;
    let mut last_t = hour_start_ms as i64;
    let mut p = samples_start;
    for (&t_ms, tick) in ticks {
        let qb = quantize(tick.bid, price_factor);
        let qa = quantize(tick.ask, price_factor);

        p = put_int(&mut data, p, b1, qb - last_bid);
        p = put_int(&mut data, p, b1, qa - last_bid);
        p = put_int(&mut data, p, b3, t_ms as i64 - last_t);

        last_bid = qb;
        last_t = t_ms as i64;
    }

    data
}

/// Decode an hour keyed by `hour_start_ms`.
pub fn decode(data: &[u8], hour_start_ms: u64) -> Result<BTreeMap<u64, ShortTick>, CodecError> {
    if data.is_empty() {
        return Ok(BTreeMap::new());
    }
    if data.len() < 2 {
        return Err(CodecError::Corrupt("tick unit shorter than header"));
    }

    let price_scale = data[0] & 0x0F;
    let price_factor = pow10(price_scale);

    let b0 = data[1] & 0x03;
    let b1 = (data[1] >> 2) & 0x03;
    let b3 = (data[1] >> 6) & 0x03;

    let header = 2 + width_bytes(b0);
    let sample_size = 2 * width_bytes(b1) + width_bytes(b3);
    if data.len() < header || (data.len() - header) % sample_size != 0 {
        return Err(CodecError::Corrupt("tick unit length mismatch"));
    }
    let count = (data.len() - header) / sample_size;

    let (base_price, samples_start) = get_uint(data, 2, b0);

    let mut ticks = BTreeMap::new();
    let mut last_bid = base_price as i64;
    let mut last_t = hour_start_ms as i64;
    let mut p = samples_start;
    for _ in 0..count {
        let (d_bid, next) = get_int(data, p, b1);
        let (d_ask, next) = get_int(data, next, b1);
        let (d_t, next) = get_int(data, next, b3);
        p = next;

        let qb = last_bid + d_bid;
        let qa = last_bid + d_ask;
        let t = last_t + d_t;
        last_bid = qb;
        last_t = t;

        ticks.insert(
            t as u64,
            ShortTick::new(dequantize(qb, price_factor), dequantize(qa, price_factor)),
        );
    }

    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_START_MS: u64 = 1_699_999_200_000;

    fn hour(ticks: &[(u64, f64, f64)]) -> BTreeMap<u64, ShortTick> {
        ticks
            .iter()
            .map(|&(t, bid, ask)| (t, ShortTick::new(bid, ask)))
            .collect()
    }

    fn assert_hour_eq(a: &BTreeMap<u64, ShortTick>, b: &BTreeMap<u64, ShortTick>, digits: u8) {
        assert_eq!(a.len(), b.len());
        let tol = 10f64.powi(-(digits as i32));
        for ((ta, xa), (tb, xb)) in a.iter().zip(b.iter()) {
            assert_eq!(ta, tb);
            assert!((xa.bid - xb.bid).abs() < tol, "bid at {}", ta);
            assert!((xa.ask - xb.ask).abs() < tol, "ask at {}", ta);
        }
    }

    #[test]
    fn test_empty_hour_encodes_to_nothing() {
        assert!(encode(&BTreeMap::new(), 5, HOUR_START_MS).is_empty());
    }

    #[test]
    fn test_hour_roundtrip() {
        let ticks = hour(&[
            (HOUR_START_MS + 15, 1.08000, 1.08010),
            (HOUR_START_MS + 1_500, 1.08002, 1.08012),
            (HOUR_START_MS + 1_730, 1.07995, 1.08003),
            (HOUR_START_MS + 3_599_999, 1.08050, 1.08061),
        ]);

        let raw = encode(&ticks, 5, HOUR_START_MS);
        let decoded = decode(&raw, HOUR_START_MS).unwrap();
        assert_hour_eq(&ticks, &decoded, 5);
    }

    #[test]
    fn test_count_and_order_preserved() {
        let mut ticks = BTreeMap::new();
        for i in 0..500u64 {
            ticks.insert(
                HOUR_START_MS + i * 7_001,
                ShortTick::new(1.1 + i as f64 * 1e-5, 1.1001 + i as f64 * 1e-5),
            );
        }

        let raw = encode(&ticks, 5, HOUR_START_MS);
        let decoded = decode(&raw, HOUR_START_MS).unwrap();
        assert_eq!(decoded.len(), 500);

        let keys: Vec<u64> = decoded.keys().copied().collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
        assert_hour_eq(&ticks, &decoded, 5);
    }

    #[test]
    fn test_width_sweep_time_deltas() {
        // one tick right at the hour start keeps time deltas tiny; a tick
        // near the end forces a wide time width
        let narrow = hour(&[
            (HOUR_START_MS + 1, 1.1, 1.1001),
            (HOUR_START_MS + 100, 1.1, 1.1001),
        ]);
        let raw = encode(&narrow, 5, HOUR_START_MS);
        assert_eq!(width_bytes((raw[1] >> 6) & 0x03), 1);

        let wide = hour(&[(HOUR_START_MS + 3_000_000, 1.1, 1.1001)]);
        let raw = encode(&wide, 5, HOUR_START_MS);
        assert_eq!(width_bytes((raw[1] >> 6) & 0x03), 4);

        assert_hour_eq(&wide, &decode(&raw, HOUR_START_MS).unwrap(), 5);
    }

    #[test]
    fn test_ragged_payload_rejected() {
        let ticks = hour(&[
            (HOUR_START_MS + 10, 1.1, 1.1001),
            (HOUR_START_MS + 20, 1.1002, 1.1003),
        ]);
        let mut raw = encode(&ticks, 5, HOUR_START_MS);
        raw.truncate(raw.len() - 1);
        assert!(matches!(
            decode(&raw, HOUR_START_MS),
            Err(CodecError::Corrupt(_))
        ));
    }
}
