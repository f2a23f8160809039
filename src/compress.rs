//! Dictionary Compression Layer
//!
//! Thin wrap over zstd's bulk API with the unit dictionaries applied on both
//! sides. Every frame we produce carries its decoded size; frames without
//! that hint are rejected on read so the decoder can pre-size its output.

use crate::error::CodecError;

/// Upper bound on a decoded unit. A day of candles tops out well under a
/// megabyte even at 8-byte widths; anything past this is a corrupt frame.
const MAX_DECODED_BYTES: u64 = 16 * 1024 * 1024;

/// Highest level zstd supports; the default for unit blobs since they are
/// written once and read many times.
pub fn max_level() -> i32 {
    *zstd::compression_level_range().end()
}

pub fn compress_with_dict(src: &[u8], dict: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
    if dict.is_empty() {
        return Err(CodecError::DictionaryMissing);
    }
    let mut compressor = zstd::bulk::Compressor::with_dictionary(level, dict)
        .map_err(|e| CodecError::Compress(e.to_string()))?;
    compressor
        .compress(src)
        .map_err(|e| CodecError::Compress(e.to_string()))
}

pub fn decompress_with_dict(src: &[u8], dict: &[u8]) -> Result<Vec<u8>, CodecError> {
    if dict.is_empty() {
        return Err(CodecError::DictionaryMissing);
    }

    let capacity = match zstd::zstd_safe::get_frame_content_size(src) {
        Ok(Some(n)) if n <= MAX_DECODED_BYTES => n as usize,
        Ok(Some(_)) => return Err(CodecError::Corrupt("decoded size implausible")),
        Ok(None) | Err(_) => return Err(CodecError::FrameUnknownSize),
    };

    let mut decompressor = zstd::bulk::Decompressor::with_dictionary(dict)
        .map_err(|e| CodecError::DictionaryMismatch(e.to_string()))?;
    decompressor
        .decompress(src, capacity)
        .map_err(|e| CodecError::DictionaryMismatch(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CANDLE_DICTIONARY, TICK_DICTIONARY};

    #[test]
    fn test_roundtrip_with_each_dictionary() {
        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        for dict in [CANDLE_DICTIONARY, TICK_DICTIONARY] {
            let packed = compress_with_dict(&payload, dict, max_level()).unwrap();
            let unpacked = decompress_with_dict(&packed, dict).unwrap();
            assert_eq!(unpacked, payload);
        }
    }

    #[test]
    fn test_missing_dictionary_rejected() {
        assert!(matches!(
            compress_with_dict(b"abc", &[], 3),
            Err(CodecError::DictionaryMissing)
        ));
        assert!(matches!(
            decompress_with_dict(b"abc", &[]),
            Err(CodecError::DictionaryMissing)
        ));
    }

    #[test]
    fn test_foreign_bytes_rejected() {
        let garbage = vec![0x42u8; 64];
        assert!(decompress_with_dict(&garbage, CANDLE_DICTIONARY).is_err());
    }

    #[test]
    fn test_frame_without_size_hint_rejected() {
        // streaming frames omit the content size unless told otherwise
        let payload = vec![7u8; 1024];
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), 3).unwrap();
        std::io::copy(&mut payload.as_slice(), &mut encoder).unwrap();
        let frame = encoder.finish().unwrap();

        assert!(matches!(
            decompress_with_dict(&frame, CANDLE_DICTIONARY),
            Err(CodecError::FrameUnknownSize) | Err(CodecError::DictionaryMismatch(_))
        ));
    }
}
