//! Per-Symbol Quote Engine
//!
//! Composes the blob storage, unit codec, ingestion buffer and read cache
//! behind one handle. Writes stage compressed unit blobs per session and
//! commit them in two atomic batches on `stop_write`; reads flow through the
//! price buffer, whose loaders pull, decompress and decode blobs on demand,
//! treating every failure as "unit absent".

use crate::codec::DataCodec;
use crate::error::StorageError;
use crate::price_buffer::{CandleLoader, PriceBuffer, PriceBufferConfig, TickHour, TickLoader};
use crate::storage::{QuoteStorage, StorageConfig};
use crate::time::{start_of_day, start_of_hour, MS_PER_SEC};
use crate::types::{
    empty_candle_day, Candle, CandleDay, CandleSource, MetadataKey, Period, Tick,
};
use crate::writer::{SealedCandles, SealedTicks, WriterBuffer};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct QuoteDbConfig {
    /// Symbol name, mirrored from metadata on open.
    pub symbol: String,
    /// Quote feed source, mirrored from metadata on open.
    pub source: String,
    /// Price decimals; the codec's quantization scale on writes.
    pub digits: u8,
    /// Preserve pre-existing samples when a written unit overlaps a stored
    /// one. Off by default: rewrites replace whole units.
    pub merge_mode: bool,
}

/// One symbol's quote database.
pub struct QuoteDb {
    pub config: QuoteDbConfig,
    storage: Arc<QuoteStorage>,
    codec: DataCodec,
    writer: WriterBuffer,
    buffer: PriceBuffer,
    pending_ticks: BTreeMap<u64, Vec<u8>>,
    pending_candles: BTreeMap<u64, Vec<u8>>,
}

impl QuoteDb {
    /// Open or create the symbol file at `path`.
    pub fn open(path: impl AsRef<Path>, readonly: bool) -> Result<Self> {
        let storage = QuoteStorage::open(&path, readonly, &StorageConfig::default())
            .with_context(|| format!("open quote db {}", path.as_ref().display()))?;
        Self::with_storage(storage)
    }

    /// In-memory engine (for testing).
    pub fn open_memory() -> Result<Self> {
        Self::with_storage(QuoteStorage::open_memory()?)
    }

    fn with_storage(storage: QuoteStorage) -> Result<Self> {
        let storage = Arc::new(storage);

        let digits = storage
            .get_info_int(MetadataKey::SymbolDigits)?
            .unwrap_or(0)
            .clamp(0, 15) as u8;
        let symbol = storage
            .get_info_str(MetadataKey::SymbolName)?
            .unwrap_or_default();
        let source = storage
            .get_info_str(MetadataKey::SymbolDataFeedSource)?
            .unwrap_or_default();

        let codec = DataCodec::default();
        let buffer = PriceBuffer::new(
            PriceBufferConfig::default(),
            Self::tick_loader(Arc::clone(&storage), codec.clone()),
            Self::candle_loader(Arc::clone(&storage), codec.clone()),
        );

        Ok(Self {
            config: QuoteDbConfig {
                symbol,
                source,
                digits,
                merge_mode: false,
            },
            storage,
            codec,
            writer: WriterBuffer::new(),
            buffer,
            pending_ticks: BTreeMap::new(),
            pending_candles: BTreeMap::new(),
        })
    }

    fn tick_loader(storage: Arc<QuoteStorage>, codec: DataCodec) -> TickLoader {
        Box::new(move |hour_start| match storage.read_ticks(hour_start) {
            Ok(Some(blob)) => match codec.unpack_ticks(hour_start, &blob) {
                Ok(hour) => hour,
                Err(e) => {
                    warn!(hour_start, error = %e, "tick unit unreadable, treating as absent");
                    TickHour::new()
                }
            },
            Ok(None) => TickHour::new(),
            Err(e) => {
                warn!(hour_start, error = %e, "tick unit read failed");
                TickHour::new()
            }
        })
    }

    fn candle_loader(storage: Arc<QuoteStorage>, codec: DataCodec) -> CandleLoader {
        Box::new(move |day_start| match storage.read_candles(day_start) {
            Ok(Some(blob)) => match codec.unpack_candles(day_start, &blob) {
                Ok(day) => day,
                Err(e) => {
                    warn!(day_start, error = %e, "candle unit unreadable, treating as absent");
                    empty_candle_day()
                }
            },
            Ok(None) => empty_candle_day(),
            Err(e) => {
                warn!(day_start, error = %e, "candle unit read failed");
                empty_candle_day()
            }
        })
    }

    /// Read cache tuning knobs.
    pub fn buffer_config_mut(&mut self) -> &mut PriceBufferConfig {
        &mut self.buffer.config
    }

    // -------------------------------------------------------------------------
    // Write path
    // -------------------------------------------------------------------------

    /// Begin a write session, dropping anything staged by a previous one.
    pub fn start_write(&mut self) {
        self.pending_ticks.clear();
        self.pending_candles.clear();
        self.writer.start();
    }

    pub fn write_tick(&mut self, tick: &Tick) {
        if let Some(sealed) = self.writer.write_tick(tick) {
            self.seal_ticks(sealed);
        }
    }

    pub fn write_candle(&mut self, candle: &Candle) {
        if let Some(sealed) = self.writer.write_candle(candle) {
            self.seal_candles(sealed);
        }
    }

    /// Flush the staging buffer and commit both pending batches. Succeeds
    /// only when every blob is durably stored.
    pub fn stop_write(&mut self) -> Result<()> {
        let (ticks, candles) = self.writer.stop();
        if let Some(sealed) = ticks {
            self.seal_ticks(sealed);
        }
        if let Some(sealed) = candles {
            self.seal_candles(sealed);
        }

        if !self.pending_candles.is_empty() {
            self.storage
                .write_candles(&self.pending_candles)
                .context("commit candle batch")?;
        }
        if !self.pending_ticks.is_empty() {
            self.storage
                .write_ticks(&self.pending_ticks)
                .context("commit tick batch")?;
        }

        debug!(
            symbol = %self.config.symbol,
            candle_units = self.pending_candles.len(),
            tick_units = self.pending_ticks.len(),
            "write session committed"
        );
        self.pending_candles.clear();
        self.pending_ticks.clear();

        // staged units may shadow what the cache holds
        self.buffer.clear();
        Ok(())
    }

    fn seal_ticks(&mut self, sealed: SealedTicks) {
        let hour_start = start_of_hour(sealed.hour_start);
        let mut ticks = sealed.ticks;

        if self.config.merge_mode {
            // a unit sealed twice in one session lives in the pending batch,
            // not yet in storage
            let existing = match self.pending_ticks.get(&hour_start) {
                Some(blob) => self.codec.unpack_ticks(hour_start, blob).ok(),
                None => self.load_tick_unit(hour_start),
            };
            if let Some(existing) = existing {
                // keep the stored hour; the fresh map wins at equal keys
                let mut merged = existing;
                merged.extend(ticks);
                ticks = merged;
            }
        }

        match self
            .codec
            .pack_ticks(hour_start, &ticks, self.config.digits)
        {
            Ok(Some(blob)) => {
                self.pending_ticks.insert(hour_start, blob);
            }
            Ok(None) => {}
            Err(e) => warn!(hour_start, error = %e, "tick unit encode failed, unit dropped"),
        }
    }

    fn seal_candles(&mut self, sealed: SealedCandles) {
        let day_start = start_of_day(sealed.day_start);
        let mut day = sealed.candles;

        if self.config.merge_mode {
            let existing = match self.pending_candles.get(&day_start) {
                Some(blob) => self.codec.unpack_candles(day_start, blob).ok(),
                None => self.load_candle_unit(day_start),
            };
            if let Some(mut existing) = existing {
                // overlay live minutes onto the stored day, new wins per slot
                for (slot, candle) in existing.iter_mut().zip(day.iter()) {
                    if !candle.is_empty() {
                        *slot = *candle;
                    }
                }
                day = existing;
            }
        }

        match self.codec.pack_candles(&day, self.config.digits, 0) {
            Ok(Some(blob)) => {
                self.pending_candles.insert(day_start, blob);
            }
            Ok(None) => {}
            Err(e) => warn!(day_start, error = %e, "candle unit encode failed, unit dropped"),
        }
    }

    fn load_tick_unit(&self, hour_start: u64) -> Option<TickHour> {
        let blob = self.storage.read_ticks(hour_start).ok().flatten()?;
        self.codec.unpack_ticks(hour_start, &blob).ok()
    }

    fn load_candle_unit(&self, day_start: u64) -> Option<Box<CandleDay>> {
        let blob = self.storage.read_candles(day_start).ok().flatten()?;
        self.codec.unpack_candles(day_start, &blob).ok()
    }

    // -------------------------------------------------------------------------
    // Deletion
    // -------------------------------------------------------------------------

    /// Remove the candle day containing `t`.
    pub fn remove_candles(&mut self, t: u64) -> Result<(), StorageError> {
        self.storage.remove_candles(start_of_day(t))
    }

    /// Remove the tick hour containing `t`.
    pub fn remove_ticks(&mut self, t: u64) -> Result<(), StorageError> {
        self.storage.remove_ticks(start_of_hour(t))
    }

    pub fn remove_all(&mut self) -> Result<(), StorageError> {
        self.buffer.clear();
        self.storage.remove_all()
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    pub fn get_info_str(&self, key: MetadataKey) -> Option<String> {
        self.storage.get_info_str(key).ok().flatten()
    }

    pub fn get_info_int(&self, key: MetadataKey) -> Option<i64> {
        self.storage.get_info_int(key).ok().flatten()
    }

    pub fn set_info_str(&mut self, key: MetadataKey, value: &str) -> Result<(), StorageError> {
        match key {
            MetadataKey::SymbolName => self.config.symbol = value.to_string(),
            MetadataKey::SymbolDataFeedSource => self.config.source = value.to_string(),
            MetadataKey::SymbolDigits => {}
        }
        self.storage.set_info_str(key, value)
    }

    pub fn set_info_int(&mut self, key: MetadataKey, value: i64) -> Result<(), StorageError> {
        if key == MetadataKey::SymbolDigits {
            self.config.digits = value.clamp(0, 15) as u8;
        }
        self.storage.set_info_int(key, value)
    }

    /// Covered `[t_min, t_max)` range in UTC seconds for ticks or candles.
    pub fn get_min_max_date(&self, use_ticks: bool) -> Option<(u64, u64)> {
        self.storage.get_min_max_date(use_ticks).ok().flatten()
    }

    // -------------------------------------------------------------------------
    // Read path
    // -------------------------------------------------------------------------

    pub fn get_candle(&mut self, t: u64, period: Period, source: CandleSource) -> Option<Candle> {
        self.buffer.get_candle(t, period, source)
    }

    pub fn get_tick(&mut self, t: u64) -> Option<Tick> {
        self.buffer.get_tick_ms(t * MS_PER_SEC)
    }

    pub fn get_tick_ms(&mut self, t_ms: u64) -> Option<Tick> {
        self.buffer.get_tick_ms(t_ms)
    }

    pub fn get_next_tick_ms(&mut self, t_ms: u64, t_ms_max: u64) -> Option<Tick> {
        self.buffer.get_next_tick_ms(t_ms, t_ms_max)
    }
}

impl Drop for QuoteDb {
    fn drop(&mut self) {
        self.storage.shutdown();
    }
}
