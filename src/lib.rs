//! quotedb — embedded tick/candle time-series storage
//!
//! One SQLite file per trading symbol holds a day of 1-minute candles or an
//! hour of ticks per row, delta-encoded and dictionary-compressed. On top of
//! the store sit a two-tier read cache with synthetic bar assembly, a
//! minute/hour-aligned ingestion buffer with an optional read-modify-write
//! merge mode, an FX fleet with cross-rate P/L, and a multi-threaded
//! historical replay engine.
//!
//! Typical single-symbol use:
//!
//! ```no_run
//! use quotedb::{MetadataKey, QuoteDb, Tick};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut db = QuoteDb::open("EURUSD.qdb", false)?;
//! db.set_info_int(MetadataKey::SymbolDigits, 5)?;
//!
//! db.start_write();
//! db.write_tick(&Tick::new(1.08000, 1.08010, 1_700_000_000_000));
//! db.stop_write()?;
//!
//! let tick = db.get_tick_ms(1_700_000_001_000);
//! # let _ = tick;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod compress;
pub mod error;
pub mod fx;
pub mod price_buffer;
pub mod replay;
pub mod storage;
pub mod symbol;
pub mod time;
pub mod types;
pub mod writer;

pub use error::{CodecError, StorageError};
pub use fx::{FxConfig, FxSymbolConfig, FxSymbolDb, TradeFxResult, TradeFxSignal};
pub use price_buffer::{PriceBuffer, PriceBufferConfig};
pub use replay::{ReplayConfig, ReplayEngine};
pub use storage::{QuoteStorage, StorageConfig};
pub use symbol::{QuoteDb, QuoteDbConfig};
pub use types::{
    Candle, CandleSource, MetadataKey, Period, PriceMode, ShortTick, Tick, TimePeriod, TimePoint,
};
pub use writer::WriterBuffer;
