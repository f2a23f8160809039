//! End-to-end scenarios across the write path, the read cache, merge mode
//! and the FX fleet, all against real on-disk symbol files.

use quotedb::{
    Candle, CandleSource, FxConfig, FxSymbolConfig, FxSymbolDb, MetadataKey, Period, QuoteDb,
    Tick, TradeFxSignal,
};
use tempfile::TempDir;

const DAY: u64 = 1_699_920_000; // start of a UTC day
const T0: u64 = 1_700_000_000_000; // tick scenario anchor, ms

fn open_symbol(dir: &TempDir, symbol: &str, digits: i64) -> QuoteDb {
    let path = dir.path().join(format!("{}.qdb", symbol));
    let mut db = QuoteDb::open(&path, false).unwrap();
    db.set_info_str(MetadataKey::SymbolName, symbol).unwrap();
    db.set_info_int(MetadataKey::SymbolDigits, digits).unwrap();
    db
}

fn reopen(dir: &TempDir, symbol: &str) -> QuoteDb {
    QuoteDb::open(dir.path().join(format!("{}.qdb", symbol)), false).unwrap()
}

fn minute_candle(minute: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
    Candle::new(open, high, low, close, volume, DAY + minute as u64 * 60)
}

#[test]
fn scenario_write_then_read_no_merge() {
    let dir = TempDir::new().unwrap();
    let mut db = open_symbol(&dir, "EURUSD", 5);

    db.start_write();
    db.write_tick(&Tick::new(1.08000, 1.08010, T0));
    db.write_tick(&Tick::new(1.08002, 1.08012, T0 + 1_500));
    db.stop_write().unwrap();

    // a fresh handle must see the committed data
    let mut db = reopen(&dir, "EURUSD");
    assert_eq!(db.config.digits, 5);
    assert_eq!(db.config.symbol, "EURUSD");

    let tick = db.get_tick_ms(T0 + 1_000).expect("point lookup");
    assert_eq!(tick.t_ms, T0);
    assert!((tick.bid - 1.08000).abs() < 1e-5);
    assert!((tick.ask - 1.08010).abs() < 1e-5);

    let next = db
        .get_next_tick_ms(T0 + 500, T0 + 10_000)
        .expect("next-tick probe");
    assert_eq!(next.t_ms, T0 + 1_500);
    assert!((next.bid - 1.08002).abs() < 1e-5);
    assert!((next.ask - 1.08012).abs() < 1e-5);
}

#[test]
fn scenario_m5_aggregation_from_m1() {
    let dir = TempDir::new().unwrap();
    let mut db = open_symbol(&dir, "EURUSD", 5);

    db.start_write();
    db.write_candle(&minute_candle(0, 1.10000, 1.10010, 1.09990, 1.10000, 2.0));
    db.write_candle(&minute_candle(4, 1.10020, 1.10060, 1.10040, 1.10050, 3.0));
    db.stop_write().unwrap();

    let mut db = reopen(&dir, "EURUSD");
    let bar = db
        .get_candle(DAY + 4 * 60, Period::M5, CandleSource::FromCandles)
        .expect("two live minutes");

    assert!((bar.open - 1.10000).abs() < 1e-5);
    assert!((bar.high - 1.10060).abs() < 1e-5);
    assert!((bar.low - 1.09990).abs() < 1e-5);
    assert!((bar.close - 1.10050).abs() < 1e-5);
    assert!((bar.volume - 5.0).abs() < 1e-9);
    assert_eq!(bar.timestamp, DAY);
}

#[test]
fn scenario_merge_preserves_and_overwrites() {
    let dir = TempDir::new().unwrap();
    let mut db = open_symbol(&dir, "EURUSD", 5);
    db.config.merge_mode = true;

    db.start_write();
    db.write_candle(&minute_candle(10, 1.10000, 1.10010, 1.09990, 1.10005, 1.0));
    db.stop_write().unwrap();

    db.start_write();
    db.write_candle(&minute_candle(10, 1.10100, 1.10110, 1.10090, 1.10105, 2.0));
    db.write_candle(&minute_candle(20, 1.10200, 1.10210, 1.10190, 1.10205, 3.0));
    db.stop_write().unwrap();

    let mut db = reopen(&dir, "EURUSD");
    let at_10 = db
        .get_candle(DAY + 10 * 60, Period::M1, CandleSource::FromCandles)
        .expect("minute 10 survives the rewrite");
    assert!((at_10.close - 1.10105).abs() < 1e-5, "new candle wins the slot");

    let at_20 = db
        .get_candle(DAY + 20 * 60, Period::M1, CandleSource::FromCandles)
        .expect("minute 20 from the second session");
    assert!((at_20.close - 1.10205).abs() < 1e-5);

    assert!(
        db.get_candle(DAY + 15 * 60, Period::M1, CandleSource::FromCandles)
            .is_none(),
        "untouched minutes stay empty"
    );
}

#[test]
fn scenario_deadtime_gating() {
    let dir = TempDir::new().unwrap();
    let mut db = open_symbol(&dir, "EURUSD", 5);

    db.start_write();
    db.write_tick(&Tick::new(1.08000, 1.08010, T0));
    db.stop_write().unwrap();

    let mut db = reopen(&dir, "EURUSD");
    let fresh = db.get_tick_ms(T0 + 59_000).expect("59 s old, inside deadtime");
    assert_eq!(fresh.t_ms, T0);

    assert!(
        db.get_tick_ms(T0 + 61_000).is_none(),
        "61 s old reads as absent"
    );
}

#[test]
fn scenario_fx_cross_rate_profit() {
    let dir = TempDir::new().unwrap();

    let close_at = T0 + 3_600_000;
    {
        let mut db = open_symbol(&dir, "AUDNZD", 5);
        db.start_write();
        db.write_tick(&Tick::new(1.08200, 1.08210, T0));
        db.write_tick(&Tick::new(1.08300, 1.08310, close_at));
        db.stop_write().unwrap();
    }
    {
        let mut db = open_symbol(&dir, "NZDUSD", 5);
        db.start_write();
        db.write_tick(&Tick::new(0.61000, 0.61010, T0));
        db.write_tick(&Tick::new(0.61150, 0.61160, close_at));
        db.stop_write().unwrap();
    }

    let mut fx = FxSymbolDb::init(FxConfig {
        path: dir.path().to_path_buf(),
        symbols: vec![
            FxSymbolConfig::new("AUDNZD"),
            FxSymbolConfig::new("NZDUSD"),
        ],
        account_currency: "USD".to_string(),
        leverage: 1.0,
    })
    .unwrap();

    let result = fx
        .calc_trade_result(&TradeFxSignal {
            symbol: "AUDNZD".to_string(),
            open_date_ms: T0,
            close_date_ms: close_at,
            lot_size: 1.0,
            direction: true,
            ..TradeFxSignal::default()
        })
        .expect("both legs priced");

    let expected = (1.08300 - 1.08210) * 100_000.0 * 0.61150;
    assert!((result.profit - expected).abs() < 1e-5);
    assert!(result.win);
}

#[test]
fn scenario_fx_zero_spread_symmetry() {
    let dir = TempDir::new().unwrap();
    {
        let mut db = open_symbol(&dir, "EURUSD", 5);
        db.start_write();
        db.write_tick(&Tick::new(1.08000, 1.08000, T0));
        db.write_tick(&Tick::new(1.08040, 1.08040, T0 + 60_000));
        db.stop_write().unwrap();
    }

    let mut fx = FxSymbolDb::init(FxConfig {
        path: dir.path().to_path_buf(),
        symbols: vec![FxSymbolConfig::new("EURUSD")],
        account_currency: "USD".to_string(),
        leverage: 1.0,
    })
    .unwrap();

    let base = TradeFxSignal {
        symbol: "EURUSD".to_string(),
        open_date_ms: T0,
        close_date_ms: T0 + 60_000,
        lot_size: 1.0,
        direction: true,
        ..TradeFxSignal::default()
    };
    let buy = fx.calc_trade_result(&base).unwrap();
    let sell = fx
        .calc_trade_result(&TradeFxSignal {
            direction: false,
            ..base
        })
        .unwrap();

    assert!((buy.profit + sell.profit).abs() < 1e-6);
    assert!((buy.pips + sell.pips).abs() < 1e-6);
    assert!(buy.win != sell.win);
}

#[test]
fn scenario_out_of_order_stream_needs_merge() {
    let dir = TempDir::new().unwrap();

    // without merge, a late sample for a sealed hour rewrites the unit
    let mut db = open_symbol(&dir, "EURUSD", 5);
    db.start_write();
    db.write_tick(&Tick::new(1.0, 1.0, T0));
    db.write_tick(&Tick::new(1.1, 1.1, T0 + 3_600_000)); // seals the hour
    db.write_tick(&Tick::new(1.2, 1.2, T0 + 1_000)); // late, restarts staging
    db.stop_write().unwrap();

    let mut db = reopen(&dir, "EURUSD");
    assert!(
        db.get_tick_ms(T0).map(|t| t.t_ms) != Some(T0),
        "late rewrite lost the first tick"
    );

    // merge mode folds the late sample into the stored unit instead
    let mut db = open_symbol(&dir, "MERGED", 5);
    db.config.merge_mode = true;
    db.start_write();
    db.write_tick(&Tick::new(1.0, 1.0, T0));
    db.write_tick(&Tick::new(1.1, 1.1, T0 + 3_600_000));
    db.write_tick(&Tick::new(1.2, 1.2, T0 + 1_000));
    db.stop_write().unwrap();

    let mut db = reopen(&dir, "MERGED");
    assert_eq!(db.get_tick_ms(T0).map(|t| t.t_ms), Some(T0));
    assert_eq!(
        db.get_next_tick_ms(T0, T0 + 10_000).map(|t| t.t_ms),
        Some(T0 + 1_000)
    );
}
