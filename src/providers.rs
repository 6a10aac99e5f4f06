//! Signal sources.
//!
//! Selection priority: live (enabled + key) > CSV > mock. The live source is
//! a feature-flagged stub that always yields empty batches until the real
//! integration lands; the orchestrator treats a fetch error as an empty
//! batch either way.

use chrono::Utc;
use rand::Rng;
use tracing::info;

use crate::config::{Config, MOCK_SIGNALS_PER_TICK};
use crate::error::Result;
use crate::normalize::{
    canonicalize_contract_key, contract_key, dte_from_exp, normalize_record, otm_pct, spread_pct,
    trade_id,
};
use crate::score::conviction_score;
use crate::tailer::CsvTailer;
use crate::types::{OptType, Signal, SourceTag};

pub trait SignalSource: Send {
    /// One tick's batch, at most the configured per-tick budget.
    fn fetch(&mut self) -> Result<Vec<Signal>>;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Tails the configured flow files and normalizes whatever is new.
pub struct CsvSource {
    tailer: CsvTailer,
    et_utc_offset_hours: i64,
}

impl CsvSource {
    pub fn new(tailer: CsvTailer, et_utc_offset_hours: i64) -> Self {
        Self { tailer, et_utc_offset_hours }
    }
}

impl SignalSource for CsvSource {
    fn fetch(&mut self) -> Result<Vec<Signal>> {
        let now = Utc::now();
        Ok(self
            .tailer
            .read_all()
            .into_iter()
            .filter_map(|(rec, source)| {
                normalize_record(&rec, source, now, self.et_utc_offset_hours)
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

// ---------------------------------------------------------------------------
// Mock
// ---------------------------------------------------------------------------

const MOCK_TICKERS: &[&str] =
    &["SPY", "QQQ", "IWM", "NVDA", "AAPL", "MSFT", "AMD", "TSLA", "META", "VIX"];

/// Synthetic flow for development and demos. Value ranges are wide enough to
/// exercise every score band and both sides of the filter cascade.
pub struct MockSource {
    per_tick: usize,
}

impl MockSource {
    pub fn new(max_rows_per_tick: usize) -> Self {
        Self { per_tick: MOCK_SIGNALS_PER_TICK.min(max_rows_per_tick) }
    }

    fn mock_signal() -> Signal {
        let mut rng = rand::thread_rng();
        let now = Utc::now();

        let ticker = MOCK_TICKERS[rng.gen_range(0..MOCK_TICKERS.len())].to_string();
        let opt_type = if rng.gen_bool(0.5) { OptType::C } else { OptType::P };
        let exp = (now + chrono::Duration::days(rng.gen_range(1..=30)))
            .format("%Y-%m-%d")
            .to_string();

        let spot = rng.gen_range(100.0..600.0);
        let strike = (spot * rng.gen_range(0.85..1.15) * 10.0_f64).round() / 10.0;
        let bid = (rng.gen_range(0.4..12.0) * 100.0_f64).round() / 100.0;
        let ask = ((bid + rng.gen_range(0.01..0.8)) * 100.0_f64).round() / 100.0;

        let premium = rng.gen_range(50..=700) as f64 * 1000.0;
        let size = rng.gen_range(10..=1200);
        let volume = rng.gen_range(50..=9000);
        let oi = rng.gen_range(100..=30000);

        let spread = spread_pct(bid, ask);
        let otm = otm_pct(strike, spot, opt_type);
        let dte = dte_from_exp(&exp, now);
        let score = conviction_score(premium, volume, oi, spread, otm, dte, "");

        let ts = now.to_rfc3339();
        let time_raw = now.format("%H:%M:%S").to_string();
        let ck = canonicalize_contract_key(&contract_key(&ticker, &exp, strike, opt_type));
        let tid = trade_id(&ticker, &time_raw, &ts, size, premium);

        Signal {
            ts: ts.clone(),
            contract_key: ck,
            trade_id: tid,
            ticker,
            exp,
            strike,
            opt_type,
            premium,
            size,
            volume,
            oi,
            bid,
            ask,
            spread_pct: (spread * 100.0).round() / 100.0,
            spot,
            otm_pct: (otm * 100.0).round() / 100.0,
            dte,
            score_total: score,
            tags: "MOCK".to_string(),
            reason_codes: serde_json::json!(["MOCK_DATA"]).to_string(),
            source: SourceTag::Mock,
            ingested_at: ts,
            trade_time_raw: time_raw,
            trade_tz: "UTC".to_string(),
        }
    }
}

impl SignalSource for MockSource {
    fn fetch(&mut self) -> Result<Vec<Signal>> {
        Ok((0..self.per_tick).map(|_| Self::mock_signal()).collect())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Live (stubbed)
// ---------------------------------------------------------------------------

/// Live feed placeholder. Returns empty batches until the real integration
/// is implemented; selected only when explicitly enabled with a key.
pub struct LiveSource {
    enabled: bool,
}

impl LiveSource {
    pub fn new(api_key: &str) -> Self {
        Self { enabled: !api_key.is_empty() }
    }
}

impl SignalSource for LiveSource {
    fn fetch(&mut self) -> Result<Vec<Signal>> {
        // Stub: no upstream calls yet, enabled or not.
        let _ = self.enabled;
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "live"
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Pick the source from configuration. Fails closed: an unusable live config
/// falls through to CSV, and no CSV paths means mock.
pub fn select_source(cfg: &Config) -> Result<Box<dyn SignalSource>> {
    if cfg.live_enabled && !cfg.live_api_key.is_empty() {
        info!("[SOURCE] selected live provider (stubbed)");
        return Ok(Box::new(LiveSource::new(&cfg.live_api_key)));
    }

    if !cfg.csv_paths.is_empty() {
        let mut tailer = CsvTailer::new(
            cfg.csv_paths.clone(),
            cfg.state_path.clone(),
            cfg.max_rows_per_tick,
        );
        if cfg.replay_from_start {
            tailer.reset()?;
            info!("[SOURCE] replay-from-start: reset all CSV offsets");
        }
        info!("[SOURCE] selected CSV provider ({} file(s))", cfg.csv_paths.len());
        return Ok(Box::new(CsvSource::new(tailer, cfg.et_utc_offset_hours)));
    }

    info!("[SOURCE] selected mock provider");
    Ok(Box::new(MockSource::new(cfg.max_rows_per_tick)))
}
