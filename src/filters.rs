//! Four-stage pre-insertion filter cascade.
//!
//! Stage 0  schema sanity  — drop malformed / impossible rows
//! Stage 1  liquidity      — drop thin / wide-spread contracts
//! Stage 2  signal quality — drop low-conviction orderflow
//! Stage 3  top-N limiter  — enforced by the orchestrator (sort + truncate)

use crate::config::HARD_SPREAD_CAP_PCT;
use crate::types::{AggressionSide, FilterStats, Signal, SourceTag};

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => true,
            "0" | "false" | "no" | "n" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// All cascade thresholds in one place; every knob has a `FILTER_*` env
/// override.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    // Liquidity
    pub min_premium_stock: f64,
    pub min_premium_etf: f64,
    pub min_size_stock: i64,
    pub min_size_etf: i64,
    pub max_spread_pct: f64,
    pub max_spread_pct_high_premium: f64,
    pub high_premium_override: f64,

    // Signal
    pub vol_oi_min: f64,
    pub max_dte: i64,
    pub max_dte_big: i64,
    pub big_premium_for_long_dte: f64,
    pub require_aggressive_side: bool,
    pub allow_mid_if_premium_over: f64,

    // Tick limiter (stage 3, applied by the orchestrator)
    pub max_insert_per_tick: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_premium_stock: 7_500.0,
            min_premium_etf: 5_000.0,
            min_size_stock: 150,
            min_size_etf: 100,
            max_spread_pct: 18.0,
            max_spread_pct_high_premium: 30.0,
            high_premium_override: 50_000.0,
            vol_oi_min: 0.35,
            max_dte: 45,
            max_dte_big: 120,
            big_premium_for_long_dte: 75_000.0,
            require_aggressive_side: true,
            allow_mid_if_premium_over: 100_000.0,
            max_insert_per_tick: 15,
        }
    }
}

impl FilterConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_premium_stock: env_f64("FILTER_MIN_PREMIUM_STOCK", d.min_premium_stock),
            min_premium_etf: env_f64("FILTER_MIN_PREMIUM_ETF", d.min_premium_etf),
            min_size_stock: env_i64("FILTER_MIN_SIZE_STOCK", d.min_size_stock),
            min_size_etf: env_i64("FILTER_MIN_SIZE_ETF", d.min_size_etf),
            max_spread_pct: env_f64("FILTER_MAX_SPREAD_PCT", d.max_spread_pct),
            max_spread_pct_high_premium: env_f64("FILTER_MAX_SPREAD_PCT_HIGH", d.max_spread_pct_high_premium),
            high_premium_override: env_f64("FILTER_HIGH_PREMIUM_OVERRIDE", d.high_premium_override),
            vol_oi_min: env_f64("FILTER_VOL_OI_MIN", d.vol_oi_min),
            max_dte: env_i64("FILTER_MAX_DTE", d.max_dte),
            max_dte_big: env_i64("FILTER_MAX_DTE_BIG", d.max_dte_big),
            big_premium_for_long_dte: env_f64("FILTER_BIG_PREMIUM_LONG_DTE", d.big_premium_for_long_dte),
            require_aggressive_side: env_bool("FILTER_REQUIRE_AGGRESSIVE", d.require_aggressive_side),
            allow_mid_if_premium_over: env_f64("FILTER_ALLOW_MID_OVER", d.allow_mid_if_premium_over),
            max_insert_per_tick: env_usize("FILTER_MAX_INSERT_PER_TICK", d.max_insert_per_tick),
        }
    }
}

// ---------------------------------------------------------------------------
// ETF universe — liquidity-tier selection
// ---------------------------------------------------------------------------

pub const ETF_TICKERS: &[&str] = &[
    // Broad market
    "SPY", "QQQ", "IWM", "DIA", "VTI", "VOO", "VEA", "VWO",
    // Sectors
    "XLK", "XLF", "XLE", "XLV", "XLI", "XLP", "XLY", "XLB", "XLU", "XLRE",
    // Bonds / rates
    "TLT", "IEF", "SHY", "AGG", "LQD", "HYG", "JNK",
    // Volatility
    "VXX", "UVXY", "SVXY", "VIXY",
    // Leveraged
    "TQQQ", "SQQQ", "SPXL", "SPXS", "UPRO", "SPXU", "UDOW", "SDOW",
    "NUGT", "DUST", "LABU", "LABD",
    // Commodities / gold / oil
    "GLD", "SLV", "GDX", "GDXJ", "OIH", "USO", "UNG", "DBO",
    // International
    "EEM", "EFA", "FXI", "EWJ", "EWZ", "KWEB",
    // Misc high-volume
    "ARKK", "ARKG", "ARKW", "ARKF", "ARKQ",
    "SMH", "SOXX", "IBB", "XBI", "HACK",
    "JETS", "MSOS",
];

/// ETF liquidity tier applies when the source file was tagged as an ETF feed
/// or the ticker sits in the fixed ETF universe.
fn is_etf(sig: &Signal) -> bool {
    sig.source == SourceTag::CsvEtf || ETF_TICKERS.contains(&sig.ticker.as_str())
}

// ---------------------------------------------------------------------------
// Stage 0 — schema sanity
// ---------------------------------------------------------------------------

/// Structurally invalid or physically impossible rows, before any financial
/// logic. The option type is already constrained to C/P by construction.
pub fn passes_stage0(sig: &Signal) -> bool {
    if sig.ticker.is_empty() || sig.exp.is_empty() {
        return false;
    }
    if !sig.strike.is_finite() || sig.strike <= 0.0 {
        return false;
    }
    if sig.premium <= 0.0 || sig.size <= 0 {
        return false;
    }
    if sig.bid <= 0.0 || sig.ask <= 0.0 || sig.ask < sig.bid {
        return false;
    }
    // Hard cap, not configurable
    if sig.spread_pct > HARD_SPREAD_CAP_PCT {
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// Stage 1 — liquidity
// ---------------------------------------------------------------------------

pub fn passes_stage1(sig: &Signal, cfg: &FilterConfig) -> bool {
    let etf = is_etf(sig);

    let min_prem = if etf { cfg.min_premium_etf } else { cfg.min_premium_stock };
    if sig.premium < min_prem {
        return false;
    }

    let min_size = if etf { cfg.min_size_etf } else { cfg.min_size_stock };
    if sig.size < min_size {
        return false;
    }

    // High-premium trades get a wider spread allowance
    let max_spread = if sig.premium >= cfg.high_premium_override {
        cfg.max_spread_pct_high_premium
    } else {
        cfg.max_spread_pct
    };
    sig.spread_pct <= max_spread
}

// ---------------------------------------------------------------------------
// Stage 2 — signal quality
// ---------------------------------------------------------------------------

/// Classify the trade as hitting ASK, BID, or MID from the per-share trade
/// price implied by premium/(size*100).
pub fn aggression_side(sig: &Signal) -> AggressionSide {
    if sig.bid <= 0.0 || sig.ask <= 0.0 {
        return AggressionSide::Mid;
    }
    let trade_price = if sig.size > 0 && sig.premium > 0.0 {
        sig.premium / (sig.size as f64 * 100.0)
    } else {
        0.0
    };
    if trade_price <= 0.0 {
        return AggressionSide::Mid;
    }
    if trade_price >= sig.ask * 0.99 {
        return AggressionSide::Ask;
    }
    if trade_price <= sig.bid * 1.01 {
        return AggressionSide::Bid;
    }
    AggressionSide::Mid
}

/// The conviction gate: at least one of high vol/OI, short DTE, big-premium
/// long-dated, or an aggressive side. MID trades under the allow-mid premium
/// threshold are additionally dropped when aggression is required.
pub fn passes_stage2(sig: &Signal, cfg: &FilterConfig) -> bool {
    let vol_oi = sig.volume as f64 / sig.oi.max(1) as f64;
    let side = aggression_side(sig);

    let has_vol_oi = vol_oi >= cfg.vol_oi_min;
    let has_short_dte = sig.dte <= cfg.max_dte;
    let has_big_long =
        sig.premium >= cfg.big_premium_for_long_dte && sig.dte <= cfg.max_dte_big;
    let is_aggressive = matches!(side, AggressionSide::Ask | AggressionSide::Bid);

    if !(has_vol_oi || has_short_dte || has_big_long || is_aggressive) {
        return false;
    }

    if cfg.require_aggressive_side
        && side == AggressionSide::Mid
        && sig.premium < cfg.allow_mid_if_premium_over
    {
        return false;
    }

    true
}

// ---------------------------------------------------------------------------
// Cascade driver
// ---------------------------------------------------------------------------

/// Run stages 0→1→2 over a batch. A signal dropped at stage n is never
/// evaluated at stage n+1. Survivors come back sorted best-score-first; the
/// caller owns the top-N truncation and the inserted/efficiency stats.
pub fn filter_tick(rows: Vec<Signal>, cfg: &FilterConfig) -> (Vec<Signal>, FilterStats) {
    let parsed = rows.len();
    let mut s0_drop = 0usize;
    let mut s1_drop = 0usize;
    let mut s2_drop = 0usize;
    let mut candidates: Vec<Signal> = Vec::new();

    for row in rows {
        if !passes_stage0(&row) {
            s0_drop += 1;
            continue;
        }
        if !passes_stage1(&row, cfg) {
            s1_drop += 1;
            continue;
        }
        if !passes_stage2(&row, cfg) {
            s2_drop += 1;
            continue;
        }
        candidates.push(row);
    }

    candidates.sort_by(|a, b| b.score_total.total_cmp(&a.score_total));

    let stats = FilterStats {
        parsed,
        dropped_stage0: s0_drop,
        dropped_stage1: s1_drop,
        dropped_stage2: s2_drop,
        pre_insert: candidates.len(),
        inserted: 0,
        efficiency_pct: 0.0,
    };
    (candidates, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OptType;

    fn base_signal() -> Signal {
        Signal {
            ts: "2026-02-06T14:56:50+00:00".to_string(),
            contract_key: "SPY|2026-02-13|400.0|C".to_string(),
            trade_id: "t".to_string(),
            ticker: "SPY".to_string(),
            exp: "2026-02-13".to_string(),
            strike: 400.0,
            opt_type: OptType::C,
            premium: 1_200_000.0,
            size: 600,
            volume: 5000,
            oi: 1000,
            bid: 2.90,
            ask: 3.10,
            spread_pct: 6.67,
            spot: 0.0,
            otm_pct: 0.0,
            dte: 5,
            score_total: 81.2,
            tags: "CSV_SWEEP".to_string(),
            reason_codes: "[\"CSV_IMPORT\",\"SWEEP\"]".to_string(),
            source: SourceTag::Csv,
            ingested_at: "2026-02-08T12:00:00+00:00".to_string(),
            trade_time_raw: "09:56:50".to_string(),
            trade_tz: "America/New_York".to_string(),
        }
    }

    #[test]
    fn sample_sweep_survives_all_stages() {
        let cfg = FilterConfig::default();
        let sig = base_signal();
        assert!(passes_stage0(&sig));
        assert!(passes_stage1(&sig, &cfg));
        assert!(passes_stage2(&sig, &cfg));
    }

    #[test]
    fn stage0_rejects_crossed_quotes() {
        let mut sig = base_signal();
        sig.bid = 3.0;
        sig.ask = 1.0;
        assert!(!passes_stage0(&sig));
    }

    #[test]
    fn stage0_rejects_impossible_rows() {
        let cfg = |f: fn(&mut Signal)| {
            let mut s = base_signal();
            f(&mut s);
            s
        };
        assert!(!passes_stage0(&cfg(|s| s.ticker.clear())));
        assert!(!passes_stage0(&cfg(|s| s.exp.clear())));
        assert!(!passes_stage0(&cfg(|s| s.strike = 0.0)));
        assert!(!passes_stage0(&cfg(|s| s.strike = f64::NAN)));
        assert!(!passes_stage0(&cfg(|s| s.premium = 0.0)));
        assert!(!passes_stage0(&cfg(|s| s.size = 0)));
        assert!(!passes_stage0(&cfg(|s| s.bid = 0.0)));
        assert!(!passes_stage0(&cfg(|s| s.ask = 0.0)));
        assert!(!passes_stage0(&cfg(|s| s.spread_pct = 60.1)));
    }

    #[test]
    fn stage1_premium_floor_rejects_small_trades() {
        let cfg = FilterConfig::default();
        let mut sig = base_signal();
        sig.premium = 500.0;
        sig.size = 5000;
        // bid/ask kept valid so it reaches stage 1
        assert!(passes_stage0(&sig));
        assert!(!passes_stage1(&sig, &cfg));
    }

    #[test]
    fn stage1_tier_selection_by_source_and_ticker() {
        let cfg = FilterConfig::default();

        // ETF by ticker: premium 6k passes the 5k ETF floor
        let mut etf = base_signal();
        etf.premium = 6_000.0;
        etf.size = 120;
        assert!(passes_stage1(&etf, &cfg));

        // Same numbers on a non-ETF ticker fail the 7.5k stock floor
        let mut stock = etf.clone();
        stock.ticker = "NVDA".to_string();
        assert!(!passes_stage1(&stock, &cfg));

        // Unless the file itself was the ETF feed
        stock.source = SourceTag::CsvEtf;
        assert!(passes_stage1(&stock, &cfg));
    }

    #[test]
    fn stage1_spread_cap_widens_for_high_premium() {
        let cfg = FilterConfig::default();
        let mut sig = base_signal();
        sig.spread_pct = 25.0;

        sig.premium = 40_000.0; // below override → 18% cap applies
        assert!(!passes_stage1(&sig, &cfg));

        sig.premium = 60_000.0; // above override → 30% cap applies
        assert!(passes_stage1(&sig, &cfg));
    }

    #[test]
    fn aggression_side_classification() {
        let mut sig = base_signal();
        // 1.2M / (600*100) = 20.0 per share, far above ask → ASK
        assert_eq!(aggression_side(&sig), AggressionSide::Ask);

        // Price at the bid → BID
        sig.premium = 2.90 * 600.0 * 100.0;
        assert_eq!(aggression_side(&sig), AggressionSide::Bid);

        // Between the quotes → MID
        sig.premium = 3.0 * 600.0 * 100.0;
        assert_eq!(aggression_side(&sig), AggressionSide::Mid);

        // No quotes → MID
        sig.bid = 0.0;
        assert_eq!(aggression_side(&sig), AggressionSide::Mid);
    }

    #[test]
    fn stage2_mid_trade_needs_premium_override() {
        let cfg = FilterConfig::default();
        let mut sig = base_signal();
        // Mid-priced trade: per-share exactly between quotes
        sig.premium = 3.0 * 600.0 * 100.0; // 180k
        sig.volume = 100;
        sig.oi = 10_000;
        sig.dte = 200; // no short-DTE path either
        // vol/oi=0.01 fails, dte fails, big-long fails (dte>120), side=MID
        // but premium 180k > allow_mid_over 100k → conviction gate still fails
        assert!(!passes_stage2(&sig, &cfg));

        // Give it the big-premium-long-DTE path
        sig.dte = 100;
        assert!(passes_stage2(&sig, &cfg));

        // Same shape at 90k premium gets dropped by the aggression rule
        sig.premium = 90_000.0;
        sig.size = 300; // per-share = 90_000/(300*100) = 3.0 → still MID
        assert_eq!(aggression_side(&sig), AggressionSide::Mid);
        assert!(passes_stage2(&sig, &FilterConfig { require_aggressive_side: false, ..cfg.clone() }));
        assert!(!passes_stage2(&sig, &cfg));
    }

    #[test]
    fn cascade_is_monotonic_and_sorted() {
        let cfg = FilterConfig::default();
        let mut rows = Vec::new();
        for i in 0..10 {
            let mut s = base_signal();
            s.score_total = 50.0 + i as f64;
            s.trade_id = format!("t{i}");
            rows.push(s);
        }
        // Poison a few rows at different stages
        rows[0].ask = 0.5; // stage 0 (ask < bid)
        rows[1].premium = 100.0; // stage 1
        rows[2].premium = 90_000.0;
        rows[2].size = 300;
        rows[2].volume = 1;
        rows[2].oi = 100_000;
        rows[2].dte = 500; // stage 2: MID + no gate

        let (out, stats) = filter_tick(rows.clone(), &cfg);
        assert_eq!(stats.parsed, 10);
        assert_eq!(stats.dropped_stage0, 1);
        assert_eq!(stats.dropped_stage1, 1);
        assert_eq!(stats.dropped_stage2, 1);
        assert_eq!(stats.pre_insert, 7);
        assert_eq!(out.len(), 7);

        // Every survivor came from the input batch
        for s in &out {
            assert!(rows.iter().any(|r| r.trade_id == s.trade_id));
        }
        // Sorted best-first
        for w in out.windows(2) {
            assert!(w[0].score_total >= w[1].score_total);
        }
    }
}
