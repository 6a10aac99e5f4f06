//! Record normalizer: turns heterogeneous key/value records (CSV rows in any
//! of several header dialects, mock data) into canonical [`Signal`]s.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::score::conviction_score;
use crate::types::{OptType, Signal, SourceTag};

// ---------------------------------------------------------------------------
// Field alias tables
// ---------------------------------------------------------------------------

/// Ordered, case-insensitive key aliases per logical field. First non-empty
/// match wins. Kept as data so header-dialect coverage is testable instead of
/// buried in conditionals.
pub mod aliases {
    pub const TICKER: &[&str] = &["ticker", "symbol"];
    pub const EXP: &[&str] = &["exp", "expiration", "expiry", "exp_date", "expires"];
    pub const STRIKE: &[&str] = &["strike", "strike_price", "k"];
    pub const OPT_TYPE: &[&str] = &["opt_type", "type", "right", "call_put"];
    pub const PREMIUM: &[&str] = &["premium", "notional", "trade_value"];
    pub const SIZE: &[&str] = &["size", "qty", "contracts"];
    pub const VOLUME: &[&str] = &["volume", "vol"];
    pub const OPEN_INTEREST: &[&str] = &["oi", "open int", "open_interest"];
    pub const SPOT: &[&str] = &["spot", "price~", "price", "underlying_price", "last"];
    pub const BID: &[&str] = &["bid", "bid x size"];
    pub const ASK: &[&str] = &["ask", "ask x size"];
    pub const DTE: &[&str] = &["dte"];
    pub const CODE: &[&str] = &["code"];
    pub const TIME: &[&str] = &["time"];
    pub const DATE: &[&str] = &["date"];
}

// ---------------------------------------------------------------------------
// RawRecord
// ---------------------------------------------------------------------------

/// A string-keyed record with one case-insensitive lookup map built at
/// construction.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    values: HashMap<String, String>,
}

impl RawRecord {
    /// Zip a parsed header with one row's values. Extra values beyond the
    /// header are dropped; a later duplicate header name overwrites an
    /// earlier one.
    pub fn from_row(header: &[String], values: &[String]) -> Self {
        let mut map = HashMap::with_capacity(header.len());
        for (k, v) in header.iter().zip(values.iter()) {
            map.insert(k.trim().to_lowercase(), v.clone());
        }
        Self { values: map }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let mut map = HashMap::with_capacity(pairs.len());
        for (k, v) in pairs {
            map.insert(k.trim().to_lowercase(), v.to_string());
        }
        Self { values: map }
    }

    /// First alias with a non-empty value, resolved case-insensitively.
    pub fn pick(&self, keys: &[&str]) -> Option<&str> {
        for k in keys {
            if let Some(v) = self.values.get(&k.trim().to_lowercase()) {
                let v = v.trim();
                if !v.is_empty() {
                    return Some(v);
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Typed parse outcomes
// ---------------------------------------------------------------------------

/// Distinguishes an absent field from a present-but-unparseable one, so
/// callers can default, drop, or count without a blanket catch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<T> {
    Missing,
    Malformed,
    Value(T),
}

impl<T> Field<T> {
    pub fn value_or(self, default: T) -> T {
        match self {
            Field::Value(v) => v,
            _ => default,
        }
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Coerce a numeric string, stripping thousands separators and whitespace.
pub fn parse_float(raw: Option<&str>) -> Field<f64> {
    let Some(s) = raw else { return Field::Missing };
    let s: String = s.trim().replace(',', "");
    if s.is_empty() {
        return Field::Missing;
    }
    match s.parse::<f64>() {
        Ok(v) => Field::Value(v),
        Err(_) => Field::Malformed,
    }
}

/// Integer coercion goes through f64 first so "1,200.0" parses.
pub fn parse_int(raw: Option<&str>) -> Field<i64> {
    match parse_float(raw) {
        Field::Value(v) => Field::Value(v as i64),
        Field::Missing => Field::Missing,
        Field::Malformed => Field::Malformed,
    }
}

// ---------------------------------------------------------------------------
// Field-level normalization
// ---------------------------------------------------------------------------

/// Keep only the `YYYY-MM-DD` portion: `2026-02-13T16:30:00-06:00` → `2026-02-13`.
pub fn normalize_exp(raw: &str) -> String {
    let s = raw.trim();
    let s = s.split(' ').next().unwrap_or("");
    let s = s.split('T').next().unwrap_or("");
    s.to_string()
}

/// Quote columns may be compound, e.g. `"2.90 x 15"` — only the token before
/// the `x` separator is the price. A failed split-parse falls back to parsing
/// the whole string.
pub fn parse_quote_price(raw: &str) -> f64 {
    let s = raw.trim();
    if s.is_empty() {
        return 0.0;
    }
    let head = s.split('x').next().unwrap_or(s);
    match parse_float(Some(head)) {
        Field::Value(v) => v,
        _ => parse_float(Some(s)).value_or(0.0),
    }
}

/// `|ask-bid| / mid * 100`; 0 unless both sides are positive.
pub fn spread_pct(bid: f64, ask: f64) -> f64 {
    if bid > 0.0 && ask > 0.0 {
        let mid = (bid + ask) / 2.0;
        if mid > 0.0 {
            return (ask - bid).abs() / mid * 100.0;
        }
    }
    0.0
}

/// Signed out-of-the-money percentage; 0 if spot is unusable.
pub fn otm_pct(strike: f64, spot: f64, opt_type: OptType) -> f64 {
    if spot <= 0.0 {
        return 0.0;
    }
    match opt_type {
        OptType::C => (strike - spot) / spot * 100.0,
        OptType::P => (spot - strike) / spot * 100.0,
    }
}

/// Whole days until expiration (floor), clamped at 0. Unparseable dates
/// yield 0.
pub fn dte_from_exp(exp: &str, now: DateTime<Utc>) -> i64 {
    let Ok(date) = NaiveDate::parse_from_str(exp, "%Y-%m-%d") else {
        return 0;
    };
    let Some(midnight) = date.and_hms_opt(0, 0, 0) else {
        return 0;
    };
    let exp_dt = Utc.from_utc_datetime(&midnight);
    (exp_dt - now).num_seconds().div_euclid(86400).max(0)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Contract identity
// ---------------------------------------------------------------------------

/// Render a strike the canonical way: `400` and `400.0` both become `"400.0"`,
/// fractional strikes keep their digits (`402.5`).
pub fn fmt_strike(strike: f64) -> String {
    if strike == strike.trunc() && strike.is_finite() {
        format!("{strike:.1}")
    } else {
        format!("{strike}")
    }
}

pub fn contract_key(ticker: &str, exp: &str, strike: f64, opt_type: OptType) -> String {
    format!("{ticker}|{exp}|{}|{opt_type}", fmt_strike(strike))
}

/// Canonicalize a contract key from any upstream spelling. Idempotent:
/// applying it twice equals applying it once. Keys that do not split into
/// four parts are returned trimmed, unchanged.
pub fn canonicalize_contract_key(ck: &str) -> String {
    if ck.is_empty() {
        return String::new();
    }
    let parts: Vec<&str> = ck.split('|').map(str::trim).collect();
    if parts.len() != 4 {
        return ck.trim().to_string();
    }
    let (t, e, s, ot) = (parts[0], parts[1], parts[2], parts[3]);

    let t = t.to_uppercase();
    let e = normalize_exp(e);
    let ot = ot.to_uppercase();
    let ot = if ot.starts_with('C') {
        "C".to_string()
    } else if ot.starts_with('P') {
        "P".to_string()
    } else {
        ot
    };
    let s_norm = match parse_float(Some(s)) {
        Field::Value(v) => fmt_strike(v),
        _ => s.to_string(),
    };

    format!("{t}|{e}|{s_norm}|{ot}")
}

/// Content hash distinguishing co-incident trades on the same contract. Used
/// for downstream grouping only — uniqueness is the dedup index's job.
pub fn trade_id(ticker: &str, trade_time_raw: &str, ts: &str, size: i64, premium: f64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{ticker}_{trade_time_raw}_{ts}_{size}_{premium}"));
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Trade-timestamp reconstruction
// ---------------------------------------------------------------------------

/// Rebuild a UTC trade timestamp from the CSV's raw Eastern session time.
///
/// Strips timezone abbreviation suffixes, pads missing seconds, combines
/// with a date field (today's UTC date when absent), then shifts by a fixed
/// hour offset. The offset is deliberately DST-unaware — the feed carries
/// naive session strings and this matches how the data was produced.
/// Any parse failure falls back to `now`.
pub fn reconstruct_trade_ts(
    time_raw: &str,
    date_raw: &str,
    now: DateTime<Utc>,
    et_utc_offset_hours: i64,
) -> String {
    let time_raw = time_raw.trim();
    if time_raw.is_empty() {
        return now.to_rfc3339();
    }

    let mut clean = time_raw
        .replace(" ET", "")
        .replace(" EST", "")
        .replace(" EDT", "")
        .trim()
        .to_string();

    let date_part = if date_raw.trim().is_empty() {
        now.format("%Y-%m-%d").to_string()
    } else {
        date_raw.trim().split('T').next().unwrap_or("").to_string()
    };

    if clean.split(':').count() == 2 {
        clean.push_str(":00");
    }

    let dt_str = format!("{date_part} {clean}");
    match NaiveDateTime::parse_from_str(&dt_str, "%Y-%m-%d %H:%M:%S") {
        Ok(parsed) => {
            let shifted = parsed + Duration::hours(et_utc_offset_hours);
            Utc.from_utc_datetime(&shifted).to_rfc3339()
        }
        Err(err) => {
            debug!("trade time parse failed on {time_raw:?} / {date_raw:?}: {err}");
            now.to_rfc3339()
        }
    }
}

// ---------------------------------------------------------------------------
// Record → Signal
// ---------------------------------------------------------------------------

/// Normalize one raw record. Returns None when required fields (ticker,
/// expiration, numeric strike) are absent or malformed; every other field
/// falls back to a safe default. Invokes the conviction scorer — the only
/// computation here beyond field shaping.
pub fn normalize_record(
    rec: &RawRecord,
    source: SourceTag,
    now: DateTime<Utc>,
    et_utc_offset_hours: i64,
) -> Option<Signal> {
    let ticker = rec.pick(aliases::TICKER)?.trim().to_uppercase();
    if ticker.is_empty() {
        return None;
    }

    let exp = normalize_exp(rec.pick(aliases::EXP)?);
    if exp.is_empty() {
        return None;
    }

    let strike = parse_float(rec.pick(aliases::STRIKE)).ok()?;
    if !strike.is_finite() {
        return None;
    }

    let opt_type = OptType::parse(rec.pick(aliases::OPT_TYPE).unwrap_or("C"));

    let premium = parse_float(rec.pick(aliases::PREMIUM)).value_or(0.0);
    let size = parse_int(rec.pick(aliases::SIZE)).value_or(0);
    let volume = parse_int(rec.pick(aliases::VOLUME)).value_or(0);
    let oi = parse_int(rec.pick(aliases::OPEN_INTEREST)).value_or(0);
    let spot = parse_float(rec.pick(aliases::SPOT)).value_or(0.0);

    let bid = rec.pick(aliases::BID).map(parse_quote_price).unwrap_or(0.0);
    let ask = rec.pick(aliases::ASK).map(parse_quote_price).unwrap_or(0.0);

    let spread = spread_pct(bid, ask);
    let otm = otm_pct(strike, spot, opt_type);

    // Prefer a CSV-supplied non-negative DTE; else compute from expiration.
    let dte = match parse_int(rec.pick(aliases::DTE)) {
        Field::Value(d) if d >= 0 => d,
        _ => dte_from_exp(&exp, now),
    };

    let code = rec.pick(aliases::CODE).unwrap_or("").trim().to_string();

    let score = conviction_score(premium, volume, oi, spread, otm, dte, &code);

    let time_raw = rec.pick(aliases::TIME).unwrap_or("").trim().to_string();
    let date_raw = rec.pick(aliases::DATE).unwrap_or("").trim().to_string();
    let ts = reconstruct_trade_ts(&time_raw, &date_raw, now, et_utc_offset_hours);

    let ck = canonicalize_contract_key(&contract_key(&ticker, &exp, strike, opt_type));
    let tid = trade_id(&ticker, &time_raw, &ts, size, premium);

    let (tags, reason_codes) = if code.is_empty() {
        (source.to_string(), serde_json::json!(["CSV_IMPORT"]).to_string())
    } else {
        (
            format!("{source}_{code}"),
            serde_json::json!(["CSV_IMPORT", code]).to_string(),
        )
    };

    Some(Signal {
        ts,
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
        spread_pct: round2(spread),
        spot,
        otm_pct: round2(otm),
        dte,
        score_total: score,
        tags,
        reason_codes,
        source,
        ingested_at: now.to_rfc3339(),
        trade_time_raw: time_raw,
        trade_tz: "America/New_York".to_string(),
    })
}
