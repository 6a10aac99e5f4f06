use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Source tag
// ---------------------------------------------------------------------------

/// Where a signal came from. Drives the liquidity-tier split in the filter
/// cascade (CSV_ETF files get the ETF thresholds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTag {
    CsvEtf,
    CsvStock,
    Csv,
    Mock,
    Live,
}

impl SourceTag {
    /// Derive the tag from a tailed file's name:
    /// `etfs.csv` → CsvEtf, `stocks.csv` → CsvStock, else Csv.
    pub fn from_path(path: &str) -> Self {
        let name = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("etf") {
            SourceTag::CsvEtf
        } else if name.contains("stock") {
            SourceTag::CsvStock
        } else {
            SourceTag::Csv
        }
    }
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceTag::CsvEtf => "CSV_ETF",
            SourceTag::CsvStock => "CSV_STOCK",
            SourceTag::Csv => "CSV",
            SourceTag::Mock => "MOCK",
            SourceTag::Live => "LIVE",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Option type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptType {
    C,
    P,
}

impl OptType {
    /// Case-insensitive normalization from the many spellings seen in CSV
    /// headers. Unrecognized values fall back to first-letter matching, then
    /// default to C.
    pub fn parse(s: &str) -> Self {
        let s = s.trim().to_uppercase();
        match s.as_str() {
            "C" | "CALL" | "CALLS" => OptType::C,
            "P" | "PUT" | "PUTS" => OptType::P,
            _ if s.starts_with('P') => OptType::P,
            _ => OptType::C,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OptType::C => "C",
            OptType::P => "P",
        }
    }
}

impl std::fmt::Display for OptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Aggression side
// ---------------------------------------------------------------------------

/// Which side of the book the trade price landed on. Mid means either the
/// price sat between bid and ask or we lacked the inputs to tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggressionSide {
    Ask,
    Bid,
    Mid,
}

// ---------------------------------------------------------------------------
// Signal — one normalized order-flow record
// ---------------------------------------------------------------------------

/// Constructed once by the normalizer, immutable thereafter, persisted as an
/// append-only row. `contract_key` identifies the contract shape (not the
/// trade); `trade_id` distinguishes co-incident trades on the same contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Canonical UTC trade timestamp (ISO 8601).
    pub ts: String,
    pub contract_key: String,
    pub trade_id: String,
    pub ticker: String,
    /// Expiration, date-only (`YYYY-MM-DD`).
    pub exp: String,
    pub strike: f64,
    pub opt_type: OptType,
    /// Notional dollars.
    pub premium: f64,
    /// Contracts traded.
    pub size: i64,
    pub volume: i64,
    pub oi: i64,
    pub bid: f64,
    pub ask: f64,
    pub spread_pct: f64,
    pub spot: f64,
    /// Signed; direction depends on option type.
    pub otm_pct: f64,
    pub dte: i64,
    pub score_total: f64,
    pub tags: String,
    /// JSON list of reason codes.
    pub reason_codes: String,
    pub source: SourceTag,
    pub ingested_at: String,
    pub trade_time_raw: String,
    pub trade_tz: String,
}

// ---------------------------------------------------------------------------
// Per-tick filter statistics
// ---------------------------------------------------------------------------

/// The cascade fills `parsed` through `pre_insert`; the orchestrator sets
/// `inserted` and `efficiency_pct` after the top-N cut.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterStats {
    pub parsed: usize,
    pub dropped_stage0: usize,
    pub dropped_stage1: usize,
    pub dropped_stage2: usize,
    pub pre_insert: usize,
    pub inserted: usize,
    pub efficiency_pct: f64,
}

// ---------------------------------------------------------------------------
// Health snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Ok,
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Ok => write!(f, "ok"),
            AgentStatus::Error => write!(f, "error"),
        }
    }
}

/// Written every tick unconditionally — the steady-state heartbeat external
/// tooling polls for liveness.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub ts: String,
    pub status: AgentStatus,
    pub last_event_ts: Option<String>,
    pub last_alert_ts: Option<String>,
    pub events_per_min: i64,
    pub alerts_per_min: i64,
    pub errors_15m: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tag_from_path() {
        assert_eq!(SourceTag::from_path("/data/etfs.csv"), SourceTag::CsvEtf);
        assert_eq!(SourceTag::from_path("/data/stocks.csv"), SourceTag::CsvStock);
        assert_eq!(SourceTag::from_path("/data/options-flow-02-15.csv"), SourceTag::Csv);
        assert_eq!(SourceTag::from_path("ETF_flow.CSV"), SourceTag::CsvEtf);
    }

    #[test]
    fn opt_type_spellings() {
        assert_eq!(OptType::parse("call"), OptType::C);
        assert_eq!(OptType::parse("CALLS"), OptType::C);
        assert_eq!(OptType::parse("p"), OptType::P);
        assert_eq!(OptType::parse("Puts"), OptType::P);
        assert_eq!(OptType::parse("Put Spread"), OptType::P);
        assert_eq!(OptType::parse("garbage"), OptType::C);
        assert_eq!(OptType::parse(""), OptType::C);
    }
}
