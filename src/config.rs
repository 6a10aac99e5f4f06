use crate::error::{AppError, Result};
use crate::filters::FilterConfig;

/// Score at or above which a monitored contract is labelled Strong.
pub const STATUS_STRONG_MIN: f64 = 80.0;

/// Score at or above which a monitored contract is labelled Monitor.
pub const STATUS_MONITOR_MIN: f64 = 70.0;

/// Bounded score history length per monitor entry — oldest entries are
/// discarded first.
pub const SCORE_HISTORY_LEN: usize = 40;

/// Stage-0 hard spread cap (percent). Anything wider is a data error or
/// untradeably wide. Not configurable.
pub const HARD_SPREAD_CAP_PCT: f64 = 60.0;

/// Number of synthetic signals the mock source yields per tick (capped by
/// max_rows_per_tick).
pub const MOCK_SIGNALS_PER_TICK: usize = 3;

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on"),
        Err(_) => default,
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    /// JSON file holding per-CSV byte offsets and parsed headers.
    pub state_path: String,
    /// Tailed CSV files, iterated in this order each tick.
    pub csv_paths: Vec<String>,
    /// Seconds between tick starts (AGENT_INTERVAL_SEC).
    pub interval_secs: f64,
    /// Shared per-tick row budget across all CSV files (MAX_ROWS_PER_TICK).
    pub max_rows_per_tick: usize,
    /// Reset all CSV offsets before the first tick (REPLAY_FROM_START).
    pub replay_from_start: bool,
    /// Fixed Eastern→UTC conversion offset in hours. Deliberately ignores
    /// daylight saving: the CSV feed carries naive session times and the
    /// upstream data was produced with this same fixed shift.
    pub et_utc_offset_hours: i64,
    /// Per-tick filter statistics land here (atomic write).
    pub filter_stats_path: String,
    /// Live provider flag + key. The live source is a stub that yields
    /// nothing until a real integration exists.
    pub live_enabled: bool,
    pub live_api_key: String,
    /// Delete leftover mock rows at startup (PURGE_MOCK_ON_START), for
    /// databases that began life in mock mode.
    pub purge_mock_on_start: bool,
    pub filters: FilterConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // OPTIONS_CSVS takes priority; OPTIONS_CSV kept for single-file
        // setups. AppleDouble `._` files are ignored.
        let csvs_raw = env_str("OPTIONS_CSVS", "");
        let csv_paths: Vec<String> = if !csvs_raw.trim().is_empty() {
            csvs_raw
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty() && !file_name_of(p).starts_with("._"))
                .collect()
        } else {
            let single = env_str("OPTIONS_CSV", "");
            let single = single.trim();
            if !single.is_empty() && !file_name_of(single).starts_with("._") {
                vec![single.to_string()]
            } else {
                Vec::new()
            }
        };

        let interval_secs = parse_interval_secs(&env_str("AGENT_INTERVAL_SEC", "2.5"))?;

        Ok(Self {
            log_level: env_str("LOG_LEVEL", "info"),
            db_path: env_str("DB_PATH", "sentinel.db"),
            state_path: env_str("STATE_PATH", "agent_state.json"),
            csv_paths,
            interval_secs,
            max_rows_per_tick: env_str("MAX_ROWS_PER_TICK", "25").parse().unwrap_or(25),
            replay_from_start: env_bool("REPLAY_FROM_START", false),
            et_utc_offset_hours: env_str("ET_UTC_OFFSET_HOURS", "5").parse().unwrap_or(5),
            filter_stats_path: env_str("FILTER_STATS_PATH", "filter_stats_live.json"),
            live_enabled: env_bool("LIVE_ENABLED", false),
            live_api_key: env_str("LIVE_API_KEY", "").trim().to_string(),
            purge_mock_on_start: env_bool("PURGE_MOCK_ON_START", false),
            filters: FilterConfig::from_env(),
        })
    }
}

/// The tick interval must be a positive, finite number of seconds — zero,
/// negative or NaN values would panic once turned into a Duration.
fn parse_interval_secs(raw: &str) -> Result<f64> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::Config("AGENT_INTERVAL_SEC must be a number".to_string()))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(AppError::Config(format!(
            "AGENT_INTERVAL_SEC must be a positive number of seconds, got {raw}"
        )));
    }
    Ok(secs)
}

fn file_name_of(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
