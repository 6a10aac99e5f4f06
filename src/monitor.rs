//! Monitor state machine over the externally managed watch-list.
//!
//! Every tick, each active contract gets its latest persisted score folded
//! into its monitor row: bounded score history, monotone peak, and a status
//! that is a pure function of the current score.

use tracing::warn;

use crate::config::{SCORE_HISTORY_LEN, STATUS_MONITOR_MIN, STATUS_STRONG_MIN};
use crate::db::SignalStore;
use crate::error::Result;
use crate::types::OptType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Strong,
    Monitor,
    Weakening,
}

impl MonitorStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= STATUS_STRONG_MIN {
            MonitorStatus::Strong
        } else if score >= STATUS_MONITOR_MIN {
            MonitorStatus::Monitor
        } else {
            MonitorStatus::Weakening
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Strong => "Strong",
            MonitorStatus::Monitor => "Monitor",
            MonitorStatus::Weakening => "Weakening",
        }
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fold the latest score (0 when the contract has no signals yet) into every
/// active watch-list entry. A failure on one contract is logged and skipped;
/// the rest of the batch still runs. Returns the number of rows touched.
pub async fn update_watchlist(store: &SignalStore, now_iso: &str) -> usize {
    let keys = match store.active_watchlist_keys().await {
        Ok(keys) => keys,
        Err(e) => {
            warn!("watchlist read failed: {e}");
            return 0;
        }
    };

    let mut updated = 0;
    for ck in keys {
        match update_one(store, &ck, now_iso).await {
            Ok(()) => updated += 1,
            Err(e) => warn!("monitor update failed for {ck}: {e}"),
        }
    }
    updated
}

async fn update_one(store: &SignalStore, ck: &str, now_iso: &str) -> Result<()> {
    let latest = store.latest_score_for_key(ck).await?.unwrap_or(0.0);
    let status = MonitorStatus::from_score(latest);

    let Some(row) = store.get_monitor(ck).await? else {
        let (ticker, exp, strike, opt_type) = split_key(ck);
        let history = serde_json::to_string(&[latest])?;
        return store
            .insert_monitor(ck, &ticker, &exp, strike, opt_type.as_str(), latest, &history, status.as_str(), now_iso)
            .await;
    };

    // Malformed stored history is treated as empty, never an error.
    let mut history: Vec<f64> =
        serde_json::from_str(&row.score_history).unwrap_or_default();
    history.push(latest);
    if history.len() > SCORE_HISTORY_LEN {
        history.drain(..history.len() - SCORE_HISTORY_LEN);
    }

    let peak = row.peak_score.max(latest);
    store
        .update_monitor(ck, latest, peak, &serde_json::to_string(&history)?, status.as_str(), now_iso)
        .await
}

/// Best-effort decomposition of a canonical contract key into its display
/// columns. Keys are canonicalized upstream; a short key yields blanks.
fn split_key(ck: &str) -> (String, String, f64, OptType) {
    let parts: Vec<&str> = ck.split('|').collect();
    if parts.len() != 4 {
        return (String::new(), String::new(), 0.0, OptType::C);
    }
    (
        parts[0].to_string(),
        parts[1].to_string(),
        parts[2].parse().unwrap_or(0.0),
        OptType::parse(parts[3]),
    )
}
