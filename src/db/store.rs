use sqlx::Row;
use tracing::warn;

use crate::error::Result;
use crate::normalize::canonicalize_contract_key;
use crate::types::{HealthSnapshot, Signal, SourceTag};

/// One row of the monitor table, as the state machine sees it.
#[derive(Debug, Clone)]
pub struct MonitorRow {
    pub contract_key: String,
    pub entry_score: f64,
    pub current_score: f64,
    pub peak_score: f64,
    pub score_history: String,
    pub status: String,
}

/// All SQLite access goes through here. Signals are append-only; the only
/// deletion path is the explicit mock purge.
#[derive(Clone)]
pub struct SignalStore {
    pool: sqlx::SqlitePool,
}

impl SignalStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }

    // -----------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------

    /// Insert a batch with per-row error isolation: one bad row never sinks
    /// the rest. Duplicates (same dedup key) are silently ignored. Returns
    /// the number of rows actually written.
    pub async fn insert_signals(&self, signals: &[Signal]) -> usize {
        let mut inserted = 0;
        for sig in signals {
            let res = sqlx::query(
                r#"
                INSERT OR IGNORE INTO signals
                (ts, contract_key, trade_id, ticker, exp, strike, opt_type,
                 premium, size, volume, oi, bid, ask, spread_pct, spot, otm_pct,
                 dte, score_total, tags, reason_codes, source, ingested_at,
                 trade_time_raw, trade_tz)
                VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?,?)
                "#,
            )
            .bind(&sig.ts)
            .bind(&sig.contract_key)
            .bind(&sig.trade_id)
            .bind(&sig.ticker)
            .bind(&sig.exp)
            .bind(sig.strike)
            .bind(sig.opt_type.as_str())
            .bind(sig.premium)
            .bind(sig.size)
            .bind(sig.volume)
            .bind(sig.oi)
            .bind(sig.bid)
            .bind(sig.ask)
            .bind(sig.spread_pct)
            .bind(sig.spot)
            .bind(sig.otm_pct)
            .bind(sig.dte)
            .bind(sig.score_total)
            .bind(&sig.tags)
            .bind(&sig.reason_codes)
            .bind(sig.source.to_string())
            .bind(&sig.ingested_at)
            .bind(&sig.trade_time_raw)
            .bind(&sig.trade_tz)
            .execute(&self.pool)
            .await;

            match res {
                Ok(done) => inserted += done.rows_affected() as usize,
                Err(e) => warn!("signal insert error ({}): {e}", sig.contract_key),
            }
        }
        inserted
    }

    /// Latest persisted score for a contract, by insertion order.
    pub async fn latest_score_for_key(&self, contract_key: &str) -> Result<Option<f64>> {
        let ck = canonicalize_contract_key(contract_key);
        let row = sqlx::query(
            "SELECT score_total FROM signals WHERE contract_key = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(&ck)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<f64, _>("score_total")))
    }

    /// Drop synthetic rows before switching a database to real data.
    pub async fn purge_mock_signals(&self) -> Result<u64> {
        let done = sqlx::query("DELETE FROM signals WHERE source = ?")
            .bind(SourceTag::Mock.to_string())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    // -----------------------------------------------------------------
    // Watch-list (read-only: rows are managed by outside tooling)
    // -----------------------------------------------------------------

    pub async fn active_watchlist_keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT contract_key FROM watchlist WHERE is_active = 1 ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| canonicalize_contract_key(r.get::<String, _>("contract_key").as_str()))
            .collect())
    }

    // -----------------------------------------------------------------
    // Monitor
    // -----------------------------------------------------------------

    pub async fn get_monitor(&self, contract_key: &str) -> Result<Option<MonitorRow>> {
        let row = sqlx::query(
            r#"
            SELECT contract_key, entry_score, current_score, peak_score,
                   score_history, status
            FROM monitor WHERE contract_key = ?
            "#,
        )
        .bind(contract_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| MonitorRow {
            contract_key: r.get("contract_key"),
            entry_score: r.get("entry_score"),
            current_score: r.get("current_score"),
            peak_score: r.get("peak_score"),
            score_history: r.get("score_history"),
            status: r.get("status"),
        }))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_monitor(
        &self,
        contract_key: &str,
        ticker: &str,
        exp: &str,
        strike: f64,
        opt_type: &str,
        score: f64,
        history_json: &str,
        status: &str,
        ts: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO monitor
            (contract_key, ticker, exp, strike, opt_type, entry_score,
             current_score, peak_score, score_history, status, last_update_ts)
            VALUES (?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(contract_key)
        .bind(ticker)
        .bind(exp)
        .bind(strike)
        .bind(opt_type)
        .bind(score)
        .bind(score)
        .bind(score)
        .bind(history_json)
        .bind(status)
        .bind(ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_monitor(
        &self,
        contract_key: &str,
        current: f64,
        peak: f64,
        history_json: &str,
        status: &str,
        ts: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE monitor
            SET current_score = ?, peak_score = ?, score_history = ?,
                status = ?, last_update_ts = ?
            WHERE contract_key = ?
            "#,
        )
        .bind(current)
        .bind(peak)
        .bind(history_json)
        .bind(status)
        .bind(ts)
        .bind(contract_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Health
    // -----------------------------------------------------------------

    pub async fn write_health(&self, snap: &HealthSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO health_snapshots
            (ts, agent_status, last_event_ts, last_alert_ts,
             events_per_min, alerts_per_min, errors_15m)
            VALUES (?,?,?,?,?,?,?)
            "#,
        )
        .bind(&snap.ts)
        .bind(snap.status.to_string())
        .bind(&snap.last_event_ts)
        .bind(&snap.last_alert_ts)
        .bind(snap.events_per_min)
        .bind(snap.alerts_per_min)
        .bind(snap.errors_15m)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
