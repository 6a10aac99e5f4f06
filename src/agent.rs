//! Tick orchestrator: fetch → cascade → top-N → persist → monitor → health.
//!
//! One bad tick never stops the loop. Fetch errors shrink to an empty batch;
//! a tick-level error is logged, stamped into a health snapshot, and the
//! next tick runs on schedule.

use std::fs;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::SignalStore;
use crate::error::Result;
use crate::filters::filter_tick;
use crate::monitor::update_watchlist;
use crate::providers::SignalSource;
use crate::types::{AgentStatus, FilterStats, HealthSnapshot, Signal};

/// What one tick did, for logging and tests.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub parsed: usize,
    pub filtered_to: usize,
    pub inserted: usize,
    pub monitor_updated: usize,
}

/// The interval is a hard lower bound between tick starts: a slow tick
/// pushes the next one out by the full period instead of firing catch-up
/// ticks back-to-back.
fn tick_interval(secs: f64) -> Interval {
    let mut interval = tokio::time::interval(Duration::from_secs_f64(secs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

pub struct Agent {
    source: Box<dyn SignalSource>,
    store: SignalStore,
    cfg: Config,
}

impl Agent {
    pub fn new(source: Box<dyn SignalSource>, store: SignalStore, cfg: Config) -> Self {
        Self { source, store, cfg }
    }

    pub async fn run_forever(mut self) {
        info!(
            "[AGENT] starting. db={} csv_files={} interval={}s max_rows_per_tick={}",
            self.cfg.db_path,
            self.cfg.csv_paths.len(),
            self.cfg.interval_secs,
            self.cfg.max_rows_per_tick,
        );

        let mut ticker = tick_interval(self.cfg.interval_secs);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!("[TICK] error: {e}");
                let snap = HealthSnapshot {
                    ts: Utc::now().to_rfc3339(),
                    status: AgentStatus::Error,
                    last_event_ts: None,
                    last_alert_ts: None,
                    events_per_min: 0,
                    alerts_per_min: 0,
                    errors_15m: 1,
                };
                if let Err(e) = self.store.write_health(&snap).await {
                    error!("[TICK] error-health write failed: {e}");
                }
            }
        }
    }

    pub async fn tick(&mut self) -> Result<TickReport> {
        let raw = match self.source.fetch() {
            Ok(batch) => batch,
            Err(e) => {
                warn!("[SOURCE] fetch error ({e}), skipping batch");
                Vec::new()
            }
        };

        let (candidates, mut stats) = filter_tick(raw, &self.cfg.filters);

        // Stage 3: best N survivors per tick, already sorted by score.
        let to_insert: Vec<Signal> = candidates
            .into_iter()
            .take(self.cfg.filters.max_insert_per_tick)
            .collect();
        stats.inserted = to_insert.len();
        stats.efficiency_pct = if stats.parsed > 0 {
            (to_insert.len() as f64 / stats.parsed as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        info!(
            "[FILTER] parsed={} stage0_drop={} stage1_drop={} stage2_drop={} stage3_drop={} inserted={}",
            stats.parsed,
            stats.dropped_stage0,
            stats.dropped_stage1,
            stats.dropped_stage2,
            stats.pre_insert - to_insert.len(),
            stats.inserted,
        );
        self.write_filter_stats(&stats);

        let inserted = self.store.insert_signals(&to_insert).await;
        let now_iso = Utc::now().to_rfc3339();
        let monitor_updated = update_watchlist(&self.store, &now_iso).await;

        let last_alert_ts = to_insert.last().map(|s| s.ts.clone());
        self.store
            .write_health(&HealthSnapshot {
                ts: now_iso,
                status: AgentStatus::Ok,
                last_event_ts: last_alert_ts.clone(),
                last_alert_ts,
                events_per_min: stats.parsed as i64,
                alerts_per_min: inserted as i64,
                errors_15m: 0,
            })
            .await?;

        if inserted > 0 {
            if let Some(top) = to_insert.first() {
                info!(
                    "[TICK] inserted={inserted} monitor_updated={monitor_updated} sample={} {} {} score={}",
                    top.ticker, top.opt_type, top.strike, top.score_total,
                );
            }
        }

        // Heartbeat, every tick, EOF included.
        info!(
            "[TICK] parsed={} filtered_to={} inserted={} monitor_updated={} efficiency={}%",
            stats.parsed,
            to_insert.len(),
            inserted,
            monitor_updated,
            stats.efficiency_pct,
        );

        Ok(TickReport {
            parsed: stats.parsed,
            filtered_to: to_insert.len(),
            inserted,
            monitor_updated,
        })
    }

    /// Per-tick counters for external dashboards. Temp-then-rename so a
    /// reader never sees a half-written file; a failed write is logged and
    /// does not fail the tick.
    fn write_filter_stats(&self, stats: &FilterStats) {
        let path = &self.cfg.filter_stats_path;
        let write = || -> Result<()> {
            let tmp = format!("{path}.tmp");
            fs::write(&tmp, serde_json::to_string(stats)?)?;
            fs::rename(&tmp, path)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!("filter stats write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::filters::FilterConfig;
    use crate::types::{OptType, SourceTag};
    use sqlx::Row;

    struct FixedSource {
        batches: Vec<Vec<Signal>>,
    }

    impl SignalSource for FixedSource {
        fn fetch(&mut self) -> Result<Vec<Signal>> {
            if self.batches.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(self.batches.remove(0))
            }
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct FailingSource;

    impl SignalSource for FailingSource {
        fn fetch(&mut self) -> Result<Vec<Signal>> {
            Err(AppError::Source("feed unavailable".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            log_level: "info".to_string(),
            db_path: ":memory:".to_string(),
            state_path: dir.join("state.json").to_string_lossy().to_string(),
            csv_paths: Vec::new(),
            interval_secs: 2.5,
            max_rows_per_tick: 25,
            replay_from_start: false,
            et_utc_offset_hours: 5,
            filter_stats_path: dir.join("filter_stats.json").to_string_lossy().to_string(),
            live_enabled: false,
            live_api_key: String::new(),
            purge_mock_on_start: false,
            filters: FilterConfig::default(),
        }
    }

    async fn test_store() -> SignalStore {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
        SignalStore::new(pool)
    }

    /// A signal that survives every cascade stage.
    fn strong_signal(score_hint: f64, size: i64) -> Signal {
        let premium = 3.0 * size as f64 * 100.0 * 1.02; // lands at the ask
        Signal {
            ts: "2026-02-13T15:56:50+00:00".to_string(),
            contract_key: format!("SPY|2026-02-13|{}.0|C", 400 + size),
            trade_id: format!("t{size}"),
            ticker: "SPY".to_string(),
            exp: "2026-02-13".to_string(),
            strike: (400 + size) as f64,
            opt_type: OptType::C,
            premium,
            size,
            volume: 5000,
            oi: 1000,
            bid: 2.90,
            ask: 3.00,
            spread_pct: 3.39,
            spot: 398.5,
            otm_pct: 0.38,
            dte: 5,
            score_total: score_hint,
            tags: "CSV_ETF_SWEEP".to_string(),
            reason_codes: r#"["CSV_IMPORT","SWEEP"]"#.to_string(),
            source: SourceTag::CsvEtf,
            ingested_at: "2026-02-13T16:00:00+00:00".to_string(),
            trade_time_raw: format!("10:{:02}:00 ET", size % 60),
            trade_tz: "America/New_York".to_string(),
        }
    }

    #[tokio::test]
    async fn interval_never_bursts_after_a_slow_tick() {
        let interval = tick_interval(2.5);
        assert_eq!(interval.missed_tick_behavior(), MissedTickBehavior::Delay);
        assert_eq!(interval.period(), Duration::from_secs_f64(2.5));
    }

    #[tokio::test]
    async fn tick_persists_survivors_and_health() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let store = test_store().await;
        let source = FixedSource { batches: vec![vec![strong_signal(81.2, 600)]] };

        let mut agent = Agent::new(Box::new(source), store.clone(), cfg.clone());
        let report = agent.tick().await.unwrap();
        assert_eq!(report.parsed, 1);
        assert_eq!(report.inserted, 1);

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM signals")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 1);

        let health: i64 = sqlx::query("SELECT COUNT(*) AS n FROM health_snapshots")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(health, 1);

        let stats_text = fs::read_to_string(&cfg.filter_stats_path).unwrap();
        let stats: FilterStats = serde_json::from_str(&stats_text).unwrap();
        assert_eq!(stats.parsed, 1);
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.efficiency_pct, 100.0);
    }

    #[tokio::test]
    async fn top_n_keeps_the_best_scores() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.filters.max_insert_per_tick = 5;
        let store = test_store().await;

        let batch: Vec<Signal> =
            (1..=20).map(|i| strong_signal(50.0 + i as f64, 200 + i)).collect();
        let source = FixedSource { batches: vec![batch] };

        let mut agent = Agent::new(Box::new(source), store.clone(), cfg);
        let report = agent.tick().await.unwrap();
        assert_eq!(report.filtered_to, 5);
        assert_eq!(report.inserted, 5);

        let min_kept: f64 = sqlx::query("SELECT MIN(score_total) AS s FROM signals")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("s");
        assert_eq!(min_kept, 66.0, "the five best scores (66..70) survive");
    }

    #[tokio::test]
    async fn fetch_failure_is_an_empty_tick_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let store = test_store().await;

        let mut agent = Agent::new(Box::new(FailingSource), store.clone(), cfg);
        let report = agent.tick().await.unwrap();
        assert_eq!(report.parsed, 0);
        assert_eq!(report.inserted, 0);

        // Heartbeat still written.
        let health: i64 = sqlx::query("SELECT COUNT(*) AS n FROM health_snapshots")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(health, 1);
    }

    #[tokio::test]
    async fn duplicate_batch_inserts_once() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(dir.path());
        let store = test_store().await;
        let sig = strong_signal(81.2, 600);
        let source = FixedSource { batches: vec![vec![sig.clone()], vec![sig]] };

        let mut agent = Agent::new(Box::new(source), store.clone(), cfg);
        assert_eq!(agent.tick().await.unwrap().inserted, 1);
        assert_eq!(agent.tick().await.unwrap().inserted, 0, "dedup swallows the replay");
    }
}
