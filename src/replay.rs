//! In-memory replay of a captured flow CSV, for eyeballing a feed without
//! touching tailer offsets or the database.
//!
//! A `ReplaySession` owns all of its state behind one mutex; it is created,
//! started and torn down by its caller and is invisible to the core pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use crate::error::{AppError, Result};
use crate::normalize::{aliases, RawRecord};
use crate::tailer::parse_csv_line;

const MIN_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct ReplayState {
    rows: Vec<RawRecord>,
    index: usize,
    running: bool,
    source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub path: String,
    pub rows: usize,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ReplayStatus {
    pub running: bool,
    pub rows: usize,
    pub index: usize,
    pub source: Option<String>,
}

#[derive(Clone, Default)]
pub struct ReplaySession {
    state: Arc<Mutex<ReplayState>>,
}

impl ReplaySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a capture into memory, replacing whatever was loaded before and
    /// rewinding the cursor. With no explicit path, picks the newest
    /// `options-flow-*.csv` in `data_dir` by modification time.
    pub fn load_csv(&self, path: Option<&str>, data_dir: &str) -> Result<LoadSummary> {
        let path = match path {
            Some(p) => PathBuf::from(p),
            None => newest_capture(data_dir)?,
        };

        let text = fs::read_to_string(&path)?;
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header: Vec<String> = lines
            .next()
            .map(|l| parse_csv_line(l).into_iter().map(|f| f.trim().to_string()).collect())
            .unwrap_or_default();
        let rows: Vec<RawRecord> = lines
            .map(|l| RawRecord::from_row(&header, &parse_csv_line(l)))
            .collect();

        let summary = LoadSummary {
            path: path.to_string_lossy().to_string(),
            rows: rows.len(),
            columns: header,
        };

        let mut st = self.lock();
        st.rows = rows;
        st.index = 0;
        st.source = Some(summary.path.clone());
        Ok(summary)
    }

    /// Next row in the stream, wrapping back to the start at the end.
    pub fn next_tick(&self) -> Option<RawRecord> {
        let mut st = self.lock();
        if st.rows.is_empty() {
            return None;
        }
        if st.index >= st.rows.len() {
            st.index = 0;
        }
        let row = st.rows[st.index].clone();
        st.index += 1;
        Some(row)
    }

    /// Spawn the background replay task. Returns false when one is already
    /// running. The task stops on `stop()` or after `max_lines` rows.
    pub fn start(&self, interval: Duration, max_lines: Option<usize>) -> bool {
        {
            let mut st = self.lock();
            if st.running {
                return false;
            }
            st.running = true;
        }

        let session = self.clone();
        let interval = interval.max(MIN_INTERVAL);
        tokio::spawn(async move {
            let mut printed = 0usize;
            loop {
                if !session.lock().running {
                    break;
                }
                if let Some(row) = session.next_tick() {
                    log_row(&row);
                    printed += 1;
                    if max_lines.is_some_and(|max| printed >= max) {
                        session.lock().running = false;
                        break;
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });
        true
    }

    pub fn stop(&self) {
        self.lock().running = false;
    }

    pub fn status(&self) -> ReplayStatus {
        let st = self.lock();
        ReplayStatus {
            running: st.running,
            rows: st.rows.len(),
            index: st.index,
            source: st.source.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReplayState> {
        // A poisoned lock only means a panicked replay task; the state
        // itself is still coherent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn log_row(row: &RawRecord) {
    let pick = |keys: &[&str]| row.pick(keys).unwrap_or("").to_string();
    info!(
        "[REPLAY] {} {} {} {} vol={} prem={}",
        pick(aliases::TICKER),
        pick(aliases::OPT_TYPE),
        pick(aliases::STRIKE),
        pick(aliases::EXP),
        pick(aliases::VOLUME),
        pick(aliases::PREMIUM),
    );
}

fn newest_capture(data_dir: &str) -> Result<PathBuf> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(Path::new(data_dir))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !(name.starts_with("options-flow-") && name.ends_with(".csv")) {
            continue;
        }
        let mtime = entry.metadata()?.modified()?;
        if newest.as_ref().map_or(true, |(best, _)| mtime > *best) {
            newest = Some((mtime, entry.path()));
        }
    }
    newest
        .map(|(_, p)| p)
        .ok_or_else(|| AppError::Source(format!("no options-flow-*.csv capture in {data_dir}")))
}
