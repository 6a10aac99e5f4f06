//! Byte-offset CSV tailer with durable per-file state.
//!
//! State (offset + parsed header per file) lives in a JSON file and survives
//! restarts. Writes go through a temp file and an atomic rename so a crash
//! mid-write never leaves a corrupt state file.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::normalize::RawRecord;
use crate::types::SourceTag;

// ---------------------------------------------------------------------------
// Durable state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileState {
    pub offset: u64,
    pub header: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailerState {
    pub files: HashMap<String, FileState>,
}

impl TailerState {
    /// Missing or corrupt state files yield a fresh default — the tailer
    /// must always be able to start.
    pub fn load(path: &str) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let tmp = format!("{path}.tmp");
        fs::write(&tmp, serde_json::to_string(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Single-line CSV parsing
// ---------------------------------------------------------------------------

/// Parse one delimited line, honoring double-quoted fields and doubled-quote
/// escapes (`"Open Int"`, `"Bid x Size"` style headers).
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    cur.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                cur.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut cur)),
                _ => cur.push(c),
            }
        }
    }
    fields.push(cur);
    fields
}

// ---------------------------------------------------------------------------
// Tailer
// ---------------------------------------------------------------------------

pub struct CsvTailer {
    paths: Vec<String>,
    state_path: String,
    state: TailerState,
    max_rows_per_tick: usize,
}

impl CsvTailer {
    pub fn new(paths: Vec<String>, state_path: String, max_rows_per_tick: usize) -> Self {
        let state = TailerState::load(&state_path);
        Self { paths, state_path, state, max_rows_per_tick }
    }

    /// Replay-from-start directive: drop all offsets and headers atomically
    /// before the first tick.
    pub fn reset(&mut self) -> Result<()> {
        self.state = TailerState::default();
        self.state.save(&self.state_path)
    }

    /// One tick's increment across all configured files, in order, under a
    /// shared row budget. Each batch is tagged with its file's source.
    pub fn read_all(&mut self) -> Vec<(RawRecord, SourceTag)> {
        let mut out = Vec::new();
        let mut remaining = self.max_rows_per_tick;

        for path in self.paths.clone() {
            if remaining == 0 {
                break;
            }
            let source = SourceTag::from_path(&path);
            let rows = self.read_file(&path, remaining);
            remaining -= rows.len().min(remaining);
            out.extend(rows.into_iter().map(|r| (r, source)));
        }
        out
    }

    /// Incremental read of one file from its stored offset, up to `budget`
    /// parsed rows. At EOF this returns empty without touching state — the
    /// normal steady state, not an error.
    fn read_file(&mut self, path: &str, budget: usize) -> Vec<RawRecord> {
        if !Path::new(path).exists() {
            warn!("CSV not found: {path}");
            return Vec::new();
        }

        let file_size = match fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("CSV stat failed ({path}): {e}");
                return Vec::new();
            }
        };

        let mut entry = self.state.files.get(path).cloned().unwrap_or_default();

        if entry.offset >= file_size {
            return Vec::new(); // EOF
        }

        match self.read_increment(path, &mut entry, budget) {
            Ok(rows) => {
                self.state.files.insert(path.to_string(), entry);
                if let Err(e) = self.state.save(&self.state_path) {
                    warn!("tailer state save failed: {e}");
                }
                rows
            }
            Err(e) => {
                warn!("CSV read error ({path}): {e}");
                Vec::new()
            }
        }
    }

    fn read_increment(
        &mut self,
        path: &str,
        entry: &mut FileState,
        budget: usize,
    ) -> std::io::Result<Vec<RawRecord>> {
        let file = fs::File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();

        // First read: consume exactly the header line and persist it (and
        // the offset past it) immediately, even if no data rows follow yet.
        if entry.offset == 0 || entry.header.is_none() {
            let n = reader.read_line(&mut line)?;
            let header: Vec<String> = parse_csv_line(line.trim_end_matches(['\r', '\n']))
                .into_iter()
                .map(|f| f.trim().to_string())
                .collect();
            if n == 0 || header.iter().all(|f| f.is_empty()) {
                warn!("CSV header missing/unreadable: {path}");
                return Ok(Vec::new());
            }
            entry.offset = n as u64;
            entry.header = Some(header);
            self.state.files.insert(path.to_string(), entry.clone());
            if let Err(e) = self.state.save(&self.state_path) {
                warn!("tailer state save failed: {e}");
            }
        }

        let header = entry.header.clone().unwrap_or_default();
        reader.seek(SeekFrom::Start(entry.offset))?;

        let mut rows = Vec::new();
        let mut consumed = entry.offset;

        while rows.len() < budget {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            // Advance past the line unconditionally — an unparseable line
            // must never be re-read forever.
            consumed += n as u64;

            let text = line.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                continue;
            }
            let values = parse_csv_line(text);
            if values.len() < header.len() {
                debug!("skipping short row in {path}: {} < {} fields", values.len(), header.len());
                continue;
            }
            rows.push(RawRecord::from_row(&header, &values));
        }

        // Persist the consumed offset once per batch, not per line.
        entry.offset = consumed;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::aliases;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, lines: &[&str]) -> String {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        for l in lines {
            writeln!(f, "{l}").unwrap();
        }
        path.to_string_lossy().to_string()
    }

    fn tickers(rows: &[(RawRecord, SourceTag)]) -> Vec<String> {
        rows.iter()
            .map(|(r, _)| r.pick(aliases::TICKER).unwrap_or("").to_string())
            .collect()
    }

    #[test]
    fn parse_csv_line_quoted_fields() {
        assert_eq!(
            parse_csv_line(r#"SPY,"2.90 x 15","1,200,000",C"#),
            vec!["SPY", "2.90 x 15", "1,200,000", "C"]
        );
        assert_eq!(parse_csv_line(r#"a,"he said ""hi""",b"#), vec!["a", r#"he said "hi""#, "b"]);
        assert_eq!(parse_csv_line(""), vec![""]);
    }

    #[test]
    fn budget_then_restart_reads_each_row_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(
            dir.path(),
            "flow.csv",
            &[
                "Symbol,Strike,Expires",
                "AAA,100,2026-03-20",
                "BBB,110,2026-03-20",
                "CCC,120,2026-03-20",
                "DDD,130,2026-03-20",
                "EEE,140,2026-03-20",
            ],
        );
        let state = dir.path().join("state.json").to_string_lossy().to_string();

        let mut tailer = CsvTailer::new(vec![csv.clone()], state.clone(), 2);
        let mut seen = tickers(&tailer.read_all());
        assert_eq!(seen, vec!["AAA", "BBB"]);

        // Simulate restart: a fresh tailer reloads offset + header from disk.
        drop(tailer);
        let mut tailer = CsvTailer::new(vec![csv.clone()], state.clone(), 2);
        seen.extend(tickers(&tailer.read_all()));
        seen.extend(tickers(&tailer.read_all()));
        assert_eq!(seen, vec!["AAA", "BBB", "CCC", "DDD", "EEE"]);

        // At EOF: empty forever, no duplicates, no errors.
        assert!(tailer.read_all().is_empty());
        assert!(tailer.read_all().is_empty());
    }

    #[test]
    fn missing_file_is_nonfatal() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json").to_string_lossy().to_string();
        let mut tailer = CsvTailer::new(vec!["/nope/missing.csv".to_string()], state, 10);
        assert!(tailer.read_all().is_empty());
    }

    #[test]
    fn header_only_file_persists_header_then_idles() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(dir.path(), "flow.csv", &["Symbol,Strike,Expires"]);
        let state = dir.path().join("state.json").to_string_lossy().to_string();

        let mut tailer = CsvTailer::new(vec![csv.clone()], state.clone(), 10);
        assert!(tailer.read_all().is_empty());

        let saved = TailerState::load(&state);
        let entry = saved.files.get(&csv).expect("state persisted for path");
        assert!(entry.offset > 0);
        assert_eq!(
            entry.header.as_deref(),
            Some(&["Symbol".to_string(), "Strike".to_string(), "Expires".to_string()][..])
        );
    }

    #[test]
    fn short_and_blank_lines_are_skipped_but_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(
            dir.path(),
            "flow.csv",
            &[
                "Symbol,Strike,Expires",
                "AAA,100,2026-03-20",
                "brokenline",
                "",
                "BBB,110,2026-03-20",
            ],
        );
        let state = dir.path().join("state.json").to_string_lossy().to_string();

        let mut tailer = CsvTailer::new(vec![csv], state, 10);
        assert_eq!(tickers(&tailer.read_all()), vec!["AAA", "BBB"]);
        // The broken line was consumed, not left for endless re-reads.
        assert!(tailer.read_all().is_empty());
    }

    #[test]
    fn shared_budget_spans_files_and_tags_sources() {
        let dir = tempfile::tempdir().unwrap();
        let etfs = write_csv(
            dir.path(),
            "etfs.csv",
            &["Symbol,Strike,Expires", "SPY,400,2026-03-20", "QQQ,380,2026-03-20"],
        );
        let stocks = write_csv(
            dir.path(),
            "stocks.csv",
            &["Symbol,Strike,Expires", "NVDA,800,2026-03-20"],
        );
        let state = dir.path().join("state.json").to_string_lossy().to_string();

        let mut tailer = CsvTailer::new(vec![etfs, stocks], state, 3);
        let rows = tailer.read_all();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].1, SourceTag::CsvEtf);
        assert_eq!(rows[2].1, SourceTag::CsvStock);
    }

    #[test]
    fn reset_replays_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(
            dir.path(),
            "flow.csv",
            &["Symbol,Strike,Expires", "AAA,100,2026-03-20"],
        );
        let state = dir.path().join("state.json").to_string_lossy().to_string();

        let mut tailer = CsvTailer::new(vec![csv], state, 10);
        assert_eq!(tickers(&tailer.read_all()), vec!["AAA"]);
        assert!(tailer.read_all().is_empty());

        tailer.reset().unwrap();
        assert_eq!(tickers(&tailer.read_all()), vec!["AAA"]);
    }
}
