//! Core CostLedger implementation

use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::budget::BudgetStatus;
use crate::error::LedgerError;
use crate::record::{CostRecord, GENESIS_HASH};

/// Outcome of re-walking the hash chain
#[derive(Debug, Clone, PartialEq)]
pub struct ChainVerification {
    /// Number of records examined
    pub records_checked: usize,
    /// First record whose hash or link does not match, if any
    pub first_mismatch: Option<ChainMismatch>,
}

/// Where and why the chain broke
#[derive(Debug, Clone, PartialEq)]
pub struct ChainMismatch {
    /// Zero-based position of the record among non-blank lines
    pub index: usize,
    /// Run id of the offending record, when the line could be parsed
    pub run_id: Option<String>,
    /// Human-readable reason
    pub reason: String,
}

impl ChainVerification {
    /// True when every record chains correctly
    pub fn is_intact(&self) -> bool {
        self.first_mismatch.is_none()
    }
}

/// One non-blank line of the ledger
#[derive(Debug)]
enum LedgerLine {
    Record(CostRecord),
    Malformed(String),
}

/// Scoped advisory lock on the ledger file, released on drop
struct LedgerLock<'a> {
    file: &'a File,
}

impl<'a> LedgerLock<'a> {
    fn exclusive(file: &'a File, path: &Path) -> Result<Self, LedgerError> {
        debug!(?path, "LedgerLock::exclusive: acquiring");
        FileExt::lock_exclusive(file).map_err(|e| LedgerError::lock(path, e))?;
        Ok(Self { file })
    }

    fn shared(file: &'a File, path: &Path) -> Result<Self, LedgerError> {
        debug!(?path, "LedgerLock::shared: acquiring");
        FileExt::lock_shared(file).map_err(|e| LedgerError::lock(path, e))?;
        Ok(Self { file })
    }
}

impl Drop for LedgerLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.file) {
            warn!(error = %e, "Failed to release ledger lock");
        }
    }
}

/// Append-only, hash-chained JSONL cost ledger
///
/// Appends from concurrent processes are serialized with an exclusive file
/// lock around the read-last-hash-then-write sequence. Readers take a shared
/// lock and read the whole file before interpreting it.
#[derive(Debug, Clone)]
pub struct CostLedger {
    path: PathBuf,
}

impl CostLedger {
    /// Open the ledger at `path`, creating parent directories as needed
    ///
    /// The file itself is created lazily by the first append.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
        }
        debug!(?path, "Opened cost ledger");
        Ok(Self { path })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record, chaining it to the current tail
    ///
    /// Returns the sealed record as written.
    pub fn append(&self, record: CostRecord) -> Result<CostRecord, LedgerError> {
        debug!(run_id = %record.run_id, cost_usd = record.cost_usd, "append: called");
        if !record.cost_usd.is_finite() || record.cost_usd < 0.0 {
            return Err(LedgerError::InvalidCost {
                run_id: record.run_id,
                cost_usd: record.cost_usd,
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| LedgerError::io(&self.path, e))?;
        let _lock = LedgerLock::exclusive(&file, &self.path)?;

        let content = read_all(&file, &self.path)?;
        let prev_hash = last_hash(&content);
        debug!(%prev_hash, "append: read chain tail");

        let sealed = record.seal(&prev_hash);
        let mut line = String::new();
        if !content.is_empty() && !content.ends_with('\n') {
            // Keep a torn tail on its own line so the new record stays parseable
            warn!(path = ?self.path, "Ledger tail has no trailing newline, isolating it");
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(&sealed)?);
        line.push('\n');

        let mut writer = &file;
        writer
            .write_all(line.as_bytes())
            .map_err(|e| LedgerError::io(&self.path, e))?;
        file.sync_data().map_err(|e| LedgerError::io(&self.path, e))?;

        info!(run_id = %sealed.run_id, cost_usd = sealed.cost_usd, hash = %sealed.hash, "Appended cost record");
        Ok(sealed)
    }

    /// All parseable records in file order
    pub fn records(&self) -> Result<Vec<CostRecord>, LedgerError> {
        debug!(path = ?self.path, "records: called");
        let content = self.snapshot()?;
        let records: Vec<CostRecord> = parse_lines(&content)
            .into_iter()
            .filter_map(|line| match line {
                LedgerLine::Record(record) => Some(record),
                LedgerLine::Malformed(raw) => {
                    debug!(len = raw.len(), "records: skipping malformed line");
                    None
                }
            })
            .collect();
        debug!(count = records.len(), "records: loaded");
        Ok(records)
    }

    /// Sum of costs with `start <= timestamp < end`
    pub fn sum_for_period(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<f64, LedgerError> {
        debug!(%start, %end, "sum_for_period: called");
        let total = sum_records(&self.records()?, start, end);
        debug!(total, "sum_for_period: complete");
        Ok(total)
    }

    /// Daily and monthly spend against the given caps, as of now
    pub fn check_cumulative_budget(&self, per_day_usd: f64, per_month_usd: f64) -> Result<BudgetStatus, LedgerError> {
        self.check_cumulative_budget_at(Utc::now(), per_day_usd, per_month_usd)
    }

    /// Daily and monthly spend against the given caps, as of `now`
    pub fn check_cumulative_budget_at(
        &self,
        now: DateTime<Utc>,
        per_day_usd: f64,
        per_month_usd: f64,
    ) -> Result<BudgetStatus, LedgerError> {
        debug!(%now, per_day_usd, per_month_usd, "check_cumulative_budget_at: called");
        let records = self.records()?;
        Ok(BudgetStatus::evaluate(&records, now, per_day_usd, per_month_usd))
    }

    /// Recompute every hash in order and report the first mismatch
    ///
    /// Lines that are not cost records (a fragment left by a crashed writer)
    /// are skipped; the record after them must still link to the last good
    /// hash. `records_checked` and mismatch indexes count records only, so
    /// they line up with positions in `records()`.
    pub fn verify_chain(&self) -> Result<ChainVerification, LedgerError> {
        debug!(path = ?self.path, "verify_chain: called");
        let content = self.snapshot()?;

        let mut expected_prev = GENESIS_HASH.to_string();
        let mut index = 0;
        for line in parse_lines(&content) {
            let record = match line {
                LedgerLine::Record(record) => record,
                LedgerLine::Malformed(raw) => {
                    warn!(after = index, len = raw.len(), "Skipping unparseable ledger line");
                    continue;
                }
            };

            let reason = if record.prev_hash != expected_prev {
                Some(format!(
                    "prev_hash {} does not match preceding hash {}",
                    record.prev_hash, expected_prev
                ))
            } else if !record.is_chained_after(&expected_prev) {
                Some(format!(
                    "stored hash {} does not match recomputed {}",
                    record.hash,
                    record.expected_hash(&expected_prev)
                ))
            } else {
                None
            };

            if let Some(reason) = reason {
                warn!(index, %reason, "Ledger chain mismatch");
                return Ok(ChainVerification {
                    records_checked: index + 1,
                    first_mismatch: Some(ChainMismatch {
                        index,
                        run_id: Some(record.run_id),
                        reason,
                    }),
                });
            }
            expected_prev = record.hash;
            index += 1;
        }

        debug!(count = index, "verify_chain: intact");
        Ok(ChainVerification {
            records_checked: index,
            first_mismatch: None,
        })
    }

    /// Read the whole file under a shared lock; a missing file reads as empty
    fn snapshot(&self) -> Result<String, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "snapshot: ledger does not exist yet");
                return Ok(String::new());
            }
            Err(e) => return Err(LedgerError::io(&self.path, e)),
        };
        let _lock = LedgerLock::shared(&file, &self.path)?;
        read_all(&file, &self.path)
    }
}

fn read_all(file: &File, path: &Path) -> Result<String, LedgerError> {
    let mut content = String::new();
    let mut reader = file;
    reader
        .read_to_string(&mut content)
        .map_err(|e| LedgerError::io(path, e))?;
    Ok(content)
}

/// Split ledger content into lines, dropping blanks and a torn final line
fn parse_lines(content: &str) -> Vec<LedgerLine> {
    let complete = content.ends_with('\n');
    let raw_lines: Vec<&str> = content.lines().collect();
    let last = raw_lines.len().saturating_sub(1);

    raw_lines
        .iter()
        .enumerate()
        .filter(|(_, raw)| !raw.trim().is_empty())
        .filter_map(|(i, raw)| match serde_json::from_str::<CostRecord>(raw.trim()) {
            Ok(record) => Some(LedgerLine::Record(record)),
            Err(_) if i == last && !complete => {
                debug!(len = raw.len(), "parse_lines: ignoring partially written tail");
                None
            }
            Err(_) => Some(LedgerLine::Malformed(raw.to_string())),
        })
        .collect()
}

/// Hash of the last complete record, or the genesis seed
fn last_hash(content: &str) -> String {
    parse_lines(content)
        .into_iter()
        .rev()
        .find_map(|line| match line {
            LedgerLine::Record(record) => Some(record.hash),
            LedgerLine::Malformed(_) => None,
        })
        .unwrap_or_else(|| GENESIS_HASH.to_string())
}

pub(crate) fn sum_records(records: &[CostRecord], start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    records
        .iter()
        .filter(|r| r.timestamp >= start && r.timestamp < end)
        .map(|r| r.cost_usd)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, 0, 0).unwrap()
    }

    fn rewrite_cost(path: &Path, index: usize, cost: f64) {
        let content = fs::read_to_string(path).unwrap();
        let lines: Vec<String> = content
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == index {
                    let mut value: serde_json::Value = serde_json::from_str(line).unwrap();
                    value["cost_usd"] = serde_json::json!(cost);
                    value.to_string()
                } else {
                    line.to_string()
                }
            })
            .collect();
        fs::write(path, lines.join("\n") + "\n").unwrap();
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("costs.jsonl");
        let ledger = CostLedger::open(&path).unwrap();
        assert!(path.parent().unwrap().exists());
        assert!(ledger.records().unwrap().is_empty());
    }

    #[test]
    fn test_append_chains_records() {
        let temp = tempdir().unwrap();
        let ledger = CostLedger::open(temp.path().join("costs.jsonl")).unwrap();

        let first = ledger.append(CostRecord::new("run-1", "shop", "smoke", 1.0)).unwrap();
        let second = ledger.append(CostRecord::new("run-2", "shop", "smoke", 2.0)).unwrap();

        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(ledger.records().unwrap().len(), 2);
        assert!(ledger.verify_chain().unwrap().is_intact());
    }

    #[test]
    fn test_append_rejects_negative_cost() {
        let temp = tempdir().unwrap();
        let ledger = CostLedger::open(temp.path().join("costs.jsonl")).unwrap();
        let result = ledger.append(CostRecord::new("run-1", "shop", "smoke", -1.0));
        assert!(matches!(result, Err(LedgerError::InvalidCost { .. })));
    }

    #[test]
    fn test_tampered_cost_detected_at_index() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("costs.jsonl");
        let ledger = CostLedger::open(&path).unwrap();
        for i in 0..4 {
            ledger
                .append(CostRecord::new(format!("run-{i}"), "shop", "smoke", 1.0))
                .unwrap();
        }

        rewrite_cost(&path, 2, 0.01);

        let verification = ledger.verify_chain().unwrap();
        let mismatch = verification.first_mismatch.unwrap();
        assert_eq!(mismatch.index, 2);
        assert_eq!(mismatch.run_id.as_deref(), Some("run-2"));
    }

    #[test]
    fn test_deleted_record_breaks_link() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("costs.jsonl");
        let ledger = CostLedger::open(&path).unwrap();
        for i in 0..3 {
            ledger
                .append(CostRecord::new(format!("run-{i}"), "shop", "", 1.0))
                .unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        fs::write(&path, kept.join("\n") + "\n").unwrap();

        let mismatch = ledger.verify_chain().unwrap().first_mismatch.unwrap();
        assert_eq!(mismatch.index, 1);
        assert!(mismatch.reason.contains("prev_hash"));
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("costs.jsonl");
        let ledger = CostLedger::open(&path).unwrap();
        ledger.append(CostRecord::new("run-1", "shop", "smoke", 1.0)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"timestamp":"2026-03-14T09:00:00Z","run_id":"ru"#).unwrap();

        assert_eq!(ledger.records().unwrap().len(), 1);
        assert!(ledger.verify_chain().unwrap().is_intact());

        // The next append keeps the fragment isolated and chains to run-1
        let appended = ledger.append(CostRecord::new("run-2", "shop", "smoke", 2.0)).unwrap();
        let records = ledger.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(appended.prev_hash, records[0].hash);

        let verification = ledger.verify_chain().unwrap();
        assert!(verification.is_intact());
        assert_eq!(verification.records_checked, 2);
    }

    #[test]
    fn test_fragment_does_not_hide_tampering() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("costs.jsonl");
        let ledger = CostLedger::open(&path).unwrap();
        ledger.append(CostRecord::new("run-1", "shop", "smoke", 1.0)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"timestamp":"2026-03-14T09:00:00Z","run_id":"ru"#).unwrap();
        ledger.append(CostRecord::new("run-2", "shop", "smoke", 2.0)).unwrap();
        ledger.append(CostRecord::new("run-3", "shop", "smoke", 3.0)).unwrap();

        // Line 2 on disk is run-2; the fragment sits on line 1
        rewrite_cost(&path, 2, 0.5);

        let mismatch = ledger.verify_chain().unwrap().first_mismatch.unwrap();
        assert_eq!(mismatch.index, 1);
        assert_eq!(mismatch.run_id.as_deref(), Some("run-2"));
    }

    #[test]
    fn test_sum_for_period_is_half_open() {
        let temp = tempdir().unwrap();
        let ledger = CostLedger::open(temp.path().join("costs.jsonl")).unwrap();
        ledger
            .append(CostRecord::new("a", "shop", "", 1.0).with_timestamp(at(8)))
            .unwrap();
        ledger
            .append(CostRecord::new("b", "shop", "", 2.0).with_timestamp(at(10)))
            .unwrap();
        ledger
            .append(CostRecord::new("c", "shop", "", 4.0).with_timestamp(at(12)))
            .unwrap();

        assert_eq!(ledger.sum_for_period(at(8), at(12)).unwrap(), 3.0);
        assert_eq!(ledger.sum_for_period(at(9), at(13)).unwrap(), 6.0);
        assert_eq!(ledger.sum_for_period(at(13), at(14)).unwrap(), 0.0);
    }

    #[test]
    fn test_concurrent_appends_keep_chain() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("costs.jsonl");

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let ledger = CostLedger::open(&path).unwrap();
                    for i in 0..10 {
                        ledger
                            .append(CostRecord::new(format!("run-{t}-{i}"), "shop", "smoke", 0.1))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let ledger = CostLedger::open(&path).unwrap();
        assert_eq!(ledger.records().unwrap().len(), 80);
        assert!(ledger.verify_chain().unwrap().is_intact());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_chain_verifies_and_detects_tamper(
            costs in prop::collection::vec(0.0f64..50.0, 1..12),
            pick in any::<prop::sample::Index>(),
        ) {
            let temp = tempdir().unwrap();
            let path = temp.path().join("costs.jsonl");
            let ledger = CostLedger::open(&path).unwrap();
            for (i, cost) in costs.iter().enumerate() {
                ledger.append(CostRecord::new(format!("run-{i}"), "shop", "full", *cost)).unwrap();
            }
            prop_assert!(ledger.verify_chain().unwrap().is_intact());

            let index = pick.index(costs.len());
            let original = ledger.records().unwrap()[index].cost_usd;
            rewrite_cost(&path, index, original + 1.0);

            let verification = ledger.verify_chain().unwrap();
            prop_assert_eq!(verification.first_mismatch.map(|m| m.index), Some(index));
        }
    }
}
