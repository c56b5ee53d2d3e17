//! CostRecord - one ledger entry and its chained hash

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::round_cost;

/// Previous-hash seed used by the first record of every ledger
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One completed run's cost, as stored in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// When the run completed (UTC, whole seconds)
    pub timestamp: DateTime<Utc>,
    /// Unique run identifier
    pub run_id: String,
    /// Product slug the run exercised
    pub product: String,
    /// Test level label (e.g. "smoke", "full")
    #[serde(default)]
    pub level: String,
    /// Total cost of the run in USD
    pub cost_usd: f64,
    /// Hash of the preceding record (GENESIS_HASH for the first)
    #[serde(default)]
    pub prev_hash: String,
    /// SHA-256 over prev_hash and the canonical encoding of this record
    #[serde(default)]
    pub hash: String,
}

/// Field subset covered by the hash, in canonical key order
#[derive(Serialize)]
struct CanonicalFields<'a> {
    timestamp: String,
    run_id: &'a str,
    product: &'a str,
    level: &'a str,
    cost_usd: f64,
}

impl CostRecord {
    /// Create an unsealed record stamped with the current time
    pub fn new(run_id: impl Into<String>, product: impl Into<String>, level: impl Into<String>, cost_usd: f64) -> Self {
        let run_id = run_id.into();
        debug!(%run_id, cost_usd, "CostRecord::new: called");
        Self {
            timestamp: Utc::now().trunc_subsecs(0),
            run_id,
            product: product.into(),
            level: level.into(),
            cost_usd: round_cost(cost_usd),
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    /// Override the timestamp (truncated to whole seconds)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.trunc_subsecs(0);
        self
    }

    /// Canonical byte encoding of the hashed fields
    pub fn canonical_encoding(&self) -> Vec<u8> {
        let fields = CanonicalFields {
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            run_id: &self.run_id,
            product: &self.product,
            level: &self.level,
            cost_usd: self.cost_usd,
        };
        // Serializing a plain struct of strings and a finite f64 cannot fail
        serde_json::to_vec(&fields).unwrap_or_default()
    }

    /// Hash this record would carry if chained after `prev_hash`
    pub fn expected_hash(&self, prev_hash: &str) -> String {
        chain_hash(prev_hash, &self.canonical_encoding())
    }

    /// Chain this record after `prev_hash`, filling prev_hash and hash
    pub fn seal(mut self, prev_hash: &str) -> Self {
        debug!(run_id = %self.run_id, %prev_hash, "CostRecord::seal: called");
        self.hash = self.expected_hash(prev_hash);
        self.prev_hash = prev_hash.to_string();
        self
    }

    /// Whether the stored hash matches the record contents and the given predecessor
    pub fn is_chained_after(&self, prev_hash: &str) -> bool {
        self.prev_hash == prev_hash && self.hash == self.expected_hash(prev_hash)
    }
}

/// `H(prev_hash || canonical)` as lowercase hex
pub fn chain_hash(prev_hash: &str, canonical: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical);
    hex::encode(hasher.finalize())
}
