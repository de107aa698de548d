//! The durable per-user cumulative record.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The durable, remote, per-user cumulative record.
///
/// Each write fully replaces the stored record, so writing the same record
/// twice is idempotent. The coordinator never mutates a stored record; it only
/// proposes new ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeRecord {
    /// Owner of the record.
    pub user_id: String,
    /// Cumulative step count. Only ever advanced by session deltas.
    pub steps: u64,
    /// Most recent heart rate (bpm).
    pub heart_rate: i32,
    /// Most recent sleep duration (hours).
    pub sleep_hours: f64,
    /// When the record was written.
    pub updated_at: DateTime<Utc>,
}

impl CumulativeRecord {
    /// Creates a new record.
    pub fn new(
        user_id: impl Into<String>,
        steps: u64,
        heart_rate: i32,
        sleep_hours: f64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            steps,
            heart_rate,
            sleep_hours,
            updated_at,
        }
    }

    /// Creates an empty record for a user that has never synced.
    pub fn empty(user_id: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self::new(user_id, 0, 0, 0.0, updated_at)
    }

    /// Checks field constraints that the type system does not enforce.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.user_id.is_empty() {
            return Err(ProtocolError::InvalidRecord("user_id is empty".into()));
        }
        if !self.sleep_hours.is_finite() {
            return Err(ProtocolError::InvalidRecord(format!(
                "sleep_hours must be a finite number, got {}",
                self.sleep_hours
            )));
        }
        Ok(())
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes from CBOR and validates the result.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let record: Self = ciborium::de::from_reader(bytes)
            .map_err(|e| ProtocolError::CborDecode(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    /// Encodes to pretty-printed JSON.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decodes from JSON and validates the result.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let record: Self = serde_json::from_str(json)?;
        record.validate()?;
        Ok(record)
    }
}
