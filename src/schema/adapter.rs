//! Adapter for reading daily records from JSON and NDJSON
//!
//! Parses either modality, maps serde's unknown-field failures to schema
//! mismatches, and groups records per user in chronological order.

use crate::error::PipelineError;
use crate::schema::records::DatedRecord;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};

/// Adapter for converting raw JSON input into typed records
pub struct RecordAdapter;

impl RecordAdapter {
    /// Parse a JSON string containing an array of records
    pub fn parse_array<T: DeserializeOwned>(json: &str) -> Result<Vec<T>, PipelineError> {
        serde_json::from_str(json).map_err(classify)
    }

    /// Parse NDJSON (newline-delimited JSON) containing records
    pub fn parse_ndjson<T: DeserializeOwned>(ndjson: &str) -> Result<Vec<T>, PipelineError> {
        let mut records = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let msg = format!("Failed to parse line {}: {}", line_num + 1, e);
                    return Err(if is_unknown_field(&e) {
                        PipelineError::SchemaMismatch(msg)
                    } else {
                        PipelineError::Parse(msg)
                    });
                }
            }
        }
        Ok(records)
    }

    /// Parse either a JSON array or NDJSON, decided by the first non-blank byte
    pub fn parse_auto<T: DeserializeOwned>(input: &str) -> Result<Vec<T>, PipelineError> {
        if input.trim_start().starts_with('[') {
            Self::parse_array(input)
        } else {
            Self::parse_ndjson(input)
        }
    }

    /// Group records by user, each group sorted by date
    pub fn group_by_user<T: DatedRecord + Clone>(records: &[T]) -> BTreeMap<String, Vec<T>> {
        let mut grouped: BTreeMap<String, Vec<T>> = BTreeMap::new();
        for record in records {
            grouped
                .entry(record.user_id().to_string())
                .or_default()
                .push(record.clone());
        }
        for rows in grouped.values_mut() {
            rows.sort_by_key(|r| r.date());
        }
        grouped
    }

    /// Reject a batch holding two records for the same user and day
    pub fn ensure_unique_days<T: DatedRecord>(records: &[T]) -> Result<(), PipelineError> {
        let mut seen = HashSet::new();
        for record in records {
            if !seen.insert((record.user_id(), record.date())) {
                return Err(PipelineError::SchemaMismatch(format!(
                    "duplicate record for user {} on {}",
                    record.user_id(),
                    record.date()
                )));
            }
        }
        Ok(())
    }

    /// Validate a batch of records, returning only the failures
    pub fn validate_records<T, F>(records: &[T], validate: F) -> Vec<ValidationResult>
    where
        T: DatedRecord,
        F: Fn(&T) -> Result<(), PipelineError>,
    {
        records
            .iter()
            .enumerate()
            .filter_map(|(idx, record)| {
                validate(record).err().map(|err| ValidationResult {
                    index: idx,
                    user_id: record.user_id().to_string(),
                    error: err.to_string(),
                })
            })
            .collect()
    }
}

/// A record that failed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub index: usize,
    pub user_id: String,
    pub error: String,
}

fn is_unknown_field(err: &serde_json::Error) -> bool {
    err.to_string().contains("unknown field")
}

fn classify(err: serde_json::Error) -> PipelineError {
    if is_unknown_field(&err) {
        PipelineError::SchemaMismatch(err.to_string())
    } else {
        PipelineError::Json(err)
    }
}
