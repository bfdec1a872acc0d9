use std::io::{BufRead, Write};

use epoch_core::EpochError;

use crate::models::{AggregateReport, FoldOutcome};

/// Write fold records as NDJSON: one flat JSON object per line, in fold
/// order.
pub fn write_fold_records<W: Write>(writer: &mut W, outcomes: &[FoldOutcome]) -> Result<(), EpochError> {
    for outcome in outcomes {
        let line = serde_json::to_string(outcome)
            .map_err(|e| EpochError::Serialization(e.to_string()))?;
        writeln!(writer, "{}", line).map_err(|e| EpochError::Serialization(e.to_string()))?;
    }
    Ok(())
}

pub fn read_fold_records<R: BufRead>(reader: R) -> Result<Vec<FoldOutcome>, EpochError> {
    let mut outcomes = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| EpochError::Serialization(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let outcome: FoldOutcome =
            serde_json::from_str(&line).map_err(|e| EpochError::Serialization(e.to_string()))?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

/// Canonical single-line form of the aggregate report. Field order
/// follows the struct declaration, so re-serializing a parsed report
/// reproduces the same bytes.
pub fn report_to_ndjson(report: &AggregateReport) -> Result<String, EpochError> {
    serde_json::to_string(report).map_err(|e| EpochError::Serialization(e.to_string()))
}

pub fn report_from_ndjson(line: &str) -> Result<AggregateReport, EpochError> {
    serde_json::from_str(line).map_err(|e| EpochError::Serialization(e.to_string()))
}

pub fn write_report<W: Write>(writer: &mut W, report: &AggregateReport) -> Result<(), EpochError> {
    let line = report_to_ndjson(report)?;
    writeln!(writer, "{}", line).map_err(|e| EpochError::Serialization(e.to_string()))
}
