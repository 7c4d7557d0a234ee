//! # Process Logging
//!
//! One audit row per pipeline step, written by a stored procedure with a
//! fixed 16-parameter signature.

use crate::database::{check_parameter_count, finish, DatabaseError, SqlEngine};
use crate::table::CellValue;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, instrument};

/// Stored procedure parameters in call order
pub const PROCESS_LOG_PARAMETERS: [&str; 16] = [
    "ProcessStartTime",
    "BusinessArea",
    "ProcessName",
    "ProcessStatus",
    "SourceType",
    "Source",
    "SourceLocation",
    "TargetType",
    "Target",
    "TargetLocation",
    "ObjectType",
    "ObjectName",
    "RowsProcessed",
    "ProcessMessage",
    "RowsSkipped",
    "ErrorMessage",
];

const MAX_IDENTIFIER_LENGTH: usize = 128;

// ============================================================================
// Procedure Name
// ============================================================================

/// Validated stored procedure name
///
/// Accepts `proc`, `schema.proc` or `database.schema.proc`, with any part
/// optionally wrapped in square brackets. The name is interpolated into the
/// `EXEC` statement, so nothing else is allowed through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProcedureName(String);

impl ProcedureName {
    pub fn new(name: impl Into<String>) -> Result<Self, DatabaseError> {
        let name = name.into();
        let invalid = |reason: &str| DatabaseError::InvalidProcedureName {
            name: name.clone(),
            reason: reason.to_string(),
        };

        let parts = split_parts(&name).ok_or_else(|| invalid("unbalanced brackets"))?;
        if parts.is_empty() || parts.len() > 3 {
            return Err(invalid("expected 1 to 3 dot-separated parts"));
        }

        for part in parts {
            if let Some(inner) = part.strip_prefix('[').and_then(|p| p.strip_suffix(']')) {
                if inner.is_empty() || inner.len() > MAX_IDENTIFIER_LENGTH || inner.contains(']') {
                    return Err(invalid("bracketed part must be 1-128 characters without ']'"));
                }
            } else if !is_regular_identifier(part) {
                return Err(invalid(
                    "parts must start with a letter or '_' and contain only letters, digits, '_', '@', '$' or '#'",
                ));
            }
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Split on dots outside brackets; `None` if brackets do not balance
fn split_parts(name: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_brackets = false;
    for (i, c) in name.char_indices() {
        match c {
            '[' if !in_brackets => in_brackets = true,
            ']' if in_brackets => in_brackets = false,
            '.' if !in_brackets => {
                parts.push(&name[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_brackets {
        return None;
    }
    parts.push(&name[start..]);
    Some(parts)
}

fn is_regular_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    starts_ok
        && part.len() <= MAX_IDENTIFIER_LENGTH
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '$' | '#'))
}

impl fmt::Display for ProcedureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProcedureName {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProcedureName {
    type Error = DatabaseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProcedureName> for String {
    fn from(value: ProcedureName) -> Self {
        value.0
    }
}

/// `EXEC` statement calling `procedure` with every log parameter as a `?` marker
pub fn procedure_call_sql(procedure: &ProcedureName) -> String {
    let arguments: Vec<String> = PROCESS_LOG_PARAMETERS
        .iter()
        .map(|p| format!("@{}=?", p))
        .collect();
    format!("EXEC {} {}", procedure, arguments.join(", "))
}

// ============================================================================
// Log Record
// ============================================================================

/// Audit entry describing one pipeline step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessLogRecord {
    pub process_start_time: NaiveDateTime,
    pub business_area: String,
    pub process_name: String,
    pub process_status: String,
    pub source_type: String,
    pub source: String,
    pub source_location: String,
    pub target_type: String,
    pub target: String,
    pub target_location: String,
    pub object_type: String,
    pub object_name: String,
    pub rows_processed: i64,
    pub process_message: String,
    pub rows_skipped: i64,
    /// `None` is stored as NULL
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ProcessLogRecord {
    /// Values in [`PROCESS_LOG_PARAMETERS`] order
    pub fn parameters(&self) -> Vec<CellValue> {
        vec![
            CellValue::DateTime(self.process_start_time),
            CellValue::from(self.business_area.as_str()),
            CellValue::from(self.process_name.as_str()),
            CellValue::from(self.process_status.as_str()),
            CellValue::from(self.source_type.as_str()),
            CellValue::from(self.source.as_str()),
            CellValue::from(self.source_location.as_str()),
            CellValue::from(self.target_type.as_str()),
            CellValue::from(self.target.as_str()),
            CellValue::from(self.target_location.as_str()),
            CellValue::from(self.object_type.as_str()),
            CellValue::from(self.object_name.as_str()),
            CellValue::Int(self.rows_processed),
            CellValue::from(self.process_message.as_str()),
            CellValue::Int(self.rows_skipped),
            CellValue::from(self.error_message.clone()),
        ]
    }
}

impl SqlEngine {
    /// Write one process log row through `procedure`
    ///
    /// Executes the call, then commits. If the call fails the commit is
    /// skipped and the driver error is returned. The connection is closed on
    /// every path. There is no retry.
    #[instrument(skip_all, fields(procedure = %procedure, process = %record.process_name, status = %record.process_status))]
    pub async fn log_process(
        &self,
        procedure: &ProcedureName,
        record: &ProcessLogRecord,
    ) -> Result<(), DatabaseError> {
        let sql = procedure_call_sql(procedure);
        let params = record.parameters();
        check_parameter_count(&sql, &params)?;

        let mut connection = self.open().await?;
        let result = match connection.execute(&sql, &params).await {
            Ok(_) => connection.commit().await,
            Err(e) => Err(e),
        };
        finish(connection.as_mut(), result).await?;

        info!(
            rows_processed = record.rows_processed,
            rows_skipped = record.rows_skipped,
            "Logged process run"
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "process_log_tests.rs"]
mod tests;
