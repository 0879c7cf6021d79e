//! Parsing of raw store values into what the browser displays.
//!
//! A value is a sequence of rows separated by `;`, each row a sequence of
//! space-separated tokens.  If the first token is a number the whole value
//! becomes a row-major numeric matrix; otherwise it is passed through as a
//! string:
//!
//! ```text
//! "1 2;3 4"      →  [[1.0, 2.0], [3.0, 4.0]]
//! "72.5"         →  [[72.5]]
//! "hello world"  →  "hello world"
//! "1 2;x 4"      →  "1 2;x 4"          (any bad cell ⇒ original string)
//! ```
//!
//! The fallback is explicit: [`try_parse_matrix`] returns a
//! [`ValueParseError`] and [`parse_value`] turns that into
//! [`KeyValue::Text`].  Parsing never fails from the caller's point of view.

use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Row separator inside a stored value.
pub const ROW_SEPARATOR: char = ';';

/// Cell separator inside a row.
pub const CELL_SEPARATOR: char = ' ';

/// Why a value could not be read as a numeric matrix, or a browser-submitted
/// JSON value could not be turned back into a stored string.
#[derive(Debug, Error, PartialEq)]
pub enum ValueParseError {
    /// The first token is not a number, so the value is text.
    #[error("first token {0:?} is not numeric")]
    NotNumeric(String),

    /// A later token in the value is not a number.
    #[error("row {row}: token {token:?} is not numeric")]
    InvalidNumber { row: usize, token: String },

    /// A submitted JSON value is neither a string nor an array of rows of
    /// scalars.
    #[error("unsupported value shape: {0}")]
    UnsupportedShape(String),
}

/// One matrix cell.
///
/// JSON has no literal for NaN or the infinities, so those are carried as
/// markers and rendered as the strings `"NaN"`, `"Infinity"` and
/// `"-Infinity"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    Number(f64),
    NaN,
    Infinity,
    NegInfinity,
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        if n.is_nan() {
            Cell::NaN
        } else if n == f64::INFINITY {
            Cell::Infinity
        } else if n == f64::NEG_INFINITY {
            Cell::NegInfinity
        } else {
            Cell::Number(n)
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Number(n) => serializer.serialize_f64(*n),
            Cell::NaN => serializer.serialize_str("NaN"),
            Cell::Infinity => serializer.serialize_str("Infinity"),
            Cell::NegInfinity => serializer.serialize_str("-Infinity"),
        }
    }
}

/// A parsed store value as pushed to the browser.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KeyValue {
    /// Row-major numeric matrix.
    Matrix(Vec<Vec<Cell>>),
    /// Anything that is not numeric, verbatim.
    Text(String),
}

/// Parses a raw store value, falling back to the original string.
pub fn parse_value(raw: &str) -> KeyValue {
    match try_parse_matrix(raw) {
        Ok(rows) => KeyValue::Matrix(rows),
        Err(e) => {
            tracing::trace!("value kept as text: {e}");
            KeyValue::Text(raw.to_string())
        }
    }
}

/// Parses a raw store value as a numeric matrix.
///
/// The first token (everything before the first space) decides: if it is
/// not a number, the value is text.  Otherwise every row is split on spaces,
/// empty tokens are skipped, and each remaining token must parse as `f64`.
/// A row with no tokens (e.g. after a trailing `;`) becomes an empty row.
///
/// # Errors
///
/// [`ValueParseError::NotNumeric`] when the first token is not a number,
/// [`ValueParseError::InvalidNumber`] for any later bad token.
pub fn try_parse_matrix(raw: &str) -> Result<Vec<Vec<Cell>>, ValueParseError> {
    let first = raw.split(CELL_SEPARATOR).next().unwrap_or_default();
    if parse_number(first).is_none() {
        return Err(ValueParseError::NotNumeric(first.to_string()));
    }

    raw.split(ROW_SEPARATOR)
        .enumerate()
        .map(|(row_idx, row)| {
            row.split(CELL_SEPARATOR)
                .filter(|token| !token.trim().is_empty())
                .map(|token| {
                    parse_number(token)
                        .map(Cell::from)
                        .ok_or_else(|| ValueParseError::InvalidNumber {
                            row: row_idx,
                            token: token.to_string(),
                        })
                })
                .collect::<Result<Vec<Cell>, ValueParseError>>()
        })
        .collect()
}

/// Converts a JSON value submitted by the browser into the string stored
/// under a key.
///
/// A JSON string is stored verbatim.  An array of rows is stored with cells
/// joined by `" "` and rows joined by `"; "`; cells may be strings or
/// numbers.
///
/// # Errors
///
/// Returns [`ValueParseError::UnsupportedShape`] for any other shape.
pub fn to_store_string(value: &JsonValue) -> Result<String, ValueParseError> {
    match value {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Array(rows) => {
            let rows = rows
                .iter()
                .map(|row| match row {
                    JsonValue::Array(cells) => cells
                        .iter()
                        .map(cell_to_string)
                        .collect::<Result<Vec<_>, _>>()
                        .map(|cells| cells.join(" ")),
                    other => Err(ValueParseError::UnsupportedShape(other.to_string())),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows.join("; "))
        }
        other => Err(ValueParseError::UnsupportedShape(other.to_string())),
    }
}

fn cell_to_string(cell: &JsonValue) -> Result<String, ValueParseError> {
    match cell {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(ValueParseError::UnsupportedShape(other.to_string())),
    }
}

fn parse_number(token: &str) -> Option<f64> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    token.parse::<f64>().ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
