//! Wire format of the external sensor board.
//!
//! The host writes one command byte and the board answers with one line
//! terminated by `\n`:
//!
//! * `h` → header, a JSON object `{"<key>": {"full": .., "short": .., "unit": ..}}`
//!   whose key order fixes the column order;
//! * `d` → data, `;`-joined values in header order.

use std::collections::VecDeque;

use serde::Deserialize;
use thiserror::Error;

use crate::engine::reading::{Column, ColumnValue, Reading};

pub const CMD_HEADER: u8 = b'h';
pub const CMD_DATA: u8 = b'd';
pub const LINE_END: u8 = b'\n';
pub const DATA_SEPARATOR: char = ';';

/// Capacity of the receive ring buffer.
pub const RING_CAPACITY: usize = 1024;

pub const EXTERNAL_READING_TITLE: &str = "External sensor";

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("header is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("header defines no sensors")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct SensorSpec {
    full: Option<String>,
    short: Option<String>,
    unit: Option<String>,
}

/// Builds the column set described by a header line.
pub fn parse_header(line: &str) -> Result<Vec<Column>, HeaderError> {
    let specs: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line.trim())?;
    if specs.is_empty() {
        return Err(HeaderError::Empty);
    }

    let mut columns = Vec::with_capacity(specs.len());
    for (key, value) in specs {
        let spec: SensorSpec = serde_json::from_value(value)?;
        let mut column = Column::new(key);
        if let Some(full) = spec.full.or(spec.short) {
            column = column.named(full);
        }
        if let Some(unit) = spec.unit.filter(|unit| !unit.is_empty()) {
            column = column.with_unit(unit);
        }
        columns.push(column);
    }
    Ok(columns)
}

pub fn header_reading(columns: Vec<Column>) -> Reading {
    Reading::new(EXTERNAL_READING_TITLE, columns)
}

/// Splits a data line into values. `None` when the field count does not
/// match the expected column count.
pub fn parse_data(line: &str, expected: usize) -> Option<Vec<ColumnValue>> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(DATA_SEPARATOR).collect();
    if fields.len() != expected {
        return None;
    }
    Some(fields.into_iter().map(ColumnValue::parse_lenient).collect())
}

/// Fixed-capacity byte ring that yields complete lines. When full, the
/// oldest bytes are overwritten.
#[derive(Debug)]
pub struct LineBuffer {
    bytes: VecDeque<u8>,
    capacity: usize,
}

impl LineBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            if self.bytes.len() == self.capacity {
                self.bytes.pop_front();
            }
            self.bytes.push_back(byte);
        }
    }

    /// Removes and returns the first complete line, without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.bytes.iter().position(|&byte| byte == LINE_END)?;
        let line: Vec<u8> = self.bytes.drain(..=end).take(end).collect();
        Some(String::from_utf8_lossy(&line).trim_end_matches('\r').to_string())
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(RING_CAPACITY)
    }
}
