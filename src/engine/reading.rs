//! Reading and column model shared by every engine.
//!
//! A [`Reading`] is one named source (a sensor, a cell tower, the external
//! device) made of ordered [`Column`]s. Column keys never change after
//! creation; only values are updated.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of value kinds a column can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ColumnValue {
    /// Interprets a raw field from a device line, preferring numbers.
    pub fn parse_lenient(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(value) = raw.parse::<i64>() {
            return ColumnValue::Integer(value);
        }
        if let Ok(value) = raw.parse::<f64>() {
            return ColumnValue::Float(value);
        }
        match raw {
            "true" => ColumnValue::Boolean(true),
            "false" => ColumnValue::Boolean(false),
            _ => ColumnValue::Text(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Integer(value) => Some(*value as f64),
            ColumnValue::Float(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Boolean(value) => write!(f, "{value}"),
            ColumnValue::Integer(value) => write!(f, "{value}"),
            ColumnValue::Float(value) => write!(f, "{value}"),
            ColumnValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        ColumnValue::Boolean(value)
    }
}

impl From<i32> for ColumnValue {
    fn from(value: i32) -> Self {
        ColumnValue::Integer(i64::from(value))
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Integer(value)
    }
}

impl From<u32> for ColumnValue {
    fn from(value: u32) -> Self {
        ColumnValue::Integer(i64::from(value))
    }
}

impl From<f32> for ColumnValue {
    fn from(value: f32) -> Self {
        ColumnValue::Float(f64::from(value))
    }
}

impl From<f64> for ColumnValue {
    fn from(value: f64) -> Self {
        ColumnValue::Float(value)
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

/// Placeholder shown for a column that has no value.
pub const NOT_AVAILABLE: &str = "n/a";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    key: String,
    pub name: Option<String>,
    pub unit: Option<String>,
    /// `None` means "not available" (no fix, no data, undefined id).
    pub value: Option<ColumnValue>,
}

impl Column {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            unit: None,
            value: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_value(mut self, value: Option<ColumnValue>) -> Self {
        self.value = value;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn set_value(&mut self, value: Option<ColumnValue>) {
        self.value = value;
    }

    pub fn display_value(&self) -> String {
        self.value
            .as_ref()
            .map(ColumnValue::to_string)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub title: String,
    pub description: Option<String>,
    pub columns: Vec<Column>,
}

impl Reading {
    pub fn new(title: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            title: title.into(),
            description: None,
            columns,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn column(&self, key: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.key() == key)
    }

    pub fn value(&self, key: &str) -> Option<&ColumnValue> {
        self.column(key).and_then(|column| column.value.as_ref())
    }

    /// Sets the value of an existing column. Unknown keys are ignored so the
    /// column set stays fixed.
    pub fn set(&mut self, key: &str, value: Option<ColumnValue>) -> bool {
        match self.columns.iter_mut().find(|column| column.key() == key) {
            Some(column) => {
                column.set_value(value);
                true
            }
            None => false,
        }
    }

    pub fn clear_values(&mut self) {
        for column in &mut self.columns {
            column.set_value(None);
        }
    }

    /// Flattens the reading into a JSON object keyed by column key, in
    /// column order. Missing values become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for column in &self.columns {
            let value = match &column.value {
                Some(value) => serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                None => serde_json::Value::Null,
            };
            map.insert(column.key().to_string(), value);
        }
        serde_json::Value::Object(map)
    }

    /// `;`-joined values, `n/a` for missing ones.
    pub fn to_row(&self) -> String {
        self.columns
            .iter()
            .map(Column::display_value)
            .collect::<Vec<_>>()
            .join(";")
    }
}
