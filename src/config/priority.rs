//! AC priority map used to rank call-domain work.
//!
//! File format is a JSON array of `{"AC_Name": "...", "Priority": n}` rows,
//! where `Priority` may be a number or a numeric string. Rows that cannot
//! be read are skipped.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityMap {
    by_ac: HashMap<String, i32>,
}

#[derive(Debug, Deserialize)]
struct PriorityRow {
    #[serde(rename = "AC_Name")]
    ac_name: Option<String>,
    #[serde(rename = "Priority")]
    priority: Option<PriorityValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriorityValue {
    Number(i64),
    Text(String),
}

impl PriorityValue {
    fn as_i32(&self) -> Option<i32> {
        match self {
            PriorityValue::Number(n) => i32::try_from(*n).ok(),
            PriorityValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl PriorityMap {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "failed to read AC priority file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let rows: Vec<serde_json::Value> = serde_json::from_str(content)?;
        let mut by_ac = HashMap::new();
        for raw in rows {
            let row: PriorityRow = match serde_json::from_value(raw) {
                Ok(row) => row,
                Err(e) => {
                    warn!("skipping malformed AC priority row: {e}");
                    continue;
                }
            };
            match (row.ac_name, row.priority.as_ref().and_then(PriorityValue::as_i32)) {
                (Some(ac), Some(priority)) => {
                    by_ac.insert(ac, priority);
                }
                (ac, _) => warn!(ac = ?ac, "skipping AC priority row without name or priority"),
            }
        }
        Ok(Self { by_ac })
    }

    pub fn insert(&mut self, ac: impl Into<String>, priority: i32) {
        self.by_ac.insert(ac.into(), priority);
    }

    pub fn get(&self, ac: &str) -> Option<i32> {
        self.by_ac.get(ac).copied()
    }

    /// Mapped priority for the AC, falling back to the item's own.
    pub fn effective(&self, ac: Option<&str>, own: i32) -> i32 {
        ac.and_then(|ac| self.get(ac)).unwrap_or(own)
    }

    pub fn len(&self) -> usize {
        self.by_ac.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ac.is_empty()
    }
}
