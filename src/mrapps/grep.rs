use regex::Regex;
use serde_json::Value;

use crate::mr::{KeyValue, Mapper};

/// Emits `(key, line)` for each line of the text matching the pattern.
pub struct Grep {
    pattern: Regex,
}

impl Grep {
    pub fn new(pattern: &str) -> Result<Self, anyhow::Error> {
        Ok(Grep { pattern: Regex::new(pattern)? })
    }
}

impl Mapper for Grep {
    fn map(&self, key: Option<&Value>, value: &Value) -> Result<Vec<KeyValue>, anyhow::Error> {
        let text = value.as_str()
            .ok_or_else(|| anyhow::anyhow!("grep expects text, got {}", value))?;
        let key = key.cloned().unwrap_or(Value::Null);
        Ok(text.lines()
            .filter(|line| self.pattern.is_match(line))
            .map(|line| KeyValue::new(key.clone(), line))
            .collect())
    }
}
