use serde_json::Value;

use crate::mr::{KeyValue, Mapper, Reducer};

/// Passes each record through unchanged. Keyless records get a null key.
pub struct IdentityMapper;

impl Mapper for IdentityMapper {
    fn map(&self, key: Option<&Value>, value: &Value) -> Result<Vec<KeyValue>, anyhow::Error> {
        Ok(vec![KeyValue::new(key.cloned().unwrap_or(Value::Null), value.clone())])
    }
}

/// Numeric sum. Stays an integer while every value is one.
pub struct Sum;

impl Reducer for Sum {
    fn reduce(&self, key: &Value, values: Vec<Value>) -> Result<Option<Value>, anyhow::Error> {
        if let Some(ints) = values.iter().map(Value::as_i64).collect::<Option<Vec<_>>>() {
            let total = ints.into_iter()
                .try_fold(0i64, i64::checked_add)
                .ok_or_else(|| anyhow::anyhow!("sum for {} overflows", key))?;
            return Ok(Some(total.into()));
        }
        let mut total = 0.0;
        for value in &values {
            total += value.as_f64()
                .ok_or_else(|| anyhow::anyhow!("cannot sum {} for key {}", value, key))?;
        }
        Ok(Some(total.into()))
    }
}

pub struct Count;

impl Reducer for Count {
    fn reduce(&self, _key: &Value, values: Vec<Value>) -> Result<Option<Value>, anyhow::Error> {
        Ok(Some(values.len().into()))
    }
}

/// The whole value list.
pub struct IdentityReducer;

impl Reducer for IdentityReducer {
    fn reduce(&self, _key: &Value, values: Vec<Value>) -> Result<Option<Value>, anyhow::Error> {
        Ok(Some(Value::Array(values)))
    }
}

pub struct First;

impl Reducer for First {
    fn reduce(&self, _key: &Value, values: Vec<Value>) -> Result<Option<Value>, anyhow::Error> {
        Ok(values.into_iter().next())
    }
}

/// Emits nothing; the key is left out of the results.
pub struct NoPass;

impl Reducer for NoPass {
    fn reduce(&self, _key: &Value, _values: Vec<Value>) -> Result<Option<Value>, anyhow::Error> {
        Ok(None)
    }
}
