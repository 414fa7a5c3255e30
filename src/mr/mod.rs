use serde_json::Value;

pub mod aggregator;
pub mod job;
pub mod master;
pub mod monitor;
pub mod phase;
pub mod rpc;
pub mod session;
pub mod task_store;
pub mod worker;

/// An encoded key or value. The master never looks inside one; it only
/// compares keys byte-wise when grouping.
pub type Datum = Vec<u8>;

pub type TaskId = u64;
pub type ClientId = u64;

/// Global progress stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    Map,
    Shuffle,
    Reduce,
    Done,
}

/// One initial input record, as produced by a reader.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: Option<Datum>,
    pub value: Datum,
}

impl Record {
    pub fn new(key: Option<&Value>, value: &Value) -> Result<Self, serde_json::Error> {
        Ok(Record {
            key: key.map(encode).transpose()?,
            value: encode(value)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: Value,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        KeyValue { key: key.into(), value: value.into() }
    }
}

/// A user map function. Invoked once per map task, on the worker.
pub trait Mapper: Send + Sync {
    fn map(&self, key: Option<&Value>, value: &Value) -> Result<Vec<KeyValue>, anyhow::Error>;
}

/// A user reduce function. Returning `None` drops the key from the results.
pub trait Reducer: Send + Sync {
    fn reduce(&self, key: &Value, values: Vec<Value>) -> Result<Option<Value>, anyhow::Error>;
}

pub fn encode(value: &Value) -> Result<Datum, serde_json::Error> {
    serde_json::to_vec(value)
}

pub fn decode(datum: &[u8]) -> Result<Value, serde_json::Error> {
    serde_json::from_slice(datum)
}
