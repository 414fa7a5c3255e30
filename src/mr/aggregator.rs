use std::collections::{BTreeMap, btree_map};

use serde_json::Value;

use super::{Datum, decode};

/// Map outputs grouped by key; the shuffle's input.
pub type Grouped = BTreeMap<Datum, Vec<Datum>>;

/// Collects map emissions (grouped by key) and reduce outputs.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    grouped: Grouped,
    results: BTreeMap<Datum, Datum>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_map_output(&mut self, key: Datum, value: Datum) {
        self.grouped.entry(key).or_default().push(value);
    }

    /// Hands the grouped mapping over and leaves an empty one behind.
    pub fn drain_grouped(&mut self) -> Grouped {
        std::mem::take(&mut self.grouped)
    }

    pub fn record_reduce_output(&mut self, key: Datum, value: Datum) {
        if self.results.insert(key, value).is_some() {
            log::debug!("Reduce output overwritten for an existing key");
        }
    }

    pub fn final_results(&self) -> impl Iterator<Item = (&Datum, &Datum)> {
        self.results.iter()
    }

    pub fn take_final(&mut self) -> FinalResults {
        FinalResults { entries: std::mem::take(&mut self.results) }
    }
}

/// The reduce outputs of a finished job, ordered by encoded key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalResults {
    entries: BTreeMap<Datum, Datum>,
}

impl FinalResults {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        let key = super::encode(key).ok()?;
        self.entries.get(&key).and_then(|v| decode(v).ok())
    }

    /// Lazily decodes every entry, skipping (and logging) undecodable ones.
    pub fn into_values(self) -> impl Iterator<Item = (Value, Value)> {
        self.entries.into_iter().filter_map(|(k, v)| match (decode(&k), decode(&v)) {
            (Ok(k), Ok(v)) => Some((k, v)),
            _ => {
                log::warn!("Skipping undecodable result entry");
                None
            }
        })
    }
}

impl IntoIterator for FinalResults {
    type Item = (Datum, Datum);
    type IntoIter = btree_map::IntoIter<Datum, Datum>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(Datum, Datum)> for FinalResults {
    fn from_iter<T: IntoIterator<Item = (Datum, Datum)>>(iter: T) -> Self {
        FinalResults { entries: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Datum {
        s.as_bytes().to_vec()
    }

    #[test]
    fn groups_in_arrival_order_with_duplicates() {
        let mut agg = ResultAggregator::new();
        agg.record_map_output(d("a"), d("1"));
        agg.record_map_output(d("b"), d("2"));
        agg.record_map_output(d("a"), d("3"));
        agg.record_map_output(d("a"), d("1"));

        let grouped = agg.drain_grouped();
        assert_eq!(grouped[&d("a")], vec![d("1"), d("3"), d("1")]);
        assert_eq!(grouped[&d("b")], vec![d("2")]);
        assert!(agg.drain_grouped().is_empty(), "drain must clear the mapping");
    }

    #[test]
    fn reduce_output_overwrite_is_idempotent() {
        let mut agg = ResultAggregator::new();
        agg.record_reduce_output(d("a"), d("2"));
        agg.record_reduce_output(d("a"), d("2"));
        assert_eq!(agg.final_results().count(), 1);

        let results = agg.take_final();
        assert_eq!(results.into_iter().collect::<Vec<_>>(), vec![(d("a"), d("2"))]);
    }

    #[test]
    fn final_results_decode_lazily() {
        let results: FinalResults = vec![
            (d("\"a\""), d("2")),
            (d("not json"), d("1")),
        ].into_iter().collect();
        assert_eq!(results.get(&Value::from("a")), Some(Value::from(2)));

        let decoded: Vec<_> = results.into_values().collect();
        assert_eq!(decoded, vec![(Value::from("a"), Value::from(2))]);
    }
}
