use crate::mr::{
    Mapper, Record, Reducer,
    aggregator::{FinalResults, ResultAggregator},
    decode, encode,
};

/// Map, group and reduce in-process, with no master and no network.
/// Gives the same results as a distributed run of the same functions.
pub fn run(mapper: &dyn Mapper, reducer: &dyn Reducer, records: Vec<Record>) -> Result<FinalResults, anyhow::Error> {
    let mut aggregator = ResultAggregator::new();
    for record in records {
        let key = record.key.as_deref().map(decode).transpose()?;
        for kv in mapper.map(key.as_ref(), &decode(&record.value)?)? {
            aggregator.record_map_output(encode(&kv.key)?, encode(&kv.value)?);
        }
    }

    for (key, values) in aggregator.drain_grouped() {
        let values = values.iter().map(|v| decode(v)).collect::<Result<Vec<_>, _>>()?;
        if let Some(output) = reducer.reduce(&decode(&key)?, values)? {
            aggregator.record_reduce_output(key, encode(&output)?);
        }
    }
    Ok(aggregator.take_final())
}
