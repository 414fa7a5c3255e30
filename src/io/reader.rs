use std::path::PathBuf;

use serde_json::{Value, json};

use crate::mr::Record;

/// Turns the `--input` string into the job's initial records.
pub trait Reader {
    fn read(&self, input: &str) -> Result<Vec<Record>, anyhow::Error>;
}

pub fn get_reader(name: &str) -> Result<Box<dyn Reader>, anyhow::Error> {
    match name {
        "files" => Ok(Box::new(Files)),
        "lines" => Ok(Box::new(Lines)),
        "range" => Ok(Box::new(Range)),
        _ => Err(anyhow::anyhow!("Unknown reader: {}", name)),
    }
}

/// One record per matching file: `(index, file name)`.
pub struct Files;

impl Reader for Files {
    fn read(&self, input: &str) -> Result<Vec<Record>, anyhow::Error> {
        let records = expand(input)?.iter().enumerate()
            .map(|(i, path)| Record::new(Some(&json!(i)), &json!(path.to_string_lossy())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

/// One record per line of every matching file: `("file:index", trimmed line)`.
pub struct Lines;

impl Reader for Lines {
    fn read(&self, input: &str) -> Result<Vec<Record>, anyhow::Error> {
        let mut records = vec![];
        for path in expand(input)? {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;
            for (i, line) in contents.lines().enumerate() {
                let key = Value::String(format!("{}:{}", path.display(), i));
                records.push(Record::new(Some(&key), &json!(line.trim()))?);
            }
        }
        Ok(records)
    }
}

/// `(i, i)` for `i` in `0..n`.
pub struct Range;

impl Reader for Range {
    fn read(&self, input: &str) -> Result<Vec<Record>, anyhow::Error> {
        let n = match input.trim().parse::<i64>() {
            Ok(n) if n < 0 => {
                log::error!("Range reader got negative count {}, reading nothing", n);
                0
            }
            Ok(n) => n,
            Err(e) => {
                log::error!("Range reader expects an integer, got {:?}: {}", input, e);
                0
            }
        };
        let records = (0..n)
            .map(|i| Record::new(Some(&json!(i)), &json!(i)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

/// Sorted paths matching a glob pattern.
fn expand(pattern: &str) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut paths = glob::glob(pattern)?
        .collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    if paths.is_empty() {
        log::warn!("No input files match {:?}", pattern);
    }
    Ok(paths)
}
