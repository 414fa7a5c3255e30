use std::{fs::File, io::{self, BufWriter, Write}, path::PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::mr::aggregator::FinalResults;

/// Delivers the final results of a job. Returns how many entries were written.
pub trait Writer {
    fn write(&mut self, results: FinalResults) -> Result<usize, anyhow::Error>;
}

pub fn get_writer(name: &str, output: Option<PathBuf>) -> Result<Box<dyn Writer>, anyhow::Error> {
    let create = |output: Option<PathBuf>| -> Result<BufWriter<File>, anyhow::Error> {
        let path = output.ok_or_else(|| anyhow::anyhow!("the {} writer needs --output", name))?;
        let file = File::create(&path)
            .map_err(|e| anyhow::anyhow!("creating {}: {}", path.display(), e))?;
        Ok(BufWriter::new(file))
    };
    match name {
        "console" => Ok(Box::new(Lines(io::stdout()))),
        "file" => Ok(Box::new(Lines(create(output)?))),
        "jsonl" => Ok(Box::new(JsonLines(create(output)?))),
        _ => Err(anyhow::anyhow!("Unknown writer: {}", name)),
    }
}

/// `key : value` per line.
pub struct Lines<W>(pub W);

impl<W: Write> Writer for Lines<W> {
    fn write(&mut self, results: FinalResults) -> Result<usize, anyhow::Error> {
        let mut n = 0;
        for (key, value) in results.into_values() {
            writeln!(self.0, "{} : {}", key, value)?;
            n += 1;
        }
        self.0.flush()?;
        Ok(n)
    }
}

#[derive(Serialize)]
struct Entry {
    key: Value,
    value: Value,
}

/// One `{"key": .., "value": ..}` object per line.
pub struct JsonLines<W>(pub W);

impl<W: Write> Writer for JsonLines<W> {
    fn write(&mut self, results: FinalResults) -> Result<usize, anyhow::Error> {
        let mut n = 0;
        for (key, value) in results.into_values() {
            serde_json::to_writer(&mut self.0, &Entry { key, value })?;
            self.0.write_all(b"\n")?;
            n += 1;
        }
        self.0.flush()?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use crate::mr::encode;
    use serde_json::json;

    use super::*;

    fn results() -> FinalResults {
        [(json!("a"), json!(2)), (json!("b"), json!([1, "x"]))].iter()
            .map(|(k, v)| (encode(k).unwrap(), encode(v).unwrap()))
            .collect()
    }

    #[test]
    fn line_format() {
        let mut writer = Lines(Vec::new());
        assert_eq!(writer.write(results()).unwrap(), 2);
        assert_eq!(String::from_utf8(writer.0).unwrap(), "\"a\" : 2\n\"b\" : [1,\"x\"]\n");
    }

    #[test]
    fn jsonl_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        get_writer("jsonl", Some(path.clone())).unwrap().write(results()).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let rows: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(rows, vec![json!({"key": "a", "value": 2}), json!({"key": "b", "value": [1, "x"]})]);
    }

    #[test]
    fn file_writers_need_a_path() {
        assert!(get_writer("file", None).is_err());
        assert!(get_writer("jsonl", None).is_err());
        assert!(get_writer("console", None).is_ok());
        assert!(get_writer("xml", None).is_err());
    }
}
