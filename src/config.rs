use std::{path::PathBuf, time::Duration};

use clap::Args;

use crate::{
    io::{reader, writer},
    mr::{Record, rpc::{DEFAULT_ADDRESS, MasterAddr}},
};

#[derive(Debug, Clone, Args)]
pub struct MasterConfig {
    /// `host:port`, or `unix:/path/to/socket`
    #[arg(long, default_value = DEFAULT_ADDRESS)]
    pub address: MasterAddr,
    /// How long a client may hold a task before it is given to someone else
    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
    pub timeout: Duration,
    /// Period of the stale-assignment sweep and phase check
    #[arg(long, value_parser = parse_period, default_value = "1s")]
    pub poll_interval: Duration,
    /// Log progress every this many percent of a phase
    #[arg(long, default_value_t = 10)]
    pub report_interval: u32,
    /// How long to keep serving after the job is done so clients can leave
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    pub linger: Duration,
    #[arg(long)]
    pub password: Option<String>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            address: MasterAddr::default(),
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            report_interval: 10,
            linger: Duration::from_secs(5),
            password: None,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct WorkerConfig {
    #[arg(long, default_value = DEFAULT_ADDRESS)]
    pub address: MasterAddr,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long, default_value = "wc")]
    pub mapper: String,
    #[arg(long, default_value = "sum")]
    pub reducer: String,
    /// Pause before polling again after WAIT or PHASE_DONE
    #[arg(long, value_parser = humantime::parse_duration, default_value = "200ms")]
    pub backoff: Duration,
    /// Give up connecting to the master after this long
    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
    pub connect_timeout: Duration,
    /// Shown in the master's logs
    #[arg(long)]
    pub name: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            address: MasterAddr::default(),
            password: None,
            mapper: "wc".to_string(),
            reducer: "sum".to_string(),
            backoff: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(60),
            name: None,
        }
    }
}

/// A duration that must not be zero.
fn parse_period(s: &str) -> Result<Duration, String> {
    match humantime::parse_duration(s) {
        Ok(d) if d.is_zero() => Err("must be greater than zero".to_string()),
        Ok(d) => Ok(d),
        Err(e) => Err(e.to_string()),
    }
}

/// Where records come from and where results go.
#[derive(Debug, Clone, Args)]
pub struct IoConfig {
    #[arg(long, default_value = "files")]
    pub reader: String,
    /// Passed to the reader: a glob pattern, or a count for `range`
    #[arg(long, default_value = "")]
    pub input: String,
    #[arg(long, default_value = "console")]
    pub writer: String,
    #[arg(long)]
    pub output: Option<PathBuf>,
}

impl IoConfig {
    pub fn read_records(&self) -> Result<Vec<Record>, anyhow::Error> {
        reader::get_reader(&self.reader)?.read(&self.input)
    }

    pub fn writer(&self) -> Result<Box<dyn writer::Writer>, anyhow::Error> {
        writer::get_writer(&self.writer, self.output.clone())
    }
}
