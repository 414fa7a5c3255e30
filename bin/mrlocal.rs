use batchmr::{config::{IoConfig, MasterConfig, WorkerConfig}, mrrt, util};
use clap::Parser;

#[derive(Parser)]
#[command(name = "mrlocal", about = "Run a master and its workers in one process")]
struct Args {
    #[command(flatten)]
    master: MasterConfig,
    #[command(flatten)]
    io: IoConfig,
    #[arg(long, default_value = "wc")]
    mapper: String,
    #[arg(long, default_value = "sum")]
    reducer: String,
    #[arg(long, default_value_t = 4)]
    num_clients: usize,
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    util::init_logging(&args.log_level);

    let worker = WorkerConfig { mapper: args.mapper, reducer: args.reducer, ..WorkerConfig::default() };
    let records = args.io.read_records()?;
    let mut writer = args.io.writer()?;
    let (results, stats) = mrrt::local::run(args.master, worker, args.num_clients, records).await?;
    for s in &stats {
        log::debug!("{:?}", s);
    }
    writer.write(results)?;
    Ok(())
}
