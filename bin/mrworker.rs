use batchmr::{config::WorkerConfig, mr, util};
use clap::Parser;

#[derive(Parser)]
#[command(name = "mrworker", about = "Run map and reduce tasks for a master")]
struct Args {
    #[command(flatten)]
    worker: WorkerConfig,
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    util::init_logging(&args.log_level);

    let worker = mr::worker::Worker::from_config(args.worker)?;
    let stats = worker.run().await?;
    log::info!("{} map and {} reduce tasks done", stats.maps, stats.reduces);
    Ok(())
}
