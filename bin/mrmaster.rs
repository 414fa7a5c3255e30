use batchmr::{config::{IoConfig, MasterConfig}, mr, util};
use clap::Parser;

#[derive(Parser)]
#[command(name = "mrmaster", about = "Serve one mapreduce job to remote workers")]
struct Args {
    #[command(flatten)]
    master: MasterConfig,
    #[command(flatten)]
    io: IoConfig,
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    util::init_logging(&args.log_level);

    let records = args.io.read_records()?;
    let mut writer = args.io.writer()?;
    let results = mr::master::Master::new(args.master).run(records).await?;
    let written = writer.write(results)?;
    log::info!("Wrote {} results", written);
    Ok(())
}
