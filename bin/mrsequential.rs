use batchmr::{config::IoConfig, mrapps, mrrt, util};
use clap::Parser;

#[derive(Parser)]
#[command(name = "mrsequential", about = "Run a mapreduce job in-process without a master")]
struct Args {
    #[command(flatten)]
    io: IoConfig,
    #[arg(long, default_value = "wc")]
    mapper: String,
    #[arg(long, default_value = "sum")]
    reducer: String,
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();
    util::init_logging(&args.log_level);

    let mapper = mrapps::get_mapper(&args.mapper)?;
    let reducer = mrapps::get_reducer(&args.reducer)?;
    let records = args.io.read_records()?;
    let mut writer = args.io.writer()?;
    let results = mrrt::sequential::run(&*mapper, &*reducer, records)?;
    writer.write(results)?;
    Ok(())
}
