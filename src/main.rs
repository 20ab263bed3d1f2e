use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::debug;

use shardcluster::cli::SubCommandExtend;
use shardcluster::config::{Opts, SubCommand};

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    rayon::ThreadPoolBuilder::new().num_threads(opts.threads).build_global()?;
    debug!("使用 {} 个线程", opts.threads);

    match &opts.subcmd {
        SubCommand::Matrix(config) => config.run(&opts),
        SubCommand::Cluster(config) => config.run(&opts),
        SubCommand::Evaluate(config) => config.run(&opts),
        SubCommand::Restore(config) => config.run(&opts),
    }
}
