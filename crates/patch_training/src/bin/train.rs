use clap::Parser;
use patch_training::logging::init_tracing;
use patch_training::util::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = TrainArgs::parse();
    run_train(args)?;
    Ok(())
}
