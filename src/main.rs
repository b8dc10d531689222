use clap::Parser;
use color_eyre::Result;
use rcon_telemetry::{
    init_errors,
    init_logging,
    App,
    Args,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_errors()?;
    let args = Args::parse();
    init_logging(args.debug)?;
    App::new(args)?.run().await
}
