use clap::Parser;

use imagepipe::cli::{self, Cli, Command};
use imagepipe::logging::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_config = if cli.json_logs {
        LogConfig::production()
    } else {
        LogConfig::default()
    };
    init_logging(log_config)?;

    let pipeline = cli::build_pipeline(&cli);

    match cli.command {
        Command::Fetch { ref url, ref output } => {
            cli::handle_fetch(&pipeline, url, output).await
        }

        Command::Resize {
            ref url,
            width,
            height,
            ref fit,
            ref output,
        } => cli::handle_resize(&pipeline, url, width, height, fit, output).await,

        Command::Batch {
            ref url,
            ref sizes,
            ref fit,
        } => cli::handle_batch(&pipeline, url, sizes.clone(), fit).await,

        Command::Inspect { ref url } => cli::handle_inspect(&pipeline, url).await,
    }
}
