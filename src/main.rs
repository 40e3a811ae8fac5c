use std::io::IsTerminal;
use std::process::exit;

use clap::{ColorChoice, Parser};
use topic_atlas::cli::{Cli, GetVerbosity};
use topic_atlas::logging;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let ansi = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stderr().is_terminal(),
    };
    logging::setup_logger(cli.cmd.get_verbosity().tracing_level_filter(), ansi);

    if let Err(e) = cli.cmd.run().await {
        error!("{}", e);
        exit(1);
    }
}
