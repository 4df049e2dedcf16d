//! ## vindkanal-cli
//! **Operational entrypoint of the link emulator**
//!
//! `vindkanal run` stands the emulated wire up between two UDP cables
//! and serves the management console; `vindkanal console` attaches an
//! interactive session to a running emulator's socket.

use clap::Parser;

use vindkanal_telemetry::logging::EventLogger;
use vindkanal_telemetry::metrics::MetricsRecorder;

mod commands;

use commands::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    EventLogger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => commands::run_emulator(args, MetricsRecorder::new()),
        Commands::Console(args) => commands::run_console(args),
    }
}
