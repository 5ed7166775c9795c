use std::fmt;
use std::io::IsTerminal;
use std::time::Instant;

use clap::Parser;
use iam_init::config::Args;
use iam_init::lifecycle;
use tracing::error;
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[tokio::main]
async fn main() {
    // --help / --version print and exit 0 here, before any lifecycle work.
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_timer(Elapsed(Instant::now()))
        .with_max_level(args.log_level)
        .with_target(false)
        .init();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration, exiting");
            std::process::exit(lifecycle::EXIT_FAILURE);
        }
    };

    let exit_code = lifecycle::run(config).await;
    std::process::exit(exit_code);
}
