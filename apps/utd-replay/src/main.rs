mod config;
mod logging;
mod replay;

use std::process::ExitCode;

use config::{ReplayConfig, ReplayInput};
use replay::{ReplayError, ReplaySummary, run_replay};
use tokio::{fs::File, io::BufReader};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting utd-replay");

    let config = match ReplayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "replay config invalid");
            return ExitCode::FAILURE;
        }
    };

    match replay_input(&config).await {
        Ok(summary) => {
            info!(
                observed = summary.observed,
                malformed = summary.malformed,
                reported = summary.reported,
                "replay finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "replay failed");
            ExitCode::FAILURE
        }
    }
}

async fn replay_input(config: &ReplayConfig) -> Result<ReplaySummary, ReplayError> {
    let stdout = tokio::io::stdout();
    match &config.input {
        ReplayInput::Stdin => run_replay(config, BufReader::new(tokio::io::stdin()), stdout).await,
        ReplayInput::File(path) => {
            let file = File::open(path).await?;
            run_replay(config, BufReader::new(file), stdout).await
        }
    }
}
