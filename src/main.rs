use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use lockstep::{TrainConfig, TrainErr};

/// Trains one replica of the model as part of a distributed job.
#[derive(Debug, Parser)]
#[command(name = "train", version)]
struct Args {
    /// This process' ordinal within the job, set by the launcher.
    #[arg(long = "local-rank", default_value_t = -1, allow_negative_numbers = true)]
    local_rank: i64,
}

/// The line a fatal error is reported with, naming the phase that failed.
fn failure_line(e: &TrainErr) -> String {
    format!("training failed during {}: {e}", e.phase())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match lockstep::run(TrainConfig::default(), args.local_rank).await {
        Ok(summary) => {
            info!(rank = summary.rank, steps = summary.steps; "wrapping up");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", failure_line(&e));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_rank_defaults_to_the_sentinel() {
        let args = Args::try_parse_from(["train"]).unwrap();
        assert_eq!(args.local_rank, -1);
    }

    #[test]
    fn local_rank_is_parsed() {
        let args = Args::try_parse_from(["train", "--local-rank", "3"]).unwrap();
        assert_eq!(args.local_rank, 3);
    }

    #[test]
    fn failure_line_names_the_phase() {
        let err = TrainErr::Config("no rank".into());

        assert_eq!(
            failure_line(&err),
            "training failed during config: invalid configuration: no rank"
        );
    }
}
