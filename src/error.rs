use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use machine_learning::MlErr;

/// The training run's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// The part of the run a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Config,
    Bootstrap,
    Data,
    Step,
    Sync,
    Persist,
    Eval,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Config => "config",
            Phase::Bootstrap => "bootstrap",
            Phase::Data => "data",
            Phase::Step => "step",
            Phase::Sync => "sync",
            Phase::Persist => "persist",
            Phase::Eval => "eval",
        };

        f.write_str(s)
    }
}

/// Training run failures.
#[derive(Debug)]
pub enum TrainErr {
    Config(String),
    Bootstrap(io::Error),
    Membership(String),
    NoDevice {
        device: usize,
        available: usize,
    },
    Data(MlErr),
    EmptyEpoch {
        epoch: u64,
    },
    Step {
        step: usize,
        source: MlErr,
    },
    NonFinite {
        step: usize,
        what: &'static str,
    },
    Sync {
        op: &'static str,
        source: io::Error,
    },
    Persist {
        path: PathBuf,
        source: MlErr,
    },
    Eval(MlErr),
}

impl TrainErr {
    /// Returns the phase this error aborts.
    pub fn phase(&self) -> Phase {
        match self {
            TrainErr::Config(_) => Phase::Config,
            TrainErr::Bootstrap(_) | TrainErr::Membership(_) | TrainErr::NoDevice { .. } => {
                Phase::Bootstrap
            }
            TrainErr::Data(_) | TrainErr::EmptyEpoch { .. } => Phase::Data,
            TrainErr::Step { .. } | TrainErr::NonFinite { .. } => Phase::Step,
            TrainErr::Sync { .. } => Phase::Sync,
            TrainErr::Persist { .. } => Phase::Persist,
            TrainErr::Eval(_) => Phase::Eval,
        }
    }
}

impl Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Config(detail) => write!(f, "invalid configuration: {detail}"),
            TrainErr::Bootstrap(e) => write!(f, "could not form the process group: {e}"),
            TrainErr::Membership(detail) => write!(f, "invalid group membership: {detail}"),
            TrainErr::NoDevice { device, available } => write!(
                f,
                "device {device} does not exist, there are {available} devices"
            ),
            TrainErr::Data(e) => write!(f, "dataset error: {e}"),
            TrainErr::EmptyEpoch { epoch } => write!(
                f,
                "epoch {epoch} yields no full batch, the partition is smaller than the batch size"
            ),
            TrainErr::Step { step, source } => write!(f, "step {step} failed: {source}"),
            TrainErr::NonFinite { step, what } => {
                write!(f, "non-finite {what} at step {step}")
            }
            TrainErr::Sync { op, source } => write!(f, "{op} failed: {source}"),
            TrainErr::Persist { path, source } => {
                write!(f, "could not write {}: {source}", path.display())
            }
            TrainErr::Eval(e) => write!(f, "evaluation failed: {e}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Bootstrap(e) | TrainErr::Sync { source: e, .. } => Some(e),
            TrainErr::Data(e)
            | TrainErr::Step { source: e, .. }
            | TrainErr::Persist { source: e, .. }
            | TrainErr::Eval(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_name_the_failing_part() {
        let sync = TrainErr::Sync {
            op: "gradient all-reduce",
            source: io::Error::new(io::ErrorKind::TimedOut, "too slow"),
        };
        let persist = TrainErr::Persist {
            path: "res/model_final.safetensors".into(),
            source: MlErr::EmptyDataset,
        };

        assert_eq!(sync.phase().to_string(), "sync");
        assert_eq!(persist.phase(), Phase::Persist);
        assert_eq!(TrainErr::EmptyEpoch { epoch: 3 }.phase(), Phase::Data);
        assert!(sync.source().is_some());
    }
}
