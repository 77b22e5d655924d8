use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
};

use log::{info, warn};

use crate::monitor::Report;

/// The run's log sink, handed to whatever reports on the run.
///
/// Only the lead process emits lines. Every line also goes to the run log file when there is one.
#[derive(Debug)]
pub struct Telemetry {
    rank: usize,
    lead: bool,
    file: Option<File>,
}

impl Telemetry {
    /// Creates a new `Telemetry` that only writes to the process' logger.
    pub fn new(rank: usize, lead: bool) -> Self {
        Self {
            rank,
            lead,
            file: None,
        }
    }

    /// Also appends every line to `path`, if this process is the lead one.
    pub fn attach_log_file<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        if self.lead {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            self.file = Some(file);
        }

        Ok(())
    }

    #[inline]
    pub fn is_lead(&self) -> bool {
        self.lead
    }

    pub fn report(&mut self, report: &Report) {
        if self.lead {
            info!(step = report.step, lr = report.lr, loss = report.loss; "{report}");
            self.append(&report.to_string());
        }
    }

    pub fn checkpoint(&mut self, path: &Path) {
        self.emit(&format!("training done, model saved to: {}", path.display()));
    }

    pub fn evaluating(&mut self) {
        self.emit("evaluating the final model");
    }

    pub fn metric(&mut self, miou: f32) {
        self.emit(&format!("mIOU is: {miou}"));
    }

    pub fn eval_failed(&mut self, reason: &dyn std::error::Error) {
        if self.lead {
            warn!(rank = self.rank; "evaluation failed, the checkpoint is kept: {reason}");
            self.append(&format!("evaluation failed: {reason}"));
        }
    }

    fn emit(&mut self, line: &str) {
        if self.lead {
            info!(rank = self.rank; "{line}");
            self.append(line);
        }
    }

    /// Writes a line to the run log, dropping the file on the first failure.
    fn append(&mut self, line: &str) {
        let Some(file) = &mut self.file else {
            return;
        };

        if let Err(e) = writeln!(file, "{line}") {
            warn!("stopped writing the run log: {e}");
            self.file = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, time::Duration};

    use super::*;

    fn report() -> Report {
        Report {
            step: 5,
            max_steps: 10,
            lr: 0.01,
            loss: 0.5,
            interval: Duration::from_secs(1),
            elapsed: Duration::from_secs(1),
            eta: Duration::from_secs(1),
        }
    }

    #[test]
    fn lead_writes_every_line_to_the_run_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.log");
        let mut telemetry = Telemetry::new(0, true);
        telemetry.attach_log_file(&path).unwrap();

        telemetry.report(&report());
        telemetry.checkpoint(Path::new("res/model_final.safetensors"));
        telemetry.metric(0.75);

        let log = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = log.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("it: 5/10, lr: 0.010000, loss: 0.5000"));
        assert_eq!(lines[1], "training done, model saved to: res/model_final.safetensors");
        assert_eq!(lines[2], "mIOU is: 0.75");
    }

    #[test]
    fn other_ranks_stay_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.log");
        let mut telemetry = Telemetry::new(1, false);
        telemetry.attach_log_file(&path).unwrap();

        telemetry.report(&report());

        assert!(!path.exists());
        assert!(!telemetry.is_lead());
    }
}
