use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    num::NonZeroUsize,
    path::PathBuf,
    time::Duration,
};

use machine_learning::optimization::ScheduleParams;

use crate::error::{Result, TrainErr};

/// The address every process meets at to form the group.
pub const RENDEZVOUS_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 32168));

const TRAIN_SET: &str = "train.safetensors";
const VAL_SET: &str = "val.safetensors";
const CHECKPOINT: &str = "model_final.safetensors";
const RUN_LOG: &str = "train.log";

/// Process-wide constants of a training run.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub n_classes: usize,
    pub batch_size: usize,
    /// Threads gathering batches.
    pub n_workers: usize,
    /// Width of a sample, the model's input.
    pub crop_size: usize,
    pub hidden: usize,
    pub report_interval: usize,
    pub schedule: ScheduleParams,
    pub ignore_index: usize,
    pub ohem_thresh: f32,
    pub seed: u64,
    pub rendezvous: SocketAddr,
    pub rendezvous_timeout: Duration,
    pub collective_timeout: Duration,
    pub result_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            n_classes: 19,
            batch_size: 4,
            n_workers: 4,
            crop_size: 768,
            hidden: 256,
            report_interval: 50,
            schedule: ScheduleParams {
                base_lr: 1e-2,
                momentum: 0.9,
                weight_decay: 5e-4,
                warmup_steps: 1000,
                warmup_start_lr: 5e-6,
                max_steps: 41000,
                power: 0.9,
            },
            ignore_index: 255,
            ohem_thresh: 0.7,
            seed: 0,
            rendezvous: RENDEZVOUS_ADDR,
            rendezvous_timeout: Duration::from_secs(60),
            collective_timeout: Duration::from_secs(300),
            result_dir: PathBuf::from("./res"),
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl TrainConfig {
    /// Checks that the configuration describes a runnable job.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("n_classes", self.n_classes),
            ("batch_size", self.batch_size),
            ("n_workers", self.n_workers),
            ("crop_size", self.crop_size),
            ("hidden", self.hidden),
            ("report_interval", self.report_interval),
        ];

        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(TrainErr::Config(format!("{name} must be positive")));
        }

        if !(self.ohem_thresh > 0.0 && self.ohem_thresh <= 1.0) {
            return Err(TrainErr::Config(format!(
                "ohem_thresh must be in (0, 1], got {}",
                self.ohem_thresh
            )));
        }

        if self.ignore_index < self.n_classes {
            return Err(TrainErr::Config(format!(
                "ignore_index {} collides with a class",
                self.ignore_index
            )));
        }

        self.schedule
            .validate()
            .map_err(|e| TrainErr::Config(e.to_string()))
    }

    #[inline]
    pub fn max_steps(&self) -> usize {
        self.schedule.max_steps
    }

    pub fn batch_size(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.batch_size)
            .ok_or_else(|| TrainErr::Config("batch_size must be positive".into()))
    }

    pub fn n_workers(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.n_workers)
            .ok_or_else(|| TrainErr::Config("n_workers must be positive".into()))
    }

    /// The least amount of samples the hard example mining keeps per batch.
    pub fn min_kept(&self) -> usize {
        (self.batch_size / 2).max(1)
    }

    pub fn train_path(&self) -> PathBuf {
        self.data_dir.join(TRAIN_SET)
    }

    pub fn val_path(&self) -> PathBuf {
        self.data_dir.join(VAL_SET)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.result_dir.join(CHECKPOINT)
    }

    pub fn log_path(&self) -> PathBuf {
        self.result_dir.join(RUN_LOG)
    }
}
