use std::{env, thread};

use comms::group::{self, NetGroup};
use log::info;

use crate::{
    config::TrainConfig,
    error::{Result, TrainErr},
};

const WORLD_SIZE_VAR: &str = "WORLD_SIZE";
const DEVICE_COUNT_VAR: &str = "DEVICE_COUNT";

/// The compute device a process is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    pub id: usize,
}

/// Who this process is within the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedContext {
    rank: usize,
    world_size: usize,
    device: Device,
}

impl DistributedContext {
    /// Creates a new `DistributedContext`, binding the process to the device indexed by its rank.
    ///
    /// # Arguments
    /// * `rank` - This process' rank.
    /// * `world_size` - The amount of processes in the job.
    /// * `devices` - The amount of devices on this host.
    ///
    /// # Returns
    /// An error if the rank is out of range or its device doesn't exist.
    pub fn new(rank: usize, world_size: usize, devices: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(TrainErr::Membership("the world size must be positive".into()));
        }

        if rank >= world_size {
            return Err(TrainErr::Membership(format!(
                "rank {rank} is out of range for a world of {world_size}"
            )));
        }

        if rank >= devices {
            return Err(TrainErr::NoDevice {
                device: rank,
                available: devices,
            });
        }

        Ok(Self {
            rank,
            world_size,
            device: Device { id: rank },
        })
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Whether this process reports progress and owns the final checkpoint.
    #[inline]
    pub fn is_lead(&self) -> bool {
        self.rank == 0
    }

    /// Whether the parameters are replicated across processes.
    #[inline]
    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }
}

/// Turns the launcher's process ordinal into a rank, negative values meaning the process was
/// not launched as part of a group.
pub fn parse_local_rank(local_rank: i64) -> Result<usize> {
    usize::try_from(local_rank).map_err(|_| {
        TrainErr::Config(format!(
            "--local-rank {local_rank} means this process is not part of a distributed launch"
        ))
    })
}

/// Returns the amount of devices on this host, `lookup` reading the environment.
pub fn device_count<F>(lookup: F) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(DEVICE_COUNT_VAR) {
        Some(count) => parse_count(DEVICE_COUNT_VAR, &count),
        None => Ok(thread::available_parallelism().map_or(1, |n| n.get())),
    }
}

/// Returns the amount of processes in the job, one per device unless the launcher says otherwise.
pub fn world_size<F>(lookup: F) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(WORLD_SIZE_VAR) {
        Some(size) => parse_count(WORLD_SIZE_VAR, &size),
        None => device_count(lookup),
    }
}

fn parse_count(var: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(TrainErr::Membership(format!(
            "{var} must be a positive integer, got {value:?}"
        ))),
    }
}

/// Establishes this process' place in the job and joins the group at the rendezvous address.
///
/// # Arguments
/// * `local_rank` - The ordinal given by the launcher.
/// * `cfg` - The run's configuration.
///
/// # Returns
/// The context and the group membership, or an error if any process can't join in time.
pub async fn establish(
    local_rank: i64,
    cfg: &TrainConfig,
) -> Result<(DistributedContext, NetGroup)> {
    let lookup = |var: &str| env::var(var).ok();

    let rank = parse_local_rank(local_rank)?;
    let world_size = world_size(lookup)?;
    let devices = device_count(lookup)?;
    let ctx = DistributedContext::new(rank, world_size, devices)?;

    let group = group::rendezvous(
        cfg.rendezvous,
        rank,
        world_size,
        cfg.rendezvous_timeout,
        cfg.collective_timeout,
    )
    .await
    .map_err(TrainErr::Bootstrap)?;

    info!(rank = rank, world_size = world_size, device = ctx.device.id; "joined the group");
    Ok((ctx, group))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::Phase;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |var| vars.get(var).cloned()
    }

    #[test]
    fn negative_local_rank_is_a_config_error() {
        let err = parse_local_rank(-1).unwrap_err();
        assert_eq!(err.phase(), Phase::Config);
        assert_eq!(parse_local_rank(3).unwrap(), 3);
    }

    #[test]
    fn world_size_prefers_the_launcher() {
        let lookup = env(&[("WORLD_SIZE", "2"), ("DEVICE_COUNT", "8")]);
        assert_eq!(world_size(lookup).unwrap(), 2);
    }

    #[test]
    fn world_size_falls_back_to_the_devices() {
        let lookup = env(&[("DEVICE_COUNT", "3")]);
        assert_eq!(world_size(lookup).unwrap(), 3);
    }

    #[test]
    fn malformed_counts_are_rejected() {
        assert!(world_size(env(&[("WORLD_SIZE", "zero")])).is_err());
        assert!(world_size(env(&[("WORLD_SIZE", "0")])).is_err());
    }

    #[test]
    fn rank_must_be_in_range_and_have_a_device() {
        let err = DistributedContext::new(2, 2, 4).unwrap_err();
        assert!(matches!(err, TrainErr::Membership(_)));

        let err = DistributedContext::new(1, 2, 1).unwrap_err();
        assert_eq!(err.phase(), Phase::Bootstrap);

        let ctx = DistributedContext::new(1, 2, 2).unwrap();
        assert_eq!(ctx.device().id, 1);
        assert!(!ctx.is_lead());
        assert!(ctx.is_distributed());
    }
}
