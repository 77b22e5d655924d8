use serde::{Deserialize, Serialize};

/// Wire-level membership request sent by every non-root process during rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub rank: usize,
    pub world_size: usize,
}
