use std::io;

use comms::ProcessGroup;
use log::{debug, warn};
use machine_learning::arch::{Model, Network};

/// The trainable parameters of this process, either a replica kept in agreement with the rest of
/// the group or a network trained on its own.
pub enum ModelHandle<M: Model, G: ProcessGroup> {
    Replicated { net: Network<M>, group: G },
    Bare(Network<M>),
}

impl<M, G> ModelHandle<M, G>
where
    M: Model,
    G: ProcessGroup,
{
    /// Wraps `net` as a replica, overwriting its parameters with rank 0's so every replica
    /// starts identical.
    ///
    /// # Returns
    /// An io error if the broadcast fails.
    pub async fn replicate(mut net: Network<M>, mut group: G) -> io::Result<Self> {
        group.broadcast(net.params_mut()).await?;
        debug!(rank = group.rank(), size = net.size(); "replica in agreement with rank 0");
        Ok(Self::Replicated { net, group })
    }

    pub fn bare(net: Network<M>) -> Self {
        Self::Bare(net)
    }

    pub fn is_replicated(&self) -> bool {
        matches!(self, Self::Replicated { .. })
    }

    pub fn net(&self) -> &Network<M> {
        match self {
            Self::Replicated { net, .. } | Self::Bare(net) => net,
        }
    }

    pub fn net_mut(&mut self) -> &mut Network<M> {
        match self {
            Self::Replicated { net, .. } | Self::Bare(net) => net,
        }
    }

    /// Replaces the local gradient with the mean gradient of the group.
    pub async fn sync_gradients(&mut self) -> io::Result<()> {
        let Self::Replicated { net, group } = self else {
            return Ok(());
        };

        let scale = 1.0 / group.world_size() as f32;
        let grad = net.grad_mut();

        group.all_reduce_sum(grad).await?;
        grad.iter_mut().for_each(|g| *g *= scale);
        Ok(())
    }

    /// Waits for every replica to get here.
    pub async fn barrier(&mut self) -> io::Result<()> {
        match self {
            Self::Replicated { group, .. } => group.barrier().await,
            Self::Bare(_) => Ok(()),
        }
    }

    /// Tells the rest of the group this process is giving up.
    pub async fn abort(&mut self, reason: &str) {
        if let Self::Replicated { group, .. } = self {
            group.abort(reason).await;
        }
    }

    /// Unwraps the handle into the underlying network, leaving the group cleanly.
    pub async fn into_inner(self) -> Network<M> {
        match self {
            Self::Replicated { net, group } => {
                if let Err(e) = group.shutdown().await {
                    warn!("failed to leave the group: {e}");
                }
                net
            }
            Self::Bare(net) => net,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use comms::group::{self, LocalGroup};
    use machine_learning::arch::{Sequential, layers::Layer};

    use super::*;

    fn net(params: Vec<f32>) -> Network<Sequential> {
        Network::new(Sequential::new([Layer::dense((1, 1), None)]), params).unwrap()
    }

    fn pair() -> (LocalGroup, LocalGroup) {
        let mut members = group::local(2, Duration::from_secs(5)).unwrap();
        let g1 = members.pop().unwrap();
        let g0 = members.pop().unwrap();
        (g0, g1)
    }

    #[tokio::test]
    async fn replicas_start_from_rank_zero() {
        let (g0, g1) = pair();

        let (h0, h1) = tokio::join!(
            ModelHandle::replicate(net(vec![1.0, 2.0]), g0),
            ModelHandle::replicate(net(vec![7.0, 7.0]), g1),
        );

        assert_eq!(h1.unwrap().net().params(), [1.0, 2.0]);
        assert!(h0.unwrap().is_replicated());
    }

    #[tokio::test]
    async fn gradients_are_averaged() {
        let (g0, g1) = pair();
        let (h0, h1) = tokio::join!(
            ModelHandle::replicate(net(vec![0.0, 0.0]), g0),
            ModelHandle::replicate(net(vec![0.0, 0.0]), g1),
        );
        let (mut h0, mut h1) = (h0.unwrap(), h1.unwrap());

        h0.net_mut().grad_mut().copy_from_slice(&[1.0, 4.0]);
        h1.net_mut().grad_mut().copy_from_slice(&[3.0, 0.0]);

        let (r0, r1) = tokio::join!(h0.sync_gradients(), h1.sync_gradients());
        r0.unwrap();
        r1.unwrap();

        assert_eq!(h0.net().grad(), [2.0, 2.0]);
        assert_eq!(h1.net().grad(), [2.0, 2.0]);
    }

    #[tokio::test]
    async fn bare_handle_leaves_the_gradient_alone() {
        let mut handle: ModelHandle<Sequential, LocalGroup> = ModelHandle::bare(net(vec![0.0, 0.0]));
        handle.net_mut().grad_mut().copy_from_slice(&[1.0, 4.0]);

        handle.sync_gradients().await.unwrap();
        handle.barrier().await.unwrap();

        assert!(!handle.is_replicated());
        assert_eq!(handle.into_inner().await.grad(), [1.0, 4.0]);
    }
}
