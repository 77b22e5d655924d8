use std::io;

/// The collective primitives a training process relies on.
///
/// All members must call the same sequence of collectives with buffers of the same length,
/// otherwise the group fails with an `InvalidData` error.
#[allow(unused)]
#[trait_variant::make(ProcessGroup: Send)]
pub trait LocalProcessGroup {
    /// Returns this process' ordinal within the group.
    fn rank(&self) -> usize;

    /// Returns the amount of processes in the group.
    fn world_size(&self) -> usize;

    /// Replaces `buf` on every member with the element-wise sum of all members' `buf`.
    ///
    /// # Arguments
    /// * `buf` - This member's contribution, overwritten with the reduced values.
    ///
    /// # Returns
    /// An io error if any member failed, timed out or sent a mismatched buffer.
    async fn all_reduce_sum(&mut self, buf: &mut [f32]) -> io::Result<()>;

    /// Overwrites `buf` on every member with the root's `buf`.
    ///
    /// # Arguments
    /// * `buf` - The values to share on the root, the destination on every other member.
    ///
    /// # Returns
    /// An io error if any member failed, timed out or sent a mismatched buffer.
    async fn broadcast(&mut self, buf: &mut [f32]) -> io::Result<()>;

    /// Waits until every member of the group has reached this call.
    async fn barrier(&mut self) -> io::Result<()>;

    /// Best effort notification to the rest of the group that this member is going down.
    ///
    /// # Arguments
    /// * `reason` - A description of the failure, reported by the peers that receive it.
    async fn abort(&mut self, reason: &str);

    /// Gracefully leaves the group.
    async fn shutdown(self) -> io::Result<()>;
}
