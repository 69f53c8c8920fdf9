use crate::Result;

/// A fixed group of processes able to synchronize and exchange values.
///
/// Every member must call the same operations in the same order, the calls
/// block until all the members arrived.
#[allow(unused)]
#[trait_variant::make(Collective: Send)]
pub trait LocalCollective {
    /// The identity of this member, in `0..world_size`.
    fn rank(&self) -> usize;

    /// The amount of members in the group.
    fn world_size(&self) -> usize;

    /// Waits until every member has reached this same barrier.
    ///
    /// # Returns
    /// An error if a member fails to arrive or arrives at a different barrier.
    async fn barrier(&mut self) -> Result<()>;

    /// Shares `values` with every member.
    ///
    /// # Arguments
    /// * `values` - This member's contribution, may differ in length from the others.
    ///
    /// # Returns
    /// Every member's contribution indexed by rank, identical on every member.
    async fn all_gather(&mut self, values: &[f32]) -> Result<Vec<Vec<f32>>>;

    /// Releases the group once every member has agreed to leave it.
    ///
    /// Consuming the group means it can't be torn down twice nor used afterwards.
    async fn destroy(self) -> Result<()>
    where
        Self: Sized;
}
