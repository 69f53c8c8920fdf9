use std::ops::{Deref, DerefMut};

use collective::{Collective, all_reduce_mean, broadcast};
use log::debug;

use crate::{
    Result, TrainErr,
    arch::Model,
    data::Batch,
    optimization::Optimizer,
};

/// A rank's copy of the model along with its gradient buffer.
///
/// Gradients accumulate locally across backward passes. While sync is on, every
/// backward pass also averages the accumulated gradient across the group.
pub struct Replica<M> {
    model: M,
    grad: Vec<f32>,
    sync: bool,
}

impl<M: Model> Replica<M> {
    pub fn new(model: M) -> Self {
        let grad = vec![0.0; model.size()];
        Self {
            model,
            grad,
            sync: true,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    /// Whether backward passes currently synchronize gradients.
    pub fn syncs(&self) -> bool {
        self.sync
    }

    pub fn train(&mut self) {
        self.model.train();
    }

    pub fn eval(&mut self) {
        self.model.eval();
    }

    pub fn forward(&self, batch: &Batch) -> Result<Vec<f32>> {
        self.model.forward(batch)
    }

    /// Enters a scope where backward passes only accumulate locally.
    pub fn no_sync(&mut self) -> SyncScope<'_, M> {
        self.scope(true)
    }

    /// Enters a no-sync scope if `defer`, a default-sync one otherwise.
    ///
    /// Default sync is restored when the scope is dropped.
    pub fn scope(&mut self, defer: bool) -> SyncScope<'_, M> {
        self.sync = !defer;
        SyncScope { replica: self }
    }

    /// Accumulates the gradient of `batch` and synchronizes it if sync is on.
    ///
    /// # Errors
    /// If the model is in eval mode, or the synchronization fails.
    pub async fn backward<C: Collective>(
        &mut self,
        group: &mut C,
        batch: &Batch,
        d_output: &[f32],
    ) -> Result<()> {
        if !self.model.is_training() {
            return Err(TrainErr::GradInEvalMode);
        }

        self.model.backward(batch, d_output, &mut self.grad)?;

        if self.sync {
            all_reduce_mean(group, &mut self.grad).await?;
        }

        Ok(())
    }

    /// Applies the accumulated gradient and resets it.
    pub fn step<O: Optimizer>(&mut self, optimizer: &mut O) {
        optimizer.step(self.model.params_mut(), &self.grad);
        self.zero_grad();
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    /// Synchronizes and applies a trailing partial accumulation window.
    pub async fn flush<C: Collective, O: Optimizer>(
        &mut self,
        group: &mut C,
        optimizer: &mut O,
    ) -> Result<()> {
        debug!(rank = group.rank(); "flushing a partial accumulation window");
        all_reduce_mean(group, &mut self.grad).await?;
        self.step(optimizer);
        Ok(())
    }

    /// Overwrites the parameters with the ones held by `root`.
    pub async fn broadcast_params<C: Collective>(&mut self, group: &mut C, root: usize) -> Result<()> {
        let shared = broadcast(group, self.model.params(), root).await?;

        let params = self.model.params_mut();
        if shared.len() != params.len() {
            return Err(TrainErr::ShapeMismatch {
                what: "broadcast parameters",
                got: shared.len(),
                expected: params.len(),
            });
        }

        params.copy_from_slice(&shared);
        Ok(())
    }
}

/// Guard over a replica's sync mode, restoring default sync when dropped.
pub struct SyncScope<'r, M> {
    replica: &'r mut Replica<M>,
}

impl<M> Deref for SyncScope<'_, M> {
    type Target = Replica<M>;

    fn deref(&self) -> &Self::Target {
        self.replica
    }
}

impl<M> DerefMut for SyncScope<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.replica
    }
}

impl<M> Drop for SyncScope<'_, M> {
    fn drop(&mut self) {
        self.replica.sync = true;
    }
}
