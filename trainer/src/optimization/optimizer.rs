use crate::arch::StateDict;

pub trait Optimizer: Send {
    /// Applies one update to `params` following `grad`.
    fn step(&mut self, params: &mut [f32], grad: &[f32]);

    /// The optimizer's persisted state, stored along the model in checkpoints.
    fn state_dict(&self) -> StateDict;
}
