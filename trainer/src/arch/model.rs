use std::collections::BTreeMap;

use crate::{Result, data::Batch};

/// A named, shaped snapshot of some values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    pub fn scalar(value: f32) -> Self {
        Self::new(vec![1], vec![value])
    }

    /// The amount of values the shape describes.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Named tensors, ordered by name so snapshots are deterministic.
pub type StateDict = BTreeMap<String, Tensor>;

/// A trainable model whose parameters live in a single flat buffer.
///
/// Gradients are written into a caller owned buffer of the same size, which
/// is what lets the replica accumulate and synchronize them.
pub trait Model: Send {
    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    fn train(&mut self);

    fn eval(&mut self);

    fn is_training(&self) -> bool;

    fn params(&self) -> &[f32];

    fn params_mut(&mut self) -> &mut [f32];

    /// Computes the model's output for every row of `batch`.
    ///
    /// # Returns
    /// The outputs, row major.
    fn forward(&self, batch: &Batch) -> Result<Vec<f32>>;

    /// Adds the gradient of the loss w.r.t. the parameters into `grad`.
    ///
    /// # Arguments
    /// * `batch` - The batch `d_output` was computed for.
    /// * `d_output` - The derivative of the loss w.r.t. the outputs.
    /// * `grad` - The buffer to accumulate into, of `size()` values.
    fn backward(&self, batch: &Batch, d_output: &[f32], grad: &mut [f32]) -> Result<()>;

    fn state_dict(&self) -> StateDict;

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;
}
