use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, linalg};
use rand::Rng;

use super::{Model, StateDict, Tensor};
use crate::{Result, TrainErr, data::Batch};

/// A single dense layer without activation, `y = x W + b`.
///
/// The parameters hold `W` (`x_size` x `y_size`, row major) followed by `b`.
#[derive(Debug, Clone)]
pub struct Linear {
    dim: (usize, usize),
    params: Vec<f32>,
    training: bool,
}

impl Linear {
    /// Creates a new `Linear` with weights drawn uniformly from
    /// `[-1/sqrt(x_size), 1/sqrt(x_size))` and zeroed biases.
    pub fn new<R: Rng>(x_size: usize, y_size: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (x_size.max(1) as f32).sqrt();
        let mut params: Vec<f32> = (0..x_size * y_size)
            .map(|_| rng.random_range(-bound..bound))
            .collect();
        params.resize(x_size * y_size + y_size, 0.0);

        Self {
            dim: (x_size, y_size),
            params,
            training: true,
        }
    }

    /// Creates a new `Linear` from known parameters.
    pub fn from_params(x_size: usize, y_size: usize, params: Vec<f32>) -> Result<Self> {
        let expected = (x_size + 1) * y_size;
        if params.len() != expected {
            return Err(TrainErr::ShapeMismatch {
                what: "linear parameters",
                got: params.len(),
                expected,
            });
        }

        Ok(Self {
            dim: (x_size, y_size),
            params,
            training: true,
        })
    }

    fn w_size(&self) -> usize {
        self.dim.0 * self.dim.1
    }

    fn view_params(&self) -> Result<(ArrayView2<'_, f32>, ArrayView1<'_, f32>)> {
        let (w, b) = self.params.split_at(self.w_size());
        let w = ArrayView2::from_shape(self.dim, w).map_err(|_| self.params_mismatch())?;
        Ok((w, ArrayView1::from(b)))
    }

    fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
        if grad.len() != self.params.len() {
            return Err(TrainErr::ShapeMismatch {
                what: "gradient",
                got: grad.len(),
                expected: self.params.len(),
            });
        }

        let (dw, db) = grad.split_at_mut(self.w_size());
        let dw = ArrayViewMut2::from_shape(self.dim, dw).map_err(|_| self.params_mismatch())?;
        Ok((dw, ArrayViewMut1::from(db)))
    }

    fn view_x<'a>(&self, batch: &'a Batch) -> Result<ArrayView2<'a, f32>> {
        if batch.x_size != self.dim.0 {
            return Err(TrainErr::ShapeMismatch {
                what: "batch features",
                got: batch.x_size,
                expected: self.dim.0,
            });
        }

        ArrayView2::from_shape((batch.len(), self.dim.0), &batch.xs).map_err(|_| {
            TrainErr::ShapeMismatch {
                what: "batch",
                got: batch.xs.len(),
                expected: batch.len() * self.dim.0,
            }
        })
    }

    fn params_mismatch(&self) -> TrainErr {
        TrainErr::ShapeMismatch {
            what: "linear parameters",
            got: self.params.len(),
            expected: (self.dim.0 + 1) * self.dim.1,
        }
    }
}

impl Model for Linear {
    fn size(&self) -> usize {
        self.params.len()
    }

    fn train(&mut self) {
        self.training = true;
    }

    fn eval(&mut self) {
        self.training = false;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn params(&self) -> &[f32] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    fn forward(&self, batch: &Batch) -> Result<Vec<f32>> {
        let x = self.view_x(batch)?;
        let (w, b) = self.view_params()?;

        let out = x.dot(&w) + &b;
        Ok(out.iter().copied().collect())
    }

    fn backward(&self, batch: &Batch, d_output: &[f32], grad: &mut [f32]) -> Result<()> {
        let x = self.view_x(batch)?;
        let d = ArrayView2::from_shape((x.nrows(), self.dim.1), d_output).map_err(|_| {
            TrainErr::ShapeMismatch {
                what: "output derivative",
                got: d_output.len(),
                expected: x.nrows() * self.dim.1,
            }
        })?;

        let (mut dw, mut db) = self.view_grad(grad)?;
        linalg::general_mat_mul(1.0, &x.t(), &d, 1.0, &mut dw);
        db += &d.sum_axis(Axis(0));
        Ok(())
    }

    fn state_dict(&self) -> StateDict {
        let (w, b) = self.params.split_at(self.w_size());

        StateDict::from([
            (
                "weight".to_string(),
                Tensor::new(vec![self.dim.0, self.dim.1], w.to_vec()),
            ),
            ("bias".to_string(), Tensor::new(vec![self.dim.1], b.to_vec())),
        ])
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        let w_size = self.w_size();

        for (name, range) in [("weight", 0..w_size), ("bias", w_size..self.params.len())] {
            let Some(tensor) = state.get(name) else {
                return Err(TrainErr::Checkpoint(format!("missing tensor {name}")));
            };

            if tensor.data.len() != range.len() {
                return Err(TrainErr::ShapeMismatch {
                    what: "state dict tensor",
                    got: tensor.data.len(),
                    expected: range.len(),
                });
            }

            self.params[range].copy_from_slice(&tensor.data);
        }

        Ok(())
    }
}
