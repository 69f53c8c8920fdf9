use super::Optimizer;
use crate::arch::{StateDict, Tensor};

/// Gradient descent optimization algorithm, with optional momentum.
#[derive(Debug, Clone)]
pub struct GradientDescent {
    learning_rate: f32,
    momentum: f32,
    velocity: Vec<f32>,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `step`.
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            momentum: 0.0,
            velocity: Vec::new(),
        }
    }

    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }
}

impl Optimizer for GradientDescent {
    /// Makes a step in the opposite direction of the gradient, with a length of
    /// `learning_rate`. With momentum the step follows the velocity
    /// `v = momentum * v + grad` instead.
    fn step(&mut self, params: &mut [f32], grad: &[f32]) {
        let lr = self.learning_rate;

        if self.momentum == 0.0 {
            for (w, g) in params.iter_mut().zip(grad) {
                *w -= lr * g;
            }
            return;
        }

        self.velocity.resize(grad.len(), 0.0);
        for ((w, v), g) in params.iter_mut().zip(&mut self.velocity).zip(grad) {
            *v = self.momentum * *v + g;
            *w -= lr * *v;
        }
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::from([
            ("lr".to_string(), Tensor::scalar(self.learning_rate)),
            ("momentum".to_string(), Tensor::scalar(self.momentum)),
        ]);

        if !self.velocity.is_empty() {
            let velocity = Tensor::new(vec![self.velocity.len()], self.velocity.clone());
            state.insert("velocity".to_string(), velocity);
        }

        state
    }
}
