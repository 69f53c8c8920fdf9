pub trait LossFn: Send {
    fn loss(&self, y_pred: &[f32], y: &[f32]) -> f32;
    fn loss_prime(&self, y_pred: &[f32], y: &[f32]) -> Vec<f32>;
}

/// Mean squared error loss function.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for Mse {
    fn loss(&self, y_pred: &[f32], y: &[f32]) -> f32 {
        if y_pred.is_empty() {
            return 0.0;
        }

        let sum: f32 = y_pred.iter().zip(y).map(|(p, t)| (p - t).powi(2)).sum();
        sum / y_pred.len() as f32
    }

    fn loss_prime(&self, y_pred: &[f32], y: &[f32]) -> Vec<f32> {
        let scale = 2.0 / y_pred.len().max(1) as f32;
        y_pred.iter().zip(y).map(|(p, t)| (p - t) * scale).collect()
    }
}
