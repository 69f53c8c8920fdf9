mod linear;
mod loss;
mod model;

pub use linear::Linear;
pub use loss::{LossFn, Mse};
pub use model::{Model, StateDict, Tensor};
