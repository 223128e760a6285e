pub mod activation;
pub mod dense;
pub mod loss;
pub mod mlp;
pub mod parameter;

pub use activation::Activation;
pub use dense::Dense;
pub use loss::LossKind;
pub use mlp::{ControlChannels, Mlp, MlpConfig};
pub use parameter::Parameter;
