pub mod config;
pub mod model;
pub mod safetensors_util;

pub use config::ModelConfig;
pub use model::{ProtCNN, ResidualBlock};
