//! Schema module - Body, genome, configuration and progress types.

pub(crate) mod body;
mod config;
mod evolution;
mod genome;

pub use body::*;
pub use config::*;
pub use evolution::*;
pub use genome::*;
