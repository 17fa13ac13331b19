pub mod config;
pub mod elasticity;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod models;
pub mod scorer;
pub mod simulator;
pub mod smoother;
pub mod stability;
pub mod stats;
pub mod trend;
pub mod validator;

pub use config::EngineConfig;
pub use engine::{Engine, PipelineOutput};
pub use error::{EngineError, Result};
