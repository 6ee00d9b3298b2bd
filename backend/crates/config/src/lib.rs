pub mod engine;
pub mod env;
pub mod tracing_init;

pub use engine::{EngineConfig, FirstRunPolicy};
pub use env::AppConfig;
pub use tracing_init::init_tracing;
