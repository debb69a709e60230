pub mod cluster;
pub mod config;
pub mod error;
pub mod kernel;
pub mod observer;
pub mod patterns;
pub mod sink;
pub mod supervisor;

pub use config::CollectorConfig;
pub use kernel::{CausalFact, ObjectSnapshot};
pub use patterns::{PatternId, PatternRegistry};
pub use sink::JsonlSink;
pub use supervisor::Supervisor;
