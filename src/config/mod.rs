pub mod schema;

pub use schema::{Config, ObservabilityConfig, SessionsConfig};
