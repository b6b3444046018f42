pub mod config;
pub mod constants;

pub use config::{FftPolicy, SessionConfig, SessionConfigError, load_session_config};
