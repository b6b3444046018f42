pub mod errors;

pub use errors::{ErrorContext, ErrorFrame, HarmError, HarmErrorKind, HarmResult};
