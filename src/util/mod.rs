//! General utility code
// (c) 2025 The glided developers

mod tracing;
pub use tracing::{is_initialized as tracing_is_initialised, setup as setup_tracing, TimeFormat};
