//! OpenCode sidecar core - platform-independent types and configuration
//!
//! Shared by the platform process managers and the supervisor facade: the
//! configuration surface, the error taxonomy, the persisted/reported data
//! model and the pid-based process management traits.

mod config;
mod error;
mod model;
mod platform;
mod process;

pub use config::*;
pub use error::*;
pub use model::*;
pub use platform::*;
pub use process::*;
