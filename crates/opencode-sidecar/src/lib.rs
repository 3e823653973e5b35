//! Supervisor for a locally run OpenCode sidecar.
//!
//! [`ReleaseManager`] installs and versions the binary, [`Supervisor`] runs it
//! as a detached process coordinated purely through files in the install
//! directory, and [`StatusReporter`] combines both into one snapshot.

mod activity;
mod factory;
mod layout;
mod registration;
mod release;
mod status;
mod supervisor;

pub use activity::ActivityMonitor;
pub use factory::{PlatformProcessManagerFactory, create_process_manager};
pub use layout::InstallLayout;
pub use registration::{DEFAULT_REGISTRATION_NAME, Registration, RegistrationClient};
pub use release::{InstallProgress, ReleaseManager, is_newer};
pub use status::{SidecarSnapshot, StatusReporter, StatusWithUpdate};
pub use supervisor::{
    CONFIG_SCHEMA, StartOptions, Supervisor, find_available_port, is_port_in_use, probe_health,
};

// Re-export core functionality
pub use opencode_sidecar_core::*;
