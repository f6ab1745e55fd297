//! Kernel tree preparation and compilation.
//!
//! - [`workspace`] - clone the kernel and install the base `.config`
//! - [`kernel`] - compile, install, and update the bootloader

pub mod kernel;
pub mod workspace;

pub use kernel::{build, default_jobs, BuildOptions, BuildOutcome};
pub use workspace::prepare_workspace;
