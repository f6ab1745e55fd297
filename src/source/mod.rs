//! Vendor sources: archive retrieval and integration into the kernel tree.
//!
//! - [`archive`] - download, checksum, extract, resolve extracted directory
//! - [`driver`] - copy driver sources in and register them with kbuild

pub mod archive;
pub mod driver;

pub use archive::fetch_and_extract;
pub use driver::{integrate_driver, DriverRegistration, IntegrationReport};
