//! Build a Linux kernel with an out-of-tree Wi-Fi HaLow (802.11ah) driver.
//!
//! This crate automates the manual procedure for getting a Morse Micro
//! HaLow driver into a stock kernel: clone the kernel, seed its `.config`,
//! switch on the 802.11 stack and crypto the driver needs, drop the vendor
//! driver into the wireless tree, apply the vendor's kernel patches, then
//! compile and install.
//!
//! - **Config mutation** - idempotent line edits of `.config`, `Kconfig` and `Makefile`
//! - **Source handling** - archive download with directory resolution, driver integration
//! - **Patching** - ordered patch sets with an explicit fuzz policy
//! - **Build** - `make` stages, module and kernel install, bootloader update
//! - **Preflight checks** - host tool and privilege validation before anything runs
//!
//! # Architecture
//!
//! ```text
//! halow-kernel-builder (binary)
//!     │
//!     └── pipeline::run
//!             │
//!             ├── preflight   host tools, root
//!             ├── build       workspace: clone + base config
//!             ├── kconfig     option edits
//!             ├── source      fetch archives, integrate driver
//!             ├── patch       bulk + header patch sets
//!             └── build       kernel: make, install, update-grub
//! ```
//!
//! External programs (`git`, `curl`, `unzip`, `patch`, `make`,
//! `update-grub`) are invoked through [`process::Cmd`]; their names come
//! from [`pipeline::config::ToolsConfig`] so any of them can be swapped.
//!
//! # Example
//!
//! ```rust,ignore
//! use halow_kernel_builder::pipeline::{self, config::RunConfig};
//!
//! let mut config = RunConfig::default();
//! config.build.skip_bootloader = true;
//!
//! match pipeline::run(&config) {
//!     Ok(report) => println!("built {}", report.kernel_release),
//!     Err(failure) => eprintln!("{failure}"),
//! }
//! ```

pub mod build;
pub mod error;
pub mod kconfig;
pub mod patch;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod source;

pub use error::{Error, Result, StepFailure};
pub use pipeline::config::RunConfig;
pub use pipeline::{run, RunReport, Step};
