//! Package OCI library
//!
//! This file serves as the library root for the package-oci crate: pushing a
//! package directory to an OCI registry as a single-layer artifact and pulling
//! it back into a directory.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod digest;
pub mod error;
pub mod logging;
pub mod oci;
pub mod registry;
pub mod store;
pub mod transfer;

pub use config::Config;
pub use error::{PackageError, Result};
pub use logging::Logger;
pub use transfer::{pull_package, push_package, with_cancellation};
