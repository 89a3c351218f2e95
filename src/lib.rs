//! Startup acceleration for a plugin host: deferred, batched patch
//! compilation across the two startup phases, cached localization loads, and
//! a single config save after startup.

pub mod accelerator;
pub mod bytecode;
pub mod config;
pub mod localization;
pub mod logging;
pub mod patching;

pub use accelerator::{AcceleratorError, ActiveFeatures, BootstrapSite, StartupAccelerator};
