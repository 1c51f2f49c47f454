//! YAML-manifest module loading and the generic executors.
//!
//! Modules are the only way the fabric executes shell commands or DBus
//! methods: administrators declare whitelisted templates in `module.yaml`
//! files, the loader validates and registers them at startup, and the
//! executors stay private to the registered closures.

mod dbus;
mod exec;
/// Discovery and synthetic handler registration.
pub mod loader;
/// Manifest schema and validation.
pub mod manifest;
/// `{{.name}}` template substitution.
pub mod template;

pub use loader::{Discovery, LoadedModule, discover, module_dirs, register_all};
pub use manifest::{ManifestError, ManifestScope, ModuleManifest};
