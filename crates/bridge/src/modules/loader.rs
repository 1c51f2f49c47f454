//! Module discovery and synthetic handler registration.
//!
//! At bridge start the loader scans the system directory then the user
//! directory for `<dir>/<module>/module.yaml`, validates each manifest,
//! and registers one synthetic command per declared handler under
//! `module.<name>`. A user-scope manifest shadows a system-scope one of
//! the same name; the shadowing is reported in the startup logs. After
//! registration the command registry is frozen.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::BridgeError;
use crate::modules::manifest::{
    self, ArgSpec, ArgType, CommandSpec, DbusSpec, MANIFEST_FILE, ManifestError, ManifestScope,
    ModuleManifest,
};
use crate::modules::{dbus, exec, template};
use crate::rpc::{CommandRouter, RegisterError, RegisteredCommand};

/// Grace added to a command's own deadline before the RPC layer gives up,
/// so the executor's SIGKILL path wins the race and reports `timeout`.
const RPC_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// A manifest accepted by validation.
#[derive(Clone, Debug)]
pub struct LoadedModule {
    /// The validated manifest.
    pub manifest: ModuleManifest,
    /// Where it was found.
    pub scope: ManifestScope,
    /// The module directory.
    pub dir: PathBuf,
}

/// Outcome of a discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Accepted modules, user scope shadowing system scope.
    pub modules: Vec<LoadedModule>,
    /// Manifests that failed validation, with the reason.
    pub rejected: Vec<(PathBuf, ManifestError)>,
    /// System-scope modules shadowed by a user-scope namesake.
    pub shadowed: Vec<(String, PathBuf)>,
}

/// Returns the system and user module directories.
///
/// The user directory honours `$XDG_CONFIG_HOME` and falls back to
/// `$HOME/.config`.
#[must_use]
pub fn module_dirs() -> Vec<(PathBuf, ManifestScope)> {
    let mut dirs = vec![(
        PathBuf::from("/etc/linuxio/modules"),
        ManifestScope::System,
    )];
    let user_base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
    if let Some(base) = user_base {
        dirs.push((base.join("linuxio/modules"), ManifestScope::User));
    }
    dirs
}

/// Scans the given directories for manifests.
///
/// Directories are scanned in order; a later (user) manifest replaces an
/// earlier (system) one of the same name.
pub fn discover(
    dirs: &[(PathBuf, ManifestScope)],
    is_builtin: impl Fn(&str) -> bool + Copy,
) -> Discovery {
    let mut by_name: HashMap<String, LoadedModule> = HashMap::new();
    let mut discovery = Discovery::default();

    for (dir, scope) in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
            Err(err) => {
                warn!(dir = %dir.display(), %err, "cannot scan module directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let module_dir = entry.path();
            let manifest_path = module_dir.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                continue;
            }
            match manifest::load(&manifest_path, is_builtin) {
                Ok(manifest) => {
                    let name = manifest.name.clone();
                    let loaded = LoadedModule {
                        manifest,
                        scope: *scope,
                        dir: module_dir,
                    };
                    if let Some(previous) = by_name.insert(name.clone(), loaded) {
                        info!(
                            module = %name,
                            shadowed = %previous.dir.display(),
                            "user module shadows system module"
                        );
                        discovery.shadowed.push((name, previous.dir));
                    }
                }
                Err(err) => {
                    warn!(manifest = %manifest_path.display(), %err, "rejected module manifest");
                    discovery.rejected.push((manifest_path, err));
                }
            }
        }
    }

    let mut modules: Vec<LoadedModule> = by_name.into_values().collect();
    modules.sort_by(|a, b| a.manifest.name.cmp(&b.manifest.name));
    for module in &modules {
        info!(
            module = %module.manifest.name,
            version = %module.manifest.version,
            scope = module.scope.as_str(),
            commands = module.manifest.handlers.commands.len(),
            dbus = module.manifest.handlers.dbus.len(),
            "registered module"
        );
    }
    discovery.modules = modules;
    discovery
}

/// Registers every handler of every accepted module.
pub fn register_all(
    router: &mut CommandRouter,
    modules: &[LoadedModule],
) -> Result<(), RegisterError> {
    for module in modules {
        let privileged = module
            .manifest
            .permissions
            .iter()
            .any(|p| p == "privileged");
        let handler_name = format!("module.{}", module.manifest.name);

        for (command_name, spec) in &module.manifest.handlers.commands {
            let entry = command_entry(spec.clone(), privileged);
            router.register(handler_name.clone(), command_name.clone(), entry)?;
        }
        for (command_name, spec) in &module.manifest.handlers.dbus {
            let entry = dbus_entry(spec.clone(), privileged);
            router.register(handler_name.clone(), command_name.clone(), entry)?;
        }
    }
    Ok(())
}

fn command_entry(spec: CommandSpec, privileged: bool) -> RegisteredCommand {
    let deadline = Duration::from_secs(spec.timeout_s);
    let entry = RegisteredCommand::new(move |incoming: Vec<String>| {
        let spec = spec.clone();
        async move {
            let bindings = bind_args(&spec.args, &incoming)?;
            let rendered = template::substitute(&spec.command, &bindings)
                .map_err(|err| BridgeError::Internal(format!("template: {err}")))?;
            exec::run_shell(&rendered, Duration::from_secs(spec.timeout_s)).await
        }
    })
    .with_timeout(deadline + RPC_TIMEOUT_GRACE);
    if privileged { entry.privileged() } else { entry }
}

fn dbus_entry(spec: DbusSpec, privileged: bool) -> RegisteredCommand {
    let entry = RegisteredCommand::new(move |_incoming: Vec<String>| {
        let spec = spec.clone();
        async move { dbus::call_method(&spec).await }
    });
    if privileged { entry.privileged() } else { entry }
}

/// Binds incoming positional arguments to the declared argument list.
pub(crate) fn bind_args(
    declared: &[ArgSpec],
    incoming: &[String],
) -> Result<HashMap<String, String>, BridgeError> {
    if incoming.len() > declared.len() {
        return Err(BridgeError::InvalidArg(format!(
            "expected at most {} arguments, got {}",
            declared.len(),
            incoming.len()
        )));
    }

    let mut bindings = HashMap::with_capacity(declared.len());
    for (index, spec) in declared.iter().enumerate() {
        let value = match incoming.get(index) {
            Some(value) => value.clone(),
            None => match &spec.default {
                Some(default) => manifest::default_to_string(default).ok_or_else(|| {
                    BridgeError::Internal(format!("non-scalar default for {:?}", spec.name))
                })?,
                None if spec.required => {
                    return Err(BridgeError::InvalidArg(format!(
                        "missing required argument {:?}",
                        spec.name
                    )));
                }
                None => String::new(),
            },
        };
        check_arg_type(spec, &value)?;
        bindings.insert(spec.name.clone(), value);
    }
    Ok(bindings)
}

fn check_arg_type(spec: &ArgSpec, value: &str) -> Result<(), BridgeError> {
    let ok = match spec.arg_type {
        ArgType::String => true,
        ArgType::Int => value.is_empty() || value.parse::<i64>().is_ok(),
        ArgType::Bool => value.is_empty() || value == "true" || value == "false",
        ArgType::Json => value.is_empty() || serde_json::from_str::<Value>(value).is_ok(),
    };
    if ok {
        Ok(())
    } else {
        Err(BridgeError::InvalidArg(format!(
            "argument {:?} is not a valid {:?}",
            spec.name, spec.arg_type
        )))
    }
}
