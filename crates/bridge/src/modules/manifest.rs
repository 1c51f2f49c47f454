//! Module manifest schema and validation.
//!
//! A module is one directory holding a `module.yaml`. The manifest
//! declares commands (shell templates) and DBus methods; validation is
//! strict and happens entirely at load time so nothing about a manifest
//! can fail at call time except the execution itself.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::modules::template::{self, TemplateError};

/// Manifest file name inside a module directory.
pub const MANIFEST_FILE: &str = "module.yaml";

/// Permission strings a manifest may request.
pub const KNOWN_PERMISSIONS: [&str; 1] = ["privileged"];

/// Scope a manifest was discovered in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ManifestScope {
    /// `/etc/linuxio/modules/<name>/module.yaml`, root-owned.
    System,
    /// `$XDG_CONFIG_HOME/linuxio/modules/<name>/module.yaml`.
    User,
}

impl ManifestScope {
    /// Label used in startup logs and CLI output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }
}

/// A validated module manifest.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleManifest {
    /// Module identifier; commands register under `module.<name>`.
    pub name: String,
    /// Semantic version of the module.
    pub version: String,
    /// Human-readable title.
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Optional dashboard UI hints; opaque to the bridge.
    #[serde(default)]
    pub ui: Option<UiSpec>,
    /// Declared handlers.
    #[serde(default)]
    pub handlers: HandlerSpecs,
    /// Requested permissions.
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Dashboard placement hints.
#[derive(Clone, Debug, Deserialize)]
pub struct UiSpec {
    /// Route the dashboard mounts the module under.
    #[serde(default)]
    pub route: Option<String>,
    /// Icon identifier.
    #[serde(default)]
    pub icon: Option<String>,
    /// Whether the module appears in the sidebar.
    #[serde(default)]
    pub sidebar: Option<bool>,
}

/// The `handlers:` block.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HandlerSpecs {
    /// Shell command templates keyed by command name.
    #[serde(default)]
    pub commands: BTreeMap<String, CommandSpec>,
    /// DBus method calls keyed by command name.
    #[serde(default)]
    pub dbus: BTreeMap<String, DbusSpec>,
}

fn default_timeout_s() -> u64 {
    10
}

/// One whitelisted shell command.
#[derive(Clone, Debug, Deserialize)]
pub struct CommandSpec {
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
    /// Command template with `{{.arg}}` placeholders.
    pub command: String,
    /// Deadline in seconds; the child is SIGKILLed on overrun.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    /// Declared arguments, bound positionally at call time.
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    /// Free-form description of the return shape.
    #[serde(default)]
    pub returns: Option<String>,
}

/// One declared argument.
#[derive(Clone, Debug, Deserialize)]
pub struct ArgSpec {
    /// Placeholder name referenced by the template.
    pub name: String,
    /// Declared type, used for documentation and coercion.
    #[serde(default, rename = "type")]
    pub arg_type: ArgType,
    /// Whether the caller must supply the argument.
    #[serde(default)]
    pub required: bool,
    /// Fallback for missing optional arguments.
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
}

/// Declared argument types.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    /// Plain string (the default).
    #[default]
    String,
    /// Integer, validated at call time.
    Int,
    /// Boolean, validated at call time.
    Bool,
    /// Opaque JSON, passed through as text.
    Json,
}

/// One whitelisted DBus method call.
#[derive(Clone, Debug, Deserialize)]
pub struct DbusSpec {
    /// Bus to call on.
    pub bus: BusKind,
    /// Service destination, e.g. `org.freedesktop.systemd1`.
    pub destination: String,
    /// Object path.
    pub path: String,
    /// Interface name.
    pub interface: String,
    /// Method name.
    pub method: String,
    /// Static string arguments passed to the method.
    #[serde(default)]
    pub args: Vec<String>,
}

/// DBus bus selector.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// The system bus.
    System,
    /// The user session bus.
    Session,
}

/// Manifest load or validation failure.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The file could not be read.
    #[error("read {path}: {reason}")]
    Read {
        /// Offending file.
        path: String,
        /// Underlying failure.
        reason: String,
    },
    /// The YAML did not match the schema.
    #[error("parse {path}: {reason}")]
    Parse {
        /// Offending file.
        path: String,
        /// Parser diagnostic.
        reason: String,
    },
    /// `name` contains characters outside `[A-Za-z0-9_-]`.
    #[error("module name {0:?} contains illegal characters")]
    BadName(String),
    /// `version` is not a semantic version.
    #[error("module {name}: version {version:?} is not semver")]
    BadVersion {
        /// Module name.
        name: String,
        /// Rejected version string.
        version: String,
    },
    /// The module name collides with a built-in handler type.
    #[error("module name {0:?} collides with a built-in handler type")]
    BuiltinCollision(String),
    /// The manifest requests a permission the bridge does not know.
    #[error("module {name}: unknown permission {permission:?}")]
    UnknownPermission {
        /// Module name.
        name: String,
        /// Rejected permission string.
        permission: String,
    },
    /// A command declares the same argument twice.
    #[error("module {name}: command {command:?} declares argument {arg:?} twice")]
    DuplicateArg {
        /// Module name.
        name: String,
        /// Command name.
        command: String,
        /// Duplicated argument.
        arg: String,
    },
    /// A template references an undeclared argument or is malformed.
    #[error("module {name}: command {command:?}: {source}")]
    Template {
        /// Module name.
        name: String,
        /// Command name.
        command: String,
        /// Underlying template failure.
        #[source]
        source: TemplateError,
    },
    /// A command declares a zero deadline.
    #[error("module {name}: command {command:?} declares a zero timeout")]
    ZeroTimeout {
        /// Module name.
        name: String,
        /// Command name.
        command: String,
    },
    /// A DBus handler declares more static arguments than supported.
    #[error("module {name}: dbus handler {command:?} declares more than 4 arguments")]
    TooManyDbusArgs {
        /// Module name.
        name: String,
        /// Command name.
        command: String,
    },
    /// A DBus handler leaves a required field empty.
    #[error("module {name}: dbus handler {command:?} has an empty {field}")]
    EmptyDbusField {
        /// Module name.
        name: String,
        /// Command name.
        command: String,
        /// Field that was empty.
        field: &'static str,
    },
    /// An argument default cannot be rendered as text.
    #[error("module {name}: command {command:?} argument {arg:?} has a non-scalar default")]
    BadDefault {
        /// Module name.
        name: String,
        /// Command name.
        command: String,
        /// Offending argument.
        arg: String,
    },
}

/// Reads and validates a manifest file.
pub fn load(path: &Path, is_builtin: impl Fn(&str) -> bool) -> Result<ModuleManifest, ManifestError> {
    let raw = std::fs::read_to_string(path).map_err(|err| ManifestError::Read {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    let manifest: ModuleManifest =
        serde_yaml::from_str(&raw).map_err(|err| ManifestError::Parse {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
    validate(&manifest, is_builtin)?;
    Ok(manifest)
}

/// Validates a parsed manifest.
pub fn validate(
    manifest: &ModuleManifest,
    is_builtin: impl Fn(&str) -> bool,
) -> Result<(), ManifestError> {
    let name = &manifest.name;
    let name_ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !name_ok {
        return Err(ManifestError::BadName(name.clone()));
    }
    if is_builtin(name) {
        return Err(ManifestError::BuiltinCollision(name.clone()));
    }
    if semver::Version::parse(&manifest.version).is_err() {
        return Err(ManifestError::BadVersion {
            name: name.clone(),
            version: manifest.version.clone(),
        });
    }
    for permission in &manifest.permissions {
        if !KNOWN_PERMISSIONS.contains(&permission.as_str()) {
            return Err(ManifestError::UnknownPermission {
                name: name.clone(),
                permission: permission.clone(),
            });
        }
    }

    for (command_name, command) in &manifest.handlers.commands {
        if command.timeout_s == 0 {
            return Err(ManifestError::ZeroTimeout {
                name: name.clone(),
                command: command_name.clone(),
            });
        }

        let mut declared = Vec::with_capacity(command.args.len());
        for arg in &command.args {
            if declared.contains(&arg.name) {
                return Err(ManifestError::DuplicateArg {
                    name: name.clone(),
                    command: command_name.clone(),
                    arg: arg.name.clone(),
                });
            }
            if let Some(default) = &arg.default {
                if default_to_string(default).is_none() {
                    return Err(ManifestError::BadDefault {
                        name: name.clone(),
                        command: command_name.clone(),
                        arg: arg.name.clone(),
                    });
                }
            }
            declared.push(arg.name.clone());
        }

        let referenced =
            template::placeholders(&command.command).map_err(|source| ManifestError::Template {
                name: name.clone(),
                command: command_name.clone(),
                source,
            })?;
        for placeholder in referenced {
            if !declared.contains(&placeholder) {
                return Err(ManifestError::Template {
                    name: name.clone(),
                    command: command_name.clone(),
                    source: TemplateError::Unknown(placeholder),
                });
            }
        }
    }

    for (command_name, dbus) in &manifest.handlers.dbus {
        if dbus.args.len() > 4 {
            return Err(ManifestError::TooManyDbusArgs {
                name: name.clone(),
                command: command_name.clone(),
            });
        }
        for (value, field) in [
            (&dbus.destination, "destination"),
            (&dbus.path, "path"),
            (&dbus.interface, "interface"),
            (&dbus.method, "method"),
        ] {
            if value.is_empty() {
                return Err(ManifestError::EmptyDbusField {
                    name: name.clone(),
                    command: command_name.clone(),
                    field,
                });
            }
        }
    }

    Ok(())
}

/// Renders a scalar YAML default as the textual argument value.
#[must_use]
pub fn default_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MONITORING: &str = r#"
name: monitoring
version: 1.2.0
title: Host monitoring
description: Disk and load insight
handlers:
  commands:
    check_disk:
      description: Disk usage for a path
      command: "df -h {{.path}}"
      timeout_s: 5
      args:
        - name: path
          type: string
          required: true
    uptime:
      command: uptime
  dbus:
    list_units:
      bus: system
      destination: org.freedesktop.systemd1
      path: /org/freedesktop/systemd1
      interface: org.freedesktop.systemd1.Manager
      method: ListUnits
"#;

    fn parse(yaml: &str) -> ModuleManifest {
        serde_yaml::from_str(yaml).expect("parses")
    }

    fn not_builtin(_: &str) -> bool {
        false
    }

    #[test]
    fn well_formed_manifest_validates() {
        let manifest = parse(MONITORING);
        validate(&manifest, not_builtin).expect("valid");
        assert_eq!(manifest.handlers.commands.len(), 2);
        assert_eq!(
            manifest.handlers.commands["check_disk"].timeout_s,
            5
        );
        assert_eq!(manifest.handlers.commands["uptime"].timeout_s, 10);
    }

    #[test]
    fn illegal_name_characters_are_rejected() {
        let mut manifest = parse(MONITORING);
        manifest.name = "bad name!".to_owned();
        assert!(matches!(
            validate(&manifest, not_builtin).unwrap_err(),
            ManifestError::BadName(_)
        ));
    }

    #[test]
    fn builtin_collision_is_rejected() {
        let manifest = parse(MONITORING);
        let err = validate(&manifest, |name| name == "monitoring").unwrap_err();
        assert!(matches!(err, ManifestError::BuiltinCollision(_)));
    }

    #[test]
    fn non_semver_version_is_rejected() {
        let mut manifest = parse(MONITORING);
        manifest.version = "one".to_owned();
        assert!(matches!(
            validate(&manifest, not_builtin).unwrap_err(),
            ManifestError::BadVersion { .. }
        ));
    }

    #[test]
    fn unknown_permission_is_rejected() {
        let mut manifest = parse(MONITORING);
        manifest.permissions = vec!["root-of-all-evil".to_owned()];
        assert!(matches!(
            validate(&manifest, not_builtin).unwrap_err(),
            ManifestError::UnknownPermission { .. }
        ));
    }

    #[test]
    fn template_referencing_undeclared_argument_is_rejected() {
        let mut manifest = parse(MONITORING);
        manifest
            .handlers
            .commands
            .get_mut("check_disk")
            .expect("command")
            .command = "df -h {{.mount}}".to_owned();
        let err = validate(&manifest, not_builtin).unwrap_err();
        assert!(matches!(err, ManifestError::Template { .. }));
    }

    #[test]
    fn duplicate_argument_names_are_rejected() {
        let mut manifest = parse(MONITORING);
        let command = manifest
            .handlers
            .commands
            .get_mut("check_disk")
            .expect("command");
        let duplicate = command.args[0].clone();
        command.args.push(duplicate);
        assert!(matches!(
            validate(&manifest, not_builtin).unwrap_err(),
            ManifestError::DuplicateArg { .. }
        ));
    }

    #[test]
    fn empty_dbus_destination_is_rejected() {
        let mut manifest = parse(MONITORING);
        manifest
            .handlers
            .dbus
            .get_mut("list_units")
            .expect("handler")
            .destination = String::new();
        assert!(matches!(
            validate(&manifest, not_builtin).unwrap_err(),
            ManifestError::EmptyDbusField { .. }
        ));
    }

    #[test]
    fn numeric_defaults_render_as_text() {
        let value = serde_yaml::Value::Number(10.into());
        assert_eq!(default_to_string(&value).as_deref(), Some("10"));
    }

    #[test]
    fn sequence_defaults_are_rejected() {
        let value = serde_yaml::Value::Sequence(Vec::new());
        assert_eq!(default_to_string(&value), None);
    }
}
