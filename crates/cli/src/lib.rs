#![deny(unsafe_code)]

//! Command-line front-end for the `linuxio` binary.
//!
//! `linuxio run` starts the dashboard server; `linuxio module list` and
//! `linuxio module install <path>` manage manifest-driven modules using
//! the same loader and validation as a running bridge.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use bridge::modules::manifest::{MANIFEST_FILE, ManifestScope};
use bridge::modules::{discover, module_dirs};
use bridge::registry::HandlerRegistry;
use server::ServerConfig;

/// Top-level command line.
#[derive(Debug, Parser)]
#[command(name = "linuxio", about = "linuxio host management dashboard", version)]
struct Cli {
    /// Server configuration file.
    #[arg(long, default_value = "/etc/linuxio/config.yaml")]
    config: PathBuf,
    /// Default log directive when LINUXIO_LOG is unset.
    #[arg(long, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the dashboard server.
    Run,
    /// Inspect and install dashboard modules.
    Module {
        #[command(subcommand)]
        command: ModuleCommand,
    },
}

#[derive(Debug, Subcommand)]
enum ModuleCommand {
    /// List discovered modules, including shadowed and rejected ones.
    List,
    /// Validate a module directory and install it into the user scope.
    Install {
        /// Directory containing a `module.yaml`.
        path: PathBuf,
    },
}

/// Entry point used by the `linuxio` binary.
pub fn run<I, T>(args: I, stdout: &mut impl Write, stderr: &mut impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    ExitCode::from(run_raw(args, stdout, stderr))
}

fn run_raw<I, T>(args: I, stdout: &mut impl Write, stderr: &mut impl Write) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return 2;
        }
    };

    logging::init(&cli.log);

    match cli.command {
        Command::Run => run_server(&cli.config, stderr),
        Command::Module { command } => match command {
            ModuleCommand::List => list_modules(stdout),
            ModuleCommand::Install { path } => install_module(&path, stdout, stderr),
        },
    }
}

fn run_server(config_path: &Path, stderr: &mut impl Write) -> u8 {
    let config = match ServerConfig::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            let _ = writeln!(stderr, "linuxio: {err}");
            return 1;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = writeln!(stderr, "linuxio: failed to start runtime: {err}");
            return 1;
        }
    };

    match runtime.block_on(server::run(config)) {
        Ok(()) => 0,
        Err(err) => {
            let _ = writeln!(stderr, "linuxio: {err}");
            1
        }
    }
}

fn builtin_registry() -> HandlerRegistry {
    HandlerRegistry::new(bridge::builtin_handlers())
}

fn list_modules(stdout: &mut impl Write) -> u8 {
    let registry = builtin_registry();
    let discovery = discover(&module_dirs(), |name| registry.is_builtin(name));

    if discovery.modules.is_empty() {
        let _ = writeln!(stdout, "no modules installed");
    }
    for module in &discovery.modules {
        let manifest = &module.manifest;
        let _ = writeln!(
            stdout,
            "{:<24} {:<10} {:<7} {} command(s), {} dbus handler(s)",
            manifest.name,
            manifest.version,
            module.scope.as_str(),
            manifest.handlers.commands.len(),
            manifest.handlers.dbus.len(),
        );
    }
    for (name, dir) in &discovery.shadowed {
        let _ = writeln!(
            stdout,
            "{name:<24} shadowed system copy at {}",
            dir.display()
        );
    }
    for (path, err) in &discovery.rejected {
        let _ = writeln!(stdout, "rejected {}: {err}", path.display());
    }
    0
}

fn install_module(
    source: &Path,
    stdout: &mut impl Write,
    stderr: &mut impl Write,
) -> u8 {
    let manifest_path = source.join(MANIFEST_FILE);
    let registry = builtin_registry();
    let manifest =
        match bridge::modules::manifest::load(&manifest_path, |name| registry.is_builtin(name)) {
            Ok(manifest) => manifest,
            Err(err) => {
                let _ = writeln!(stderr, "linuxio: {err}");
                return 1;
            }
        };

    let Some((user_dir, _)) = module_dirs()
        .into_iter()
        .find(|(_, scope)| *scope == ManifestScope::User)
    else {
        let _ = writeln!(stderr, "linuxio: no user module directory (HOME unset)");
        return 1;
    };

    let destination = user_dir.join(&manifest.name);
    if destination.exists() {
        let _ = writeln!(
            stderr,
            "linuxio: module {:?} is already installed at {}",
            manifest.name,
            destination.display()
        );
        return 1;
    }

    if let Err(err) = copy_tree(source, &destination) {
        let _ = writeln!(stderr, "linuxio: install failed: {err}");
        return 1;
    }

    let _ = writeln!(
        stdout,
        "installed {} {} to {}",
        manifest.name,
        manifest.version,
        destination.display()
    );
    0
}

fn copy_tree(source: &Path, destination: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(destination)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
