//! Configuration loading and root folder resolution
//!
//! The data root holds the SQLite database and anything else the service
//! writes. Resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `MDCS_ROOT_FOLDER` environment variable
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming the data root folder.
pub const ROOT_FOLDER_ENV: &str = "MDCS_ROOT_FOLDER";

/// Environment variable naming the HTTP listen port.
pub const PORT_ENV: &str = "MDCS_PORT";

/// Default HTTP listen port for mdcs-data.
pub const DEFAULT_PORT: u16 = 5731;

/// File name of the shared SQLite database inside the root folder.
pub const DATABASE_FILE: &str = "mdcs.db";

/// Resolves the data root folder for a service.
#[derive(Debug)]
pub struct RootFolderResolver {
    service_name: String,
    cli_arg: Option<String>,
}

impl RootFolderResolver {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            cli_arg: std::env::args().nth(1),
        }
    }

    /// Create a resolver with an explicit command-line value (for tests).
    pub fn with_cli_arg(service_name: &str, cli_arg: Option<String>) -> Self {
        Self {
            service_name: service_name.to_string(),
            cli_arg,
        }
    }

    /// Resolve the root folder following the documented priority order.
    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            tracing::info!(service = %self.service_name, "Root folder from command line: {}", path);
            return PathBuf::from(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            tracing::info!(service = %self.service_name, "Root folder from {}: {}", ROOT_FOLDER_ENV, path);
            return PathBuf::from(path);
        }

        // Priority 3: TOML config file
        if let Some(path) = root_folder_from_config_file() {
            tracing::info!(service = %self.service_name, "Root folder from config file: {}", path.display());
            return path;
        }

        // Priority 4: OS-dependent compiled default
        let default = default_root_folder();
        tracing::info!(service = %self.service_name, "Root folder defaulted to {}", default.display());
        default
    }
}

/// Prepares a resolved root folder for use.
#[derive(Debug)]
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the root folder if it does not exist yet.
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
        } else if !self.root.is_dir() {
            return Err(Error::Config(format!(
                "Root folder path exists but is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Path of the shared SQLite database inside the root folder.
    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Resolve the HTTP listen port from the environment, falling back to the
/// compiled default. A malformed value falls back rather than aborting.
pub fn resolve_port() -> u16 {
    match std::env::var(PORT_ENV) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring malformed {}: {}", PORT_ENV, value);
            DEFAULT_PORT
        }),
        Err(_) => DEFAULT_PORT,
    }
}

/// Read the `root_folder` key from the first config file found.
fn root_folder_from_config_file() -> Option<PathBuf> {
    let config_path = find_config_file()?;
    let content = std::fs::read_to_string(&config_path).ok()?;
    let value: toml::Value = toml::from_str(&content).ok()?;
    value
        .get("root_folder")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
}

/// Locate the platform config file, if any.
///
/// Linux checks `~/.config/mdcs/config.toml` then `/etc/mdcs/config.toml`;
/// macOS and Windows use the per-user config directory only.
fn find_config_file() -> Option<PathBuf> {
    if let Some(user_config) = dirs::config_dir().map(|d| d.join("mdcs").join("config.toml")) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/mdcs/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default root folder path.
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mdcs"))
        .unwrap_or_else(|| PathBuf::from("./mdcs_data"))
}
