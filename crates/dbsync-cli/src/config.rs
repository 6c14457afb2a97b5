//! Configuration file handling for dbsync.
//!
//! Looks for `.config/dbsync.toml` in the current directory or any parent directory.

pub use dbsync::Config;

use camino::{Utf8Path, Utf8PathBuf};

const CONFIG_FILE: &str = ".config/dbsync.toml";

/// A loaded configuration and the project root it was found in (the
/// directory holding `.config/`).
#[derive(Debug)]
pub struct Loaded {
    pub config: Config,
    pub root: Utf8PathBuf,
}

impl Loaded {
    /// The configured descriptor path, resolved against the project root.
    pub fn descriptor(&self) -> Option<Utf8PathBuf> {
        self.config.descriptor.as_ref().map(|p| self.root.join(p))
    }
}

/// Load configuration from `.config/dbsync.toml`, searching up the directory tree.
pub fn load() -> Result<Loaded, ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| ConfigError::Io(format!("current directory is not UTF-8: {}", p.display())))?;
    load_from(&cwd)
}

/// Load configuration starting from a specific directory.
pub fn load_from(start: &Utf8Path) -> Result<Loaded, ConfigError> {
    let (config_path, root) = find_config_file(start)?;
    let content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;

    let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    tracing::debug!(path = %config_path, "loaded configuration");
    Ok(Loaded { config, root })
}

/// Like [`load`], but a missing file yields the defaults rooted at the
/// current directory.
pub fn load_or_default() -> Result<Loaded, ConfigError> {
    match load() {
        Err(ConfigError::NotFound) => Ok(Loaded {
            config: Config::default(),
            root: Utf8PathBuf::from("."),
        }),
        other => other,
    }
}

/// Find the config file by searching up the directory tree. Returns the
/// file path and the directory it was found under.
fn find_config_file(start: &Utf8Path) -> Result<(Utf8PathBuf, Utf8PathBuf), ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE);
        if config_path.exists() {
            return Ok((config_path, current));
        }

        if !current.pop() {
            return Err(ConfigError::NotFound);
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// No `.config/dbsync.toml` found in any parent directory
    NotFound,
    /// I/O error reading the file
    Io(String),
    /// The file is not valid TOML or has unknown keys
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound => write!(
                f,
                "No {} found in current directory or any parent",
                CONFIG_FILE
            ),
            ConfigError::Io(e) => write!(f, "Failed to read {}: {}", CONFIG_FILE, e),
            ConfigError::Parse(e) => write!(f, "Failed to parse {}: {}", CONFIG_FILE, e),
        }
    }
}

impl std::error::Error for ConfigError {}
