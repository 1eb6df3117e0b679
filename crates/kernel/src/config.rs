use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stata_code_chunker::ChunkerConfig;
use stata_session::DispatchConfig;
use std::path::{Path, PathBuf};

/// Looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "stata-bridge.toml";

pub const ENV_CACHE_DIR: &str = "STATA_BRIDGE_CACHE_DIR";
pub const ENV_ERROR_POLICY: &str = "STATA_BRIDGE_ERROR_POLICY";
pub const ENV_STATEMENT_TIMEOUT: &str = "STATA_BRIDGE_STATEMENT_TIMEOUT_SECS";
pub const ENV_STATA_PATH: &str = "STATA_BRIDGE_STATA_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Interpreter binary started by `stata-bridge run`
    pub stata_path: PathBuf,
    pub stata_args: Vec<String>,

    /// Where command logs live. Defaults to the user cache directory.
    pub cache_dir: Option<PathBuf>,

    /// Write every dispatched plan to `<cache>/commands/<fingerprint>.do`
    pub command_log: bool,

    pub chunker: ChunkerConfig,
    pub dispatch: DispatchConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            stata_path: PathBuf::from("stata"),
            stata_args: vec!["-q".to_string()],
            cache_dir: None,
            command_log: true,
            chunker: ChunkerConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl KernelConfig {
    /// Defaults, then the config file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid configuration")?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse configuration")
    }

    /// Apply `STATA_BRIDGE_*` overrides from `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(policy) = lookup(ENV_ERROR_POLICY) {
            self.dispatch.error_policy = policy
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("{ENV_ERROR_POLICY}={policy}"))?;
        }
        if let Some(secs) = lookup(ENV_STATEMENT_TIMEOUT) {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("{ENV_STATEMENT_TIMEOUT}={secs}"))?;
            self.dispatch.statement_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(path) = lookup(ENV_STATA_PATH).filter(|v| !v.trim().is_empty()) {
            self.stata_path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.chunker.validate()?;
        self.dispatch.validate()?;
        if self.stata_path.as_os_str().is_empty() {
            return Err("stata_path must not be empty".to_string());
        }
        Ok(())
    }

    /// Configured cache directory, else `<user cache>/stata-bridge`
    #[must_use]
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("stata-bridge")))
    }

    #[must_use]
    pub fn command_log_dir(&self) -> Option<PathBuf> {
        if !self.command_log {
            return None;
        }
        self.resolved_cache_dir().map(|dir| dir.join("commands"))
    }
}
