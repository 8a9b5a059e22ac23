//! Configuration
//!
//! Layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. TOML file: `--config` / `CHOREO_CONFIG_PATH`, else `choreo.toml` in the
//!    working directory if present
//! 3. Environment: `CHOREO_<SECTION>__<KEY>`, e.g. `CHOREO_ENGINE__SLICE_BUDGET=16`
//!
//! A `.env` file is loaded first so its variables take part in step 3.

use std::env;
use std::path::PathBuf;

use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

const ENV_PREFIX: &str = "CHOREO";
const CONFIG_PATH_VAR: &str = "CHOREO_CONFIG_PATH";
const DEFAULT_FILE: &str = "choreo";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Id of the implicit scope every root context starts with
    #[serde(default = "default_implicit_scope_id")]
    pub implicit_scope_id: String,

    /// Continuations a context runs before yielding to the runtime
    #[serde(default = "default_slice_budget")]
    pub slice_budget: usize,
}

fn default_implicit_scope_id() -> String {
    "main".to_string()
}

fn default_slice_budget() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            implicit_scope_id: default_implicit_scope_id(),
            slice_budget: default_slice_budget(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` wins when set
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_ansi() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            ansi: default_ansi(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from the default file search and environment
    pub fn load() -> EngineResult<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.slice_budget == 0 {
            return Err(ConfigError::Message(
                "engine.slice_budget must be greater than zero".to_string(),
            ));
        }
        if self.engine.implicit_scope_id.trim().is_empty() {
            return Err(ConfigError::Message(
                "engine.implicit_scope_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    use_env: Option<bool>,
}

impl ConfigBuilder {
    /// Explicit config file; the file must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Whether environment variables (and `.env`) are consulted. Defaults to
    /// true.
    pub fn use_env(mut self, use_env: bool) -> Self {
        self.use_env = Some(use_env);
        self
    }

    pub fn build(self) -> EngineResult<Config> {
        let use_env = self.use_env.unwrap_or(true);
        if use_env {
            dotenvy::dotenv().ok();
        }

        let path = self.config_path.or_else(|| {
            use_env
                .then(|| env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from))
                .flatten()
        });

        let mut builder = config::Config::builder()
            .set_default("engine.implicit_scope_id", default_implicit_scope_id())?
            .set_default("engine.slice_budget", default_slice_budget() as i64)?
            .set_default("logging.filter", default_filter())?
            .set_default("logging.ansi", default_ansi())?;

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_FILE).required(false)),
        };

        if use_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
