use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: Option<f32>,
}

impl LlmConfig {
    /// Base URL of the OpenAI-compatible API, falling back to the provider default.
    pub fn endpoint(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(base_url), _) => base_url.trim_end_matches('/'),
            (None, LlmProvider::OpenAi) => DEFAULT_OPENAI_BASE_URL,
            (None, LlmProvider::Ollama) => DEFAULT_OLLAMA_BASE_URL,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub store_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub llm_model: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 60,
                max_retries: 2,
                temperature: None,
            },
            store: StoreConfig { path: PathBuf::from("restaurant-data.txt") },
            logging: LoggingConfig { level: "warn".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    /// Loads defaults, then the config file, then `SAVOR_*` environment
    /// variables, then explicit overrides, and validates the result.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("savor.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = Some(temperature);
            }
        }

        if let Some(store) = patch.store {
            if let Some(path) = store.path {
                self.store.path = path;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SAVOR_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        // OPENAI_API_KEY is only a fallback for deployments that already export it.
        let api_key = read_env("SAVOR_LLM_API_KEY").or_else(|| {
            self.llm.api_key.is_none().then(|| read_env("OPENAI_API_KEY")).flatten()
        });
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("SAVOR_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("SAVOR_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("SAVOR_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("SAVOR_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("SAVOR_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("SAVOR_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("SAVOR_LLM_TEMPERATURE") {
            self.llm.temperature = Some(parse_f32("SAVOR_LLM_TEMPERATURE", &value)?);
        }

        if let Some(value) = read_env("SAVOR_STORE_PATH") {
            self.store.path = PathBuf::from(value);
        }

        let log_level = read_env("SAVOR_LOGGING_LEVEL").or_else(|| read_env("SAVOR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("SAVOR_LOGGING_FORMAT").or_else(|| read_env("SAVOR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(store_path) = overrides.store_path {
            self.store.path = store_path;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_store(&self.store)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("savor.toml"), PathBuf::from("config/savor.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if let Some(temperature) = llm.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::Validation(
                "llm.temperature must be in range 0.0..=2.0".to_string(),
            ));
        }
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider (set SAVOR_LLM_API_KEY or OPENAI_API_KEY)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {}
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_store(store: &StoreConfig) -> Result<(), ConfigError> {
    if store.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("store.path must not be empty".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    store: Option<StorePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const MANAGED_VARS: &[&str] = &[
        "OPENAI_API_KEY",
        "SAVOR_LLM_API_KEY",
        "SAVOR_LLM_PROVIDER",
        "SAVOR_LLM_BASE_URL",
        "SAVOR_LLM_MODEL",
        "SAVOR_LLM_TIMEOUT_SECS",
        "SAVOR_LLM_MAX_RETRIES",
        "SAVOR_LLM_TEMPERATURE",
        "SAVOR_STORE_PATH",
        "SAVOR_LOGGING_LEVEL",
        "SAVOR_LOG_LEVEL",
        "SAVOR_LOGGING_FORMAT",
        "SAVOR_LOG_FORMAT",
        "TEST_SAVOR_API_KEY",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    /// Runs `body` with only `vars` set among the managed variables, restoring
    /// whatever the process environment held before.
    fn with_env<T>(vars: &[(&str, &str)], body: impl FnOnce() -> T) -> T {
        let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let saved =
            MANAGED_VARS.iter().map(|var| (*var, env::var(var).ok())).collect::<Vec<_>>();

        for var in MANAGED_VARS {
            env::remove_var(var);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }

        let result = body();

        for (var, value) in saved {
            match value {
                Some(value) => env::set_var(var, value),
                None => env::remove_var(var),
            }
        }
        result
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        with_env(&[("TEST_SAVOR_API_KEY", "sk-from-env")], || {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("savor.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_SAVOR_API_KEY}"
model = "gpt-4o"

[store]
path = "data/reviews.txt"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            ensure(config.llm.model == "gpt-4o", "model should come from file")?;
            ensure(
                config.store.path == PathBuf::from("data/reviews.txt"),
                "store path should come from file",
            )
        })
    }

    #[test]
    fn missing_interpolation_variable_is_reported() {
        with_env(&[], || {
            let dir = TempDir::new().expect("tempdir");
            let path = dir.path().join("savor.toml");
            fs::write(&path, "[llm]\napi_key = \"${TEST_SAVOR_API_KEY}\"\n").expect("write");

            let error =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .expect_err("interpolation should fail");
            assert!(matches!(
                error,
                ConfigError::MissingEnvInterpolation { ref var } if var == "TEST_SAVOR_API_KEY"
            ));
        });
    }

    #[test]
    fn required_file_must_exist() {
        with_env(&[("SAVOR_LLM_API_KEY", "sk-test")], || {
            let dir = TempDir::new().expect("tempdir");
            let path = dir.path().join("absent.toml");
            let error = AppConfig::load(LoadOptions {
                config_path: Some(path.clone()),
                require_file: true,
                ..LoadOptions::default()
            })
            .expect_err("missing file should fail");
            assert!(matches!(error, ConfigError::MissingConfigFile(ref missing) if *missing == path));
        });
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        with_env(&[("SAVOR_LLM_API_KEY", "sk-from-env"), ("SAVOR_LLM_MODEL", "gpt-env")], || {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("savor.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "sk-from-file"
model = "gpt-file"
timeout_secs = 45

[store]
path = "from-file.txt"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    store_path: Some(PathBuf::from("from-override.txt")),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.store.path == PathBuf::from("from-override.txt"),
                "override store path should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.llm.model == "gpt-env", "env model should win over file")?;
            ensure(config.llm.timeout_secs == 45, "file timeout should win over default")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "env api key should win over file",
            )
        })
    }

    #[test]
    fn model_override_wins_over_env() {
        with_env(&[("SAVOR_LLM_API_KEY", "sk-test"), ("SAVOR_LLM_MODEL", "gpt-env")], || {
            let config = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    llm_model: Some("gpt-flag".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .expect("config");
            assert_eq!(config.llm.model, "gpt-flag");
        });
    }

    #[test]
    fn openai_key_is_a_fallback_only() {
        with_env(&[("OPENAI_API_KEY", "sk-openai")], || {
            let config = AppConfig::load(LoadOptions::default()).expect("config");
            assert_eq!(
                config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string()),
                Some("sk-openai".to_string())
            );
        });

        with_env(&[("OPENAI_API_KEY", "sk-openai"), ("SAVOR_LLM_API_KEY", "sk-savor")], || {
            let config = AppConfig::load(LoadOptions::default()).expect("config");
            assert_eq!(
                config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string()),
                Some("sk-savor".to_string())
            );
        });
    }

    #[test]
    fn missing_api_key_fails_fast_with_actionable_error() {
        with_env(&[], || {
            let error = AppConfig::load(LoadOptions::default())
                .expect_err("openai provider without a key must fail");
            assert!(matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            ));
        });
    }

    #[test]
    fn ollama_needs_no_key_and_has_a_local_endpoint() {
        with_env(&[("SAVOR_LLM_PROVIDER", "ollama")], || {
            let config = AppConfig::load(LoadOptions::default()).expect("config");
            assert_eq!(config.llm.provider, LlmProvider::Ollama);
            assert_eq!(config.llm.endpoint(), "http://localhost:11434/v1");
        });
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() {
        with_env(&[("SAVOR_LLM_API_KEY", "sk-test"), ("SAVOR_LLM_TIMEOUT_SECS", "soon")], || {
            let error = AppConfig::load(LoadOptions::default()).expect_err("bad override");
            assert!(matches!(
                error,
                ConfigError::InvalidEnvOverride { ref key, .. } if key == "SAVOR_LLM_TIMEOUT_SECS"
            ));
        });
    }

    #[test]
    fn logging_env_aliases_are_supported() {
        with_env(
            &[
                ("SAVOR_LLM_API_KEY", "sk-test"),
                ("SAVOR_LOG_LEVEL", "info"),
                ("SAVOR_LOG_FORMAT", "json"),
            ],
            || {
                let config = AppConfig::load(LoadOptions::default()).expect("config");
                assert_eq!(config.logging.level, "info");
                assert_eq!(config.logging.format, LogFormat::Json);
            },
        );
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() {
        with_env(&[("SAVOR_LLM_API_KEY", "sk-very-secret-value")], || {
            let config = AppConfig::load(LoadOptions::default()).expect("config");
            let debug = format!("{config:?}");

            assert!(!debug.contains("sk-very-secret-value"));
            assert_eq!(config.logging.format, LogFormat::Compact);
            assert_eq!(config.llm.endpoint(), "https://api.openai.com/v1");
        });
    }
}
