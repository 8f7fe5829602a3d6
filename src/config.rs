use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{FetchMode, Variable};
use crate::error::ProfileError;
use crate::executor::{DelayRange, ExecutorOptions, default_concurrency};
use crate::planner::{DEFAULT_PADDING_DEGREES, DEFAULT_WINDOW_DAYS, PlannerOptions};
use crate::request::DEFAULT_BASE_URL;
use crate::store::DEFAULT_OUTPUT_ROOT;

pub const DEFAULT_CONFIG_FILE: &str = "narr-profiles.json";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub output_root: Option<String>,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub padding_degrees: Option<f64>,
    #[serde(default)]
    pub window_days: Option<i64>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub delay_min_ms: Option<u64>,
    #[serde(default)]
    pub delay_max_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub skip_existing: Option<bool>,
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub output_root: Utf8PathBuf,
    pub catalog: Option<Utf8PathBuf>,
    pub base_url: String,
    pub variables: Vec<Variable>,
    pub mode: FetchMode,
    pub padding_degrees: f64,
    pub window_days: i64,
    pub concurrency: usize,
    pub timeout: Duration,
    pub delay: DelayRange,
    pub retries: u32,
    pub skip_existing: bool,
    pub run_timeout: Option<Duration>,
}

impl ResolvedConfig {
    pub fn planner_options(&self) -> PlannerOptions {
        PlannerOptions {
            mode: self.mode,
            padding_degrees: self.padding_degrees,
            window_days: self.window_days,
        }
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            concurrency: self.concurrency,
            delay: self.delay,
            skip_existing: self.skip_existing,
        }
    }

    /// Re-checked after command-line overrides are applied.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.concurrency == 0 {
            return Err(ProfileError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if !self.padding_degrees.is_finite() || self.padding_degrees < 0.0 {
            return Err(ProfileError::InvalidConfig(format!(
                "padding_degrees must be a finite non-negative number, got {}",
                self.padding_degrees
            )));
        }
        if self.window_days < 0 {
            return Err(ProfileError::InvalidConfig(
                "window_days must not be negative".to_string(),
            ));
        }
        if self.delay.min_ms > self.delay.max_ms {
            return Err(ProfileError::InvalidConfig(format!(
                "delay_min_ms ({}) exceeds delay_max_ms ({})",
                self.delay.min_ms, self.delay.max_ms
            )));
        }
        if self.timeout.is_zero() {
            return Err(ProfileError::InvalidConfig(
                "timeout_secs must be positive".to_string(),
            ));
        }
        if self.variables.is_empty() {
            return Err(ProfileError::InvalidConfig(
                "at least one variable is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        let defaults = DelayRange::default();
        Self {
            output_root: Utf8PathBuf::from(DEFAULT_OUTPUT_ROOT),
            catalog: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            variables: Variable::ALL.to_vec(),
            mode: FetchMode::default(),
            padding_degrees: DEFAULT_PADDING_DEGREES,
            window_days: DEFAULT_WINDOW_DAYS,
            concurrency: default_concurrency(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            delay: defaults,
            retries: 0,
            skip_existing: true,
            run_timeout: None,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `narr-profiles.json` when present. Without either the
    /// built-in defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ProfileError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ProfileError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ProfileError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ProfileError> {
        let defaults = ResolvedConfig::default();

        let variables = match config.variables {
            Some(names) => {
                let mut variables: Vec<Variable> = Vec::new();
                for name in names {
                    let variable: Variable = name.parse()?;
                    if !variables.contains(&variable) {
                        variables.push(variable);
                    }
                }
                variables
            }
            None => defaults.variables,
        };
        let mode = match config.mode {
            Some(mode) => mode.parse()?,
            None => defaults.mode,
        };

        let resolved = ResolvedConfig {
            output_root: config
                .output_root
                .map(Utf8PathBuf::from)
                .unwrap_or(defaults.output_root),
            catalog: config.catalog.map(Utf8PathBuf::from),
            base_url: config.base_url.unwrap_or(defaults.base_url),
            variables,
            mode,
            padding_degrees: config.padding_degrees.unwrap_or(defaults.padding_degrees),
            window_days: config.window_days.unwrap_or(defaults.window_days),
            concurrency: config.concurrency.unwrap_or(defaults.concurrency),
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            delay: DelayRange {
                min_ms: config.delay_min_ms.unwrap_or(defaults.delay.min_ms),
                max_ms: config.delay_max_ms.unwrap_or(defaults.delay.max_ms),
            },
            retries: config.retries.unwrap_or(defaults.retries),
            skip_existing: config.skip_existing.unwrap_or(defaults.skip_existing),
            run_timeout: config.run_timeout_secs.map(Duration::from_secs),
        };
        resolved.validate()?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.output_root, Utf8PathBuf::from("assets"));
        assert_eq!(resolved.variables, Variable::ALL.to_vec());
        assert_eq!(resolved.mode, FetchMode::Month);
        assert_eq!(resolved.padding_degrees, 0.5);
        assert_eq!(resolved.timeout, Duration::from_secs(60));
        assert_eq!(resolved.delay, DelayRange::default());
        assert!(resolved.skip_existing);
        assert!(resolved.concurrency >= 1);
    }

    #[test]
    fn variables_are_parsed_and_deduplicated() {
        let config = Config {
            variables: Some(vec!["air".to_string(), "TKE".to_string(), "air".to_string()]),
            mode: Some("window".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.variables, vec![Variable::Air, Variable::Tke]);
        assert_eq!(resolved.mode, FetchMode::Window);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let zero_workers = Config {
            concurrency: Some(0),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(zero_workers),
            Err(ProfileError::InvalidConfig(_))
        );

        let inverted_delay = Config {
            delay_min_ms: Some(900),
            delay_max_ms: Some(100),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(inverted_delay),
            Err(ProfileError::InvalidConfig(_))
        );

        let unknown_variable = Config {
            variables: Some(vec!["pres".to_string()]),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(unknown_variable),
            Err(ProfileError::InvalidVariable(_))
        );

        let no_variables = Config {
            variables: Some(Vec::new()),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(no_variables),
            Err(ProfileError::InvalidConfig(_))
        );
    }
}
