//! Configuration management for demonizer.
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
    time::Duration,
};

use crate::{
    constants::{CHILD_POLL_INTERVAL, DEFAULT_CONFIG_FILE, PARENT_POLL_INTERVAL},
    demon::{DemonKind, RestartPolicy},
    error::ConfigError,
};

/// Represents the structure of the configuration file.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Configuration version.
    pub version: String,
    /// Overrides the runtime state directory holding pid files.
    pub state_dir: Option<PathBuf>,
    /// Map of demon names to their pool configuration.
    pub demons: BTreeMap<String, DemonConfig>,
    /// Directory of the configuration file; relative paths are resolved against it.
    #[serde(skip)]
    pub project_dir: Option<PathBuf>,
}

/// Configuration for one pool of workers.
#[derive(Debug, Deserialize, Clone)]
pub struct DemonConfig {
    /// Number of worker slots.
    pub count: usize,
    /// Shell command each worker runs. Workers idle when absent.
    pub command: Option<String>,
    /// Restart behaviour for crashed workers.
    pub restart: Option<RestartConfig>,
    /// Interval between worker liveness checks (e.g. "5s").
    pub child_poll_interval: Option<String>,
    /// Interval between supervisor liveness checks inside each worker (e.g. "1s").
    pub parent_poll_interval: Option<String>,
}

/// Restart limits for a pool.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RestartConfig {
    /// Maximum number of restarts before the slot gives up. Unlimited when absent.
    pub max_restarts: Option<u32>,
    /// Delay before each restart (e.g. "2s").
    pub backoff: Option<String>,
}

impl Config {
    /// Resolves the configured state directory against the config file's directory.
    pub fn resolved_state_dir(&self) -> Option<PathBuf> {
        let dir = self.state_dir.as_ref()?;
        if dir.is_absolute() {
            return Some(dir.clone());
        }
        Some(match &self.project_dir {
            Some(base) => base.join(dir),
            None => dir.clone(),
        })
    }

    /// Builds the demon kinds described by the configuration, paired with their slot counts.
    ///
    /// `program` is the binary re-executed in the worker role.
    pub fn demon_kinds(
        &self,
        program: &Path,
    ) -> Result<Vec<(Arc<DemonKind>, usize)>, ConfigError> {
        self.demons
            .iter()
            .map(|(name, demon)| {
                let kind = demon.to_kind(name, program)?;
                Ok((Arc::new(kind), demon.count))
            })
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, demon) in &self.demons {
            if name.is_empty() || name.contains('/') {
                return Err(ConfigError::InvalidValue {
                    demon: name.clone(),
                    field: "name",
                    reason: "must be non-empty and must not contain '/'".into(),
                });
            }
            demon.to_kind(name, Path::new(""))?;
        }
        Ok(())
    }
}

impl DemonConfig {
    fn to_kind(&self, name: &str, program: &Path) -> Result<DemonKind, ConfigError> {
        let child = positive_interval(
            name,
            "child_poll_interval",
            self.child_poll_interval.as_deref(),
            CHILD_POLL_INTERVAL,
        )?;
        let parent = positive_interval(
            name,
            "parent_poll_interval",
            self.parent_poll_interval.as_deref(),
            PARENT_POLL_INTERVAL,
        )?;

        let restart = match &self.restart {
            Some(restart) => RestartPolicy {
                max_restarts: restart.max_restarts,
                backoff: restart.backoff.as_deref().map(parse_duration).transpose()?,
            },
            None => RestartPolicy::default(),
        };

        let mut kind = DemonKind::new(name, program)
            .with_restart_policy(restart)
            .with_poll_intervals(child, parent);
        if let Some(command) = &self.command {
            kind = kind.with_command(command.clone());
        }
        Ok(kind)
    }
}

fn positive_interval(
    demon: &str,
    field: &'static str,
    value: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    let interval = parse_duration(value)?;
    if interval.is_zero() {
        return Err(ConfigError::InvalidValue {
            demon: demon.to_string(),
            field,
            reason: "interval must be greater than zero".into(),
        });
    }
    // Workers receive the interval as whole milliseconds in a u64 argument.
    if u64::try_from(interval.as_millis()).is_err() {
        return Err(ConfigError::InvalidValue {
            demon: demon.to_string(),
            field,
            reason: "interval is too large".into(),
        });
    }
    Ok(interval)
}

/// Parses `"250ms"`, `"5s"`, `"2m"`, `"1h"` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();
    let invalid = || ConfigError::InvalidDuration(value.to_string());

    let (number, unit) = match trimmed.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, "s"),
    };
    let amount: u64 = number.parse().map_err(|_| invalid())?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => amount.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid),
        "h" => amount.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("env var pattern is valid")
});

/// Expands `${VAR}` and `$VAR` references within a string.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = &*ENV_VAR_PATTERN;

    if let Some(missing) = re
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .find(|name| env::var(name).is_err())
    {
        return Err(ConfigError::MissingEnvVar(missing));
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });
    Ok(result.to_string())
}

/// Resolves the configuration file path, falling back to `demon.yaml`.
pub fn resolve_config_path(config_path: Option<&str>) -> PathBuf {
    config_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Loads and parses the configuration file, expanding environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
    let config_path = resolve_config_path(config_path);

    let content = fs::read_to_string(&config_path).map_err(|e| {
        ConfigError::ReadError(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let expanded_content = expand_env_vars(&content)?;
    let mut config: Config = serde_yaml::from_str(&expanded_content)?;

    let base_path = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    config.project_dir = Some(base_path);

    config.validate()?;
    Ok(config)
}
