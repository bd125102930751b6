//! Process descriptor configuration.
//!
//! A [`ProcessConfig`] is plain data: what to run and how to supervise it.
//! It loads from JSON or YAML with camelCase keys:
//!
//! ```yaml
//! name: worker
//! cmd: /usr/local/bin/worker
//! args: ["--port", "8080"]
//! dir: /srv/worker
//! env: ["RUST_LOG=info"]
//! startTimeout: 2s
//! stopTimeout: 10000
//! maxRestarts: 5
//! restartPolicy: on-failure
//! ```
//!
//! Timeouts are milliseconds when written as integers; strings with an
//! `ms`, `s` or `m` suffix are accepted too. A zero (or missing) timeout
//! takes its value from [`TimeoutDefaults`] when the process is run.

pub mod validation;

use anyhow::{Context, Result};
use hsu_common::ProcessResult;
use hsu_process::{parse_env_entry, ExecutionSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Whether a process that exited on its own is started again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RestartPolicy {
    /// Never restart; any unrecognized policy name means this
    #[default]
    Never,
    /// Restart only after an abnormal exit
    OnFailure,
    /// Restart after every exit
    Always,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::Never => "never",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::Always => "always",
        }
    }

    /// Parse a policy name. Unknown names fall back to [`RestartPolicy::Never`].
    pub fn parse(name: &str) -> Self {
        match name {
            "always" => RestartPolicy::Always,
            "on-failure" => RestartPolicy::OnFailure,
            _ => RestartPolicy::Never,
        }
    }

    /// Decide whether an exit with `outcome` leads to another start.
    pub fn should_restart(&self, outcome: &ProcessResult<()>) -> bool {
        match self {
            RestartPolicy::Always => true,
            RestartPolicy::OnFailure => outcome.is_err(),
            RestartPolicy::Never => false,
        }
    }
}

impl From<String> for RestartPolicy {
    fn from(name: String) -> Self {
        RestartPolicy::parse(&name)
    }
}

impl From<RestartPolicy> for String {
    fn from(policy: RestartPolicy) -> Self {
        policy.as_str().to_string()
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeouts applied in place of zero values in a [`ProcessConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutDefaults {
    pub start: Duration,
    pub backoff: Duration,
    pub restart: Duration,
    pub stop: Duration,
    pub kill: Duration,
}

impl Default for TimeoutDefaults {
    fn default() -> Self {
        Self {
            start: Duration::from_millis(1000),
            backoff: Duration::from_millis(5000),
            restart: Duration::from_millis(100),
            stop: Duration::from_millis(20000),
            kill: Duration::from_millis(5000),
        }
    }
}

/// Description of one supervised process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessConfig {
    /// Name used in logs and errors; defaults to `cmd`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Path to the executable
    pub cmd: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory; the supervisor's own when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// `KEY=VALUE` entries replacing the environment; empty inherits it
    #[serde(default)]
    pub env: Vec<String>,

    /// How long a fresh child must stay up to count as started
    #[serde(default, with = "duration_ms")]
    pub start_timeout: Duration,

    /// Delay before another start after an early exit
    #[serde(default, with = "duration_ms")]
    pub backoff_timeout: Duration,

    /// Grace period after the interrupt signal
    #[serde(default, with = "duration_ms")]
    pub stop_timeout: Duration,

    /// Time allowed for the child to disappear after the kill signal
    #[serde(default, with = "duration_ms")]
    pub kill_timeout: Duration,

    /// Limit on consecutive start attempts, 0 means unlimited
    #[serde(default)]
    pub max_start_attempts: u32,

    /// Limit on restarts after a successful start, 0 means unlimited
    #[serde(default)]
    pub max_restarts: u32,

    /// Delay before restarting a child that ran past its start timeout
    #[serde(default, with = "duration_ms")]
    pub restart_timeout: Duration,

    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

impl ProcessConfig {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Default::default()
        }
    }

    /// Load and validate a configuration file.
    ///
    /// Files ending in `.json` are parsed as JSON, anything else as YAML.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_json = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        };
        config.with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(content: &str) -> Result<Self> {
        let config: ProcessConfig =
            serde_json::from_str(content).context("Failed to parse JSON configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML configuration
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ProcessConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Name used for this process in logs and errors.
    pub fn display_name(&self) -> &str {
        match self.name {
            Some(ref name) if !name.is_empty() => name,
            _ => &self.cmd,
        }
    }

    /// Copy of the config with every zero timeout replaced by its default.
    pub fn normalized(&self, defaults: &TimeoutDefaults) -> Self {
        fn or_default(value: Duration, default: Duration) -> Duration {
            if value.is_zero() {
                default
            } else {
                value
            }
        }

        Self {
            start_timeout: or_default(self.start_timeout, defaults.start),
            backoff_timeout: or_default(self.backoff_timeout, defaults.backoff),
            restart_timeout: or_default(self.restart_timeout, defaults.restart),
            stop_timeout: or_default(self.stop_timeout, defaults.stop),
            kill_timeout: or_default(self.kill_timeout, defaults.kill),
            ..self.clone()
        }
    }

    /// Launch spec for one start of this process.
    pub fn execution_spec(&self) -> ProcessResult<ExecutionSpec> {
        let environment = if self.env.is_empty() {
            None
        } else {
            Some(
                self.env
                    .iter()
                    .map(|entry| parse_env_entry(entry))
                    .collect::<ProcessResult<Vec<_>>>()?,
            )
        };

        Ok(ExecutionSpec {
            id: self.display_name().to_string(),
            executable: self.cmd.clone(),
            args: self.args.clone(),
            working_directory: self.dir.clone(),
            environment,
        })
    }
}

/// Durations as integer milliseconds, also accepting `"500ms"`, `"5s"`,
/// `"1m"` strings on input.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) => Ok(Duration::from_millis(millis)),
            Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let invalid = || format!("Invalid duration: {}", s);

        // "ms" must be checked before "s"
        if let Some(num) = s.strip_suffix("ms") {
            num.parse().map(Duration::from_millis).map_err(|_| invalid())
        } else if let Some(num) = s.strip_suffix('s') {
            num.parse().map(Duration::from_secs).map_err(|_| invalid())
        } else if let Some(num) = s.strip_suffix('m') {
            let mins: u64 = num.parse().map_err(|_| invalid())?;
            let secs = mins.checked_mul(60).ok_or_else(invalid)?;
            Ok(Duration::from_secs(secs))
        } else {
            s.parse().map(Duration::from_millis).map_err(|_| {
                format!("Duration must be milliseconds or end with 'ms', 's', or 'm': {}", s)
            })
        }
    }
}
