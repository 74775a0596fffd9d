//! Engine configuration.
//!
//! Every tunable lives in [`EngineConfig`], handed to the engine once at
//! construction. [`EngineConfig::from_env`] is meant for binaries; the
//! engine itself never looks at the process environment.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::availability::DEFAULT_FAILURE_THRESHOLD;
use crate::error::AppError;
use crate::retry::RetryPolicy;
use crate::route::RouteRule;

/// Name of the direct-HTTP backend that serves the default catch-all rule.
pub const DEFAULT_BACKEND: &str = "http";

/// Default per-call deadline for a backend.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry and deadline settings for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendSettings {
    pub retry: RetryPolicy,
    /// Deadline for a single call (not the whole retry sequence).
    pub timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl BackendSettings {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Everything the resolution engine needs besides the backends themselves.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub routes: Vec<RouteRule>,
    /// Per-backend overrides of `default_settings`.
    pub backends: HashMap<String, BackendSettings>,
    pub default_settings: BackendSettings,
    /// Consecutive failures before a backend is skipped.
    pub failure_threshold: u32,
    /// Turn final exhaustion of a URL into an error instead of dropping it.
    pub strict_mode: bool,
    /// URLs resolved in parallel within one batch.
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            routes: vec![RouteRule::catch_all(DEFAULT_BACKEND)],
            backends: HashMap::new(),
            default_settings: BackendSettings::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            strict_mode: false,
            concurrency: 1,
        }
    }
}

impl EngineConfig {
    /// Replaces the route table.
    pub fn with_routes(mut self, routes: Vec<RouteRule>) -> Self {
        self.routes = routes;
        self
    }

    /// Adds a rule to the route table.
    pub fn with_route(mut self, rule: RouteRule) -> Self {
        self.routes.push(rule);
        self
    }

    pub fn with_backend_settings(
        mut self,
        backend: impl Into<String>,
        settings: BackendSettings,
    ) -> Self {
        self.backends.insert(backend.into(), settings);
        self
    }

    pub fn with_default_settings(mut self, settings: BackendSettings) -> Self {
        self.default_settings = settings;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn settings_for(&self, backend: &str) -> &BackendSettings {
        self.backends.get(backend).unwrap_or(&self.default_settings)
    }

    /// Checks the numeric settings. Route table checks happen when the
    /// engine compiles its selector.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.failure_threshold == 0 {
            return Err(AppError::ConfigError(
                "failure_threshold must be at least 1".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(AppError::ConfigError("concurrency must be at least 1".into()));
        }
        let all = std::iter::once((None, &self.default_settings))
            .chain(self.backends.iter().map(|(k, v)| (Some(k.as_str()), v)));
        for (name, settings) in all {
            if settings.retry.max_attempts == 0 {
                return Err(AppError::ConfigError(format!(
                    "max_attempts must be at least 1 for {}",
                    name.unwrap_or("default settings")
                )));
            }
            if settings.timeout.is_zero() {
                return Err(AppError::ConfigError(format!(
                    "timeout must be non-zero for {}",
                    name.unwrap_or("default settings")
                )));
            }
            if settings.retry.max_delay < settings.retry.base_delay {
                return Err(AppError::ConfigError(format!(
                    "max_delay ({:?}) must not be below base_delay ({:?}) for {}",
                    settings.retry.max_delay,
                    settings.retry.base_delay,
                    name.unwrap_or("default settings")
                )));
            }
        }
        Ok(())
    }

    /// Builds the configuration from the process environment.
    ///
    /// | Variable | Effect |
    /// |----------|--------|
    /// | `COURIER_ROUTES_FILE` | JSON file read with [`EngineConfigFile`] |
    /// | `COURIER_FAILURE_THRESHOLD` | overrides `failure_threshold` |
    /// | `COURIER_STRICT` | `1`/`true`/`yes` enables strict mode |
    /// | `COURIER_CONCURRENCY` | overrides `concurrency` |
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let mut config = match lookup("COURIER_ROUTES_FILE") {
            Some(path) if !path.trim().is_empty() => EngineConfigFile::load(path.trim())?.into_config()?,
            _ => Self::default(),
        };

        if let Some(v) = lookup("COURIER_FAILURE_THRESHOLD") {
            config.failure_threshold = parse_var("COURIER_FAILURE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("COURIER_STRICT") {
            config.strict_mode = parse_flag(&v);
        }
        if let Some(v) = lookup("COURIER_CONCURRENCY") {
            config.concurrency = parse_var("COURIER_CONCURRENCY", &v)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::ConfigError(format!("Invalid value for {key}: '{value}'")))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ---------------------------------------------------------------------------
// JSON file format
// ---------------------------------------------------------------------------

/// Per-backend settings as written in a config file. Missing fields fall back
/// to the file's `defaults`, then to built-in defaults.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSettingsFile {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub timeout_secs: Option<f64>,
}

impl BackendSettingsFile {
    fn apply(&self, base: BackendSettings) -> Result<BackendSettings, AppError> {
        let mut settings = base;
        if let Some(n) = self.max_attempts {
            settings.retry.max_attempts = n;
        }
        if let Some(ms) = self.base_delay_ms {
            settings.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            settings.retry.max_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = self.timeout_secs {
            settings.timeout = Duration::try_from_secs_f64(secs).map_err(|e| {
                AppError::ConfigError(format!("Invalid timeout_secs {secs}: {e}"))
            })?;
        }
        Ok(settings)
    }
}

/// On-disk engine configuration.
///
/// ```json
/// {
///   "routes": [
///     {"name": "reader", "patterns": ["*medium.com*"], "domains": ["*.substack.com"], "priority": 1},
///     {"name": "http", "patterns": ["*"], "domains": ["*"], "priority": 999}
///   ],
///   "defaults": {"max_attempts": 3, "base_delay_ms": 2000, "max_delay_ms": 10000, "timeout_secs": 30},
///   "backends": {"reader": {"timeout_secs": 60}},
///   "failure_threshold": 3,
///   "strict_mode": false,
///   "concurrency": 4
/// }
/// ```
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfigFile {
    #[serde(default)]
    pub routes: Vec<RouteRule>,
    #[serde(default)]
    pub defaults: BackendSettingsFile,
    #[serde(default)]
    pub backends: HashMap<String, BackendSettingsFile>,
    pub failure_threshold: Option<u32>,
    pub strict_mode: Option<bool>,
    pub concurrency: Option<usize>,
}

impl EngineConfigFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Resolves defaults. An empty route table becomes the single default
    /// catch-all rule.
    pub fn into_config(self) -> Result<EngineConfig, AppError> {
        let base = EngineConfig::default();
        let default_settings = self.defaults.apply(base.default_settings)?;

        let backends = self
            .backends
            .iter()
            .map(|(name, s)| Ok((name.clone(), s.apply(default_settings)?)))
            .collect::<Result<HashMap<_, _>, AppError>>()?;

        let config = EngineConfig {
            routes: if self.routes.is_empty() {
                base.routes
            } else {
                self.routes
            },
            backends,
            default_settings,
            failure_threshold: self.failure_threshold.unwrap_or(base.failure_threshold),
            strict_mode: self.strict_mode.unwrap_or(base.strict_mode),
            concurrency: self.concurrency.unwrap_or(base.concurrency),
        };
        config.validate()?;
        Ok(config)
    }
}
