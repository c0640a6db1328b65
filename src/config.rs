use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;
use crate::common::labels::Labels;
use crate::common::time::parse_duration;
use crate::common::types::Timestamp;
use crate::error::{TsdbError, TsdbResult};
use crate::storage::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};

pub const DEFAULT_MAX_SAMPLES: usize = 10_000;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOOKBACK_DELTA: Duration = Duration::from_secs(5 * 60);
/// Default step used if not set.
pub const DEFAULT_STEP: Duration = Duration::from_secs(1);
pub const DEFAULT_QUERY: &str = "http_requests_total";

const ENV_PREFIX: &str = "EPHEMERAL_";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Prometheus' textual rendering of a matrix
    #[default]
    Text,
    /// Prometheus HTTP API `data` object
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format \"{other}\", expected text or json")),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// One sample ingested by each pipeline run, timestamped relative to the run's base time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleSpec {
    pub labels: Labels,
    /// milliseconds added to the base time
    pub offset: i64,
    pub value: f64,
}

impl SampleSpec {
    pub fn new(labels: Labels, offset: i64, value: f64) -> Self {
        Self { labels, offset, value }
    }

    pub fn timestamp(&self, base: Timestamp) -> Timestamp {
        base.saturating_add(self.offset)
    }
}

fn default_samples() -> Vec<SampleSpec> {
    let labels = Labels::from_metric_name(DEFAULT_QUERY).unwrap_or_default();
    [(0, 0.0), (1000, 5.0), (2000, 10.0)]
        .into_iter()
        .map(|(offset, value)| SampleSpec::new(labels.clone(), offset, value))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Samples per chunk before it is sealed.
    pub chunk_size: usize,

    /// The maximum number of series the head accepts. 0 disables the limit.
    pub max_series_limit: usize,

    /// Upper bound on samples loaded plus points produced by a single query.
    pub max_samples: usize,

    #[serde(with = "duration_format")]
    pub query_timeout: Duration,

    /// Synonym to -query.lookback-delta from Prometheus: how far back from an evaluation
    /// instant to look for the latest sample of a series.
    #[serde(with = "duration_format")]
    pub max_look_back: Duration,

    #[serde(with = "duration_format")]
    pub default_step: Duration,

    /// The expression evaluated by every run.
    pub query: String,

    /// Start of the query range, in milliseconds relative to the base time.
    pub query_start_offset: i64,

    /// End of the query range, in milliseconds relative to the base time.
    pub query_end_offset: i64,

    /// Limits the number of digits after the decimal point in result values.
    pub round_digits: Option<u8>,

    pub output_format: OutputFormat,

    pub samples: Vec<SampleSpec>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_series_limit: 0,
            max_samples: DEFAULT_MAX_SAMPLES,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            max_look_back: DEFAULT_LOOKBACK_DELTA,
            default_step: DEFAULT_STEP,
            query: DEFAULT_QUERY.to_string(),
            query_start_offset: 0,
            query_end_offset: 3000,
            round_digits: None,
            output_format: OutputFormat::Text,
            samples: default_samples(),
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> TsdbResult<Self> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| TsdbError::InvalidConfiguration(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> TsdbResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            TsdbError::InvalidConfiguration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Default settings, overridden by `EPHEMERAL_*` environment variables.
    pub fn from_env() -> TsdbResult<Self> {
        let mut settings = match std::env::var(format!("{ENV_PREFIX}CONFIG")) {
            Ok(path) => Self::load_file(path)?,
            Err(_) => Settings::default(),
        };
        settings.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Applies overrides looked up by variable name (e.g. `EPHEMERAL_MAX_SAMPLES`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> TsdbResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = get_setting::<usize>(&get, "CHUNK_SIZE")? {
            self.chunk_size = v;
        }
        if let Some(v) = get_setting::<usize>(&get, "MAX_SERIES")? {
            self.max_series_limit = v;
        }
        if let Some(v) = get_setting::<usize>(&get, "MAX_SAMPLES")? {
            self.max_samples = v;
        }
        if let Some(v) = get_duration_setting(&get, "QUERY_TIMEOUT")? {
            self.query_timeout = v;
        }
        if let Some(v) = get_duration_setting(&get, "LOOKBACK_DELTA")? {
            self.max_look_back = v;
        }
        if let Some(v) = get_duration_setting(&get, "STEP")? {
            self.default_step = v;
        }
        if let Some(v) = get("QUERY") {
            self.query = v;
        }
        if let Some(v) = get_setting::<i64>(&get, "QUERY_START_OFFSET")? {
            self.query_start_offset = v;
        }
        if let Some(v) = get_setting::<i64>(&get, "QUERY_END_OFFSET")? {
            self.query_end_offset = v;
        }
        if let Some(v) = get_setting::<u8>(&get, "ROUND_DIGITS")? {
            self.round_digits = Some(v);
        }
        if let Some(v) = get_setting::<OutputFormat>(&get, "OUTPUT_FORMAT")? {
            self.output_format = v;
        }
        self.validate()
    }

    pub fn validate(&self) -> TsdbResult<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(TsdbError::InvalidConfiguration(format!(
                "chunk_size must be between 1 and {MAX_CHUNK_SIZE}"
            )));
        }
        if self.max_samples == 0 {
            return Err(TsdbError::InvalidConfiguration("max_samples must be positive".to_string()));
        }
        if self.default_step.is_zero() {
            return Err(TsdbError::InvalidConfiguration("default_step must be positive".to_string()));
        }
        if self.max_look_back.is_zero() {
            return Err(TsdbError::InvalidConfiguration("max_look_back must be positive".to_string()));
        }
        if self.query.trim().is_empty() {
            return Err(TsdbError::InvalidConfiguration("query must not be empty".to_string()));
        }
        Ok(())
    }
}

fn get_setting<T>(get: &impl Fn(&str) -> Option<String>, name: &str) -> TsdbResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    get(name)
        .map(|v| {
            v.trim().parse::<T>().map_err(|e| {
                TsdbError::InvalidConfiguration(format!("{ENV_PREFIX}{name}=\"{v}\": {e}"))
            })
        })
        .transpose()
}

fn get_duration_setting(get: &impl Fn(&str) -> Option<String>, name: &str) -> TsdbResult<Option<Duration>> {
    get(name)
        .map(|v| {
            parse_duration(v.trim()).map_err(|e| {
                TsdbError::InvalidConfiguration(format!("{ENV_PREFIX}{name}=\"{v}\": {e}"))
            })
        })
        .transpose()
}

static GLOBAL_SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Installs the process-wide settings. Returns false if they were already set.
pub fn init_global_settings(settings: Settings) -> bool {
    GLOBAL_SETTINGS.set(settings).is_ok()
}

/// Process-wide settings, read from the environment on first use if never installed.
pub fn get_global_settings() -> &'static Settings {
    GLOBAL_SETTINGS.get_or_init(|| {
        Settings::from_env().unwrap_or_else(|e| {
            warn!("invalid settings in environment, using defaults: {e}");
            Settings::default()
        })
    })
}

/// Durations are written as Prometheus duration strings ("5m", "1s") or as integer
/// milliseconds.
mod duration_format {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};
    use crate::common::time::parse_duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationRepr {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}ms", value.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match DurationRepr::deserialize(deserializer)? {
            DurationRepr::Millis(ms) => Ok(Duration::from_millis(ms)),
            DurationRepr::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
        }
    }
}
