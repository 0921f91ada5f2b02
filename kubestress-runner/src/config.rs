//! Configuration for the kubestress runner.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `KS__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `KS__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `KS__ENDPOINT=https://127.0.0.1:6443` sets the API server address
//! - `KS__RATE_LIMITS__QPS=100` sets the client-side request rate
//! - `KS__LOGGING__LEVEL=debug` sets the log level
//!
//! # YAML Configuration File
//!
//! Scenarios are usually defined in a YAML file:
//!
//! ```yaml
//! kubeconfig: ./kubeconfig
//! rate_limits:
//!   qps: 500
//!   burst: 500
//!
//! scenarios:
//!   - name: aggregated-lookup
//!     concurrency: 100
//!     total: 1000
//!     payload_size: 1000KiB
//!     operation:
//!       type: lookup
//!       group: example.com
//!       version: v1alpha1
//!   - concurrency: 100
//!     total: 20000
//!     operation:
//!       type: roles
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::rate_limits::RateLimits;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "KS__";

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// Returns the secret in plain text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// The remote operation a scenario exercises.
///
/// The `type` field in YAML determines which variant is used. Every variant targets a different
/// API of the cluster and turns the synthesized payload into a different part of the request.
///
/// Used in: [`Scenario::operation`]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OperationConfig {
    /// Looks up an object through an aggregated API (type `"lookup"`).
    ///
    /// The payload is used as the *resource* segment of the request path, so large payloads
    /// produce very long URLs.
    ///
    /// # Example
    ///
    /// ```yaml
    /// operation:
    ///   type: lookup
    ///   group: example.com
    ///   version: v1alpha1
    ///   namespace: default
    ///   object: tmp
    /// ```
    Lookup {
        /// API group of the aggregated API. Defaults to `example.com`.
        #[serde(default = "default_group")]
        group: String,
        /// API version of the aggregated API. Defaults to `v1alpha1`.
        #[serde(default = "default_version")]
        version: String,
        /// Namespace to look up the object in. Defaults to `default`.
        #[serde(default = "default_namespace")]
        namespace: String,
        /// Name of the object to look up. Defaults to `tmp`.
        #[serde(default = "default_object")]
        object: String,
    },

    /// Creates a batch job and deletes it again (type `"jobs"`).
    ///
    /// The payload becomes the job's `spec.managedBy` field.
    Jobs {
        /// Namespace to create jobs in. Defaults to `default`.
        #[serde(default = "default_namespace")]
        namespace: String,
        /// Container image of the job's only container. Defaults to `busybox`.
        #[serde(default = "default_image")]
        image: String,
    },

    /// Registers a custom resource definition and deletes it again (type `"schemas"`).
    ///
    /// The payload is used as the kind and forms the group, plural and singular names.
    Schemas,

    /// Creates a cluster role (type `"roles"`).
    ///
    /// The payload becomes the name of the role.
    Roles,
}

impl OperationConfig {
    /// The `type` name of this operation.
    pub fn kind(&self) -> &'static str {
        match self {
            OperationConfig::Lookup { .. } => "lookup",
            OperationConfig::Jobs { .. } => "jobs",
            OperationConfig::Schemas => "schemas",
            OperationConfig::Roles => "roles",
        }
    }

    /// The payload size used when a scenario does not configure one.
    pub fn default_payload_size(&self) -> ByteSize {
        match self {
            OperationConfig::Lookup { .. } => ByteSize::kib(1000),
            OperationConfig::Jobs { .. } => ByteSize::b(52),
            OperationConfig::Schemas => ByteSize::b(61),
            OperationConfig::Roles => ByteSize::kib(500),
        }
    }
}

fn default_group() -> String {
    "example.com".into()
}

fn default_version() -> String {
    "v1alpha1".into()
}

fn default_namespace() -> String {
    "default".into()
}

fn default_object() -> String {
    "tmp".into()
}

fn default_image() -> String {
    "busybox".into()
}

/// A single load run against the API server.
///
/// Scenarios run one after another, each with its own worker pool.
///
/// Used in: [`Config::scenarios`]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Scenario {
    /// Name of the scenario for identification in logs and reports.
    ///
    /// Defaults to the operation type.
    #[serde(default)]
    pub name: Option<String>,

    /// Number of concurrent workers.
    ///
    /// # Default
    ///
    /// `100`
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Total number of requests to send.
    ///
    /// # Default
    ///
    /// `1000`
    #[serde(default = "default_total")]
    pub total: u64,

    /// Size of every synthesized payload, including its prefix.
    ///
    /// Accepts human-readable sizes such as `500KiB`. Defaults depend on the operation, see
    /// [`OperationConfig::default_payload_size`].
    #[serde(default)]
    pub payload_size: Option<ByteSize>,

    /// Successful requests whose index is below this value or a multiple of it are logged.
    ///
    /// `0` disables sampling. Failures are always logged.
    ///
    /// # Default
    ///
    /// `10`
    #[serde(default = "default_sample_every")]
    pub sample_every: u64,

    /// Whether to delete objects created by successful requests.
    ///
    /// Deletion is best effort and not part of the reported statistics.
    ///
    /// # Default
    ///
    /// `true`
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,

    /// The remote operation to run. See [`OperationConfig`].
    pub operation: OperationConfig,
}

impl Scenario {
    /// The configured name, falling back to the operation type.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.operation.kind())
    }

    /// The configured payload size, falling back to the operation's default.
    pub fn payload_size(&self) -> ByteSize {
        self.payload_size
            .unwrap_or_else(|| self.operation.default_payload_size())
    }

    /// Checks that the scenario can run.
    ///
    /// Invalid scenarios must be rejected before any scenario sends traffic.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("scenario `{}`: concurrency must be at least 1", self.name());
        }
        if usize::try_from(self.payload_size().as_u64()).is_err() {
            anyhow::bail!("scenario `{}`: payload size exceeds the address space", self.name());
        }
        Ok(())
    }
}

fn default_concurrency() -> usize {
    100
}

fn default_total() -> u64 {
    1000
}

fn default_sample_every() -> u64 {
    10
}

fn default_cleanup() -> bool {
    true
}

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads for the runtime driving the workers.
    ///
    /// Workers spend almost all their time waiting on the network, so this rarely needs tuning.
    ///
    /// # Default
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `KS__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Controls the verbosity and format of log output. Logs are always written to stderr, the
/// report is written to stdout.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    /// At `INFO`, every sampled success and every failure is logged.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `KS__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `KS__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Runner configuration.
///
/// Configuration is loaded via [`Config::load`] with the following precedence:
///
/// 1. Environment variables (prefixed with `KS__`)
/// 2. YAML configuration file (if provided via `-c` flag)
/// 3. Default values
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the API server.
    ///
    /// Takes precedence over the server of the kubeconfig context.
    ///
    /// # Environment Variable
    ///
    /// `KS__ENDPOINT`
    pub endpoint: Option<String>,

    /// Path to a kubeconfig file to read the endpoint and credentials from.
    ///
    /// # Environment Variable
    ///
    /// `KS__KUBECONFIG`
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of its `current-context`.
    ///
    /// # Environment Variable
    ///
    /// `KS__CONTEXT`
    pub context: Option<String>,

    /// Bearer token sent with every request.
    ///
    /// Takes precedence over the token of the kubeconfig user.
    ///
    /// # Environment Variable
    ///
    /// `KS__TOKEN`
    pub token: Option<SecretBox<ConfigSecret>>,

    /// Skip verification of the API server's TLS certificate.
    ///
    /// # Default
    ///
    /// `false`, unless the kubeconfig cluster sets `insecure-skip-tls-verify`.
    pub insecure: bool,

    /// Timeout for a single request, including reading the response.
    ///
    /// # Default
    ///
    /// `30s`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Client-side request rate limit shared by all workers. See [`RateLimits`].
    pub rate_limits: RateLimits,

    /// Configuration of the internal task runtime.
    pub runtime: Runtime,

    /// Logging configuration.
    pub logging: Logging,

    /// The scenarios to run, in order.
    pub scenarios: Vec<Scenario>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            kubeconfig: None,
            context: None,
            token: None,
            insecure: false,
            timeout: Duration::from_secs(30),
            rate_limits: RateLimits::default(),
            runtime: Runtime::default(),
            logging: Logging::default(),
            scenarios: Vec::new(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided in `args`)
    /// 3. Environment variables (prefixed with `KS__`)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    /// - Required fields are missing or invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}
