//! Minimal kubeconfig support.
//!
//! Only the parts needed to reach an API server with a bearer token are understood: the cluster
//! `server`, its certificate authority and `insecure-skip-tls-verify`, and the user's `token` or
//! `tokenFile`. Client certificates and exec plugins are not supported.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use thiserror::Error;

/// Errors resolving a connection from a kubeconfig file.
#[derive(Debug, Error)]
pub enum KubeconfigError {
    /// The kubeconfig or a file it references could not be read.
    #[error("failed to read `{path}`")]
    Io {
        /// The file that failed to read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        cause: std::io::Error,
    },

    /// The kubeconfig is not valid YAML or has an unexpected structure.
    #[error("failed to parse kubeconfig")]
    Parse(#[from] serde_yaml::Error),

    /// Neither a context was requested nor a `current-context` is set.
    #[error("no context selected and no current-context set")]
    NoContext,

    /// The selected context does not exist.
    #[error("context `{0}` not found")]
    MissingContext(String),

    /// The context refers to a cluster that does not exist.
    #[error("cluster `{0}` not found")]
    MissingCluster(String),

    /// The context refers to a user that does not exist.
    #[error("user `{0}` not found")]
    MissingUser(String),

    /// The embedded certificate authority is not valid base64.
    #[error("invalid certificate-authority-data")]
    InvalidCertificate(#[from] base64::DecodeError),
}

/// Everything needed to connect to an API server.
#[derive(Clone, Default, PartialEq)]
pub struct Connection {
    /// Base URL of the API server.
    pub endpoint: String,
    /// Bearer token, if any.
    pub token: Option<String>,
    /// PEM encoded certificate authority to trust in addition to the system roots.
    pub ca_certificate: Option<Vec<u8>>,
    /// Whether to skip TLS certificate verification.
    pub insecure: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .field("ca_certificate", &self.ca_certificate.is_some())
            .field("insecure", &self.insecure)
            .finish()
    }
}

/// The subset of a kubeconfig file needed to resolve a [`Connection`].
#[derive(Debug, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<Named<Cluster>>,
    #[serde(default)]
    contexts: Vec<Named<Context>>,
    #[serde(default)]
    users: Vec<Named<User>>,
    /// Directory of the file this was loaded from. Relative paths inside resolve against it.
    #[serde(skip)]
    base: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct Named<T> {
    name: String,
    #[serde(alias = "cluster", alias = "context", alias = "user")]
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    server: String,
    #[serde(default)]
    certificate_authority: Option<PathBuf>,
    #[serde(default)]
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Deserialize)]
struct Context {
    cluster: String,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct User {
    #[serde(default)]
    token: Option<String>,
    #[serde(rename = "tokenFile", default)]
    token_file: Option<PathBuf>,
}

impl Kubeconfig {
    /// Reads and parses the kubeconfig at `path`.
    ///
    /// Relative `certificate-authority` and `tokenFile` paths are resolved against the directory
    /// containing the kubeconfig.
    pub fn load(path: &Path) -> Result<Self, KubeconfigError> {
        let contents = read(path)?;
        let mut kubeconfig: Self = contents.parse()?;
        kubeconfig.base = path.parent().map(Path::to_owned);
        Ok(kubeconfig)
    }

    fn file_path(&self, path: &Path) -> PathBuf {
        match self.base {
            Some(ref base) if path.is_relative() => base.join(path),
            _ => path.to_owned(),
        }
    }

    /// Resolves the connection for `context`, or the current context if `None`.
    pub fn resolve(&self, context: Option<&str>) -> Result<Connection, KubeconfigError> {
        let context_name = context
            .or(self.current_context.as_deref())
            .filter(|name| !name.is_empty())
            .ok_or(KubeconfigError::NoContext)?;

        let context = find(&self.contexts, context_name)
            .ok_or_else(|| KubeconfigError::MissingContext(context_name.to_owned()))?;
        let cluster = find(&self.clusters, &context.cluster)
            .ok_or_else(|| KubeconfigError::MissingCluster(context.cluster.clone()))?;

        let user = match context.user {
            Some(ref name) => Some(
                find(&self.users, name)
                    .ok_or_else(|| KubeconfigError::MissingUser(name.clone()))?,
            ),
            None => None,
        };

        let token = match user {
            Some(User {
                token: Some(token), ..
            }) => Some(token.clone()),
            Some(User {
                token_file: Some(path),
                ..
            }) => {
                let token = read_bytes(&self.file_path(path))?;
                Some(String::from_utf8_lossy(&token).trim().to_owned())
            }
            _ => None,
        };

        let ca_certificate = match (&cluster.certificate_authority_data, &cluster.certificate_authority) {
            (Some(data), _) => Some(STANDARD.decode(data.trim())?),
            (None, Some(path)) => Some(read_bytes(&self.file_path(path))?),
            (None, None) => None,
        };

        Ok(Connection {
            endpoint: cluster.server.clone(),
            token,
            ca_certificate,
            insecure: cluster.insecure_skip_tls_verify,
        })
    }
}

impl FromStr for Kubeconfig {
    type Err = serde_yaml::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s)
    }
}

fn find<'a, T>(entries: &'a [Named<T>], name: &str) -> Option<&'a T> {
    entries
        .iter()
        .find(|entry| entry.name == name)
        .map(|entry| &entry.value)
}

fn read(path: &Path) -> Result<String, KubeconfigError> {
    std::fs::read_to_string(path).map_err(|cause| KubeconfigError::Io {
        path: path.to_owned(),
        cause,
    })
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, KubeconfigError> {
    std::fs::read(path).map_err(|cause| KubeconfigError::Io {
        path: path.to_owned(),
        cause,
    })
}
