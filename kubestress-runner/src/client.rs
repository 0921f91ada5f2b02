//! A thin, rate-limited HTTP client for the Kubernetes API server.

use std::fmt;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::kubeconfig::{Connection, Kubeconfig, KubeconfigError};
use crate::rate_limits::{RateLimiter, RateLimits};

/// Maximum number of characters of a non-`Status` error body kept in [`ClientError::Status`].
const MAX_ERROR_BODY: usize = 256;

/// Errors that can happen talking to the API server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Neither the configuration nor the kubeconfig provide a server address.
    #[error("no API server endpoint configured")]
    MissingEndpoint,

    /// The kubeconfig could not be resolved.
    #[error(transparent)]
    Kubeconfig(#[from] KubeconfigError),

    /// The bearer token cannot be sent as an HTTP header.
    #[error("invalid bearer token: {0}")]
    InvalidToken(#[from] header::InvalidHeaderValue),

    /// Any error emitted from the underlying [`reqwest`] client.
    #[error("{context}")]
    Reqwest {
        /// What the client was doing.
        context: String,
        /// The underlying error.
        #[source]
        cause: reqwest::Error,
    },

    /// The API server answered with a non-success status.
    #[error("{status}: {message}")]
    Status {
        /// The response status.
        status: StatusCode,
        /// The message of the returned `Status` object, or the start of the body.
        message: String,
    },
}

impl ClientError {
    fn reqwest(context: impl Into<String>, cause: reqwest::Error) -> Self {
        Self::Reqwest {
            context: context.into(),
            cause,
        }
    }

    /// The HTTP status returned by the server, if the request got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Reqwest { cause, .. } => cause.status(),
            _ => None,
        }
    }
}

/// The version information reported by `GET /version`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerVersion {
    /// Major version, e.g. `"1"`.
    #[serde(default)]
    pub major: String,
    /// Minor version, e.g. `"31"`.
    #[serde(default)]
    pub minor: String,
    /// Full version string, e.g. `"v1.31.0"`.
    #[serde(default)]
    pub git_version: String,
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.git_version.is_empty() {
            write!(f, "v{}.{}", self.major, self.minor)
        } else {
            f.write_str(&self.git_version)
        }
    }
}

/// Resolves the connection from explicit configuration and, if configured, a kubeconfig file.
///
/// Explicitly configured values take precedence over values from the kubeconfig.
pub fn resolve_connection(config: &Config) -> Result<Connection, ClientError> {
    let mut connection = match config.kubeconfig {
        Some(ref path) => Kubeconfig::load(path)?.resolve(config.context.as_deref())?,
        None => Connection::default(),
    };

    if let Some(ref endpoint) = config.endpoint {
        connection.endpoint = endpoint.clone();
    }
    if let Some(ref token) = config.token {
        connection.token = Some(token.expose_secret().as_str().to_owned());
    }
    connection.insecure |= config.insecure;

    if connection.endpoint.is_empty() {
        return Err(ClientError::MissingEndpoint);
    }

    Ok(connection)
}

/// A client for the API server shared by all workers of a run.
///
/// Every request first waits for the shared [`RateLimiter`].
#[derive(Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    endpoint: String,
    limiter: RateLimiter,
}

impl ApiClient {
    /// Creates a client for the given connection without contacting the server.
    pub fn new(
        connection: Connection,
        timeout: std::time::Duration,
        rate_limits: &RateLimits,
    ) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        if let Some(ref token) = connection.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("kubestress/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .danger_accept_invalid_certs(connection.insecure);

        if let Some(ref pem) = connection.ca_certificate {
            let certificate = reqwest::Certificate::from_pem(pem)
                .map_err(|cause| ClientError::reqwest("invalid certificate authority", cause))?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder
            .build()
            .map_err(|cause| ClientError::reqwest("failed to build HTTP client", cause))?;

        Ok(Self {
            client,
            endpoint: connection.endpoint.trim_end_matches('/').to_owned(),
            limiter: RateLimiter::new(rate_limits),
        })
    }

    /// Creates a client from the configuration and checks that the server is reachable.
    pub async fn connect(config: &Config) -> Result<Self, ClientError> {
        let connection = resolve_connection(config)?;
        tracing::debug!(?connection, "connecting to API server");

        let client = Self::new(connection, config.timeout, &config.rate_limits)?;
        let version = client.version().await?;
        tracing::info!(endpoint = %client.endpoint, %version, "connected to API server");

        Ok(client)
    }

    /// The base URL of the API server.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetches the server version.
    pub async fn version(&self) -> Result<ServerVersion, ClientError> {
        let response = self.send(Method::GET, "/version", None).await?;
        response
            .json()
            .await
            .map_err(|cause| ClientError::reqwest("failed to parse server version", cause))
    }

    /// Sends a `GET` request and discards the response body.
    pub async fn get(&self, path: &str) -> Result<(), ClientError> {
        let response = self.send(Method::GET, path, None).await?;
        drain(response).await
    }

    /// Creates an object by `POST`ing its JSON representation.
    pub async fn post(&self, path: &str, body: &Value) -> Result<(), ClientError> {
        let response = self.send(Method::POST, path, Some(body)).await?;
        drain(response).await
    }

    /// Deletes an object, optionally passing `DeleteOptions` as the body.
    pub async fn delete(&self, path: &str, options: Option<&Value>) -> Result<(), ClientError> {
        let response = self.send(Method::DELETE, path, options).await?;
        drain(response).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, ClientError> {
        self.limiter.acquire().await;

        let url = format!("{}{path}", self.endpoint);
        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|cause| ClientError::reqwest(format!("{method} request failed"), cause))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status,
            message: status_message(&text),
        })
    }
}

async fn drain(response: reqwest::Response) -> Result<(), ClientError> {
    response
        .bytes()
        .await
        .map_err(|cause| ClientError::reqwest("failed to read response", cause))?;
    Ok(())
}

/// Extracts the message of a Kubernetes `Status` object, falling back to the start of the body.
fn status_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Status {
        message: Option<String>,
    }

    if let Ok(Status {
        message: Some(message),
    }) = serde_json::from_str(body)
    {
        return message;
    }

    body.chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretBox;

    use super::*;
    use crate::config::ConfigSecret;

    #[test]
    fn message_from_status() {
        let body = r#"{"kind":"Status","status":"Failure","message":"jobs.batch \"x\" already exists","code":409}"#;
        assert_eq!(status_message(body), r#"jobs.batch "x" already exists"#);
    }

    #[test]
    fn message_from_plain_body() {
        assert_eq!(status_message("404 page not found"), "404 page not found");

        let long = "x".repeat(1000);
        assert_eq!(status_message(&long).len(), MAX_ERROR_BODY);
    }

    #[test]
    fn explicit_values_override() {
        let config = Config {
            endpoint: Some("http://localhost:8001".into()),
            token: Some(SecretBox::new(Box::new(ConfigSecret::from("abc")))),
            ..Default::default()
        };

        let connection = resolve_connection(&config).unwrap();
        assert_eq!(connection.endpoint, "http://localhost:8001");
        assert_eq!(connection.token.as_deref(), Some("abc"));
        assert!(!connection.insecure);
    }

    #[test]
    fn missing_endpoint() {
        let result = resolve_connection(&Config::default());
        assert!(matches!(result, Err(ClientError::MissingEndpoint)));
    }

    #[test]
    fn kubeconfig_fills_gaps() {
        let mut kubeconfig = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut kubeconfig,
            br#"
current-context: lab
clusters:
  - name: lab
    cluster:
      server: https://10.0.0.1:6443
contexts:
  - name: lab
    context:
      cluster: lab
      user: lab
users:
  - name: lab
    user:
      token: from-kubeconfig
"#,
        )
        .unwrap();

        let config = Config {
            kubeconfig: Some(kubeconfig.path().to_owned()),
            endpoint: Some("https://proxy:8443".into()),
            insecure: true,
            ..Default::default()
        };

        let connection = resolve_connection(&config).unwrap();
        assert_eq!(connection.endpoint, "https://proxy:8443");
        assert_eq!(connection.token.as_deref(), Some("from-kubeconfig"));
        assert!(connection.insecure);
    }
}
