//! Exposes an in-process mock of the API server routes exercised by the scenarios.
//!
//! ```
//! use kubestress_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let url = server.url("/version");
//!    // use the URL in tests...
//! }
//! ```
//!
//! The mock keeps a set of created objects and validates object names against a configurable
//! length limit. Lookups through the aggregated API resolve for every resource whose name fits that
//! limit, and answer `404` otherwise.

use std::collections::BTreeSet;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

/// Name limit applied by the API server to most object names.
pub const DEFAULT_MAX_NAME_LEN: usize = 253;

/// Maximum length of a DNS label, which applies to job names and `spec.managedBy`.
const MAX_LABEL_LEN: usize = 63;

/// Behavior of the mock API server.
#[derive(Clone, Debug)]
pub struct Options {
    /// Bearer token required on every request. `None` accepts unauthenticated requests.
    pub token: Option<String>,
    /// Maximum length of object and resource names.
    pub max_name_len: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            token: None,
            max_name_len: DEFAULT_MAX_NAME_LEN,
        }
    }
}

#[derive(Debug)]
struct ApiState {
    options: Options,
    objects: Mutex<BTreeSet<String>>,
    requests: AtomicU64,
}

type SharedState = Arc<ApiState>;

/// An in-process mock API server for use in integration tests.
///
/// It listens on a random available port on localhost and is shut down when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    state: SharedState,
}

impl TestServer {
    /// Starts a server with default [`Options`].
    pub async fn new() -> Self {
        Self::with_options(Options::default()).await
    }

    /// Starts a server with the given options.
    pub async fn with_options(options: Options) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let state = Arc::new(ApiState {
            options,
            objects: Mutex::new(BTreeSet::new()),
            requests: AtomicU64::new(0),
        });
        let app = router(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            state,
        }
    }

    /// Returns the base URL of the server, without a trailing slash.
    pub fn endpoint(&self) -> String {
        format!("http://localhost:{}", self.socket.port())
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.endpoint(), path)
    }

    /// Returns the keys of all objects that currently exist, formatted as `kind/name` or
    /// `kind/namespace/name`.
    pub fn objects(&self) -> Vec<String> {
        self.state.objects.lock().unwrap().iter().cloned().collect()
    }

    /// Returns the number of requests received so far, including rejected ones.
    pub fn request_count(&self) -> u64 {
        self.state.requests.load(Ordering::Relaxed)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router(state: SharedState) -> Router {
    Router::new()
        .route("/version", get(version))
        .route(
            "/apis/{group}/{version}/namespaces/{namespace}/{resource}/{name}",
            get(lookup),
        )
        .route("/apis/batch/v1/namespaces/{namespace}/jobs", post(create_job))
        .route(
            "/apis/batch/v1/namespaces/{namespace}/jobs/{name}",
            delete(delete_job),
        )
        .route(
            "/apis/apiextensions.k8s.io/v1/customresourcedefinitions",
            post(create_crd),
        )
        .route(
            "/apis/apiextensions.k8s.io/v1/customresourcedefinitions/{name}",
            delete(delete_crd),
        )
        .route(
            "/apis/rbac.authorization.k8s.io/v1/clusterroles",
            post(create_role),
        )
        .route(
            "/apis/rbac.authorization.k8s.io/v1/clusterroles/{name}",
            delete(delete_role),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            authenticate,
        ))
        .with_state(state)
}

async fn authenticate(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    state.requests.fetch_add(1, Ordering::Relaxed);

    if let Some(ref token) = state.options.token {
        let expected = format!("Bearer {token}");
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .is_some_and(|value| value.as_bytes() == expected.as_bytes());
        if !authorized {
            return failure(StatusCode::UNAUTHORIZED, "Unauthorized", "Unauthorized");
        }
    }

    next.run(request).await
}

async fn version() -> Json<Value> {
    Json(json!({
        "major": "1",
        "minor": "31",
        "gitVersion": "v1.31.0-mock",
    }))
}

async fn lookup(
    State(state): State<SharedState>,
    Path((group, version, namespace, resource, name)): Path<(String, String, String, String, String)>,
) -> Response {
    if resource.len() > state.options.max_name_len {
        return failure(
            StatusCode::NOT_FOUND,
            "NotFound",
            &format!("the server could not find the requested resource ({group}/{version})"),
        );
    }

    Json(json!({
        "apiVersion": format!("{group}/{version}"),
        "metadata": { "name": name, "namespace": namespace },
    }))
    .into_response()
}

async fn create_job(
    State(state): State<SharedState>,
    Path(namespace): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let name = object_name(&body);
    let managed_by = body["spec"]["managedBy"].as_str().unwrap_or_default();
    if name.len() > MAX_LABEL_LEN || managed_by.len() > MAX_LABEL_LEN {
        return invalid(&format!(
            "Job.batch \"{name}\" is invalid: must be no more than {MAX_LABEL_LEN} characters"
        ));
    }

    create(&state, format!("jobs/{namespace}/{name}"), name)
}

async fn delete_job(
    State(state): State<SharedState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    remove(&state, format!("jobs/{namespace}/{name}"), &name)
}

async fn create_crd(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let name = object_name(&body);
    let group = body["spec"]["group"].as_str().unwrap_or_default();
    let plural = body["spec"]["names"]["plural"].as_str().unwrap_or_default();
    if name != format!("{plural}.{group}") {
        return invalid(&format!(
            "CustomResourceDefinition \"{name}\" is invalid: must be spec.names.plural+\".\"+spec.group"
        ));
    }

    create(&state, format!("customresourcedefinitions/{name}"), name)
}

async fn delete_crd(State(state): State<SharedState>, Path(name): Path<String>) -> Response {
    remove(&state, format!("customresourcedefinitions/{name}"), &name)
}

async fn create_role(State(state): State<SharedState>, Json(body): Json<Value>) -> Response {
    let name = object_name(&body);
    create(&state, format!("clusterroles/{name}"), name)
}

async fn delete_role(State(state): State<SharedState>, Path(name): Path<String>) -> Response {
    remove(&state, format!("clusterroles/{name}"), &name)
}

fn object_name(body: &Value) -> &str {
    body["metadata"]["name"].as_str().unwrap_or_default()
}

fn create(state: &ApiState, key: String, name: &str) -> Response {
    if name.is_empty() {
        return invalid("metadata.name: Required value: name is required");
    }
    if name.len() > state.options.max_name_len {
        return invalid(&format!(
            "metadata.name: Invalid value: must be no more than {} characters",
            state.options.max_name_len
        ));
    }
    if !state.objects.lock().unwrap().insert(key) {
        return failure(
            StatusCode::CONFLICT,
            "AlreadyExists",
            &format!("\"{name}\" already exists"),
        );
    }

    (
        StatusCode::CREATED,
        Json(json!({ "metadata": { "name": name } })),
    )
        .into_response()
}

fn remove(state: &ApiState, key: String, name: &str) -> Response {
    if !state.objects.lock().unwrap().remove(&key) {
        return failure(
            StatusCode::NOT_FOUND,
            "NotFound",
            &format!("\"{name}\" not found"),
        );
    }

    Json(json!({ "kind": "Status", "status": "Success" })).into_response()
}

fn invalid(message: &str) -> Response {
    failure(StatusCode::UNPROCESSABLE_ENTITY, "Invalid", message)
}

fn failure(status: StatusCode, reason: &str, message: &str) -> Response {
    let body = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": status.as_u16(),
    });
    (status, Json(body)).into_response()
}
