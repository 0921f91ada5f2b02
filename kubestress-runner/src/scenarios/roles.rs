use std::sync::Arc;

use kubestress_harness::{JobIndex, Operation};
use serde_json::{Value, json};

use crate::client::{ApiClient, ClientError};

const COLLECTION: &str = "/apis/rbac.authorization.k8s.io/v1/clusterroles";

/// Creates a `ClusterRole` whose name is the payload.
///
/// Large names exercise the request body and storage limits of the API server.
#[derive(Debug)]
pub struct Roles {
    client: Arc<ApiClient>,
}

impl Roles {
    /// Creates roles through `client`.
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

fn manifest(name: &str) -> Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRole",
        "metadata": { "name": name },
        "rules": [{
            "apiGroups": [""],
            "resources": ["pods"],
            "verbs": ["get", "list", "watch"],
        }],
    })
}

#[async_trait::async_trait]
impl Operation for Roles {
    /// The name of the created role.
    type Response = String;
    type Error = ClientError;

    fn name(&self) -> &str {
        "roles"
    }

    fn prefix(&self, job: JobIndex) -> String {
        format!("clusterrole-{job}-")
    }

    async fn execute(&self, _job: JobIndex, payload: &str) -> Result<String, ClientError> {
        self.client.post(COLLECTION, &manifest(payload)).await?;
        Ok(payload.to_owned())
    }

    async fn cleanup(&self, job: JobIndex, name: String) {
        let path = format!("{COLLECTION}/{name}");
        if let Err(err) = self.client.delete(&path, None).await {
            tracing::warn!(
                %job,
                name_len = name.len(),
                error = &err as &dyn std::error::Error,
                "failed to delete cluster role"
            );
        }
    }
}
