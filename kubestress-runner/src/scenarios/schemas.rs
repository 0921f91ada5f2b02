use std::sync::Arc;

use kubestress_harness::{JobIndex, Operation};
use serde_json::{Value, json};

use crate::client::{ApiClient, ClientError};

const COLLECTION: &str = "/apis/apiextensions.k8s.io/v1/customresourcedefinitions";

/// Registers a `CustomResourceDefinition` named after the payload.
///
/// The payload is used as the kind and forms the group, plural and singular names. Together with a
/// version name of 63 characters this pushes the derived resource names to their limits.
#[derive(Debug)]
pub struct Schemas {
    client: Arc<ApiClient>,
}

impl Schemas {
    /// Registers definitions through `client`.
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

/// Builds the definition for `kind` and returns it together with its object name.
fn definition(kind: &str) -> (String, Value) {
    let group = format!("{kind}.a");
    let plural = format!("{kind}as");
    let name = format!("{plural}.{group}");
    let version = format!("v{}", "3".repeat(62));

    let manifest = json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": { "name": name },
        "spec": {
            "group": group,
            "names": {
                "plural": plural,
                "singular": format!("{kind}a"),
                "kind": kind,
                "listKind": format!("{kind}s"),
            },
            "scope": "Cluster",
            "versions": [{
                "name": version,
                "served": true,
                "storage": true,
                "schema": {
                    "openAPIV3Schema": {
                        "type": "object",
                        "properties": {
                            "spec": {
                                "type": "object",
                                "properties": {
                                    "field": { "type": "string" },
                                },
                            },
                        },
                    },
                },
            }],
        },
    });

    (name, manifest)
}

#[async_trait::async_trait]
impl Operation for Schemas {
    /// The name of the created definition.
    type Response = String;
    type Error = ClientError;

    fn name(&self) -> &str {
        "schemas"
    }

    fn prefix(&self, _job: JobIndex) -> String {
        "a".to_owned()
    }

    async fn execute(&self, _job: JobIndex, payload: &str) -> Result<String, ClientError> {
        let (name, manifest) = definition(payload);
        self.client.post(COLLECTION, &manifest).await?;
        Ok(name)
    }

    async fn cleanup(&self, job: JobIndex, name: String) {
        let path = format!("{COLLECTION}/{name}");
        if let Err(err) = self.client.delete(&path, None).await {
            tracing::warn!(
                %job,
                name = %name,
                error = &err as &dyn std::error::Error,
                "failed to delete custom resource definition"
            );
        }
    }
}
