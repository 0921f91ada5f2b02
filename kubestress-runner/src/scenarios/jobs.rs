use std::sync::Arc;

use kubestress_harness::payload::random_hex;
use kubestress_harness::{JobIndex, Operation};
use serde_json::{Value, json};

use crate::client::{ApiClient, ClientError};

/// Creates a batch `Job` whose `spec.managedBy` is the payload, and deletes it again on cleanup.
///
/// `managedBy` is limited to 63 characters by the API server, so payloads above that size are
/// expected to be rejected.
#[derive(Debug)]
pub struct Jobs {
    client: Arc<ApiClient>,
    namespace: String,
    image: String,
}

impl Jobs {
    /// Creates jobs running `image` in `namespace`.
    pub fn new(client: Arc<ApiClient>, namespace: String, image: String) -> Self {
        Self {
            client,
            namespace,
            image,
        }
    }

    fn collection(&self) -> String {
        format!("/apis/batch/v1/namespaces/{}/jobs", self.namespace)
    }

    fn manifest(&self, name: &str, managed_by: &str) -> Value {
        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": name,
                "namespace": self.namespace,
            },
            "spec": {
                "managedBy": managed_by,
                "template": {
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "w",
                            "image": self.image,
                            "command": ["echo"],
                        }],
                    },
                },
            },
        })
    }
}

#[async_trait::async_trait]
impl Operation for Jobs {
    /// The name of the created job.
    type Response = String;
    type Error = ClientError;

    fn name(&self) -> &str {
        "jobs"
    }

    fn prefix(&self, _job: JobIndex) -> String {
        format!("t.io/{}-", super::clock_hhmmss())
    }

    async fn execute(&self, job: JobIndex, payload: &str) -> Result<String, ClientError> {
        let name = format!("perf-{job}-{}", random_hex(8));
        self.client
            .post(&self.collection(), &self.manifest(&name, payload))
            .await?;
        Ok(name)
    }

    async fn cleanup(&self, job: JobIndex, name: String) {
        let path = format!("{}/{name}", self.collection());
        let options = json!({
            "apiVersion": "v1",
            "kind": "DeleteOptions",
            "propagationPolicy": "Background",
        });

        if let Err(err) = self.client.delete(&path, Some(&options)).await {
            tracing::warn!(
                %job,
                name = %name,
                error = &err as &dyn std::error::Error,
                "failed to delete job"
            );
        }
    }
}
