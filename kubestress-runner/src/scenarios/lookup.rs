use std::sync::Arc;

use kubestress_harness::{JobIndex, Operation};

use crate::client::{ApiClient, ClientError};

/// Looks up an object through an aggregated API, using the payload as the resource name.
///
/// The request path grows with the payload, so this exercises URL and resource name limits of the
/// API server and its aggregation layer. Nothing is created, so there is nothing to clean up.
#[derive(Debug)]
pub struct Lookup {
    client: Arc<ApiClient>,
    group: String,
    version: String,
    namespace: String,
    object: String,
}

impl Lookup {
    /// Looks up objects of the custom resource `group/version/namespace/object`.
    pub fn new(
        client: Arc<ApiClient>,
        group: String,
        version: String,
        namespace: String,
        object: String,
    ) -> Self {
        Self {
            client,
            group,
            version,
            namespace,
            object,
        }
    }

    fn path(&self, resource: &str) -> String {
        format!(
            "/apis/{}/{}/namespaces/{}/{resource}/{}",
            self.group, self.version, self.namespace, self.object
        )
    }
}

#[async_trait::async_trait]
impl Operation for Lookup {
    type Response = ();
    type Error = ClientError;

    fn name(&self) -> &str {
        "lookup"
    }

    fn prefix(&self, job: JobIndex) -> String {
        format!("testagg-{job}-{}-", super::unix_seconds())
    }

    async fn execute(&self, _job: JobIndex, payload: &str) -> Result<(), ClientError> {
        self.client.get(&self.path(payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubeconfig::Connection;
    use crate::rate_limits::RateLimits;

    fn lookup() -> Lookup {
        let connection = Connection {
            endpoint: "http://localhost:8001".into(),
            ..Default::default()
        };
        let client =
            ApiClient::new(connection, std::time::Duration::from_secs(1), &RateLimits::default())
                .unwrap();

        Lookup::new(
            Arc::new(client),
            "example.com".into(),
            "v1alpha1".into(),
            "default".into(),
            "tmp".into(),
        )
    }

    #[test]
    fn request_path() {
        assert_eq!(
            lookup().path("testagg-1-abc"),
            "/apis/example.com/v1alpha1/namespaces/default/testagg-1-abc/tmp"
        );
    }

    #[test]
    fn prefix_contains_job() {
        let prefix = lookup().prefix(JobIndex::new(42));
        assert!(prefix.starts_with("testagg-42-"), "{prefix}");
        assert!(prefix.ends_with('-'));
    }
}
