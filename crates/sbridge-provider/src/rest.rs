use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sbridge_core::{retry, ChaosPolicy, Clock, DEFAULT_ATTEMPTS};
use sbridge_domain::ProviderNode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::client::{FleetClient, NameHook};
use crate::error::ProviderError;
use crate::types::{AllocateSpec, AllocationResult, BootupResult, Bucket};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct NodesResponse {
    nodes: Vec<ProviderNode>,
}

#[derive(Deserialize)]
struct BucketsResponse {
    buckets: Vec<Bucket>,
}

#[derive(Serialize)]
struct CreateNodesRequest<'a> {
    request_id: String,
    bucket_id: &'a str,
    names: &'a [String],
    exclusive: bool,
    colocated: bool,
}

#[derive(Serialize)]
struct NodeActionRequest<'a> {
    request_id: String,
    names: &'a [String],
}

#[derive(Deserialize)]
struct StartResponse {
    operation_id: String,
}

/// Fleet client over the provider REST API. Stateless across calls;
/// transient failures (connect errors, timeouts, 5xx) are retried with
/// quadratic backoff, API rejections are surfaced.
pub struct RestFleet {
    http: reqwest::Client,
    base: Url,
    cluster: String,
    username: String,
    password: String,
    clock: Arc<dyn Clock>,
    chaos: ChaosPolicy,
}

impl RestFleet {
    pub fn new(
        base: Url,
        cluster: &str,
        username: &str,
        password: &str,
        clock: Arc<dyn Clock>,
        chaos: ChaosPolicy,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_TIMEOUT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            base,
            cluster: cluster.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            clock,
            chaos,
        })
    }

    fn url(&self, suffix: &str) -> Result<Url, ProviderError> {
        let path = format!("clusters/{}/{}", self.cluster, suffix);
        self.base
            .join(&path)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn parse<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!("{}: {}", status, detail)));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status: status.as_u16(), detail });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    fn transport_error(e: reqwest::Error) -> ProviderError {
        ProviderError::Unavailable(e.to_string())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        suffix: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ProviderError> {
        if self.chaos.should_trip() {
            return Err(ProviderError::ChaosInjected);
        }
        let url = self.url(suffix)?;
        debug!(%url, "GET");
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::parse(response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        suffix: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        if self.chaos.should_trip() {
            return Err(ProviderError::ChaosInjected);
        }
        let url = self.url(suffix)?;
        debug!(%url, "POST");
        let response = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await
            .map_err(Self::transport_error)?;
        Self::parse(response).await
    }

    /// POST with no interesting response body; only the status matters.
    async fn post_empty<B: Serialize>(
        &self,
        suffix: &str,
        body: &B,
    ) -> Result<(), ProviderError> {
        if self.chaos.should_trip() {
            return Err(ProviderError::ChaosInjected);
        }
        let url = self.url(suffix)?;
        debug!(%url, "POST");
        let response = self
            .http
            .post(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await
            .map_err(Self::transport_error)?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unavailable(format!("{}: {}", status, detail)));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status: status.as_u16(), detail });
        }
        Ok(())
    }

    async fn post_action(&self, action: &str, names: &[String]) -> Result<(), ProviderError> {
        let body = NodeActionRequest {
            request_id: Uuid::new_v4().to_string(),
            names,
        };
        let suffix = format!("nodes/{}", action);
        let suffix_ref = suffix.as_str();
        let body_ref = &body;
        retry(self.clock.as_ref(), DEFAULT_ATTEMPTS, move || async move {
            self.post_empty(suffix_ref, body_ref).await
        })
        .await
    }
}

#[async_trait]
impl FleetClient for RestFleet {
    async fn list_buckets(&self) -> Result<Vec<Bucket>, ProviderError> {
        let response: BucketsResponse =
            retry(self.clock.as_ref(), DEFAULT_ATTEMPTS, move || async move {
                self.get_json("buckets", &[]).await
            })
            .await?;
        Ok(response.buckets)
    }

    async fn list_nodes(&self) -> Result<Vec<ProviderNode>, ProviderError> {
        let response: NodesResponse =
            retry(self.clock.as_ref(), DEFAULT_ATTEMPTS, move || async move {
                self.get_json("nodes", &[]).await
            })
            .await?;
        Ok(response.nodes)
    }

    async fn allocate(
        &self,
        spec: &AllocateSpec,
        name_hook: &NameHook<'_>,
    ) -> Result<AllocationResult, ProviderError> {
        let buckets = self.list_buckets().await?;
        let bucket = buckets
            .iter()
            .find(|b| b.bucket_id == spec.bucket_id)
            .ok_or_else(|| ProviderError::Api {
                status: 404,
                detail: format!("no such bucket: {}", spec.bucket_id),
            })?;

        // Claim every name through the hook before any mutation.
        let mut names = Vec::with_capacity(spec.count as usize);
        for index in 1..=spec.count {
            names.push(name_hook(bucket, index)?);
        }

        let body = CreateNodesRequest {
            request_id: Uuid::new_v4().to_string(),
            bucket_id: &spec.bucket_id,
            names: &names,
            exclusive: spec.exclusive,
            colocated: spec.colocated,
        };
        let body_ref = &body;
        let response: NodesResponse =
            retry(self.clock.as_ref(), DEFAULT_ATTEMPTS, move || async move {
                self.post_json("nodes/create", body_ref).await
            })
            .await?;
        Ok(AllocationResult { nodes: response.nodes })
    }

    async fn bootup(&self, names: &[String]) -> Result<BootupResult, ProviderError> {
        let body = NodeActionRequest {
            request_id: Uuid::new_v4().to_string(),
            names,
        };
        let body_ref = &body;
        let response: StartResponse =
            retry(self.clock.as_ref(), DEFAULT_ATTEMPTS, move || async move {
                self.post_json("nodes/start", body_ref).await
            })
            .await?;
        Ok(BootupResult { operation_id: response.operation_id })
    }

    async fn shutdown(&self, names: &[String]) -> Result<(), ProviderError> {
        self.post_action("shutdown", names).await
    }

    async fn terminate(&self, names: &[String]) -> Result<(), ProviderError> {
        self.post_action("terminate", names).await
    }

    async fn deallocate(&self, names: &[String]) -> Result<(), ProviderError> {
        self.post_action("deallocate", names).await
    }

    async fn get_nodes(
        &self,
        operation_id: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Vec<ProviderNode>, ProviderError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(op) = operation_id {
            query.push(("operation_id", op));
        }
        if let Some(req) = request_id {
            query.push(("request_id", req));
        }
        let query_ref = query.as_slice();
        let response: NodesResponse =
            retry(self.clock.as_ref(), DEFAULT_ATTEMPTS, move || async move {
                self.get_json("nodes", query_ref).await
            })
            .await?;
        Ok(response.nodes)
    }
}
