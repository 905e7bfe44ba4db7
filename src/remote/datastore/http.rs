use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value as JsonValue};

use crate::api::query::QueryDefinition;
use crate::api::snapshot::DocumentSnapshot;
use crate::error::{internal_error, unavailable, DocstoreErrorCode, DocstoreResult};
use crate::model::{DocumentKey, Timestamp};
use crate::remote::rpc_error::map_http_error;
use crate::remote::serializer::ProtoSerializer;
use crate::util::runtime::sleep as runtime_sleep;

use super::{Datastore, NoopTokenProvider, TokenProviderArc, WriteOperation};

pub const DEFAULT_HOST: &str = "firestore.googleapis.com";

/// REST datastore. Every unary RPC goes through [`Self::invoke_json`] with
/// per-request retry for transient failures.
#[derive(Clone)]
pub struct HttpDatastore {
    client: Client,
    base_url: String,
    serializer: ProtoSerializer,
    auth_provider: TokenProviderArc,
    retry: RetrySettings,
}

#[derive(Clone, Debug)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 1.5,
            max_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl RetrySettings {
    fn should_retry(&self, attempt: usize, error: &crate::error::DocstoreError) -> bool {
        attempt + 1 < self.max_attempts && error.is_retryable()
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

impl HttpDatastore {
    pub fn new(serializer: ProtoSerializer, host: &str) -> DocstoreResult<Self> {
        Self::with_auth(serializer, host, Arc::new(NoopTokenProvider))
    }

    pub fn with_auth(
        serializer: ProtoSerializer,
        host: &str,
        auth_provider: TokenProviderArc,
    ) -> DocstoreResult<Self> {
        let retry = RetrySettings::default();
        let client = Client::builder()
            .timeout(retry.request_timeout)
            .build()
            .map_err(|err| internal_error(format!("Failed to build HTTP client: {err}")))?;
        let scheme = if host.starts_with("localhost") || host.starts_with("127.0.0.1") {
            "http"
        } else {
            "https"
        };
        let base_url = format!("{scheme}://{host}/v1/{}", serializer.database_name());
        Ok(Self {
            client,
            base_url,
            serializer,
            auth_provider,
            retry,
        })
    }

    pub fn serializer(&self) -> &ProtoSerializer {
        &self.serializer
    }

    async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> DocstoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DocstoreResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !self.retry.should_retry(attempt, &err) {
                        return Err(err);
                    }
                    if err.code == DocstoreErrorCode::Unauthenticated {
                        self.auth_provider.invalidate_token();
                    }
                    runtime_sleep(self.retry.backoff_delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn invoke_json(
        &self,
        method: Method,
        path: &str,
        body: Option<JsonValue>,
    ) -> DocstoreResult<JsonValue> {
        let url = format!("{}/{path}", self.base_url);
        let mut request = self.client.request(method, &url);
        if let Some(token) = self.auth_provider.get_token().await? {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| unavailable(format!("HTTP request failed: {err}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| unavailable(format!("Failed to read HTTP response: {err}")))?;

        if status != StatusCode::OK {
            return Err(map_http_error(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|err| internal_error(format!("Invalid JSON response: {err}")))
    }

    fn encode_write(&self, write: &WriteOperation) -> JsonValue {
        match write {
            WriteOperation::Set { key, data, mask } => {
                self.serializer.encode_set_write(key, data, mask.as_deref())
            }
            WriteOperation::Update {
                key,
                data,
                field_paths,
            } => self.serializer.encode_update_write(key, data, field_paths),
            WriteOperation::Delete { key } => self.serializer.encode_delete_write(key),
        }
    }
}

#[async_trait]
impl Datastore for HttpDatastore {
    async fn get_document(
        &self,
        key: &DocumentKey,
        transaction: Option<&[u8]>,
    ) -> DocstoreResult<DocumentSnapshot> {
        let mut body = serde_json::Map::new();
        body.insert(
            "documents".to_string(),
            json!([self.serializer.document_name(key)]),
        );
        if let Some(transaction) = transaction {
            body.insert(
                "transaction".to_string(),
                json!(BASE64_STANDARD.encode(transaction)),
            );
        }
        let body = JsonValue::Object(body);

        let response = self
            .execute_with_retry(|| {
                let body = body.clone();
                async move {
                    self.invoke_json(Method::POST, "documents:batchGet", Some(body))
                        .await
                }
            })
            .await?;

        let results = response
            .as_array()
            .ok_or_else(|| internal_error("batchGet response must be an array"))?;
        let entry = results
            .first()
            .ok_or_else(|| internal_error("batchGet response was empty"))?;
        let read_time = self
            .serializer
            .decode_optional_timestamp(entry.get("readTime"))?;

        if let Some(found) = entry.get("found") {
            self.serializer.decode_document(found, read_time)
        } else {
            Ok(DocumentSnapshot::missing(key.clone(), read_time))
        }
    }

    async fn run_query(&self, query: &QueryDefinition) -> DocstoreResult<Vec<DocumentSnapshot>> {
        let request_path = if query.parent_path().is_empty() {
            "documents:runQuery".to_string()
        } else {
            format!(
                "documents/{}:runQuery",
                query.parent_path().canonical_string()
            )
        };
        let body = json!({
            "structuredQuery": self.serializer.encode_structured_query(query)
        });

        let response = self
            .execute_with_retry(|| {
                let request_path = request_path.clone();
                let body = body.clone();
                async move {
                    self.invoke_json(Method::POST, &request_path, Some(body))
                        .await
                }
            })
            .await?;

        let results = response
            .as_array()
            .ok_or_else(|| internal_error("runQuery response must be an array"))?;

        let mut snapshots = Vec::new();
        for entry in results {
            // Entries without a document only carry progress read times.
            let Some(document) = entry.get("document") else {
                continue;
            };
            let read_time = self
                .serializer
                .decode_optional_timestamp(entry.get("readTime"))?;
            snapshots.push(self.serializer.decode_document(document, read_time)?);
        }
        Ok(snapshots)
    }

    async fn commit(
        &self,
        writes: Vec<WriteOperation>,
        transaction: Option<Vec<u8>>,
    ) -> DocstoreResult<Timestamp> {
        let encoded: Vec<JsonValue> = writes.iter().map(|write| self.encode_write(write)).collect();
        let mut body = serde_json::Map::new();
        body.insert("writes".to_string(), JsonValue::Array(encoded));
        if let Some(transaction) = &transaction {
            body.insert(
                "transaction".to_string(),
                json!(BASE64_STANDARD.encode(transaction)),
            );
        }
        let body = JsonValue::Object(body);

        // A commit is not idempotent once the backend may have applied it,
        // so only transactional commits go through the retry loop (a retried
        // transaction commit fails with Aborted rather than double-applying).
        let response = if transaction.is_some() {
            self.execute_with_retry(|| {
                let body = body.clone();
                async move {
                    self.invoke_json(Method::POST, "documents:commit", Some(body))
                        .await
                }
            })
            .await?
        } else {
            self.invoke_json(Method::POST, "documents:commit", Some(body))
                .await?
        };

        match self
            .serializer
            .decode_optional_timestamp(response.get("commitTime"))?
        {
            Some(commit_time) => Ok(commit_time),
            None => Ok(Timestamp::now()),
        }
    }

    async fn begin_transaction(&self) -> DocstoreResult<Vec<u8>> {
        let response = self
            .execute_with_retry(|| async {
                self.invoke_json(
                    Method::POST,
                    "documents:beginTransaction",
                    Some(json!({})),
                )
                .await
            })
            .await?;
        let encoded = response
            .get("transaction")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| internal_error("beginTransaction response missing transaction id"))?;
        BASE64_STANDARD
            .decode(encoded)
            .map_err(|err| internal_error(format!("Invalid transaction id: {err}")))
    }

    async fn rollback(&self, transaction: Vec<u8>) -> DocstoreResult<()> {
        let body = json!({ "transaction": BASE64_STANDARD.encode(&transaction) });
        self.execute_with_retry(|| {
            let body = body.clone();
            async move {
                self.invoke_json(Method::POST, "documents:rollback", Some(body))
                    .await
                    .map(|_| ())
            }
        })
        .await
    }
}
