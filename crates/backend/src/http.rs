use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use snafu::{ResultExt, ensure};
use tidechat_protocol::{BackendFeatures, ChatTurnRequest, TopicRoute};

use super::credential::CredentialProvider;
use super::error::{
    BackendResult, BuildClientSnafu, DecodePayloadSnafu, HttpStatusSnafu, InvalidBaseUrlSnafu,
    ReadBodySnafu, SendRequestSnafu,
};
use super::{BoxFuture, ChatBackend, ContentArtifact, ContentSource, TurnResponse};

pub const CONTENT_PATH_PREFIX: &str = "/content/";
pub const CONFIG_PATH: &str = "/config";

/// reqwest client for the chat backend, its content endpoint and `/config`.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> BackendResult<Self> {
        Self::with_connect_timeout(base_url, credentials, None)
    }

    /// Bounds only connection setup; streamed turns may legitimately run long.
    pub fn with_connect_timeout(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        connect_timeout: Option<Duration>,
    ) -> BackendResult<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            InvalidBaseUrlSnafu {
                stage: "http-backend-new",
                base_url,
            }
        );

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder
            .build()
            .context(BuildClientSnafu {
                stage: "http-backend-build-client",
            })?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Reads which optional settings the deployment supports.
    pub async fn fetch_features(&self) -> BackendResult<BackendFeatures> {
        let url = self.url(CONFIG_PATH);
        let response = self
            .authorized(self.client.get(&url))
            .await?
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "fetch-features-send",
                url: url.clone(),
            })?;
        let response = ensure_success(response, "fetch-features-status").await?;
        let payload = response.bytes().await.context(ReadBodySnafu {
            stage: "fetch-features-read",
        })?;

        serde_json::from_slice(&payload).context(DecodePayloadSnafu {
            stage: "fetch-features-decode",
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn authorized(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> BackendResult<reqwest::RequestBuilder> {
        Ok(match self.credentials.bearer_token().await? {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn post_turn(
        &self,
        route: &TopicRoute,
        request: &ChatTurnRequest,
    ) -> BackendResult<TurnResponse> {
        let url = self.url(&route.path);
        tracing::debug!(
            topic = %route.topic,
            url = %url,
            stream = request.is_streaming(),
            history = request.messages().len().saturating_sub(1),
            "sending chat turn"
        );

        let response = self
            .authorized(self.client.post(&url).json(request))
            .await?
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "send-turn",
                url,
            })?;

        let status = response.status().as_u16();
        if response.content_length() == Some(0) {
            return Ok(TurnResponse::new(status, None));
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk.context(ReadBodySnafu {
                stage: "read-turn-chunk",
            })
        });
        Ok(TurnResponse::new(status, Some(Box::pin(body))))
    }

    async fn get_content(&self, path: &str) -> BackendResult<ContentArtifact> {
        let url = self.url(&format!(
            "{CONTENT_PATH_PREFIX}{}",
            path.trim_start_matches('/')
        ));
        let response = self
            .authorized(self.client.get(&url))
            .await?
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "fetch-content-send",
                url,
            })?;
        let response = ensure_success(response, "fetch-content-status").await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes: Bytes = response.bytes().await.context(ReadBodySnafu {
            stage: "fetch-content-read",
        })?;

        Ok(ContentArtifact {
            bytes,
            content_type,
        })
    }
}

impl ChatBackend for HttpBackend {
    fn send_turn<'a>(
        &'a self,
        route: &'a TopicRoute,
        request: &'a ChatTurnRequest,
    ) -> BoxFuture<'a, BackendResult<TurnResponse>> {
        Box::pin(self.post_turn(route, request))
    }
}

impl ContentSource for HttpBackend {
    fn fetch_content<'a>(&'a self, path: &'a str) -> BoxFuture<'a, BackendResult<ContentArtifact>> {
        Box::pin(self.get_content(path))
    }
}

async fn ensure_success(
    response: reqwest::Response,
    stage: &'static str,
) -> BackendResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    HttpStatusSnafu {
        stage,
        status: status.as_u16(),
        message,
    }
    .fail()
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tidechat_protocol::TurnSettings;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::credential::{Anonymous, StaticToken};
    use crate::error::BackendError;

    fn request(question: &str) -> ChatTurnRequest {
        ChatTurnRequest::new(Vec::new(), question, &TurnSettings::default(), None)
    }

    #[tokio::test]
    async fn turn_is_posted_to_topic_route_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "messages": [{ "content": "What is X?", "role": "user" }],
                "stream": true
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("{\"a\":1}\n{\"b\":2}\n", "application/x-ndjson"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(server.uri(), Arc::new(StaticToken::new("secret"))).unwrap();
        let response = backend
            .send_turn(&TopicRoute::new("theme_2", "/chat"), &request("What is X?"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        let chunks = response.body.unwrap().try_collect::<Vec<_>>().await.unwrap();
        assert_eq!(chunks.concat(), b"{\"a\":1}\n{\"b\":2}\n".to_vec());
    }

    #[tokio::test]
    async fn error_status_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ask"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "down" })))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(server.uri(), Arc::new(Anonymous)).unwrap();
        let response = backend
            .send_turn(&TopicRoute::new("theme_1", "/ask"), &request("q"))
            .await
            .unwrap();

        assert_eq!(response.status, 500);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn empty_body_has_no_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(server.uri(), Arc::new(Anonymous)).unwrap();
        let response = backend
            .send_turn(&TopicRoute::new("theme_1", "/ask"), &request("q"))
            .await
            .unwrap();

        assert!(response.body.is_none());
    }

    #[tokio::test]
    async fn content_is_fetched_with_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/content/Benefit_Options.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("%PDF", "application/pdf"))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new(server.uri(), Arc::new(Anonymous)).unwrap();
        let artifact = backend.fetch_content("Benefit_Options.pdf").await.unwrap();

        assert_eq!(artifact.bytes.as_ref(), b"%PDF");
        assert_eq!(artifact.content_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn missing_content_is_a_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(server.uri(), Arc::new(Anonymous)).unwrap();
        let error = backend.fetch_content("gone.pdf").await.unwrap_err();

        match error {
            BackendError::HttpStatus {
                status, message, ..
            } => {
                assert_eq!(status, 404);
                assert_eq!(message, "not found");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn features_are_read_from_config() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "showGPT4VOptions": false,
                "showSemanticRankerOption": true,
                "showVectorOption": false,
                "showUserUpload": false
            })))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(format!("{}/", server.uri()), Arc::new(Anonymous)).unwrap();
        let features = backend.fetch_features().await.unwrap();

        assert!(features.show_semantic_ranker_option);
        assert!(!features.show_vector_option);
    }

    #[test]
    fn relative_base_url_is_rejected() {
        let error = HttpBackend::new("localhost:50505", Arc::new(Anonymous)).err();

        assert!(matches!(error, Some(BackendError::InvalidBaseUrl { .. })));
    }
}
