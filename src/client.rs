use crate::error::{ClientError, StreamError};
use crate::protocol::{GenerateRequest, IdealAnswerRequest, ReviewRequest, StreamEvent};
use crate::sse;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client as HttpClient;
use reqwest::header::HeaderMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const COURSE_GUIDE_PATH: &str = "/api/course-guide";
pub const COURSE_GUIDE_STREAM_PATH: &str = "/api/course-guide/stream";
pub const REVIEW_PATH: &str = "/api/mock-interview/review";
pub const IDEAL_ANSWER_PATH: &str = "/api/mock-interview/ideal";

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub type EventStream = BoxStream<'static, Result<StreamEvent, StreamError>>;

pub struct CourseStream {
    pub headers: HeaderMap,
    pub events: EventStream,
}

#[async_trait]
pub trait StudyApi: Send + Sync {
    /// Opens the generation stream. Fails on a non-success status.
    async fn stream_course_guide(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<CourseStream, ClientError>;

    async fn review(&self, request: &ReviewRequest) -> Result<ApiResponse, ClientError>;

    async fn ideal_answer(&self, request: &IdealAnswerRequest) -> Result<ApiResponse, ClientError>;
}

#[derive(Clone)]
pub struct StudyClient {
    base_url: String,
    http: HttpClient,
}

impl StudyClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_http(base_url, HttpClient::new())
    }

    pub fn with_http(base_url: &str, http: HttpClient) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn post_json<T>(&self, path: &str, body: &T) -> Result<ApiResponse, ClientError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "POST");
        let response = self.http.post(url).json(body).send().await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await?;
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl StudyApi for StudyClient {
    async fn stream_course_guide(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<CourseStream, ClientError> {
        let request = GenerateRequest {
            prompt: prompt.to_string(),
        };
        let response = self
            .http
            .post(format!("{}{}", self.base_url, COURSE_GUIDE_STREAM_PATH))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if response.content_length() == Some(0) {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        let headers = response.headers().clone();
        let events = sse::events_until(response.bytes_stream(), cancel).boxed();
        Ok(CourseStream { headers, events })
    }

    async fn review(&self, request: &ReviewRequest) -> Result<ApiResponse, ClientError> {
        self.post_json(REVIEW_PATH, request).await
    }

    async fn ideal_answer(&self, request: &IdealAnswerRequest) -> Result<ApiResponse, ClientError> {
        self.post_json(IDEAL_ANSWER_PATH, request).await
    }
}

pub fn normalize_base_url(value: &str) -> String {
    value.strip_suffix('/').unwrap_or(value).to_string()
}
