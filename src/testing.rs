use crate::client::{ApiResponse, CourseStream, StudyApi};
use crate::error::ClientError;
use crate::protocol::{IdealAnswerRequest, ReviewRequest};
use crate::sse;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

enum StreamPlan {
    Frames {
        headers: HeaderMap,
        chunks: Vec<Vec<u8>>,
    },
    Status {
        status: u16,
        body: String,
    },
}

/// Scripted backend: queued responses per question, optional gates that hold
/// a call until the test releases it.
#[derive(Default)]
pub(crate) struct FakeApi {
    stream: Mutex<Option<StreamPlan>>,
    prompts: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    responses: Mutex<HashMap<String, VecDeque<ApiResponse>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeApi {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn stream_frames(&self, headers: HeaderMap, chunks: Vec<&str>) {
        *self.stream.lock().unwrap() = Some(StreamPlan::Frames {
            headers,
            chunks: chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect(),
        });
    }

    pub(crate) fn stream_status(&self, status: u16, body: &str) {
        *self.stream.lock().unwrap() = Some(StreamPlan::Status {
            status,
            body: body.to_string(),
        });
    }

    pub(crate) fn respond(&self, key: &str, response: ApiResponse) {
        self.responses
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(response);
    }

    pub(crate) fn gate(&self, key: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::clone(&gate));
        gate
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn answer(&self, key: String) -> Result<ApiResponse, ClientError> {
        self.calls.lock().unwrap().push(key.clone());
        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let queued = self
            .responses
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        Ok(queued.unwrap_or_else(|| response(500, "no response queued")))
    }
}

#[async_trait]
impl StudyApi for FakeApi {
    async fn stream_course_guide(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<CourseStream, ClientError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let plan = self.stream.lock().unwrap().take();
        match plan {
            Some(StreamPlan::Frames { headers, chunks }) => {
                let source = futures::stream::iter(chunks.into_iter().map(Ok::<_, io::Error>));
                Ok(CourseStream {
                    headers,
                    events: sse::events_until(source, cancel).boxed(),
                })
            }
            Some(StreamPlan::Status { status, body }) => Err(ClientError::Status { status, body }),
            None => Err(ClientError::Status {
                status: 404,
                body: "no stream scripted".to_string(),
            }),
        }
    }

    async fn review(&self, request: &ReviewRequest) -> Result<ApiResponse, ClientError> {
        self.answer(format!("review:{}", request.question)).await
    }

    async fn ideal_answer(&self, request: &IdealAnswerRequest) -> Result<ApiResponse, ClientError> {
        self.answer(format!("ideal:{}", request.question)).await
    }
}

pub(crate) fn response(status: u16, body: &str) -> ApiResponse {
    ApiResponse {
        status,
        headers: HeaderMap::new(),
        body: body.to_string(),
    }
}

pub(crate) fn rate_limit_headers(day_remaining: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let pairs = [
        ("x-ratelimit-limit", "100"),
        ("x-ratelimit-remaining", day_remaining),
        ("x-ratelimit-reset", "3600"),
        ("x-ratelimit-day-limit", "100"),
        ("x-ratelimit-day-remaining", day_remaining),
        ("x-ratelimit-day-reset", "3600"),
    ];
    for (name, value) in pairs {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    headers
}
