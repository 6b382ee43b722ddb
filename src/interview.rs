use crate::client::{ApiResponse, StudyApi};
use crate::error::ClientError;
use crate::protocol::{IdealAnswer, IdealAnswerRequest, ReviewRequest, ReviewResult};
use crate::ratelimit::RateLimitStore;
use crate::storage::MockInterviewSession;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Stable key for a question's answer, review and ideal answer.
pub fn answer_key(index: usize) -> String {
    format!("short-{}", index)
}

/// Loading, error and result slots for one kind of request, per key.
#[derive(Debug, Clone)]
pub struct RequestSlots<T> {
    loading: HashMap<String, bool>,
    errors: HashMap<String, String>,
    results: HashMap<String, T>,
}

impl<T> Default for RequestSlots<T> {
    fn default() -> Self {
        Self {
            loading: HashMap::new(),
            errors: HashMap::new(),
            results: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotView<T> {
    pub loading: bool,
    pub error: Option<String>,
    pub result: Option<T>,
}

impl<T: Clone> RequestSlots<T> {
    pub fn begin(&mut self, key: &str) {
        self.loading.insert(key.to_string(), true);
        self.errors.remove(key);
    }

    pub fn succeed(&mut self, key: &str, value: T) {
        self.results.insert(key.to_string(), value);
    }

    /// Records an error; an earlier result for `key` stays in place.
    pub fn fail(&mut self, key: &str, message: String) {
        self.errors.insert(key.to_string(), message);
    }

    pub fn finish(&mut self, key: &str) {
        self.loading.insert(key.to_string(), false);
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.loading.get(key).copied().unwrap_or(false)
    }

    pub fn error(&self, key: &str) -> Option<&str> {
        self.errors.get(key).map(String::as_str)
    }

    pub fn result(&self, key: &str) -> Option<&T> {
        self.results.get(key)
    }

    pub fn view(&self, key: &str) -> SlotView<T> {
        SlotView {
            loading: self.is_loading(key),
            error: self.error(key).map(str::to_string),
            result: self.result(key).cloned(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterviewProgress {
    pub current_index: usize,
    pub completed: usize,
}

#[derive(Default)]
struct InterviewState {
    progress: InterviewProgress,
    answers: HashMap<String, String>,
    reviews: RequestSlots<ReviewResult>,
    ideals: RequestSlots<IdealAnswer>,
}

/// Mock interview over a fixed question list.
///
/// Review and ideal-answer calls for different questions may run at the same
/// time; the state lock is never held across a request.
pub struct InterviewController {
    api: Arc<dyn StudyApi>,
    limits: Arc<RateLimitStore>,
    session: MockInterviewSession,
    state: Mutex<InterviewState>,
}

impl InterviewController {
    pub fn new(
        api: Arc<dyn StudyApi>,
        limits: Arc<RateLimitStore>,
        session: MockInterviewSession,
    ) -> Self {
        Self {
            api,
            limits,
            session,
            state: Mutex::new(InterviewState::default()),
        }
    }

    pub fn job_title(&self) -> &str {
        &self.session.job_title
    }

    pub fn total(&self) -> usize {
        self.session.questions.len()
    }

    pub fn question(&self, index: usize) -> Option<&str> {
        self.session.questions.get(index).map(String::as_str)
    }

    pub async fn progress(&self) -> InterviewProgress {
        self.state.lock().await.progress
    }

    pub async fn is_finished(&self) -> bool {
        self.state.lock().await.progress.current_index >= self.total()
    }

    pub async fn progress_percent(&self) -> u32 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        let current = self.state.lock().await.progress.current_index;
        let percent = (current as f64 / total as f64 * 100.0).round() as u32;
        percent.min(100)
    }

    pub async fn next_question(&self) {
        let total = self.total();
        let mut state = self.state.lock().await;
        state.progress.current_index = (state.progress.current_index + 1).min(total);
        state.progress.completed = (state.progress.completed + 1).min(total);
    }

    pub async fn prev_question(&self) {
        let mut state = self.state.lock().await;
        state.progress.current_index = state.progress.current_index.saturating_sub(1);
    }

    /// Back to the first question. Answers and feedback are kept.
    pub async fn retake(&self) {
        self.state.lock().await.progress = InterviewProgress::default();
    }

    pub async fn set_answer(&self, index: usize, answer: impl Into<String>) {
        self.state
            .lock()
            .await
            .answers
            .insert(answer_key(index), answer.into());
    }

    pub async fn answer(&self, index: usize) -> Option<String> {
        self.state.lock().await.answers.get(&answer_key(index)).cloned()
    }

    pub async fn review(&self, index: usize) -> SlotView<ReviewResult> {
        self.state.lock().await.reviews.view(&answer_key(index))
    }

    pub async fn ideal(&self, index: usize) -> SlotView<IdealAnswer> {
        self.state.lock().await.ideals.view(&answer_key(index))
    }

    /// Sends the stored answer for grading. Returns `false` without a request
    /// when there is no such question or the answer is blank.
    pub async fn submit_review(&self, index: usize) -> bool {
        let Some(question) = self.question(index).map(str::to_string) else {
            return false;
        };
        let key = answer_key(index);

        let answer = {
            let mut state = self.state.lock().await;
            let answer = state
                .answers
                .get(&key)
                .map(|answer| answer.trim().to_string())
                .unwrap_or_default();
            if answer.is_empty() {
                return false;
            }
            state.reviews.begin(&key);
            answer
        };

        let request = ReviewRequest {
            question,
            answer,
            job_title: self.session.job_title.clone(),
        };
        let outcome = self.settle::<ReviewResult>(self.api.review(&request).await);

        let mut state = self.state.lock().await;
        match outcome {
            Ok(review) => state.reviews.succeed(&key, review),
            Err(message) => {
                warn!(%key, error = %message, "review failed");
                state.reviews.fail(&key, message);
            }
        }
        state.reviews.finish(&key);
        true
    }

    pub async fn request_ideal_answer(&self, index: usize) -> bool {
        let Some(question) = self.question(index).map(str::to_string) else {
            return false;
        };
        let key = answer_key(index);
        self.state.lock().await.ideals.begin(&key);

        let request = IdealAnswerRequest {
            question,
            job_title: self.session.job_title.clone(),
        };
        let outcome = self.settle::<IdealAnswer>(self.api.ideal_answer(&request).await);

        let mut state = self.state.lock().await;
        match outcome {
            Ok(ideal) => state.ideals.succeed(&key, ideal),
            Err(message) => {
                warn!(%key, error = %message, "ideal answer failed");
                state.ideals.fail(&key, message);
            }
        }
        state.ideals.finish(&key);
        true
    }

    fn settle<T: DeserializeOwned>(
        &self,
        response: Result<ApiResponse, ClientError>,
    ) -> Result<T, String> {
        let response = response.map_err(|err| err.to_string())?;
        self.limits.write_from_headers(&response.headers);

        if !response.is_success() {
            return Err(ClientError::Status {
                status: response.status,
                body: response.body,
            }
            .to_string());
        }

        serde_json::from_str(&response.body).map_err(|err| {
            debug!(body = %response.body, "unreadable response body");
            err.to_string()
        })
    }
}
