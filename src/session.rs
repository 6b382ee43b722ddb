use crate::client::StudyApi;
use crate::protocol::{CourseGuide, StreamEvent};
use crate::ratelimit::RateLimitStore;
use crate::storage::{self, MockInterviewSession, Storage};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How many progress messages are kept on screen.
pub const PROGRESS_DISPLAY_LIMIT: usize = 5;

const MIN_PROMPT_CHARS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Completed(CourseGuide),
    Failed(String),
    /// The prompt was too short or a generation was already running.
    Rejected,
    Cancelled,
    /// The stream closed without a result or error event.
    Incomplete,
}

/// Drives one course-guide generation and keeps what the view shows.
pub struct Generation {
    api: Arc<dyn StudyApi>,
    limits: Arc<RateLimitStore>,
    storage: Arc<dyn Storage>,
    loading: bool,
    error: Option<String>,
    progress: Vec<String>,
    course: Option<CourseGuide>,
}

impl Generation {
    pub fn new(
        api: Arc<dyn StudyApi>,
        limits: Arc<RateLimitStore>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            api,
            limits,
            storage,
            loading: false,
            error: None,
            progress: Vec::new(),
            course: None,
        }
    }

    pub fn can_submit(&self, prompt: &str) -> bool {
        prompt.trim().chars().count() >= MIN_PROMPT_CHARS && !self.loading
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn progress(&self) -> &[String] {
        &self.progress
    }

    pub fn recent_progress(&self) -> &[String] {
        let start = self.progress.len().saturating_sub(PROGRESS_DISPLAY_LIMIT);
        &self.progress[start..]
    }

    pub fn course(&self) -> Option<&CourseGuide> {
        self.course.as_ref()
    }

    pub fn reset(&mut self) {
        self.error = None;
        self.progress.clear();
        self.course = None;
    }

    /// Streams a course guide for `prompt`.
    ///
    /// Every failure ends up in [`Generation::error`]; nothing is returned as
    /// `Err`. The first `result` or `error` event stops reading.
    pub async fn run<F>(
        &mut self,
        prompt: &str,
        cancel: CancellationToken,
        mut on_progress: F,
    ) -> GenerationOutcome
    where
        F: FnMut(&str),
    {
        if !self.can_submit(prompt) {
            return GenerationOutcome::Rejected;
        }

        self.loading = true;
        self.reset();

        let outcome = self.consume(prompt.trim(), cancel, &mut on_progress).await;
        if let GenerationOutcome::Failed(message) = &outcome {
            self.error = Some(message.clone());
        }
        self.loading = false;
        outcome
    }

    async fn consume<F>(
        &mut self,
        prompt: &str,
        cancel: CancellationToken,
        on_progress: &mut F,
    ) -> GenerationOutcome
    where
        F: FnMut(&str),
    {
        let stream = match self.api.stream_course_guide(prompt, cancel.clone()).await {
            Ok(stream) => stream,
            Err(err) => return GenerationOutcome::Failed(err.to_string()),
        };
        self.limits.write_from_headers(&stream.headers);

        let mut events = stream.events;
        while let Some(item) = events.next().await {
            match item {
                Ok(StreamEvent::Progress { text }) => {
                    on_progress(&text);
                    self.progress.push(text);
                }
                Ok(StreamEvent::Result { payload }) => {
                    self.persist(&payload);
                    info!(
                        job_title = %payload.job_title,
                        modules = payload.modules.len(),
                        "course guide received"
                    );
                    self.course = Some(payload.clone());
                    return GenerationOutcome::Completed(payload);
                }
                Ok(StreamEvent::Error { message }) => {
                    return GenerationOutcome::Failed(message);
                }
                Err(err) => return GenerationOutcome::Failed(err.to_string()),
            }
        }

        if cancel.is_cancelled() {
            GenerationOutcome::Cancelled
        } else {
            GenerationOutcome::Incomplete
        }
    }

    fn persist(&self, course: &CourseGuide) {
        if let Err(err) = storage::save_course(self.storage.as_ref(), course) {
            warn!(error = %err, "failed to persist course guide");
        }
        let session = MockInterviewSession {
            job_title: course.job_title.clone(),
            questions: course.mock_interview_questions.clone(),
        };
        if let Err(err) = storage::save_session(self.storage.as_ref(), &session) {
            warn!(error = %err, "failed to persist interview session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::SystemClock;
    use crate::storage::{BroadcastSignal, MemoryStorage};
    use crate::testing::{FakeApi, rate_limit_headers};
    use reqwest::header::HeaderMap;

    const RESULT_FRAME: &str = "event: result\ndata: {\"jobTitle\":\"Backend\",\"overview\":\"...\",\"modules\":[],\"mockInterviewQuestions\":[\"Q1\"]}\n\n";

    struct Fixture {
        api: Arc<FakeApi>,
        storage: Arc<MemoryStorage>,
        limits: Arc<RateLimitStore>,
        generation: Generation,
    }

    fn fixture() -> Fixture {
        let api = FakeApi::new();
        let storage = Arc::new(MemoryStorage::new());
        let limits = Arc::new(RateLimitStore::new(
            storage.clone(),
            Arc::new(BroadcastSignal::default()),
            Arc::new(SystemClock),
        ));
        let generation = Generation::new(api.clone(), limits.clone(), storage.clone());
        Fixture {
            api,
            storage,
            limits,
            generation,
        }
    }

    #[tokio::test]
    async fn streamed_course_completes_with_progress_log() {
        let mut fx = fixture();
        fx.api.stream_frames(
            HeaderMap::new(),
            vec![
                "event: progress\ndata: step1\n\n",
                "event: progress\ndata: step2\n\n",
                RESULT_FRAME,
            ],
        );

        let mut seen = Vec::new();
        let outcome = fx
            .generation
            .run("Backend engineer", CancellationToken::new(), |text| {
                seen.push(text.to_string())
            })
            .await;

        match outcome {
            GenerationOutcome::Completed(course) => assert_eq!(course.job_title, "Backend"),
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(fx.generation.progress(), ["step1", "step2"]);
        assert_eq!(seen, vec!["step1", "step2"]);
        assert_eq!(fx.generation.course().unwrap().mock_interview_questions, vec!["Q1"]);
        assert!(!fx.generation.is_loading());
        assert!(fx.generation.error().is_none());

        let stored = storage::load_course(fx.storage.as_ref()).unwrap();
        assert_eq!(stored.job_title, "Backend");
        let session = storage::load_session(fx.storage.as_ref()).unwrap();
        assert_eq!(session.questions, vec!["Q1"]);
    }

    #[tokio::test]
    async fn prompt_is_trimmed_before_sending() {
        let mut fx = fixture();
        fx.api.stream_frames(HeaderMap::new(), vec![RESULT_FRAME]);

        fx.generation
            .run("  Backend engineer \n", CancellationToken::new(), |_| {})
            .await;
        assert_eq!(fx.api.prompts(), vec!["Backend engineer"]);
    }

    #[tokio::test]
    async fn short_prompt_is_rejected_without_a_request() {
        let mut fx = fixture();
        let outcome = fx
            .generation
            .run("  abc ", CancellationToken::new(), |_| {})
            .await;

        assert_eq!(outcome, GenerationOutcome::Rejected);
        assert!(fx.api.prompts().is_empty());
    }

    #[tokio::test]
    async fn error_event_stops_processing() {
        let mut fx = fixture();
        fx.api.stream_frames(
            HeaderMap::new(),
            vec![
                "event: progress\ndata: step1\n\nevent: error\ndata: model overloaded\n\n",
                "event: progress\ndata: step2\n\n",
                RESULT_FRAME,
            ],
        );

        let outcome = fx
            .generation
            .run("Backend engineer", CancellationToken::new(), |_| {})
            .await;

        assert_eq!(outcome, GenerationOutcome::Failed("model overloaded".to_string()));
        assert_eq!(fx.generation.error(), Some("model overloaded"));
        assert_eq!(fx.generation.progress(), ["step1"]);
        assert!(fx.generation.course().is_none());
        assert!(storage::load_course(fx.storage.as_ref()).is_none());
    }

    #[tokio::test]
    async fn malformed_result_is_reported() {
        let mut fx = fixture();
        fx.api
            .stream_frames(HeaderMap::new(), vec!["event: result\ndata: {\"jobTitle\":\n\n"]);

        let outcome = fx
            .generation
            .run("Backend engineer", CancellationToken::new(), |_| {})
            .await;

        assert!(matches!(outcome, GenerationOutcome::Failed(_)));
        assert!(fx.generation.error().unwrap().starts_with("Malformed result payload"));
    }

    #[tokio::test]
    async fn failed_status_is_reported_with_body() {
        let mut fx = fixture();
        fx.api.stream_status(503, "upstream busy");

        fx.generation
            .run("Backend engineer", CancellationToken::new(), |_| {})
            .await;
        assert_eq!(fx.generation.error(), Some("Request failed (503). upstream busy"));
    }

    #[tokio::test]
    async fn stream_headers_update_rate_limits() {
        let mut fx = fixture();
        fx.api.stream_frames(rate_limit_headers("41"), vec![RESULT_FRAME]);

        fx.generation
            .run("Backend engineer", CancellationToken::new(), |_| {})
            .await;
        assert_eq!(fx.limits.read().unwrap().remaining, "41");
    }

    #[tokio::test]
    async fn recent_progress_keeps_last_five() {
        let mut fx = fixture();
        let frames: Vec<String> = (1..=7)
            .map(|i| format!("event: progress\ndata: step{i}\n\n"))
            .collect();
        fx.api
            .stream_frames(HeaderMap::new(), frames.iter().map(String::as_str).collect());

        let outcome = fx
            .generation
            .run("Backend engineer", CancellationToken::new(), |_| {})
            .await;

        assert_eq!(outcome, GenerationOutcome::Incomplete);
        assert_eq!(fx.generation.progress().len(), 7);
        assert_eq!(
            fx.generation.recent_progress(),
            ["step3", "step4", "step5", "step6", "step7"]
        );
    }

    #[tokio::test]
    async fn cancelled_run_reports_cancellation() {
        let mut fx = fixture();
        fx.api.stream_frames(HeaderMap::new(), vec![RESULT_FRAME]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = fx.generation.run("Backend engineer", cancel, |_| {}).await;
        assert_eq!(outcome, GenerationOutcome::Cancelled);
        assert!(fx.generation.course().is_none());
    }

    #[test]
    fn can_submit_needs_four_characters() {
        let fx = fixture();
        assert!(!fx.generation.can_submit("   "));
        assert!(!fx.generation.can_submit(" abc "));
        assert!(fx.generation.can_submit(" abcd "));
    }
}
