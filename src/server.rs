use crate::client::{COURSE_GUIDE_PATH, IDEAL_ANSWER_PATH, REVIEW_PATH, StudyClient};
use crate::protocol::{ErrorBody, GenerateRequest, IdealAnswerRequest, ReviewRequest};
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::error::Error;
use std::sync::Arc;
use tracing::{error, info};

pub struct ServerConfig {
    pub listen: String,
    pub upstream_base_url: String,
}

struct ServerState {
    upstream: StudyClient,
}

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;
type Rejection = (StatusCode, Json<ErrorBody>);

#[derive(Deserialize)]
struct CourseGuideBody {
    prompt: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewBody {
    question: Option<String>,
    answer: Option<String>,
    job_title: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdealAnswerBody {
    question: Option<String>,
    job_title: Option<String>,
}

pub async fn run(config: ServerConfig) -> ServerResult<()> {
    let app = router(StudyClient::new(&config.upstream_base_url));

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(
        listen = %config.listen,
        upstream = %config.upstream_base_url,
        "aceai proxy listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(upstream: StudyClient) -> axum::Router {
    let state = Arc::new(ServerState { upstream });
    axum::Router::new()
        .route(COURSE_GUIDE_PATH, post(course_guide))
        .route(REVIEW_PATH, post(review))
        .route(IDEAL_ANSWER_PATH, post(ideal_answer))
        .with_state(state)
}

async fn course_guide(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<Response, Rejection> {
    let body: CourseGuideBody = parse_body(&body)?;
    let request = GenerateRequest {
        prompt: required(body.prompt, "prompt")?,
    };
    Ok(forward(&state, COURSE_GUIDE_PATH, &request).await)
}

async fn review(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<Response, Rejection> {
    let body: ReviewBody = parse_body(&body)?;
    let request = ReviewRequest {
        question: required(body.question, "question")?,
        answer: required(body.answer, "answer")?,
        job_title: body.job_title.unwrap_or_default(),
    };
    Ok(forward(&state, REVIEW_PATH, &request).await)
}

async fn ideal_answer(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<Response, Rejection> {
    let body: IdealAnswerBody = parse_body(&body)?;
    let request = IdealAnswerRequest {
        question: required(body.question, "question")?,
        job_title: body.job_title.unwrap_or_default(),
    };
    Ok(forward(&state, IDEAL_ANSWER_PATH, &request).await)
}

fn bad_request(message: impl Into<String>) -> Rejection {
    (StatusCode::BAD_REQUEST, Json(ErrorBody::new(message)))
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Rejection> {
    serde_json::from_slice(body).map_err(|_| bad_request("Invalid JSON body"))
}

fn required(value: Option<String>, field: &str) -> Result<String, Rejection> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| bad_request(format!("{} is required", field)))
}

/// Relays the upstream status and raw body, plus any rate-limit headers.
async fn forward<T>(state: &ServerState, path: &str, request: &T) -> Response
where
    T: serde::Serialize + Sync,
{
    let upstream = match state.upstream.post_json(path, request).await {
        Ok(upstream) => upstream,
        Err(err) => {
            error!(path, error = %err, "upstream request failed");
            return (
                StatusCode::BAD_GATEWAY,
                Json(ErrorBody::new(format!("Upstream request failed: {}", err))),
            )
                .into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    if !status.is_success() {
        info!(path, status = upstream.status, "upstream returned an error");
    }

    let mut response = (status, upstream.body).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in upstream.headers.iter() {
        if name.as_str().starts_with("x-ratelimit-") {
            headers.insert(name.clone(), value.clone());
        }
    }
    response
}
