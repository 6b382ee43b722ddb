use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseGuide {
    pub job_title: String,
    pub overview: String,
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub mock_interview_questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub quiz_questions: Vec<QuizQuestion>,
}

/// `correct_index` is not validated against `options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Progress { text: String },
    Result { payload: CourseGuide },
    Error { message: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub job_title: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdealAnswerRequest {
    pub question: String,
    #[serde(default)]
    pub job_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    pub score: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdealAnswer {
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn course_guide_reads_camel_case_fields() {
        let value = json!({
            "jobTitle": "Backend",
            "overview": "APIs and storage",
            "modules": [{
                "title": "HTTP",
                "description": "Request lifecycle",
                "resources": ["RFC 9110"],
                "quizQuestions": [{
                    "question": "Which method is idempotent?",
                    "options": ["POST", "PUT", "PATCH", "CONNECT"],
                    "correctIndex": 1,
                    "explanation": "PUT replaces the target resource."
                }]
            }],
            "mockInterviewQuestions": ["Q1"]
        });

        let guide: CourseGuide = serde_json::from_value(value).unwrap();
        assert_eq!(guide.job_title, "Backend");
        assert_eq!(guide.modules[0].quiz_questions[0].correct_index, 1);
        assert_eq!(guide.mock_interview_questions, vec!["Q1".to_string()]);
    }

    #[test]
    fn course_guide_defaults_missing_lists() {
        let guide: CourseGuide = serde_json::from_value(json!({
            "jobTitle": "Analyst",
            "overview": "",
            "modules": [{"title": "SQL", "description": "Joins"}]
        }))
        .unwrap();

        assert!(guide.mock_interview_questions.is_empty());
        assert!(guide.modules[0].resources.is_empty());
        assert!(guide.modules[0].quiz_questions.is_empty());
    }

    #[test]
    fn review_request_serializes_job_title_in_camel_case() {
        let request = ReviewRequest {
            question: "Why Rust?".to_string(),
            answer: "Ownership".to_string(),
            job_title: "Systems".to_string(),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"question": "Why Rust?", "answer": "Ownership", "jobTitle": "Systems"}));
    }
}
