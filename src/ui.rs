use crate::client::StudyClient;
use crate::interview::{InterviewController, SlotView};
use crate::protocol::{CourseGuide, IdealAnswer, ReviewResult};
use crate::quiz::QuizBook;
use crate::ratelimit::{RateLimitStore, SystemClock};
use crate::session::{Generation, GenerationOutcome};
use crate::storage::{self, BroadcastSignal, FileStorage};
use futures::StreamExt;
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{IntervalStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

type UiResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Shared handles for every command run from the terminal.
pub struct Context {
    pub api: Arc<StudyClient>,
    pub storage: Arc<FileStorage>,
    pub limits: Arc<RateLimitStore>,
}

impl Context {
    pub fn new(api_url: &str, data_dir: PathBuf) -> Self {
        let api = Arc::new(StudyClient::new(api_url));
        debug!(data_dir = %data_dir.display(), api = api.base_url(), "opening context");
        let storage = Arc::new(FileStorage::new(data_dir));
        let limits = Arc::new(RateLimitStore::new(
            storage.clone(),
            Arc::new(BroadcastSignal::default()),
            Arc::new(SystemClock),
        ));
        Self {
            api,
            storage,
            limits,
        }
    }

    fn badge(&self) -> Option<String> {
        self.limits
            .read()
            .map(|snapshot| snapshot.badge_text(self.limits.now_millis()))
    }

    fn print_badge(&self) {
        if let Some(badge) = self.badge() {
            println!("{}", badge);
        }
    }
}

struct Input {
    lines: Lines<BufReader<Stdin>>,
}

impl Input {
    fn stdin() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// `None` once stdin is closed.
    async fn prompt(&mut self, label: &str) -> UiResult<Option<String>> {
        print!("{}", label);
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?)
    }
}

fn cancel_on_ctrl_c(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    })
}

const SHORT_PROMPT: &str = "Describe the role in at least four characters.";

pub const PROMPT_PRESETS: [&str; 4] = [
    "Senior growth marketer for Amazon marketplace strategy",
    "E-commerce specialist managing Amazon PPC, SEO, and listings",
    "Frontend engineer scaling design systems in React",
    "Data analyst pivoting to ML engineering in 90 days",
];

/// Presets are numbered from 1, as listed by [`presets_listing`].
pub fn preset(number: usize) -> UiResult<&'static str> {
    number
        .checked_sub(1)
        .and_then(|index| PROMPT_PRESETS.get(index))
        .copied()
        .ok_or_else(|| {
            format!(
                "Preset {} does not exist; choose 1 to {}.\n{}",
                number,
                PROMPT_PRESETS.len(),
                presets_listing()
            )
            .into()
        })
}

pub fn presets_listing() -> String {
    PROMPT_PRESETS
        .iter()
        .enumerate()
        .map(|(index, text)| format!("  {}. {}", index + 1, text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn generate(context: &Context, prompt: String) -> UiResult<()> {
    let mut generation = Generation::new(
        context.api.clone(),
        context.limits.clone(),
        context.storage.clone(),
    );
    if !generation.can_submit(&prompt) {
        return Err(format!(
            "{}\nOr start from a preset (--preset N):\n{}",
            SHORT_PROMPT,
            presets_listing()
        )
        .into());
    }

    let cancel = CancellationToken::new();
    let watcher = cancel_on_ctrl_c(cancel.clone());
    println!("Starting...");
    let outcome = generation
        .run(&prompt, cancel, |text| println!("  {}", text))
        .await;
    watcher.abort();

    let result: UiResult<()> = match outcome {
        GenerationOutcome::Completed(course) => {
            for line in describe_course(&course) {
                println!("{}", line);
            }
            Ok(())
        }
        GenerationOutcome::Cancelled => {
            println!("Cancelled.");
            Ok(())
        }
        GenerationOutcome::Failed(message) => {
            if !generation.recent_progress().is_empty() {
                println!("Last progress:");
                for text in generation.recent_progress() {
                    println!("  {}", text);
                }
            }
            Err(message.into())
        }
        GenerationOutcome::Incomplete => {
            Err("The stream closed before a course guide arrived.".into())
        }
        GenerationOutcome::Rejected => Err(SHORT_PROMPT.into()),
    };
    context.print_badge();
    result
}

fn describe_course(course: &CourseGuide) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        format!("Course guide: {}", course.job_title),
        course.overview.clone(),
    ];
    for (index, module) in course.modules.iter().enumerate() {
        lines.push(format!(
            "  {}. {} ({} quiz questions)",
            index + 1,
            module.title,
            module.quiz_questions.len()
        ));
    }
    lines.push(format!(
        "{} mock interview questions saved. Run `aceai quiz` or `aceai interview`.",
        course.mock_interview_questions.len()
    ));
    lines
}

#[derive(Debug, PartialEq, Eq)]
enum QuizInput {
    Quit,
    Choice(usize),
    Invalid,
}

/// Options are numbered from 1 on screen.
fn parse_quiz_input(line: &str) -> QuizInput {
    let line = line.trim();
    if line.eq_ignore_ascii_case("q") {
        return QuizInput::Quit;
    }
    match line.parse::<usize>() {
        Ok(number) if number >= 1 => QuizInput::Choice(number - 1),
        _ => QuizInput::Invalid,
    }
}

pub async fn quiz(context: &Context, module: Option<usize>) -> UiResult<()> {
    let course = storage::load_course(context.storage.as_ref())
        .ok_or("No course guide saved yet. Run `aceai generate` first.")?;
    let indices: Vec<usize> = match module {
        Some(number) if (1..=course.modules.len()).contains(&number) => vec![number - 1],
        Some(number) => {
            return Err(format!(
                "Module {} does not exist; the course has {}.",
                number,
                course.modules.len()
            )
            .into());
        }
        None => (0..course.modules.len()).collect(),
    };

    let mut input = Input::stdin();
    let mut book = QuizBook::new();
    'modules: for index in indices {
        let module = &course.modules[index];
        println!("\n== Module {}: {}", index + 1, module.title);
        if module.quiz_questions.is_empty() {
            println!("No quiz questions.");
            continue;
        }

        let run = book.run_mut(index);
        run.start();
        while let Some(question) = run.current_question(module) {
            println!(
                "\nQ{}/{}: {}",
                run.current_index() + 1,
                module.quiz_questions.len(),
                question.question
            );
            for (number, option) in question.options.iter().enumerate() {
                println!("  {}) {}", number + 1, option);
            }

            let Some(line) = input.prompt("Answer (number, q to quit): ").await? else {
                break 'modules;
            };
            let choice = match parse_quiz_input(&line) {
                QuizInput::Quit => break 'modules,
                QuizInput::Choice(choice) => choice,
                QuizInput::Invalid => {
                    println!("Enter an option number.");
                    continue;
                }
            };
            if !run.select_option(module, choice) {
                println!("No such option.");
                continue;
            }

            match run.reveal_answer(module) {
                Some(true) => println!("Correct."),
                Some(false) => println!(
                    "Incorrect. Answer: {}",
                    question
                        .options
                        .get(question.correct_index)
                        .map(String::as_str)
                        .unwrap_or("(not listed)")
                ),
                None => {}
            }
            if !question.explanation.is_empty() {
                println!("{}", question.explanation);
            }
            run.next_question(module);
        }

        if run.is_finished(module) {
            println!(
                "Module score: {}/{}",
                run.score(),
                module.quiz_questions.len()
            );
        }
    }

    let attempted = course
        .modules
        .iter()
        .enumerate()
        .filter(|(index, _)| book.run(*index).is_some_and(|run| run.is_started()))
        .map(|(_, module)| module.quiz_questions.len())
        .sum::<usize>();
    println!("\nTotal score: {}/{}", book.total_score(), attempted);
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum InterviewCommand<'a> {
    Quit,
    Back,
    Skip,
    Ideal,
    Answer(&'a str),
}

fn parse_interview_command(line: &str) -> InterviewCommand<'_> {
    match line.trim() {
        ":quit" | ":q" => InterviewCommand::Quit,
        ":back" => InterviewCommand::Back,
        "" | ":next" => InterviewCommand::Skip,
        ":ideal" => InterviewCommand::Ideal,
        answer => InterviewCommand::Answer(answer),
    }
}

fn describe_review(view: &SlotView<ReviewResult>) -> Vec<String> {
    let mut lines = Vec::new();
    if view.loading {
        lines.push("Review still in progress.".to_string());
    }
    if let Some(error) = &view.error {
        lines.push(format!("Review failed: {}", error));
    }
    if let Some(review) = &view.result {
        lines.push(format!("Score: {}", review.score));
        lines.push(review.summary.clone());
        lines.extend(review.strengths.iter().map(|item| format!("  + {}", item)));
        lines.extend(review.improvements.iter().map(|item| format!("  - {}", item)));
    }
    lines
}

fn describe_ideal(view: &SlotView<IdealAnswer>) -> Vec<String> {
    let mut lines = Vec::new();
    if view.loading {
        lines.push("Ideal answer still in progress.".to_string());
    }
    if let Some(error) = &view.error {
        lines.push(format!("Ideal answer failed: {}", error));
    }
    if let Some(ideal) = &view.result {
        lines.push("Ideal answer:".to_string());
        lines.push(ideal.answer.clone());
    }
    lines
}

pub async fn interview(context: &Context) -> UiResult<()> {
    let session = storage::load_session(context.storage.as_ref())
        .ok_or("No interview questions saved yet. Run `aceai generate` first.")?;
    if session.questions.is_empty() {
        return Err("The saved session has no interview questions.".into());
    }

    let interview = InterviewController::new(context.api.clone(), context.limits.clone(), session);
    let mut input = Input::stdin();
    println!("Mock interview: {}", interview.job_title());

    loop {
        if interview.is_finished().await {
            let progress = interview.progress().await;
            println!(
                "\nSession complete: {} of {} answered.",
                progress.completed,
                interview.total()
            );
            match input.prompt("Retake? [y/N] ").await? {
                Some(line) if line.trim().eq_ignore_ascii_case("y") => {
                    interview.retake().await;
                    continue;
                }
                _ => break,
            }
        }

        let index = interview.progress().await.current_index;
        let Some(question) = interview.question(index) else {
            break;
        };
        println!(
            "\nQuestion {}/{} ({}% done): {}",
            index + 1,
            interview.total(),
            interview.progress_percent().await,
            question
        );
        if let Some(previous) = interview.answer(index).await {
            println!("Your last answer: {}", previous);
        }

        let Some(line) = input.prompt("answer, :ideal, :back, :next or :quit > ").await? else {
            break;
        };
        match parse_interview_command(&line) {
            InterviewCommand::Quit => break,
            InterviewCommand::Back => interview.prev_question().await,
            InterviewCommand::Skip => interview.next_question().await,
            InterviewCommand::Ideal => {
                println!("Fetching ideal answer...");
                interview.request_ideal_answer(index).await;
                for line in describe_ideal(&interview.ideal(index).await) {
                    println!("{}", line);
                }
            }
            InterviewCommand::Answer(answer) => {
                interview.set_answer(index, answer).await;
                println!("Reviewing...");
                interview.submit_review(index).await;
                let review = interview.review(index).await;
                for line in describe_review(&review) {
                    println!("{}", line);
                }
                if review.error.is_none() {
                    interview.next_question().await;
                }
            }
        }
    }

    context.print_badge();
    Ok(())
}

/// Prints the badge once, or keeps it updated until ctrl-c with `watch`.
pub async fn limits(context: &Context, watch: bool) -> UiResult<()> {
    if !watch {
        match context.badge() {
            Some(badge) => println!("{}", badge),
            None => debug!("no rate limit snapshot stored"),
        }
        return Ok(());
    }

    let (changed, changes) = watch::channel(());
    let _subscription = context.limits.subscribe(move || {
        let _ = changed.send(());
    });
    let mut changes = WatchStream::from_changes(changes);
    let mut ticks = IntervalStream::new(tokio::time::interval(Duration::from_secs(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticks.next() => {}
            Some(()) = changes.next() => {}
            _ = &mut ctrl_c => {
                println!();
                return Ok(());
            }
        }
        // Re-read on every tick so writes from other aceai processes show up.
        let badge = context.badge().unwrap_or_default();
        print!("\r\x1b[2K{}", badge);
        std::io::stdout().flush()?;
    }
}
