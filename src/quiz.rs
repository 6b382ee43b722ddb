use crate::protocol::{Module, QuizQuestion};
use std::collections::HashMap;

/// Progress through one module's quiz.
///
/// The score moves only when a selected answer is revealed, and each question
/// can be revealed once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuizRunState {
    started: bool,
    current_index: usize,
    selected_option: Option<usize>,
    revealed: bool,
    score: usize,
}

impl QuizRunState {
    /// Starts, or restarts, at the first question with a zero score.
    pub fn start(&mut self) {
        *self = Self {
            started: true,
            ..Self::default()
        };
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn selected_option(&self) -> Option<usize> {
        self.selected_option
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn score(&self) -> usize {
        self.score
    }

    pub fn current_question<'a>(&self, module: &'a Module) -> Option<&'a QuizQuestion> {
        if !self.started {
            return None;
        }
        module.quiz_questions.get(self.current_index)
    }

    /// Records a pending selection. Ignored once the answer is revealed or
    /// when `option` is not one of the question's options.
    pub fn select_option(&mut self, module: &Module, option: usize) -> bool {
        if self.revealed {
            return false;
        }
        let Some(question) = self.current_question(module) else {
            return false;
        };
        if option >= question.options.len() {
            return false;
        }
        self.selected_option = Some(option);
        true
    }

    /// Reveals the current answer, returning whether the selection was
    /// correct. `None` when nothing is selected or it was already revealed.
    pub fn reveal_answer(&mut self, module: &Module) -> Option<bool> {
        if self.revealed {
            return None;
        }
        let question = self.current_question(module)?;
        let selected = self.selected_option?;

        let correct = selected == question.correct_index;
        self.revealed = true;
        if correct {
            self.score += 1;
        }
        Some(correct)
    }

    /// Advances; past the last question the run is finished, not wrapped.
    pub fn next_question(&mut self, module: &Module) {
        if !self.started {
            return;
        }
        let total = module.quiz_questions.len();
        self.current_index = (self.current_index + 1).min(total);
        self.selected_option = None;
        self.revealed = false;
    }

    pub fn is_finished(&self, module: &Module) -> bool {
        self.started && self.current_index >= module.quiz_questions.len()
    }
}

/// Quiz state for every module of a course, keyed by module index.
#[derive(Debug, Default)]
pub struct QuizBook {
    runs: HashMap<usize, QuizRunState>,
}

impl QuizBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_mut(&mut self, module_index: usize) -> &mut QuizRunState {
        self.runs.entry(module_index).or_default()
    }

    pub fn run(&self, module_index: usize) -> Option<&QuizRunState> {
        self.runs.get(&module_index)
    }

    pub fn total_score(&self) -> usize {
        self.runs.values().map(QuizRunState::score).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(correct_index: usize) -> QuizQuestion {
        QuizQuestion {
            question: "Pick one".to_string(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_index,
            explanation: String::new(),
        }
    }

    fn module(correct: &[usize]) -> Module {
        Module {
            title: "Networking".to_string(),
            description: String::new(),
            resources: Vec::new(),
            quiz_questions: correct.iter().copied().map(question).collect(),
        }
    }

    #[test]
    fn starts_at_first_question() {
        let module = module(&[0, 1]);
        let mut run = QuizRunState::default();
        assert!(run.current_question(&module).is_none());

        run.start();
        assert!(run.is_started());
        assert_eq!(run.current_index(), 0);
        assert!(run.current_question(&module).is_some());
    }

    #[test]
    fn reselecting_before_reveal_scores_once() {
        let module = module(&[2]);
        let mut run = QuizRunState::default();
        run.start();

        assert!(run.select_option(&module, 0));
        assert!(run.select_option(&module, 2));
        assert_eq!(run.score(), 0);

        assert_eq!(run.reveal_answer(&module), Some(true));
        assert_eq!(run.score(), 1);
        assert_eq!(run.reveal_answer(&module), None);
        assert_eq!(run.score(), 1);
    }

    #[test]
    fn selection_is_locked_after_reveal() {
        let module = module(&[1]);
        let mut run = QuizRunState::default();
        run.start();
        run.select_option(&module, 0);
        assert_eq!(run.reveal_answer(&module), Some(false));

        assert!(!run.select_option(&module, 1));
        assert_eq!(run.selected_option(), Some(0));
        assert_eq!(run.score(), 0);
    }

    #[test]
    fn reveal_requires_a_selection() {
        let module = module(&[1]);
        let mut run = QuizRunState::default();
        run.start();
        assert_eq!(run.reveal_answer(&module), None);
        assert!(!run.is_revealed());
    }

    #[test]
    fn out_of_range_options_are_ignored() {
        let module = module(&[9]);
        let mut run = QuizRunState::default();
        run.start();

        assert!(!run.select_option(&module, 4));
        assert!(run.select_option(&module, 3));
        assert_eq!(run.reveal_answer(&module), Some(false));
    }

    #[test]
    fn next_on_last_question_finishes() {
        let module = module(&[0, 0]);
        let mut run = QuizRunState::default();
        run.start();

        run.next_question(&module);
        assert_eq!(run.current_index(), 1);
        assert!(!run.is_finished(&module));

        run.next_question(&module);
        assert_eq!(run.current_index(), 2);
        assert!(run.is_finished(&module));
        assert!(run.current_question(&module).is_none());

        run.next_question(&module);
        assert_eq!(run.current_index(), 2);
    }

    #[test]
    fn next_clears_pending_selection() {
        let module = module(&[0, 0]);
        let mut run = QuizRunState::default();
        run.start();
        run.select_option(&module, 0);
        run.reveal_answer(&module);

        run.next_question(&module);
        assert_eq!(run.selected_option(), None);
        assert!(!run.is_revealed());
        assert_eq!(run.score(), 1);
    }

    #[test]
    fn restart_resets_score() {
        let module = module(&[0]);
        let mut run = QuizRunState::default();
        run.start();
        run.select_option(&module, 0);
        run.reveal_answer(&module);
        run.start();
        assert_eq!(run.score(), 0);
        assert_eq!(run.current_index(), 0);
    }

    #[test]
    fn book_tracks_modules_independently() {
        let first = module(&[0]);
        let second = module(&[1]);
        let mut book = QuizBook::new();

        let run = book.run_mut(0);
        run.start();
        run.select_option(&first, 0);
        run.reveal_answer(&first);

        let run = book.run_mut(1);
        run.start();
        run.select_option(&second, 0);
        run.reveal_answer(&second);

        assert_eq!(book.run(0).map(QuizRunState::score), Some(1));
        assert_eq!(book.run(1).map(QuizRunState::score), Some(0));
        assert_eq!(book.total_score(), 1);
        assert!(book.run(2).is_none());
    }
}
