use serde::{Deserialize, Serialize};

use super::question::{OPTION_COUNT, Question, Selection};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptionMark {
    #[default]
    Neutral,
    Correct,
    Incorrect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub correct: bool,
    pub score_delta: u32,
}

/// What the client shows once a question is resolved. Options stay locked
/// until the session moves on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub question_index: usize,
    pub selection: Selection,
    pub correct: bool,
    pub score_delta: u32,
    pub correct_index: usize,
    pub marks: [OptionMark; OPTION_COUNT],
    pub locked: bool,
    pub explanation: String,
}

pub fn resolve(question: &Question, selection: Selection) -> Resolution {
    let correct = selection.index() == Some(question.correct_index);
    Resolution {
        correct,
        score_delta: u32::from(correct),
    }
}

pub fn feedback(question_index: usize, question: &Question, selection: Selection) -> Feedback {
    let resolution = resolve(question, selection);

    let mut marks = [OptionMark::Neutral; OPTION_COUNT];
    marks[question.correct_index] = OptionMark::Correct;
    if let Some(selected) = selection.index()
        && selected != question.correct_index
        && selected < OPTION_COUNT
    {
        marks[selected] = OptionMark::Incorrect;
    }

    Feedback {
        question_index,
        selection,
        correct: resolution.correct,
        score_delta: resolution.score_delta,
        correct_index: question.correct_index,
        marks,
        locked: true,
        explanation: question.explanation.clone(),
    }
}
