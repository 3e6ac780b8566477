use serde::{Deserialize, Serialize};

/// Every question carries exactly this many options once normalized.
pub const OPTION_COUNT: usize = 4;

/// Filler for option slots the provider left empty or never sent.
pub const PLACEHOLDER_OPTION: &str = "N/A";

/// A multiple-choice question as served to a session.
///
/// The wire form matches what the provider is asked to produce:
/// `{question, options, answer_index, explanation}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "QuestionWire")]
pub struct Question {
    #[serde(rename = "question")]
    pub text: String,
    pub options: [String; OPTION_COUNT],
    #[serde(rename = "answer_index")]
    pub correct_index: usize,
    #[serde(default)]
    pub explanation: String,
}

/// Incoming wire form; every decoded question goes through `Question::new`.
#[derive(Deserialize)]
struct QuestionWire {
    question: String,
    options: [String; OPTION_COUNT],
    answer_index: i64,
    #[serde(default)]
    explanation: String,
}

impl From<QuestionWire> for Question {
    fn from(wire: QuestionWire) -> Self {
        Question::new(wire.question, wire.options, wire.answer_index, wire.explanation)
    }
}

impl Question {
    pub fn new(
        text: impl Into<String>,
        options: [String; OPTION_COUNT],
        correct_index: i64,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into().trim().to_string(),
            options,
            correct_index: clamp_option_index(correct_index),
            explanation: explanation.into(),
        }
    }

    /// Text used for duplicate detection.
    pub fn key(&self) -> &str {
        self.text.trim()
    }
}

pub fn clamp_option_index(index: i64) -> usize {
    index.clamp(0, OPTION_COUNT as i64 - 1) as usize
}

/// What the player did with a question: picked an option, or let the clock run out.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "type", content = "index")]
pub enum Selection {
    Option(usize),
    NoAnswer,
}

impl Selection {
    pub fn index(&self) -> Option<usize> {
        match self {
            Selection::Option(index) => Some(*index),
            Selection::NoAnswer => None,
        }
    }
}

impl From<Option<usize>> for Selection {
    fn from(value: Option<usize>) -> Self {
        value.map_or(Selection::NoAnswer, Selection::Option)
    }
}

#[cfg(test)]
pub(crate) fn sample_question(text: &str, correct_index: i64) -> Question {
    Question::new(
        text,
        [
            "alpha".to_string(),
            "beta".to_string(),
            "gamma".to_string(),
            "delta".to_string(),
        ],
        correct_index,
        "",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_index_is_clamped() {
        assert_eq!(sample_question("Q", 7).correct_index, 3);
        assert_eq!(sample_question("Q", -2).correct_index, 0);
        assert_eq!(sample_question("Q", 2).correct_index, 2);
    }

    #[test]
    fn test_wire_format_uses_provider_field_names() {
        let question = sample_question("  What is Rust?  ", 1);
        let value = serde_json::to_value(&question).unwrap();
        assert_eq!(value["question"], "What is Rust?");
        assert_eq!(value["answer_index"], 1);
        assert_eq!(value["options"].as_array().unwrap().len(), OPTION_COUNT);
    }

    #[test]
    fn test_decoding_clamps_answer_index_and_trims_text() {
        let decoded: Question = serde_json::from_value(serde_json::json!({
            "question": " Out of range? ",
            "options": ["a", "b", "c", "d"],
            "answer_index": 9
        }))
        .unwrap();
        assert_eq!(decoded.correct_index, 3);
        assert_eq!(decoded.text, "Out of range?");
        assert_eq!(decoded.explanation, "");

        let decoded: Question = serde_json::from_value(serde_json::json!({
            "question": "Negative?",
            "options": ["a", "b", "c", "d"],
            "answer_index": -1,
            "explanation": "because"
        }))
        .unwrap();
        assert_eq!(decoded.correct_index, 0);
    }

    #[test]
    fn test_selection_from_option() {
        assert_eq!(Selection::from(Some(2)), Selection::Option(2));
        assert_eq!(Selection::from(None), Selection::NoAnswer);
        assert_eq!(Selection::NoAnswer.index(), None);
    }
}
