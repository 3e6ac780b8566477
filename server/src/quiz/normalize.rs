use regex::Regex;
use serde_json::{Deserializer, Map, Value};
use std::sync::LazyLock;

use super::error::ParseError;
use super::question::{OPTION_COUNT, PLACEHOLDER_OPTION, Question};

const TEXT_KEYS: &[&str] = &["question", "text", "prompt", "q"];
const OPTION_KEYS: &[&str] = &["options", "choices", "answers"];
const INDEX_KEYS: &[&str] = &["answer_index", "answerIndex", "correct_index", "correctIndex"];
const ANSWER_TEXT_KEY: &str = "answer";
const EXPLANATION_KEYS: &[&str] = &["explanation", "reason"];
const OPTION_OBJECT_KEYS: &[&str] = &["text", "option", "value", "label"];

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("Failed to compile code fence regex")
});

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[\]}])").expect("Failed to compile trailing comma regex"));

/// Coerces raw provider text into at most `requested_count` questions.
///
/// Never fails: unparseable output yields an empty vector and the caller
/// decides whether that is a provider failure.
pub fn normalize(raw_text: &str, requested_count: usize) -> Vec<Question> {
    match normalize_items(raw_text, requested_count) {
        Ok(questions) => questions,
        Err(e) => {
            tracing::debug!(error = %e, raw.length = raw_text.len(), "Provider output could not be parsed");
            Vec::new()
        }
    }
}

/// Like [`normalize`] but reports why nothing could be extracted.
pub fn normalize_items(raw_text: &str, requested_count: usize) -> Result<Vec<Question>, ParseError> {
    let items = extract_items(raw_text)?;
    let total_items = items.len();
    let questions: Vec<Question> = items
        .iter()
        .filter_map(coerce_question)
        .take(requested_count)
        .collect();

    tracing::debug!(
        items.received = total_items,
        items.kept = questions.len(),
        items.requested = requested_count,
        "Normalized provider items"
    );
    Ok(questions)
}

/// Locates the JSON payload embedded in free-form provider text and returns
/// its question items.
///
/// Every code fence is tried in order, then the whole text. Within each
/// candidate, parsing starts at every `[` or `{` and stops at the end of the
/// first complete value, so bracketed prose around the payload is skipped.
pub fn extract_items(raw_text: &str) -> Result<Vec<Value>, ParseError> {
    let text = replace_smart_quotes(raw_text);

    let mut shape_error = false;
    let mut syntax_error: Option<String> = None;

    for candidate in candidates(&text) {
        let repaired = TRAILING_COMMA.replace_all(candidate, "$1");
        let mut variants = vec![candidate];
        if repaired != candidate {
            variants.push(repaired.as_ref());
        }

        for variant in variants {
            for start in value_starts(variant) {
                let mut stream = Deserializer::from_str(&variant[start..]).into_iter::<Value>();
                match stream.next() {
                    Some(Ok(value)) => match items_from_value(value) {
                        Some(items) => return Ok(items),
                        None => shape_error = true,
                    },
                    Some(Err(e)) => {
                        syntax_error.get_or_insert(e.to_string());
                    }
                    None => {}
                }
            }
        }
    }

    if shape_error {
        Err(ParseError::UnexpectedShape)
    } else if let Some(message) = syntax_error {
        Err(ParseError::Malformed(message))
    } else {
        Err(ParseError::NoJson)
    }
}

fn replace_smart_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
            other => other,
        })
        .collect()
}

/// Fenced blocks in order of appearance, then the full text.
fn candidates(text: &str) -> Vec<&str> {
    let mut candidates: Vec<&str> = CODE_FENCE
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str().trim())
        .filter(|inner| !inner.is_empty())
        .collect();
    candidates.push(text.trim());
    candidates
}

fn value_starts(text: &str) -> impl Iterator<Item = usize> + '_ {
    text.char_indices()
        .filter(|(_, c)| *c == '[' || *c == '{')
        .map(|(i, _)| i)
}

fn items_from_value(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) if items.iter().all(Value::is_object) => Some(items),
        Value::Object(mut map) => ["questions", "quiz"].iter().find_map(|key| match map.remove(*key) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        }),
        _ => None,
    }
}

/// Coerces one provider item into the fixed question schema, or drops it.
pub fn coerce_question(item: &Value) -> Option<Question> {
    let fields = item.as_object()?;

    let text = first_string(fields, TEXT_KEYS)?.trim().to_string();
    if text.is_empty() {
        return None;
    }

    let raw_options: Vec<String> = OPTION_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_array))
        .map(|values| values.iter().map(option_text).collect())
        .unwrap_or_default();

    let usable = raw_options
        .iter()
        .take(OPTION_COUNT)
        .filter(|option| !option.is_empty())
        .count();
    if usable < 2 {
        tracing::trace!(question = %text, options.usable = usable, "Dropping item with too few options");
        return None;
    }

    let correct_index = resolve_answer_index(fields, &raw_options);
    let options: [String; OPTION_COUNT] = std::array::from_fn(|i| {
        raw_options
            .get(i)
            .filter(|option| !option.is_empty())
            .cloned()
            .unwrap_or_else(|| PLACEHOLDER_OPTION.to_string())
    });
    let explanation = first_string(fields, EXPLANATION_KEYS)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    Some(Question::new(text, options, correct_index, explanation))
}

fn first_string<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| fields.get(*key).and_then(Value::as_str))
}

fn option_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(fields) => first_string(fields, OPTION_OBJECT_KEYS)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| value.to_string()),
        Value::Array(_) => value.to_string(),
    }
}

/// Resolves the correct option index before clamping. Unresolvable answers
/// fall back to 0.
fn resolve_answer_index(fields: &Map<String, Value>, options: &[String]) -> i64 {
    if let Some(value) = INDEX_KEYS
        .iter()
        .find_map(|key| fields.get(*key).filter(|v| !v.is_null()))
    {
        return match value {
            Value::Number(n) => number_to_index(n),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| match_option_text(s, options))
                .unwrap_or(0),
            _ => 0,
        };
    }

    match fields.get(ANSWER_TEXT_KEY) {
        Some(Value::Number(n)) => number_to_index(n),
        Some(Value::String(s)) => match_option_text(s, options)
            .or_else(|| option_letter(s))
            .or_else(|| s.trim().parse::<i64>().ok())
            .unwrap_or(0),
        _ => 0,
    }
}

fn number_to_index(n: &serde_json::Number) -> i64 {
    n.as_i64()
        .or_else(|| n.as_f64().map(|f| f as i64))
        .unwrap_or(0)
}

fn match_option_text(answer: &str, options: &[String]) -> Option<i64> {
    let wanted = answer.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    options
        .iter()
        .position(|option| option.to_lowercase() == wanted)
        .map(|i| i as i64)
}

fn option_letter(answer: &str) -> Option<i64> {
    let trimmed = answer.trim().trim_end_matches([')', '.', ':']);
    let mut chars = trimmed.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() {
        return None;
    }
    match letter {
        'A'..='D' => Some(letter as i64 - 'A' as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn well_formed_payload(n: usize) -> String {
        let items: Vec<Value> = (0..n)
            .map(|i| {
                json!({
                    "question": format!("Question {}?", i),
                    "options": ["a", "b", "c", "d"],
                    "answer_index": i % 4,
                    "explanation": format!("Because {}", i)
                })
            })
            .collect();
        json!({ "questions": items }).to_string()
    }

    #[test]
    fn test_well_formed_payload_keeps_every_item_and_index() {
        let questions = normalize(&well_formed_payload(5), 5);
        assert_eq!(questions.len(), 5);
        for (i, question) in questions.iter().enumerate() {
            assert_eq!(question.text, format!("Question {}?", i));
            assert_eq!(question.correct_index, i % 4);
            assert_eq!(question.explanation, format!("Because {}", i));
        }
    }

    #[test]
    fn test_answer_index_above_range_is_clamped() {
        let raw = r#"[{"question": "Q?", "options": ["a","b","c","d"], "answer_index": 7}]"#;
        let questions = normalize(raw, 1);
        assert_eq!(questions[0].correct_index, 3);
    }

    #[test]
    fn test_fenced_payload_with_prose_smart_quotes_and_trailing_commas() {
        let raw = "Sure! Here is your quiz:\n```json\n{\u{201C}questions\u{201D}: [\n  {\"question\": \"What is 2+2?\", \"options\": [\"3\", \"4\", \"5\", \"6\",], \"answer_index\": 1,},\n]}\n```\nGood luck!";
        let questions = normalize(raw, 10);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].text, "What is 2+2?");
        assert_eq!(questions[0].correct_index, 1);
    }

    #[test]
    fn test_bare_array_surrounded_by_prose() {
        let raw = r#"Here you go: [{"q": "Capital of France?", "choices": ["Paris", "Rome"], "answer": "paris"}] Enjoy."#;
        let questions = normalize(raw, 3);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].options[0], "Paris");
        assert_eq!(questions[0].options[2], PLACEHOLDER_OPTION);
        assert_eq!(questions[0].correct_index, 0);
    }

    #[test]
    fn test_bracketed_prose_before_payload_is_skipped() {
        let raw = r#"Here are your questions [JSON]: [{"question": "Q1?", "options": ["a","b","c","d"], "answer_index": 2}, {"question": "Q2?", "options": ["a","b"]}] {end}"#;
        let questions = normalize(raw, 5);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].text, "Q1?");
        assert_eq!(questions[0].correct_index, 2);
        assert_eq!(questions[1].text, "Q2?");
    }

    #[test]
    fn test_later_fence_is_used_when_first_holds_no_payload() {
        let raw = "First a note:\n```text\nthis block is not JSON\n```\nAnd the quiz:\n```json\n{\"questions\": [{\"question\": \"Fenced?\", \"options\": [\"x\", \"y\", \"z\", \"w\"], \"answer_index\": 1}]}\n```";
        let questions = normalize(raw, 3);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].text, "Fenced?");
        assert_eq!(questions[0].correct_index, 1);
    }

    #[test]
    fn test_single_question_object_is_unexpected_shape() {
        let raw = r#"{"question": "Alone?", "options": ["a", "b", "c", "d"]}"#;
        assert_eq!(extract_items(raw), Err(ParseError::UnexpectedShape));
    }

    #[test]
    fn test_legacy_quiz_key_is_accepted() {
        let raw = r#"{"quiz": [{"question": "Q?", "options": ["a","b"], "answerIndex": 1}]}"#;
        let questions = normalize(raw, 1);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].correct_index, 1);
    }

    #[test]
    fn test_no_json_is_reported_and_normalize_is_empty() {
        assert_eq!(extract_items("I cannot help with that."), Err(ParseError::NoJson));
        assert!(normalize("I cannot help with that.", 5).is_empty());
    }

    #[test]
    fn test_malformed_json_is_reported() {
        let result = extract_items("[{\"question\": \"Q?\", \"options\": [\"a\" \"b\"]}]");
        assert!(matches!(result, Err(ParseError::Malformed(_))));
    }

    #[test]
    fn test_object_without_question_list_is_unexpected_shape() {
        assert_eq!(
            extract_items(r#"{"status": "ok"}"#),
            Err(ParseError::UnexpectedShape)
        );
    }

    #[test]
    fn test_items_without_text_or_enough_options_are_dropped() {
        let raw = json!([
            {"question": "   ", "options": ["a", "b", "c", "d"]},
            {"question": "One option?", "options": ["only", "", null]},
            {"options": ["a", "b"]},
            {"question": "Kept?", "options": ["a", "b", "c", "d", "e", "f"], "answer_index": 5},
        ])
        .to_string();
        let questions = normalize(&raw, 10);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].text, "Kept?");
        assert_eq!(questions[0].options.len(), OPTION_COUNT);
        assert_eq!(questions[0].options[3], "d");
        assert_eq!(questions[0].correct_index, 3);
    }

    #[test]
    fn test_result_is_truncated_never_padded() {
        assert_eq!(normalize(&well_formed_payload(8), 3).len(), 3);
        assert_eq!(normalize(&well_formed_payload(2), 5).len(), 2);
    }

    #[test]
    fn test_answer_resolution_variants() {
        let options = vec!["Red".to_string(), "Green".to_string(), "Blue".to_string()];
        let with = |value: Value| {
            let fields = json!({ "answer": value });
            resolve_answer_index(fields.as_object().unwrap(), &options)
        };
        assert_eq!(with(json!("blue")), 2);
        assert_eq!(with(json!("B)")), 1);
        assert_eq!(with(json!("2")), 2);
        assert_eq!(with(json!(1)), 1);
        assert_eq!(with(json!("purple")), 0);

        let fields = json!({ "answer_index": "3", "answer": "Red" });
        assert_eq!(resolve_answer_index(fields.as_object().unwrap(), &options), 3);

        let fields = json!({ "answer_index": null, "answer": "Green" });
        assert_eq!(resolve_answer_index(fields.as_object().unwrap(), &options), 1);
    }

    #[test]
    fn test_option_objects_and_numbers_become_strings() {
        let item = json!({
            "question": "Pick one",
            "options": [{"text": "first"}, 42, true, {"id": 1}],
            "answer_index": -4
        });
        let question = coerce_question(&item).unwrap();
        assert_eq!(question.options[0], "first");
        assert_eq!(question.options[1], "42");
        assert_eq!(question.options[2], "true");
        assert_eq!(question.options[3], r#"{"id":1}"#);
        assert_eq!(question.correct_index, 0);
    }
}
