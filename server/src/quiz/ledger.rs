use std::collections::HashSet;

use super::question::Question;

const DIRECTIVE_PREFIX: &str = "Avoid repeating any of these previously used questions: ";
const DIRECTIVE_SEPARATOR: &str = " | ";

/// Question texts already served in a session, across every generation round.
///
/// Entries keep provider order; lookups go through the trimmed-text set.
#[derive(Debug, Default, Clone)]
pub struct QuestionLedger {
    entries: Vec<String>,
    seen: HashSet<String>,
}

impl QuestionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops candidates whose trimmed text was already served, is already in
    /// the session, or repeats an earlier candidate of the same batch. Accepted
    /// candidates are recorded in order and returned.
    pub fn record_and_filter(
        &mut self,
        candidates: Vec<Question>,
        already_in_session: &[Question],
    ) -> Vec<Question> {
        let in_session: HashSet<&str> = already_in_session.iter().map(Question::key).collect();
        let mut accepted = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let key = candidate.key();
            if in_session.contains(key) || self.seen.contains(key) {
                tracing::debug!(question = %key, "Dropping duplicate question");
                continue;
            }
            self.seen.insert(key.to_string());
            self.entries.push(key.to_string());
            accepted.push(candidate);
        }

        accepted
    }

    /// Prompt hint listing every recorded question, or an empty string when
    /// nothing has been recorded yet.
    pub fn exclusion_directive(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }
        let listed: Vec<String> = self
            .entries
            .iter()
            .map(|entry| entry.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect();
        format!("{}{}", DIRECTIVE_PREFIX, listed.join(DIRECTIVE_SEPARATOR))
    }

    pub fn contains(&self, text: &str) -> bool {
        self.seen.contains(text.trim())
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.seen.clear();
    }
}
