use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::time::Instant;

use super::error::{GenerationError, QuizError};
use super::feedback::{self, Feedback};
use super::ledger::QuestionLedger;
use super::question::{OPTION_COUNT, Question, Selection};
use super::source::GenerationRequest;
use super::timer::CountdownTimer;

pub const MAX_QUESTION_COUNT: usize = 20;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Active,
    Finished,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
    Start,
    AppendMore,
    TopUp,
}

/// Issued by the `begin_*` operations. The caller fetches `request` and hands
/// the result back to [`QuizSession::complete_generation`] with `id`.
#[derive(Debug, Clone)]
pub struct GenerationTicket {
    pub id: u64,
    pub kind: GenerationKind,
    pub request: GenerationRequest,
}

#[derive(Debug, Clone, Copy)]
struct PendingGeneration {
    id: u64,
    kind: GenerationKind,
    requested: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub kind: GenerationKind,
    pub added: usize,
    pub requested: usize,
    pub total: usize,
    pub shortfall: usize,
    /// Question index that became visible because of this batch, if any.
    pub shown: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct QuizSummary {
    pub total: usize,
    pub correct: u32,
    pub wrong: usize,
    pub percent: u32,
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Showing(usize),
    Finished(QuizSummary),
}

#[derive(Debug, Clone)]
pub enum RestartOutcome {
    Restarted,
    Generating(GenerationTicket),
}

/// The question as the player sees it. The correct answer is only included
/// through `feedback` once the question has been resolved.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub index: usize,
    pub total: usize,
    pub text: String,
    pub options: [String; OPTION_COUNT],
    pub remaining_secs: u32,
    pub feedback: Option<Feedback>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub topic: Option<String>,
    pub total_questions: usize,
    pub current_index: Option<usize>,
    pub score: u32,
    pub answered: usize,
    pub loading: bool,
    pub current_question: Option<QuestionView>,
    pub summary: Option<QuizSummary>,
}

/// A single player's quiz: ordered questions, position, answers and score.
///
/// Every mutation goes through the transition methods below. Generation is
/// split into `begin_*` and [`complete_generation`](Self::complete_generation)
/// because the provider fetch happens outside the session.
#[derive(Debug)]
pub struct QuizSession {
    phase: Phase,
    topic: Option<String>,
    requested_count: usize,
    questions: Vec<Question>,
    ledger: QuestionLedger,
    current_index: usize,
    answers: BTreeMap<usize, Selection>,
    score: u32,
    started_at: Instant,
    timer: CountdownTimer,
    view_epoch: u64,
    next_ticket_id: u64,
    pending: Option<PendingGeneration>,
}

impl QuizSession {
    pub fn new(timer: CountdownTimer) -> Self {
        Self {
            phase: Phase::Setup,
            topic: None,
            requested_count: 0,
            questions: Vec::new(),
            ledger: QuestionLedger::new(),
            current_index: 0,
            answers: BTreeMap::new(),
            score: 0,
            started_at: Instant::now(),
            timer,
            view_epoch: 0,
            next_ticket_id: 0,
            pending: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn ledger(&self) -> &QuestionLedger {
        &self.ledger
    }

    pub fn current_index(&self) -> Option<usize> {
        (self.phase == Phase::Active).then_some(self.current_index)
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn view_epoch(&self) -> u64 {
        self.view_epoch
    }

    pub fn timer(&self) -> &CountdownTimer {
        &self.timer
    }

    /// Resets the session for a new topic and asks for its first batch.
    pub fn begin_start(&mut self, topic: &str, count: usize) -> Result<GenerationTicket, QuizError> {
        if self.pending.is_some() {
            return Err(QuizError::Busy);
        }
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(QuizError::Validation("Please enter a topic.".to_string()));
        }
        if !(1..=MAX_QUESTION_COUNT).contains(&count) {
            return Err(QuizError::Validation(format!(
                "Question count must be between 1 and {}.",
                MAX_QUESTION_COUNT
            )));
        }

        self.clear_progress();
        self.questions.clear();
        self.ledger.clear();
        self.phase = Phase::Setup;
        self.topic = Some(topic.to_string());
        self.requested_count = count;

        Ok(self.issue_ticket(GenerationKind::Start, count))
    }

    /// Asks for more questions on the current topic, appended to the tail.
    pub fn begin_append(&mut self, count: usize) -> Result<GenerationTicket, QuizError> {
        self.begin_extra(GenerationKind::AppendMore, count)
    }

    /// Asks for the questions a start batch came up short on.
    pub fn begin_top_up(&mut self, count: usize) -> Result<GenerationTicket, QuizError> {
        self.begin_extra(GenerationKind::TopUp, count)
    }

    fn begin_extra(&mut self, kind: GenerationKind, count: usize) -> Result<GenerationTicket, QuizError> {
        if self.pending.is_some() {
            return Err(QuizError::Busy);
        }
        if self.topic.is_none() {
            return Err(QuizError::InvalidState(
                "Start a quiz before asking for more questions.",
            ));
        }
        Ok(self.issue_ticket(kind, count.clamp(1, MAX_QUESTION_COUNT)))
    }

    fn issue_ticket(&mut self, kind: GenerationKind, count: usize) -> GenerationTicket {
        self.next_ticket_id += 1;
        let id = self.next_ticket_id;
        self.pending = Some(PendingGeneration {
            id,
            kind,
            requested: count,
        });
        GenerationTicket {
            id,
            kind,
            request: GenerationRequest {
                topic: self.topic.clone().unwrap_or_default(),
                count,
                used_questions_text: self.ledger.exclusion_directive(),
            },
        }
    }

    /// Applies the result of a fetch issued by a `begin_*` call.
    ///
    /// Results for anything but the pending ticket are rejected as `Stale`
    /// without touching the session.
    pub fn complete_generation(
        &mut self,
        ticket_id: u64,
        result: Result<Vec<Question>, GenerationError>,
    ) -> Result<GenerationOutcome, QuizError> {
        let pending = match self.pending {
            Some(pending) if pending.id == ticket_id => pending,
            _ => return Err(QuizError::Stale),
        };
        self.pending = None;

        let candidates = result?;
        let requested = pending.requested;
        let accepted = self.ledger.record_and_filter(candidates, &self.questions);

        if accepted.is_empty() {
            return Err(QuizError::DuplicateExhaustion {
                soft: !self.questions.is_empty(),
            });
        }

        let first_new = self.questions.len();
        let added = accepted.len();
        self.questions.extend(accepted);

        let shown = match (pending.kind, self.phase) {
            (GenerationKind::Start, _) | (_, Phase::Setup) => {
                self.phase = Phase::Active;
                self.current_index = 0;
                self.started_at = Instant::now();
                self.show_current();
                Some(0)
            }
            (_, Phase::Finished) => {
                self.phase = Phase::Active;
                self.current_index = first_new;
                self.show_current();
                Some(first_new)
            }
            (_, Phase::Active) => None,
        };

        Ok(GenerationOutcome {
            kind: pending.kind,
            added,
            requested,
            total: self.questions.len(),
            shortfall: requested.saturating_sub(added),
            shown,
        })
    }

    /// Records the player's choice for the current question. A second
    /// submission for the same question is ignored.
    pub fn submit_answer(&mut self, selection: Selection) -> Result<Option<Feedback>, QuizError> {
        if self.phase != Phase::Active {
            return Err(QuizError::InvalidState("No question is being shown."));
        }
        if let Selection::Option(index) = selection
            && index >= OPTION_COUNT
        {
            return Err(QuizError::Validation(format!(
                "Option {} does not exist.",
                index
            )));
        }
        if self.answers.contains_key(&self.current_index) {
            return Ok(None);
        }

        self.timer.stop();
        let Some(question) = self.questions.get(self.current_index) else {
            return Err(QuizError::InvalidState("No question is being shown."));
        };
        let result = feedback::feedback(self.current_index, question, selection);
        self.answers.insert(self.current_index, selection);
        self.score += result.score_delta;
        Ok(Some(result))
    }

    /// Resolves the current question as unanswered when its countdown runs out.
    pub fn expire(&mut self, epoch: u64) -> Option<Feedback> {
        if self.phase != Phase::Active || !self.timer.is_current(epoch) {
            return None;
        }
        self.submit_answer(Selection::NoAnswer).ok().flatten()
    }

    pub fn on_tick(&mut self, epoch: u64, remaining: u32) -> bool {
        self.phase == Phase::Active && self.timer.apply_tick(epoch, remaining)
    }

    pub fn advance(&mut self) -> Result<AdvanceOutcome, QuizError> {
        if self.phase != Phase::Active {
            return Err(QuizError::InvalidState("No quiz is running."));
        }
        self.timer.stop();
        if self.current_index + 1 < self.questions.len() {
            self.current_index += 1;
            self.show_current();
            Ok(AdvanceOutcome::Showing(self.current_index))
        } else {
            self.phase = Phase::Finished;
            self.view_epoch += 1;
            Ok(AdvanceOutcome::Finished(self.summary()))
        }
    }

    /// Auto-advance after feedback. Ignored if the player already moved on.
    pub fn advance_from_feedback(&mut self, epoch: u64) -> Option<AdvanceOutcome> {
        if epoch != self.view_epoch
            || self.phase != Phase::Active
            || !self.answers.contains_key(&self.current_index)
        {
            return None;
        }
        self.advance().ok()
    }

    pub fn retreat(&mut self) -> Result<usize, QuizError> {
        if self.phase != Phase::Active || self.current_index == 0 {
            return Err(QuizError::InvalidState("There is no previous question."));
        }
        self.timer.stop();
        self.current_index -= 1;
        self.show_current();
        Ok(self.current_index)
    }

    /// Replays the current questions from the top, or fetches a fresh batch
    /// for the last topic when there are none.
    pub fn restart(&mut self) -> Result<RestartOutcome, QuizError> {
        if self.questions.is_empty() {
            if self.pending.is_some() {
                return Err(QuizError::Busy);
            }
            let Some(topic) = self.topic.clone() else {
                return Err(QuizError::InvalidState("There is no quiz to restart."));
            };
            let count = self.requested_count;
            return self.begin_start(&topic, count).map(RestartOutcome::Generating);
        }

        self.clear_progress();
        self.phase = Phase::Active;
        self.show_current();
        Ok(RestartOutcome::Restarted)
    }

    /// Back to an empty `Setup`; any in-flight fetch becomes stale.
    pub fn reset(&mut self) {
        self.timer.reset();
        self.clear_progress();
        self.questions.clear();
        self.ledger.clear();
        self.topic = None;
        self.requested_count = 0;
        self.pending = None;
        self.phase = Phase::Setup;
        self.view_epoch += 1;
    }

    fn clear_progress(&mut self) {
        self.timer.stop();
        self.current_index = 0;
        self.answers.clear();
        self.score = 0;
        self.started_at = Instant::now();
    }

    fn show_current(&mut self) {
        self.view_epoch += 1;
        self.timer.start(self.view_epoch);
    }

    pub fn summary(&self) -> QuizSummary {
        let total = self.questions.len();
        let percent = if total == 0 {
            0
        } else {
            (100.0 * f64::from(self.score) / total as f64).round() as u32
        };
        QuizSummary {
            total,
            correct: self.score,
            wrong: total.saturating_sub(self.score as usize),
            percent,
            elapsed_secs: self.started_at.elapsed().as_secs().max(1),
        }
    }

    pub fn question_view(&self) -> Option<QuestionView> {
        if self.phase != Phase::Active {
            return None;
        }
        let question = self.questions.get(self.current_index)?;
        let feedback = self
            .answers
            .get(&self.current_index)
            .map(|selection| feedback::feedback(self.current_index, question, *selection));
        Some(QuestionView {
            index: self.current_index,
            total: self.questions.len(),
            text: question.text.clone(),
            options: question.options.clone(),
            remaining_secs: self.timer.remaining(),
            feedback,
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            topic: self.topic.clone(),
            total_questions: self.questions.len(),
            current_index: self.current_index(),
            score: self.score,
            answered: self.answers.len(),
            loading: self.is_loading(),
            current_question: self.question_view(),
            summary: (self.phase == Phase::Finished).then(|| self.summary()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::error::ModelAttempt;
    use crate::quiz::question::sample_question;
    use crate::quiz::timer::TimerSignal;
    use std::collections::HashSet;
    use tokio::sync::mpsc;
    use tokio::time::Duration;

    fn new_session(seconds: u32) -> (QuizSession, mpsc::Receiver<TimerSignal>) {
        let (tx, rx) = mpsc::channel(128);
        (QuizSession::new(CountdownTimer::new(seconds, tx)), rx)
    }

    fn batch(prefix: &str, n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| sample_question(&format!("{} question {}?", prefix, i), (i % 4) as i64))
            .collect()
    }

    fn started(n: usize) -> (QuizSession, mpsc::Receiver<TimerSignal>) {
        let (mut session, rx) = new_session(30);
        let ticket = session.begin_start("Python basics", n).unwrap();
        session.complete_generation(ticket.id, Ok(batch("Python", n))).unwrap();
        (session, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_enters_active_on_first_question() {
        let (mut session, _rx) = new_session(30);
        let ticket = session.begin_start("  Python basics ", 5).unwrap();
        assert_eq!(ticket.kind, GenerationKind::Start);
        assert_eq!(ticket.request.topic, "Python basics");
        assert_eq!(ticket.request.count, 5);
        assert_eq!(ticket.request.used_questions_text, "");
        assert!(session.is_loading());

        let outcome = session
            .complete_generation(ticket.id, Ok(batch("Python", 5)))
            .unwrap();
        assert_eq!(outcome.added, 5);
        assert_eq!(outcome.shortfall, 0);
        assert_eq!(outcome.shown, Some(0));
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(session.current_index(), Some(0));
        assert_eq!(session.score(), 0);
        assert_eq!(session.ledger().len(), 5);
        assert!(session.timer().is_active());
        assert!(!session.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_stays_in_setup() {
        let (mut session, _rx) = new_session(30);
        let ticket = session.begin_start("Rust", 5).unwrap();
        let err = session
            .complete_generation(
                ticket.id,
                Err(GenerationError::ProviderUnavailable {
                    attempts: vec![ModelAttempt {
                        model: "m".to_string(),
                        error: "503".to_string(),
                    }],
                }),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "provider_unavailable");
        assert_eq!(session.phase(), Phase::Setup);
        assert!(session.questions().is_empty());
        assert!(!session.timer().is_active());
        assert!(!session.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_validation() {
        let (mut session, _rx) = new_session(30);
        assert!(matches!(session.begin_start("   ", 5), Err(QuizError::Validation(_))));
        assert!(matches!(session.begin_start("Rust", 0), Err(QuizError::Validation(_))));
        assert!(matches!(session.begin_start("Rust", 21), Err(QuizError::Validation(_))));
        assert!(!session.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_requests_rejected_while_loading() {
        let (mut session, _rx) = started(3);
        session.begin_append(2).unwrap();
        assert!(matches!(session.begin_start("Other", 3), Err(QuizError::Busy)));
        assert!(matches!(session.begin_append(1), Err(QuizError::Busy)));
        assert!(matches!(session.begin_top_up(1), Err(QuizError::Busy)));
        // replaying existing questions does not fetch
        assert!(matches!(session.restart(), Ok(RestartOutcome::Restarted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_submit_scores_once() {
        let (mut session, _rx) = started(5);
        let fb = session.submit_answer(Selection::Option(0)).unwrap().unwrap();
        assert!(fb.correct);
        assert!(!session.timer().is_active());
        assert_eq!(session.submit_answer(Selection::Option(0)).unwrap(), None);
        assert_eq!(session.submit_answer(Selection::Option(1)).unwrap(), None);
        assert_eq!(session.score(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_option_rejected() {
        let (mut session, _rx) = started(1);
        assert!(matches!(
            session.submit_answer(Selection::Option(4)),
            Err(QuizError::Validation(_))
        ));
        assert_eq!(session.snapshot().answered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_questions_and_ledger_stay_unique() {
        let (mut session, _rx) = started(3);
        let ticket = session.begin_append(4).unwrap();
        assert!(ticket.request.used_questions_text.contains("Python question 2?"));

        let mut more = batch("Python", 2);
        more.extend(batch("Extra", 2));
        more.push(sample_question("Extra question 0?", 1));
        let outcome = session.complete_generation(ticket.id, Ok(more)).unwrap();
        assert_eq!(outcome.added, 2);

        let texts: HashSet<&str> = session.questions().iter().map(Question::key).collect();
        assert_eq!(texts.len(), session.questions().len());
        let ledger: HashSet<&str> = session.ledger().entries().iter().map(String::as_str).collect();
        assert_eq!(ledger.len(), session.ledger().len());
        assert_eq!(ledger, texts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_with_one_duplicate_adds_two_without_moving() {
        let (mut session, _rx) = started(3);
        session.submit_answer(Selection::Option(0)).unwrap();
        let epoch = session.view_epoch();

        let ticket = session.begin_append(3).unwrap();
        let mut more = batch("Python", 1);
        more.extend(batch("Fresh", 2));
        let outcome = session.complete_generation(ticket.id, Ok(more)).unwrap();

        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.total, 5);
        assert_eq!(outcome.shown, None);
        assert_eq!(session.current_index(), Some(0));
        assert_eq!(session.score(), 1);
        assert_eq!(session.view_epoch(), epoch);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retreat_and_advance_keep_score() {
        let (mut session, _rx) = started(3);
        session.submit_answer(Selection::Option(0)).unwrap();
        assert_eq!(session.advance().unwrap(), AdvanceOutcome::Showing(1));
        session.submit_answer(Selection::Option(3)).unwrap();
        let score = session.score();

        assert_eq!(session.retreat().unwrap(), 0);
        assert_eq!(session.submit_answer(Selection::Option(2)).unwrap(), None);
        assert_eq!(session.advance().unwrap(), AdvanceOutcome::Showing(1));
        assert_eq!(session.retreat().unwrap(), 0);
        assert!(session.retreat().is_err());
        assert_eq!(session.score(), score);
        assert!(session.question_view().unwrap().feedback.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_newest_countdown_survives_transitions() {
        let (mut session, mut rx) = started(4);
        session.submit_answer(Selection::Option(1)).unwrap();
        session.advance().unwrap();
        session.advance().unwrap();
        session.retreat().unwrap();
        session.restart().unwrap();
        session.advance().unwrap();
        assert!(session.timer().is_active());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let mut epochs = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            epochs.push(signal.epoch());
        }
        assert_eq!(epochs.len(), 2);
        assert!(epochs.iter().all(|epoch| *epoch == session.view_epoch()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_without_click_is_incorrect_and_schedules_advance() {
        let (mut session, mut rx) = started(5);
        let mut ticks = 0;
        let feedback = loop {
            match rx.recv().await.unwrap() {
                TimerSignal::Tick { epoch, remaining } => {
                    assert!(session.on_tick(epoch, remaining));
                    ticks += 1;
                }
                TimerSignal::Expired { epoch } => break session.expire(epoch).unwrap(),
            }
        };

        assert_eq!(ticks, 30);
        assert!(!feedback.correct);
        assert_eq!(feedback.selection, Selection::NoAnswer);
        assert_eq!(session.score(), 0);
        assert_eq!(
            session.advance_from_feedback(session.view_epoch()),
            Some(AdvanceOutcome::Showing(1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_expiry_and_advance_are_ignored() {
        let (mut session, _rx) = started(3);
        let first_epoch = session.view_epoch();
        session.submit_answer(Selection::Option(0)).unwrap();
        session.advance().unwrap();

        assert_eq!(session.expire(first_epoch), None);
        assert_eq!(session.advance_from_feedback(first_epoch), None);
        assert_eq!(session.current_index(), Some(1));
        // unanswered question is not auto-advanced
        assert_eq!(session.advance_from_feedback(session.view_epoch()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_percent_and_wrong() {
        let (mut session, _rx) = started(5);
        tokio::time::advance(Duration::from_millis(12_700)).await;
        let picks = [0, 1, 2, 0, 1];
        let mut finished = None;
        for pick in picks {
            session.submit_answer(Selection::Option(pick)).unwrap();
            if let AdvanceOutcome::Finished(summary) = session.advance().unwrap() {
                finished = Some(summary);
            }
        }

        let summary = finished.unwrap();
        assert_eq!(session.phase(), Phase::Finished);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.correct, 3);
        assert_eq!(summary.wrong, 2);
        assert_eq!(summary.percent, 60);
        assert_eq!(summary.elapsed_secs, 12);
        assert!(!session.timer().is_active());
        assert_eq!(session.snapshot().summary, Some(summary));
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_elapsed_is_at_least_one_second() {
        let (mut session, _rx) = started(1);
        session.submit_answer(Selection::Option(1)).unwrap();
        match session.advance().unwrap() {
            AdvanceOutcome::Finished(summary) => {
                assert_eq!(summary.elapsed_secs, 1);
                assert_eq!(summary.percent, 0);
            }
            other => panic!("expected finish, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_after_reset_is_stale() {
        let (mut session, _rx) = new_session(30);
        let old = session.begin_start("History", 3).unwrap();
        session.reset();
        let new = session.begin_start("Geography", 3).unwrap();

        assert!(matches!(
            session.complete_generation(old.id, Ok(batch("History", 3))),
            Err(QuizError::Stale)
        ));
        assert!(session.is_loading());
        assert!(session.questions().is_empty());

        session.complete_generation(new.id, Ok(batch("Geo", 3))).unwrap();
        assert_eq!(session.topic(), Some("Geography"));
        assert_eq!(session.questions()[0].text, "Geo question 0?");
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_exhaustion_soft_and_hard() {
        let (mut session, _rx) = started(2);
        let ticket = session.begin_append(2).unwrap();
        let err = session
            .complete_generation(ticket.id, Ok(batch("Python", 2)))
            .unwrap_err();
        assert!(err.is_soft());
        assert_eq!(session.questions().len(), 2);
        assert_eq!(session.phase(), Phase::Active);

        let (mut empty, _rx) = new_session(30);
        let ticket = empty.begin_start("Python", 2).unwrap();
        let err = empty.complete_generation(ticket.id, Ok(Vec::new())).unwrap_err();
        assert!(matches!(err, QuizError::DuplicateExhaustion { soft: false }));
        assert_eq!(empty.phase(), Phase::Setup);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_shortfall_is_reported() {
        let (mut session, _rx) = new_session(30);
        let ticket = session.begin_start("Python", 5).unwrap();
        let outcome = session
            .complete_generation(ticket.id, Ok(batch("Python", 3)))
            .unwrap();
        assert_eq!(outcome.requested, 5);
        assert_eq!(outcome.added, 3);
        assert_eq!(outcome.shortfall, 2);

        let top_up = session.begin_top_up(outcome.shortfall).unwrap();
        assert_eq!(top_up.kind, GenerationKind::TopUp);
        assert_eq!(top_up.request.count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_after_finish_resumes_at_new_question() {
        let (mut session, _rx) = started(2);
        session.submit_answer(Selection::Option(0)).unwrap();
        session.advance().unwrap();
        session.submit_answer(Selection::Option(1)).unwrap();
        assert!(matches!(session.advance().unwrap(), AdvanceOutcome::Finished(_)));

        let ticket = session.begin_append(2).unwrap();
        let outcome = session
            .complete_generation(ticket.id, Ok(batch("Bonus", 2)))
            .unwrap();
        assert_eq!(outcome.shown, Some(2));
        assert_eq!(session.phase(), Phase::Active);
        assert_eq!(session.current_index(), Some(2));
        assert_eq!(session.score(), 2);
        assert!(session.timer().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_after_failed_start_enters_active() {
        let (mut session, _rx) = new_session(30);
        let ticket = session.begin_start("Chemistry", 3).unwrap();
        session
            .complete_generation(ticket.id, Err(GenerationError::Transport("timeout".to_string())))
            .unwrap_err();

        let ticket = session.begin_append(25).unwrap();
        assert_eq!(ticket.request.count, MAX_QUESTION_COUNT);
        let outcome = session
            .complete_generation(ticket.id, Ok(batch("Chem", 2)))
            .unwrap();
        assert_eq!(outcome.shown, Some(0));
        assert_eq!(session.phase(), Phase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_requires_topic() {
        let (mut session, _rx) = new_session(30);
        assert!(matches!(session.begin_append(3), Err(QuizError::InvalidState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_questions_and_clears_progress() {
        let (mut session, _rx) = started(3);
        session.submit_answer(Selection::Option(0)).unwrap();
        session.advance().unwrap();

        assert!(matches!(session.restart().unwrap(), RestartOutcome::Restarted));
        assert_eq!(session.current_index(), Some(0));
        assert_eq!(session.score(), 0);
        assert_eq!(session.snapshot().answered, 0);
        assert_eq!(session.questions().len(), 3);
        assert_eq!(session.ledger().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_without_questions_fetches_last_topic() {
        let (mut session, _rx) = new_session(30);
        assert!(matches!(session.restart(), Err(QuizError::InvalidState(_))));

        let ticket = session.begin_start("Astronomy", 4).unwrap();
        session
            .complete_generation(ticket.id, Err(GenerationError::Transport("down".to_string())))
            .unwrap_err();
        match session.restart().unwrap() {
            RestartOutcome::Generating(ticket) => {
                assert_eq!(ticket.kind, GenerationKind::Start);
                assert_eq!(ticket.request.topic, "Astronomy");
                assert_eq!(ticket.request.count, 4);
            }
            RestartOutcome::Restarted => panic!("expected a fetch"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_everything() {
        let (mut session, _rx) = started(3);
        session.submit_answer(Selection::Option(0)).unwrap();
        session.reset();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::Setup);
        assert_eq!(snapshot.topic, None);
        assert_eq!(snapshot.total_questions, 0);
        assert_eq!(snapshot.score, 0);
        assert!(session.ledger().is_empty());
        assert!(!session.timer().is_active());
        assert_eq!(session.timer().remaining(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_view_hides_answer_until_resolved() {
        let (mut session, _rx) = started(2);
        let view = session.question_view().unwrap();
        assert_eq!(view.index, 0);
        assert_eq!(view.total, 2);
        assert!(view.feedback.is_none());
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("correct_index").is_none());

        session.submit_answer(Selection::Option(3)).unwrap();
        let view = session.question_view().unwrap();
        assert_eq!(view.feedback.unwrap().correct_index, 0);
    }
}
