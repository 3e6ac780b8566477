use axum::extract::ws;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::QuizConfig;
use crate::quiz::messages as quiz_messages;
use crate::quiz::session::{AdvanceOutcome, GenerationKind, GenerationTicket, RestartOutcome};
use crate::quiz::{
    ClientToServerMessage, CountdownTimer, GenerationError, Question, QuestionSource, QuizCommand,
    QuizError, QuizSession, ServerToClientMessage, TimerSignal,
};

const SESSION_BUFFER_SIZE: usize = 32;
const TIMER_BUFFER_SIZE: usize = 64;

#[derive(Debug, Serialize, Clone)]
pub struct SessionDetails {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum SessionManagerMessage {
    CreateSession {
        respond_to: oneshot::Sender<SessionDetails>,
    },
    GetSessionHandle {
        session_id: Uuid,
        respond_to: oneshot::Sender<Option<SessionActorHandle>>,
    },
    SessionActorShutdown {
        session_id: Uuid,
    },
}

pub struct SessionManagerActor {
    receiver: mpsc::Receiver<SessionManagerMessage>,
    sessions: HashMap<Uuid, SessionActorHandle>,
    self_sender: mpsc::Sender<SessionManagerMessage>,
    source: Arc<dyn QuestionSource>,
    quiz_config: QuizConfig,
}

impl SessionManagerActor {
    fn new(
        receiver: mpsc::Receiver<SessionManagerMessage>,
        self_sender: mpsc::Sender<SessionManagerMessage>,
        source: Arc<dyn QuestionSource>,
        quiz_config: QuizConfig,
    ) -> Self {
        SessionManagerActor {
            receiver,
            sessions: HashMap::new(),
            self_sender,
            source,
            quiz_config,
        }
    }

    #[tracing::instrument(skip(self, msg), fields(
        msg_type = %std::any::type_name_of_val(&msg),
        sessions.count = self.sessions.len()
    ))]
    fn handle_message(&mut self, msg: SessionManagerMessage) {
        match msg {
            SessionManagerMessage::CreateSession { respond_to } => {
                let session_id = Uuid::new_v4();
                let manager_handle = SessionManagerHandle {
                    sender: self.self_sender.clone(),
                };
                let handle = SessionActorHandle::spawn(
                    session_id,
                    SESSION_BUFFER_SIZE,
                    manager_handle,
                    self.source.clone(),
                    self.quiz_config.clone(),
                );
                self.sessions.insert(session_id, handle);

                tracing::info!(session.id = %session_id, "Created quiz session");
                let _ = respond_to.send(SessionDetails {
                    session_id,
                    created_at: Utc::now(),
                });
            }
            SessionManagerMessage::GetSessionHandle {
                session_id,
                respond_to,
            } => {
                tracing::debug!(session.id = %session_id, "Received GetSessionHandle request");
                let _ = respond_to.send(self.sessions.get(&session_id).cloned());
            }
            SessionManagerMessage::SessionActorShutdown { session_id } => {
                if self.sessions.remove(&session_id).is_some() {
                    tracing::info!(session.id = %session_id, "Cleaning up session after actor shutdown");
                } else {
                    tracing::warn!(session.id = %session_id, "Received shutdown for unknown session");
                }
            }
        }
    }
}

#[tracing::instrument(skip(actor))]
pub async fn run_session_manager_actor(mut actor: SessionManagerActor) {
    tracing::info!("SessionManager actor started");
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg);
    }
    tracing::info!("SessionManager actor stopped");
}

#[derive(Clone, Debug)]
pub struct SessionManagerHandle {
    sender: mpsc::Sender<SessionManagerMessage>,
}

impl SessionManagerHandle {
    pub fn spawn(
        buffer_size: usize,
        source: Arc<dyn QuestionSource>,
        quiz_config: QuizConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = SessionManagerActor::new(receiver, sender.clone(), source, quiz_config);
        tokio::spawn(run_session_manager_actor(actor));
        Self { sender }
    }

    pub async fn create_session(&self) -> Result<SessionDetails, String> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(SessionManagerMessage::CreateSession { respond_to })
            .await
            .map_err(|e| format!("Failed to send CreateSession: {}", e))?;
        rx.await
            .map_err(|e| format!("SessionManager no response: {}", e))
    }

    pub async fn get_session_handle(&self, session_id: Uuid) -> Option<SessionActorHandle> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(SessionManagerMessage::GetSessionHandle {
                session_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn notify_session_shutdown(&self, session_id: Uuid) -> Result<(), String> {
        self.sender
            .send(SessionManagerMessage::SessionActorShutdown { session_id })
            .await
            .map_err(|e| format!("Failed to send SessionActorShutdown: {}", e))
    }
}

#[derive(Debug)]
pub enum SessionActorMessage {
    ClientEvent {
        client_id: Uuid,
        raw_payload: String,
    },
    ClientConnected {
        client_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
    },
    ClientDisconnected {
        client_id: Uuid,
    },
    GenerationFinished {
        ticket_id: u64,
        result: Result<Vec<Question>, GenerationError>,
    },
    AdvanceDue {
        epoch: u64,
    },
}

/// Owns one `QuizSession` and the single client connection driving it.
pub struct SessionActor {
    receiver: mpsc::Receiver<SessionActorMessage>,
    timer_rx: mpsc::Receiver<TimerSignal>,
    session_id: Uuid,
    session: QuizSession,
    manager_handle: SessionManagerHandle,
    source: Arc<dyn QuestionSource>,
    quiz_config: QuizConfig,
    client: Option<(Uuid, mpsc::Sender<ws::Message>)>,
}

impl SessionActor {
    fn new(
        receiver: mpsc::Receiver<SessionActorMessage>,
        session_id: Uuid,
        manager_handle: SessionManagerHandle,
        source: Arc<dyn QuestionSource>,
        quiz_config: QuizConfig,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::channel(TIMER_BUFFER_SIZE);
        let timer = CountdownTimer::new(quiz_config.question_seconds, timer_tx);
        SessionActor {
            receiver,
            timer_rx,
            session_id,
            session: QuizSession::new(timer),
            manager_handle,
            source,
            quiz_config,
            client: None,
        }
    }

    #[tracing::instrument(skip(self, msg, self_sender), fields(
        session.id = %self.session_id,
        quiz.phase = ?self.session.phase(),
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(
        &mut self,
        msg: SessionActorMessage,
        self_sender: &mpsc::Sender<SessionActorMessage>,
    ) -> bool {
        match msg {
            SessionActorMessage::ClientEvent {
                client_id,
                raw_payload,
            } => {
                tracing::trace!(client.id = %client_id, event.raw = %raw_payload, "Raw event from client");
                match quiz_messages::client_message_from_ws_text(&raw_payload) {
                    Ok(ClientToServerMessage::QuizCommand(command)) => {
                        tracing::debug!(client.id = %client_id, command = ?command, "Processing quiz command");
                        self.handle_command(command, self_sender).await;
                    }
                    Ok(ClientToServerMessage::LeaveSession) => {
                        tracing::info!(client.id = %client_id, "Client left session. Triggering shutdown");
                        self.client = None;
                        self.notify_shutdown().await;
                        return true;
                    }
                    Ok(ClientToServerMessage::ConnectToSession { .. }) => {
                        self.send_to_client(ServerToClientMessage::SystemError {
                            message: "Already connected to a session.".to_string(),
                        })
                        .await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            client.id = %client_id,
                            error = %e,
                            event.raw = %raw_payload,
                            "Failed to deserialize event from client"
                        );
                        self.send_to_client(ServerToClientMessage::SystemError {
                            message: format!(
                                "Invalid message format: {}. Please send JSON like: {{\"messageType\":\"QuizCommand\",\"payload\":{{\"command\":\"Start\",\"topic\":\"Rust\",\"count\":5}}}}",
                                e
                            ),
                        })
                        .await;
                    }
                }
            }
            SessionActorMessage::ClientConnected {
                client_id,
                client_tx,
            } => {
                if let Some((previous_id, _)) = self.client.take() {
                    tracing::info!(
                        client.id = %client_id,
                        client.previous_id = %previous_id,
                        "New connection replaces previous client"
                    );
                } else {
                    tracing::debug!(client.id = %client_id, "Client connected");
                }
                self.client = Some((client_id, client_tx));
                self.send_to_client(ServerToClientMessage::SessionSnapshot(self.session.snapshot()))
                    .await;
            }
            SessionActorMessage::ClientDisconnected { client_id } => {
                if !matches!(self.client, Some((current_id, _)) if current_id == client_id) {
                    tracing::debug!(client.id = %client_id, "Ignoring disconnect of replaced client");
                    return false;
                }
                self.client = None;
                tracing::info!(client.id = %client_id, "Client disconnected. Triggering shutdown");
                self.notify_shutdown().await;
                return true;
            }
            SessionActorMessage::GenerationFinished { ticket_id, result } => {
                self.handle_generation_finished(ticket_id, result, self_sender)
                    .await;
            }
            SessionActorMessage::AdvanceDue { epoch } => {
                if let Some(outcome) = self.session.advance_from_feedback(epoch) {
                    self.send_advance_outcome(outcome).await;
                } else {
                    tracing::trace!(view.epoch = epoch, "Skipping stale auto-advance");
                }
            }
        }
        false
    }

    async fn handle_command(
        &mut self,
        command: QuizCommand,
        self_sender: &mpsc::Sender<SessionActorMessage>,
    ) {
        let result = match command {
            QuizCommand::Start { topic, count } => match self.session.begin_start(&topic, count) {
                Ok(ticket) => {
                    self.dispatch_generation(ticket, self_sender).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            QuizCommand::SubmitAnswer { selection } => match self.session.submit_answer(selection) {
                Ok(Some(feedback)) => {
                    self.send_to_client(ServerToClientMessage::AnswerFeedback(feedback))
                        .await;
                    self.schedule_advance(self_sender);
                    Ok(())
                }
                Ok(None) => {
                    tracing::debug!("Ignoring repeated answer for resolved question");
                    Ok(())
                }
                Err(e) => Err(e),
            },
            QuizCommand::Next => match self.session.advance() {
                Ok(outcome) => {
                    self.send_advance_outcome(outcome).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            QuizCommand::Previous => match self.session.retreat() {
                Ok(_) => {
                    self.send_current_question().await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            QuizCommand::GenerateMore { count } => match self.session.begin_append(count) {
                Ok(ticket) => {
                    self.dispatch_generation(ticket, self_sender).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            QuizCommand::Restart => match self.session.restart() {
                Ok(RestartOutcome::Restarted) => {
                    self.send_current_question().await;
                    Ok(())
                }
                Ok(RestartOutcome::Generating(ticket)) => {
                    self.dispatch_generation(ticket, self_sender).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            QuizCommand::Reset => {
                self.session.reset();
                self.send_to_client(ServerToClientMessage::SessionSnapshot(
                    self.session.snapshot(),
                ))
                .await;
                Ok(())
            }
        };

        if let Err(e) = result {
            tracing::debug!(error = %e, error.kind = e.kind(), "Quiz command rejected");
            self.send_quiz_error(&e).await;
        }
    }

    /// Runs the provider fetch off the actor and reports back through the queue.
    async fn dispatch_generation(
        &self,
        ticket: GenerationTicket,
        self_sender: &mpsc::Sender<SessionActorMessage>,
    ) {
        let GenerationTicket {
            id: ticket_id,
            kind,
            request,
        } = ticket;
        tracing::info!(
            session.id = %self.session_id,
            generation.ticket = ticket_id,
            generation.kind = ?kind,
            quiz.topic = %request.topic,
            quiz.count = request.count,
            "Requesting questions"
        );
        self.send_to_client(ServerToClientMessage::Loading {
            kind,
            count: request.count,
        })
        .await;

        let source = self.source.clone();
        let sender = self_sender.clone();
        tokio::spawn(async move {
            let fetch = tokio::spawn(async move { source.fetch_questions(&request).await });
            let result = match fetch.await {
                Ok(result) => result,
                Err(e) => Err(GenerationError::Transport(format!(
                    "generation task failed: {}",
                    e
                ))),
            };
            if sender
                .send(SessionActorMessage::GenerationFinished { ticket_id, result })
                .await
                .is_err()
            {
                tracing::debug!(generation.ticket = ticket_id, "Session gone before generation finished");
            }
        });
    }

    async fn handle_generation_finished(
        &mut self,
        ticket_id: u64,
        result: Result<Vec<Question>, GenerationError>,
        self_sender: &mpsc::Sender<SessionActorMessage>,
    ) {
        match self.session.complete_generation(ticket_id, result) {
            Ok(outcome) => {
                tracing::info!(
                    generation.ticket = ticket_id,
                    generation.kind = ?outcome.kind,
                    questions.added = outcome.added,
                    questions.total = outcome.total,
                    questions.shortfall = outcome.shortfall,
                    "Questions added to session"
                );
                self.send_to_client(ServerToClientMessage::QuestionsAppended {
                    kind: outcome.kind,
                    added: outcome.added,
                    requested: outcome.requested,
                    total: outcome.total,
                })
                .await;
                if outcome.shown.is_some() {
                    self.send_current_question().await;
                }

                if outcome.kind == GenerationKind::Start
                    && outcome.shortfall > 0
                    && self.quiz_config.top_up_shortfall
                {
                    match self.session.begin_top_up(outcome.shortfall) {
                        Ok(ticket) => self.dispatch_generation(ticket, self_sender).await,
                        Err(e) => {
                            tracing::warn!(error = %e, "Could not issue top-up request");
                        }
                    }
                }
            }
            Err(QuizError::Stale) => {
                tracing::debug!(generation.ticket = ticket_id, "Discarding stale generation result");
            }
            Err(e) => {
                tracing::warn!(
                    generation.ticket = ticket_id,
                    error = %e,
                    error.kind = e.kind(),
                    "Generation failed"
                );
                self.send_quiz_error(&e).await;
                self.send_to_client(ServerToClientMessage::SessionSnapshot(
                    self.session.snapshot(),
                ))
                .await;
            }
        }
    }

    async fn handle_timer_signal(
        &mut self,
        signal: TimerSignal,
        self_sender: &mpsc::Sender<SessionActorMessage>,
    ) {
        match signal {
            TimerSignal::Tick { epoch, remaining } => {
                if !self.session.on_tick(epoch, remaining) {
                    return;
                }
                if let Some(question_index) = self.session.current_index() {
                    self.send_to_client(ServerToClientMessage::TimerUpdate {
                        question_index,
                        remaining_secs: remaining,
                    })
                    .await;
                }
            }
            TimerSignal::Expired { epoch } => {
                if let Some(feedback) = self.session.expire(epoch) {
                    tracing::debug!(question.index = feedback.question_index, "Question timed out");
                    self.send_to_client(ServerToClientMessage::AnswerFeedback(feedback))
                        .await;
                    self.schedule_advance(self_sender);
                }
            }
        }
    }

    /// Moves past the resolved question once the feedback delay has elapsed,
    /// unless the view changed in the meantime.
    fn schedule_advance(&self, self_sender: &mpsc::Sender<SessionActorMessage>) {
        let epoch = self.session.view_epoch();
        let delay = Duration::from_millis(self.quiz_config.feedback_delay_ms);
        let sender = self_sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(SessionActorMessage::AdvanceDue { epoch }).await;
        });
    }

    async fn send_advance_outcome(&self, outcome: AdvanceOutcome) {
        match outcome {
            AdvanceOutcome::Showing(_) => self.send_current_question().await,
            AdvanceOutcome::Finished(summary) => {
                tracing::info!(
                    quiz.total = summary.total,
                    quiz.correct = summary.correct,
                    quiz.percent = summary.percent,
                    "Quiz finished"
                );
                self.send_to_client(ServerToClientMessage::QuizFinished(summary))
                    .await;
            }
        }
    }

    async fn send_current_question(&self) {
        if let Some(view) = self.session.question_view() {
            self.send_to_client(ServerToClientMessage::QuestionShown(view))
                .await;
        }
    }

    async fn send_quiz_error(&self, err: &QuizError) {
        self.send_to_client(ServerToClientMessage::quiz_error(err))
            .await;
    }

    async fn send_to_client(&self, message: ServerToClientMessage) {
        let Some((client_id, client_tx)) = self.client.as_ref() else {
            return;
        };
        match message.to_ws_text() {
            Ok(ws_msg) => {
                if client_tx.send(ws_msg).await.is_err() {
                    tracing::warn!(client.id = %client_id, "Failed to send message to client");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message for client");
            }
        }
    }

    async fn notify_shutdown(&self) {
        if let Err(e) = self
            .manager_handle
            .notify_session_shutdown(self.session_id)
            .await
        {
            tracing::error!(error = %e, "Failed to notify SessionManager of shutdown");
        }
    }
}

#[tracing::instrument(skip(actor, self_sender), fields(session.id = %actor.session_id))]
pub async fn run_session_actor(
    mut actor: SessionActor,
    self_sender: mpsc::Sender<SessionActorMessage>,
) {
    tracing::info!("Session actor started");

    let idle_timeout = Duration::from_secs(actor.quiz_config.session_idle_timeout_secs);
    let mut last_client_activity = Instant::now();

    loop {
        tokio::select! {
            maybe_msg = actor.receiver.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        if matches!(
                            msg,
                            SessionActorMessage::ClientEvent { .. } | SessionActorMessage::ClientConnected { .. }
                        ) {
                            last_client_activity = Instant::now();
                        }
                        if actor.handle_message(msg, &self_sender).await {
                            tracing::info!("Session shutdown requested by message handler");
                            break;
                        }
                    }
                    None => {
                        tracing::info!("Session actor channel closed. Shutting down");
                        break;
                    }
                }
            }
            Some(signal) = actor.timer_rx.recv() => {
                actor.handle_timer_signal(signal, &self_sender).await;
            }
            _ = tokio::time::sleep_until(last_client_activity + idle_timeout) => {
                tracing::info!("Session inactivity timeout. Notifying manager for shutdown");
                actor.notify_shutdown().await;
                break;
            }
        }
    }

    tracing::info!("Session actor stopping");
}

#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    pub sender: mpsc::Sender<SessionActorMessage>,
    pub session_id: Uuid,
}

impl SessionActorHandle {
    pub fn spawn(
        session_id: Uuid,
        buffer_size: usize,
        manager_handle: SessionManagerHandle,
        source: Arc<dyn QuestionSource>,
        quiz_config: QuizConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = SessionActor::new(receiver, session_id, manager_handle, source, quiz_config);
        tokio::spawn(run_session_actor(actor, sender.clone()));
        Self { sender, session_id }
    }

    pub async fn forward_client_event(
        &self,
        client_id: Uuid,
        raw_payload: String,
    ) -> Result<(), String> {
        self.sender
            .send(SessionActorMessage::ClientEvent {
                client_id,
                raw_payload,
            })
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    pub async fn client_connected(&self, client_id: Uuid, client_tx: mpsc::Sender<ws::Message>) {
        if self
            .sender
            .send(SessionActorMessage::ClientConnected {
                client_id,
                client_tx,
            })
            .await
            .is_err()
        {
            tracing::error!("Failed to send ClientConnected");
        }
    }

    pub async fn client_disconnected(&self, client_id: Uuid) {
        if self
            .sender
            .send(SessionActorMessage::ClientDisconnected { client_id })
            .await
            .is_err()
        {
            tracing::error!("Failed to send ClientDisconnected");
        }
    }
}
