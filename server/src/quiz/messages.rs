use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::QuizError;
use super::feedback::Feedback;
use super::question::Selection;
use super::session::{GenerationKind, QuestionView, QuizSummary, SessionSnapshot};

/// Messages sent from a quiz client (WebSocket) to the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "messageType", content = "payload")]
pub enum ClientToServerMessage {
    /// Must be the first frame on a new connection.
    ConnectToSession { session_id: Uuid },
    /// Leave the session and close the connection.
    LeaveSession,
    QuizCommand(QuizCommand),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "command")]
pub enum QuizCommand {
    Start { topic: String, count: usize },
    SubmitAnswer { selection: Selection },
    Next,
    Previous,
    GenerateMore { count: usize },
    Restart,
    Reset,
}

/// Messages sent from the server to a quiz client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "messageType", content = "payload")]
pub enum ServerToClientMessage {
    SessionSnapshot(SessionSnapshot),
    Loading {
        kind: GenerationKind,
        count: usize,
    },
    QuestionShown(QuestionView),
    TimerUpdate {
        question_index: usize,
        remaining_secs: u32,
    },
    AnswerFeedback(Feedback),
    QuestionsAppended {
        kind: GenerationKind,
        added: usize,
        requested: usize,
        total: usize,
    },
    QuizFinished(QuizSummary),
    /// A quiz operation failed; the session is still usable.
    QuizError {
        kind: String,
        message: String,
        soft: bool,
    },
    /// Protocol-level problem not tied to quiz state.
    SystemError { message: String },
}

impl ServerToClientMessage {
    pub fn to_ws_text(&self) -> Result<axum::extract::ws::Message, serde_json::Error> {
        serde_json::to_string(self)
            .map(|json_string| axum::extract::ws::Message::Text(json_string.into()))
    }

    pub fn quiz_error(err: &QuizError) -> Self {
        ServerToClientMessage::QuizError {
            kind: err.kind().to_string(),
            message: err.user_message(),
            soft: err.is_soft(),
        }
    }
}

pub fn client_message_from_ws_text(text: &str) -> Result<ClientToServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_quiz_commands() {
        let start = json!({
            "messageType": "QuizCommand",
            "payload": { "command": "Start", "topic": "Rust", "count": 5 }
        });
        assert_eq!(
            client_message_from_ws_text(&start.to_string()).unwrap(),
            ClientToServerMessage::QuizCommand(QuizCommand::Start {
                topic: "Rust".to_string(),
                count: 5
            })
        );

        let answer = json!({
            "messageType": "QuizCommand",
            "payload": { "command": "SubmitAnswer", "selection": { "type": "Option", "index": 2 } }
        });
        assert_eq!(
            client_message_from_ws_text(&answer.to_string()).unwrap(),
            ClientToServerMessage::QuizCommand(QuizCommand::SubmitAnswer {
                selection: Selection::Option(2)
            })
        );

        let next = r#"{"messageType":"QuizCommand","payload":{"command":"Next"}}"#;
        assert_eq!(
            client_message_from_ws_text(next).unwrap(),
            ClientToServerMessage::QuizCommand(QuizCommand::Next)
        );

        let leave = r#"{"messageType":"LeaveSession"}"#;
        assert_eq!(
            client_message_from_ws_text(leave).unwrap(),
            ClientToServerMessage::LeaveSession
        );
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let bogus = r#"{"messageType":"QuizCommand","payload":{"command":"Teleport"}}"#;
        assert!(client_message_from_ws_text(bogus).is_err());
    }

    #[test]
    fn test_quiz_error_message_shape() {
        let msg = ServerToClientMessage::quiz_error(&QuizError::DuplicateExhaustion { soft: true });
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["messageType"], "QuizError");
        assert_eq!(value["payload"]["kind"], "duplicate_exhaustion");
        assert_eq!(value["payload"]["soft"], true);
    }
}
