pub mod error;
pub mod feedback;
pub mod ledger;
pub mod messages;
pub mod normalize;
pub mod question;
pub mod session;
pub mod source;
pub mod timer;

pub use error::{GenerationError, ModelAttempt, QuizError};
pub use messages::{ClientToServerMessage, QuizCommand, ServerToClientMessage};
pub use question::Question;
pub use session::QuizSession;
pub use source::{GenerationRequest, QuestionSource};
pub use timer::{CountdownTimer, TimerSignal};
