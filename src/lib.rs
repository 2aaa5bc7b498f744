pub mod backend;
pub mod classify;
pub mod config;
pub mod error;
pub mod output;
pub mod session;
pub mod upload;

pub use backend::{AnalysisBackend, ChatReply, ChatTurn, FlightSummary, HttpBackend, UploadResponse};
pub use classify::{classify, ClassifiedError, EndpointKind, ErrorCategory};
pub use config::Config;
pub use error::{RequestFailure, UploadError, ValidationError};
pub use session::{ConversationSession, Message, Role, SendOutcome, SUGGESTED_QUESTIONS};
pub use upload::{
    validate, LogFile, LogUpload, ProgressSink, UploadController, UploadResult, UploadStatus,
};
