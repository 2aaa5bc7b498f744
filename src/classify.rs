use std::fmt;

use thiserror::Error;

use crate::error::RequestFailure;

/// Which backend call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Upload,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    BackendUnreachable,
    NotFound,
    InvalidInput,
    ServerError,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::BackendUnreachable => "backend unreachable",
            ErrorCategory::NotFound => "not found",
            ErrorCategory::InvalidInput => "invalid input",
            ErrorCategory::ServerError => "server error",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{display_text}")]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub display_text: String,
}

/// Classify a failed request. Pure; no state is consulted.
pub fn classify(endpoint: EndpointKind, failure: &RequestFailure) -> ClassifiedError {
    let category = match failure {
        RequestFailure::NoResponse(_) => ErrorCategory::BackendUnreachable,
        RequestFailure::Status { status: 404, .. } => ErrorCategory::NotFound,
        // A 400 from chat is not a file-format problem
        RequestFailure::Status { status: 400, .. } if endpoint == EndpointKind::Upload => {
            ErrorCategory::InvalidInput
        }
        RequestFailure::Status { status: 500, .. } => ErrorCategory::ServerError,
        RequestFailure::Status { .. } | RequestFailure::Decode(_) => ErrorCategory::Unknown,
    };

    ClassifiedError {
        category,
        display_text: display_text(endpoint, category).to_string(),
    }
}

fn display_text(endpoint: EndpointKind, category: ErrorCategory) -> &'static str {
    match (category, endpoint) {
        (ErrorCategory::BackendUnreachable, _) => {
            "Cannot connect to backend server. Make sure the backend server is running."
        }
        (ErrorCategory::NotFound, EndpointKind::Upload) => {
            "Upload endpoint not found. Check the backend URL."
        }
        (ErrorCategory::NotFound, EndpointKind::Chat) => {
            "Log file not found. Please upload a file first."
        }
        (ErrorCategory::InvalidInput, _) => {
            "Invalid file format. Please upload a valid .bin file."
        }
        (ErrorCategory::ServerError, EndpointKind::Upload) => {
            "Server error while processing the file. Please try again."
        }
        (ErrorCategory::ServerError, EndpointKind::Chat) => "Server error. Please try again.",
        (ErrorCategory::Unknown, EndpointKind::Upload) => "Upload failed. Please try again.",
        (ErrorCategory::Unknown, EndpointKind::Chat) => {
            "Sorry, there was an error processing your request."
        }
    }
}
