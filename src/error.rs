//! Error taxonomies shared by the API client, the scanner and the admin store.
use thiserror::Error;

/// Failures talking to the EquipQR backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure: no response was received.
    #[error("network error: {0}")]
    Network(String),
    /// A response arrived with a non-2xx status.
    #[error("server returned {status}: {}", .message.as_deref().unwrap_or("no details"))]
    Http { status: u16, message: Option<String> },
    /// The response body was not the JSON shape we expected.
    #[error("unexpected response body: {0}")]
    Parse(String),
    /// Identity check answered 401/403.
    #[error("not signed in")]
    Unauthorized,
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The issue record exists on the backend but its files were rejected.
    #[error("issue {issue_id} was created but its attachments failed to upload: {source}")]
    AttachmentUpload {
        issue_id: String,
        #[source]
        source: Box<ApiError>,
    },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Camera and torch failures reported by a QR decoder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("torch is not supported by the active camera")]
    TorchUnsupported,
    #[error("failed to toggle torch: {0}")]
    TorchToggleFailed(String),
}
