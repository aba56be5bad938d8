//! Scan session: camera → decoded payload → equipment lookup → result.
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::api::EquipmentLookup;
use crate::error::{ApiError, DeviceError};
use crate::model::Equipment;

pub use self::decoder::{CameraSlot, ChannelDecoder, ProcessDecoder, QrDecoder};
pub use self::torch::Torch;

pub mod decoder;
pub mod torch;

pub const CAMERA_ERROR: &str =
    "Unable to access camera. Please ensure camera permissions are granted.";

/// What made a session fail. Camera failures end the session; lookup
/// failures can be retried with another scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    Camera,
    Lookup,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanState {
    Idle,
    Scanning,
    /// A lookup for `id` is in flight; further payloads are dropped.
    Loading { id: String },
    Result(Box<Equipment>),
    Failed { cause: FailureCause, message: String },
}

impl ScanState {
    pub fn name(&self) -> &'static str {
        match self {
            ScanState::Idle => "idle",
            ScanState::Scanning => "scanning",
            ScanState::Loading { .. } => "loading",
            ScanState::Result(_) => "result",
            ScanState::Failed { .. } => "failed",
        }
    }
}

/// Message shown to the user for a failed lookup.
pub fn lookup_error_message(err: &ApiError) -> String {
    match err {
        ApiError::Network(_) => {
            "Network error: could not reach the server. Check your connection and scan again."
                .to_string()
        }
        ApiError::Http { status: 404, .. } => {
            "Equipment not found. The QR code may be outdated or not registered.".to_string()
        }
        ApiError::Http { status, message } => match message {
            Some(message) => format!("Server error ({}): {}", status, message),
            None => format!("Server error ({}). Please try again later.", status),
        },
        ApiError::Parse(_) => "Received an unexpected response from the server.".to_string(),
        ApiError::Unauthorized => "Your session has expired. Please sign in again.".to_string(),
        ApiError::InvalidInput(reason) => format!("Invalid QR code: {}", reason),
        ApiError::AttachmentUpload { .. } => err.to_string(),
    }
}

/// One scanning view. Owns its decoder, so the camera is held exactly as long
/// as the session keeps it started; dropping the session releases it.
pub struct ScanSession<D: QrDecoder> {
    id: Uuid,
    decoder: D,
    lookup: Arc<dyn EquipmentLookup>,
    state: ScanState,
    last_payload: Option<String>,
}

impl<D: QrDecoder> std::fmt::Debug for ScanSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("id", &self.id)
            .field("state", &self.state.name())
            .finish_non_exhaustive()
    }
}

impl<D: QrDecoder> ScanSession<D> {
    pub fn new(decoder: D, lookup: Arc<dyn EquipmentLookup>) -> Self {
        Self {
            id: Uuid::new_v4(),
            decoder,
            lookup,
            state: ScanState::Idle,
            last_payload: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    /// Set exactly when the last lookup since the previous reset succeeded.
    pub fn equipment(&self) -> Option<&Equipment> {
        match &self.state {
            ScanState::Result(equipment) => Some(equipment),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            ScanState::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn failure_cause(&self) -> Option<FailureCause> {
        match &self.state {
            ScanState::Failed { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    pub fn last_payload(&self) -> Option<&str> {
        self.last_payload.as_deref()
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// `Idle | Result | Failed → Scanning`. No-op while scanning or loading.
    #[instrument(skip_all, fields(session = %self.id))]
    pub async fn start_scan(&mut self) -> Result<(), DeviceError> {
        if matches!(self.state, ScanState::Scanning | ScanState::Loading { .. }) {
            return Ok(());
        }
        self.last_payload = None;
        let started = if self.decoder.is_active() {
            self.decoder.resume();
            Ok(())
        } else {
            self.decoder.start().await
        };
        match started {
            Ok(()) => {
                self.state = ScanState::Scanning;
                info!("scanning");
                Ok(())
            }
            Err(err) => {
                warn!(%err, "camera unavailable");
                self.state = ScanState::Failed {
                    cause: FailureCause::Camera,
                    message: format!("{} ({})", CAMERA_ERROR, err),
                };
                Err(err)
            }
        }
    }

    /// `Scanning → Idle`, keeping the camera.
    pub fn pause(&mut self) {
        if self.state == ScanState::Scanning {
            self.decoder.pause();
            self.state = ScanState::Idle;
        }
    }

    /// `Idle → Scanning`.
    pub async fn resume(&mut self) -> Result<(), DeviceError> {
        if self.state != ScanState::Idle {
            return Ok(());
        }
        self.start_scan().await
    }

    /// Accept a decoded payload. Only a scanning session reacts: it moves to
    /// `Loading`, pauses the decoder and returns the identifier to look up.
    pub fn handle_payload(&mut self, payload: &str) -> Option<String> {
        if self.state != ScanState::Scanning {
            debug!(session = %self.id, state = self.state.name(), "dropping payload");
            return None;
        }
        let id = payload.trim().to_string();
        if id.is_empty() {
            return None;
        }
        self.decoder.pause();
        self.last_payload = Some(id.clone());
        self.state = ScanState::Loading { id: id.clone() };
        info!(session = %self.id, %id, "looking up equipment");
        Some(id)
    }

    /// `Loading → Result | Failed`. Ignored in any other state.
    pub fn complete_lookup(&mut self, result: Result<Equipment, ApiError>) {
        if !matches!(self.state, ScanState::Loading { .. }) {
            debug!(session = %self.id, "stale lookup result ignored");
            return;
        }
        self.state = match result {
            Ok(equipment) => {
                info!(session = %self.id, equipment_id = %equipment.id, "equipment found");
                ScanState::Result(Box::new(equipment))
            }
            Err(err) => {
                warn!(session = %self.id, ?err, "lookup failed");
                ScanState::Failed {
                    cause: FailureCause::Lookup,
                    message: lookup_error_message(&err),
                }
            }
        };
    }

    /// Any state → `Idle`, clearing the held record and error.
    pub fn reset(&mut self) {
        if self.decoder.is_active() {
            self.decoder.pause();
        }
        self.last_payload = None;
        self.state = ScanState::Idle;
    }

    /// Release the camera and torch and return to `Idle`.
    #[instrument(skip_all, fields(session = %self.id))]
    pub async fn stop(&mut self) {
        self.decoder.stop().await;
        self.last_payload = None;
        self.state = ScanState::Idle;
    }

    pub async fn set_torch(&mut self, on: bool) -> Result<(), DeviceError> {
        self.decoder.set_torch(on).await
    }

    /// Drive the session until it settles in `Idle`, `Result` or `Failed`.
    /// While a lookup is in flight the decoder keeps being drained and
    /// anything it yields is dropped, so at most one lookup runs at a time.
    #[instrument(skip_all, fields(session = %self.id))]
    pub async fn next_outcome(&mut self) -> &ScanState {
        loop {
            let id = match &self.state {
                ScanState::Idle | ScanState::Result(_) | ScanState::Failed { .. } => break,
                ScanState::Scanning => {
                    match self.decoder.next_payload().await {
                        Some(payload) => {
                            self.handle_payload(&payload);
                        }
                        None => {
                            warn!("camera stream ended");
                            self.state = ScanState::Failed {
                                cause: FailureCause::Camera,
                                message: format!("{} (camera stream ended)", CAMERA_ERROR),
                            };
                        }
                    }
                    continue;
                }
                ScanState::Loading { id } => id.clone(),
            };

            let lookup = self.lookup.clone();
            let pending = async move { lookup.fetch_equipment(&id).await };
            tokio::pin!(pending);
            let mut decoder_open = true;
            let result = loop {
                tokio::select! {
                    biased;
                    result = &mut pending => break result,
                    payload = self.decoder.next_payload(), if decoder_open => match payload {
                        Some(payload) => {
                            debug!(%payload, "lookup in flight; dropping payload");
                        }
                        None => decoder_open = false,
                    },
                }
            };
            self.complete_lookup(result);
        }
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_errors_are_distinguished() {
        let network = lookup_error_message(&ApiError::Network("refused".into()));
        let missing = lookup_error_message(&ApiError::Http {
            status: 404,
            message: None,
        });
        let server = lookup_error_message(&ApiError::Http {
            status: 500,
            message: Some("db down".into()),
        });
        let parse = lookup_error_message(&ApiError::Parse("eof".into()));
        assert!(network.starts_with("Network error"));
        assert!(missing.starts_with("Equipment not found"));
        assert_eq!(server, "Server error (500): db down");
        assert!(parse.contains("unexpected response"));
    }
}
