use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::ApiError;
use crate::http::{FetchRequest, FetchResponse, Fetcher, FilePart};
use crate::model::{BulkAction, Equipment, InviteOptions, Issue, PendingRegistration, User};

use self::model::{
    CreateIssueRequest, CreatedIssue, CurrentUserBody, ErrorBody, InviteResponse, IssueDraft,
    LoginRequest, RegisterRequest, RegistrationDecision,
};

pub mod model;
pub mod session;

/// Resolves a scanned identifier into an equipment record.
#[async_trait]
pub trait EquipmentLookup: Send + Sync {
    async fn fetch_equipment(&self, id: &str) -> Result<Equipment, ApiError>;
}

/// Backend operations behind the admin registration screen.
#[async_trait]
pub trait RegistrationService: Send + Sync {
    async fn pending_registrations(
        &self,
        business_id: &str,
    ) -> Result<Vec<PendingRegistration>, ApiError>;

    async fn approve_registration(&self, request_id: &str) -> Result<(), ApiError>;

    async fn deny_registration(&self, request_id: &str) -> Result<(), ApiError>;

    async fn bulk_action(&self, action: &BulkAction) -> Result<Value, ApiError>;

    async fn generate_invite(&self, options: &InviteOptions) -> Result<String, ApiError>;
}

/// Thin client for the EquipQR backend. Each method issues exactly one
/// request (two for issue creation with attachments) and never retries.
#[derive(Clone)]
pub struct ApiClient {
    fetcher: Arc<dyn Fetcher>,
    base_url: Url,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(fetcher: Arc<dyn Fetcher>, base_url: Url) -> Self {
        Self { fetcher, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ApiError::InvalidInput("backend base URL cannot carry a path"))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn send(&self, request: FetchRequest) -> Result<FetchResponse, ApiError> {
        let method = request.method.clone();
        let url = request.url.clone();
        let res = self.fetcher.fetch(request).await.map_err(|err| {
            warn!(%method, %url, %err, "backend request failed");
            ApiError::Network(err.to_string())
        })?;
        debug!(%method, %url, status = res.status, "backend responded");
        Ok(res)
    }

    fn check(res: FetchResponse) -> Result<FetchResponse, ApiError> {
        if res.is_success() {
            return Ok(res);
        }
        let message = res
            .parse::<ErrorBody>()
            .ok()
            .and_then(ErrorBody::into_message);
        Err(ApiError::Http {
            status: res.status,
            message,
        })
    }

    fn decode<T: DeserializeOwned>(res: &FetchResponse) -> Result<T, ApiError> {
        res.parse().map_err(|err| ApiError::Parse(err.to_string()))
    }

    fn json_body<T: serde::Serialize>(body: &T) -> Result<Value, ApiError> {
        serde_json::to_value(body).map_err(|err| ApiError::Parse(err.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn fetch_equipment(&self, id: &str) -> Result<Equipment, ApiError> {
        if id.trim().is_empty() {
            return Err(ApiError::InvalidInput("equipment identifier must be non-empty"));
        }
        let url = self.endpoint(&["equipment", id])?;
        let res = Self::check(self.send(FetchRequest::get(url)).await?)?;
        Self::decode(&res)
    }

    #[instrument(skip(self))]
    pub async fn equipment_issues(&self, equipment_id: &str) -> Result<Vec<Issue>, ApiError> {
        let url = self.endpoint(&["api", "equipment", equipment_id, "issues"])?;
        let res = Self::check(self.send(FetchRequest::get(url)).await?)?;
        Self::decode(&res)
    }

    /// Create the issue record, then upload its attachments. The two steps
    /// are not transactional: when the upload fails the issue stays on the
    /// backend and its id is reported in [`ApiError::AttachmentUpload`].
    #[instrument(skip_all, fields(equipment_id = %draft.equipment_id))]
    pub async fn create_issue(&self, draft: &IssueDraft) -> Result<String, ApiError> {
        let body = Self::json_body(&CreateIssueRequest {
            title: &draft.title,
            description: &draft.description,
            equipment_id: &draft.equipment_id,
        })?;
        let url = self.endpoint(&["api", "issue"])?;
        let res = Self::check(self.send(FetchRequest::post_json(url, body)).await?)?;
        let created: CreatedIssue = Self::decode(&res)?;
        let issue_id = created
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ApiError::Parse("issue id missing in response".into()))?;
        info!(%issue_id, "created issue");

        if !draft.attachments.is_empty() {
            self.upload_attachments(&issue_id, draft.attachments.clone())
                .await
                .map_err(|err| {
                    warn!(%issue_id, %err, "attachment upload failed; issue left without files");
                    ApiError::AttachmentUpload {
                        issue_id: issue_id.clone(),
                        source: Box::new(err),
                    }
                })?;
            info!(%issue_id, files = draft.attachments.len(), "uploaded attachments");
        }
        Ok(issue_id)
    }

    pub async fn upload_attachments(
        &self,
        issue_id: &str,
        files: Vec<FilePart>,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "issue", issue_id, "attachments"])?;
        Self::check(self.send(FetchRequest::post_multipart(url, files)).await?)?;
        Ok(())
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let body = Self::json_body(&LoginRequest { email, password })?;
        let url = self.endpoint(&["api", "auth", "login"])?;
        Self::check(self.send(FetchRequest::post_json(url, body)).await?)?;
        info!("signed in");
        Ok(())
    }

    #[instrument(skip_all, fields(email = %request.email))]
    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        let body = Self::json_body(request)?;
        let url = self.endpoint(&["api", "auth", "register"])?;
        Self::check(self.send(FetchRequest::post_json(url, body)).await?)?;
        Ok(())
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        let url = self.endpoint(&["api", "user"])?;
        let res = self.send(FetchRequest::get(url)).await?;
        if res.status == 401 || res.status == 403 {
            return Err(ApiError::Unauthorized);
        }
        let res = Self::check(res)?;
        Ok(Self::decode::<CurrentUserBody>(&res)?.into_user())
    }

    /// Best-effort: failures are logged and swallowed so the caller can
    /// always continue to the login screen.
    pub async fn logout(&self) {
        let url = match self.endpoint(&["api", "auth", "logout"]) {
            Ok(url) => url,
            Err(err) => {
                warn!(%err, "logout skipped");
                return;
            }
        };
        match self.send(FetchRequest::post(url)).await.and_then(Self::check) {
            Ok(_) => info!("signed out"),
            Err(err) => warn!(%err, "logout failed; continuing"),
        }
    }

    #[instrument(skip(self))]
    pub async fn pending_registrations(
        &self,
        business_id: &str,
    ) -> Result<Vec<PendingRegistration>, ApiError> {
        let url = self.endpoint(&["api", "pending", business_id])?;
        let res = Self::check(self.send(FetchRequest::get(url)).await?)?;
        Self::decode(&res)
    }

    async fn decide(&self, verb: &str, request_id: &str) -> Result<(), ApiError> {
        let body = Self::json_body(&RegistrationDecision { request_id })?;
        let url = self.endpoint(&["api", "pending", verb])?;
        Self::check(self.send(FetchRequest::post_json(url, body)).await?)?;
        info!(request_id, verb, "registration decided");
        Ok(())
    }

    pub async fn approve_registration(&self, request_id: &str) -> Result<(), ApiError> {
        self.decide("approve", request_id).await
    }

    pub async fn deny_registration(&self, request_id: &str) -> Result<(), ApiError> {
        self.decide("deny", request_id).await
    }

    #[instrument(skip_all, fields(kind = action.kind.as_str(), count = action.registration_ids.len()))]
    pub async fn bulk_action(&self, action: &BulkAction) -> Result<Value, ApiError> {
        let body = Self::json_body(action)?;
        let url = self.endpoint(&["api", "pending", "bulk-action"])?;
        let res = Self::check(self.send(FetchRequest::post_json(url, body)).await?)?;
        if res.body.is_empty() {
            return Ok(Value::Null);
        }
        Self::decode(&res)
    }

    #[instrument(skip_all, fields(email = %options.email))]
    pub async fn generate_invite(&self, options: &InviteOptions) -> Result<String, ApiError> {
        let body = Self::json_body(options)?;
        let url = self.endpoint(&["api", "invites", "generate"])?;
        let res = Self::check(self.send(FetchRequest::post_json(url, body)).await?)?;
        let invite: InviteResponse = Self::decode(&res)?;
        Ok(invite.invite_link)
    }
}

#[async_trait]
impl EquipmentLookup for ApiClient {
    async fn fetch_equipment(&self, id: &str) -> Result<Equipment, ApiError> {
        ApiClient::fetch_equipment(self, id).await
    }
}

#[async_trait]
impl RegistrationService for ApiClient {
    async fn pending_registrations(
        &self,
        business_id: &str,
    ) -> Result<Vec<PendingRegistration>, ApiError> {
        ApiClient::pending_registrations(self, business_id).await
    }

    async fn approve_registration(&self, request_id: &str) -> Result<(), ApiError> {
        ApiClient::approve_registration(self, request_id).await
    }

    async fn deny_registration(&self, request_id: &str) -> Result<(), ApiError> {
        ApiClient::deny_registration(self, request_id).await
    }

    async fn bulk_action(&self, action: &BulkAction) -> Result<Value, ApiError> {
        ApiClient::bulk_action(self, action).await
    }

    async fn generate_invite(&self, options: &InviteOptions) -> Result<String, ApiError> {
        ApiClient::generate_invite(self, options).await
    }
}
