//! Request and response bodies exchanged with the backend.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::http::FilePart;
use crate::model::User;

/// Error payloads come as `{message}` from the auth routes and `{error}`
/// from everything else.
#[derive(Deserialize, Debug, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.message
            .or(self.error)
            .filter(|m| !m.trim().is_empty())
    }
}

#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Optional company details sent with a business-owner registration.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BusinessProfile {
    pub business_name: String,
    pub business_email: String,
    pub phone: String,
    pub business_type: String,
    pub company_size: String,
    pub country: String,
    pub country_code: String,
}

#[derive(Serialize, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(flatten)]
    pub business: Option<BusinessProfile>,
}

impl RegisterRequest {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            business: None,
        }
    }

    /// Attach company details; the country code is the first two letters of
    /// the country, upper-cased.
    pub fn with_business(mut self, mut profile: BusinessProfile) -> Self {
        profile.country_code = profile
            .country
            .chars()
            .take(2)
            .collect::<String>()
            .to_uppercase();
        self.business = Some(profile);
        self
    }
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("business", &self.business)
            .finish()
    }
}

#[derive(Serialize)]
pub(crate) struct CreateIssueRequest<'a> {
    pub title: &'a str,
    pub description: &'a str,
    #[serde(rename = "equipmentId")]
    pub equipment_id: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct CreatedIssue {
    #[serde(default, alias = "ID")]
    pub id: Option<String>,
}

/// New issue report plus the files to attach once the record exists.
#[derive(Debug, Clone, Default)]
pub struct IssueDraft {
    pub title: String,
    pub description: String,
    pub equipment_id: String,
    pub attachments: Vec<FilePart>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum CurrentUserBody {
    Wrapped { user: User },
    Bare(User),
}

impl CurrentUserBody {
    pub fn into_user(self) -> User {
        match self {
            CurrentUserBody::Wrapped { user } | CurrentUserBody::Bare(user) => user,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct RegistrationDecision<'a> {
    pub request_id: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct InviteResponse {
    pub invite_link: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_body_prefers_message_then_error() {
        let body: ErrorBody = serde_json::from_value(json!({ "message": "bad password" })).unwrap();
        assert_eq!(body.into_message().as_deref(), Some("bad password"));

        let body: ErrorBody = serde_json::from_value(json!({ "error": "issue not found" })).unwrap();
        assert_eq!(body.into_message().as_deref(), Some("issue not found"));

        let body: ErrorBody = serde_json::from_value(json!({ "message": " " })).unwrap();
        assert_eq!(body.into_message(), None);
    }

    #[test]
    fn register_request_flattens_business_profile() {
        let req = RegisterRequest::new("sam", "sam@acme.test", "hunter2").with_business(
            BusinessProfile {
                business_name: "Acme".into(),
                country: "germany".into(),
                ..Default::default()
            },
        );
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["username"], "sam");
        assert_eq!(value["businessName"], "Acme");
        assert_eq!(value["countryCode"], "GE");
        assert!(!format!("{:?}", req).contains("hunter2"));
    }

    #[test]
    fn register_request_without_business_has_only_account_fields() {
        let value = serde_json::to_value(RegisterRequest::new("a", "a@b.c", "pw")).unwrap();
        assert_eq!(value, json!({ "username": "a", "email": "a@b.c", "password": "pw" }));
    }

    #[test]
    fn current_user_accepts_wrapped_and_bare_shapes() {
        let user = json!({ "id": "u1", "username": "sam", "email": "s@a.test", "isActive": true });
        let wrapped: CurrentUserBody = serde_json::from_value(json!({ "user": user.clone() })).unwrap();
        let bare: CurrentUserBody = serde_json::from_value(user).unwrap();
        assert_eq!(wrapped.into_user(), bare.into_user());
    }
}
