use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EquipmentStatus {
    #[serde(rename = "in service", alias = "in_service", alias = "in-service")]
    InService,
    #[serde(
        rename = "not in service",
        alias = "out of service",
        alias = "out_of_service",
        alias = "out-of-service"
    )]
    OutOfService,
    #[serde(rename = "maintenance")]
    Maintenance,
}

impl EquipmentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            EquipmentStatus::InService => "In service",
            EquipmentStatus::OutOfService => "Out of service",
            EquipmentStatus::Maintenance => "Maintenance",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusinessSummary {
    #[serde(alias = "ID")]
    pub id: String,
    #[serde(rename = "businessName", alias = "BusinessName")]
    pub name: String,
}

/// Equipment record as returned by `GET /equipment/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Equipment {
    #[serde(alias = "ID")]
    pub id: String,
    #[serde(rename = "businessId", alias = "BusinessID")]
    pub business_id: String,
    #[serde(alias = "Status")]
    pub status: EquipmentStatus,
    #[serde(rename = "type", alias = "Type")]
    pub kind: String,
    #[serde(default, alias = "Location")]
    pub location: String,
    #[serde(
        rename = "moreFields",
        alias = "MoreFields",
        default,
        deserialize_with = "null_as_empty"
    )]
    pub more_fields: BTreeMap<String, Value>,
    #[serde(alias = "Business")]
    pub business: BusinessSummary,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    #[serde(alias = "ID")]
    pub id: String,
    #[serde(default, alias = "Title")]
    pub title: String,
    #[serde(default, alias = "Description")]
    pub description: String,
    #[serde(default, alias = "Progress")]
    pub progress: String,
    #[serde(alias = "DateSubmitted")]
    pub date_submitted: DateTime<Utc>,
    #[serde(alias = "EquipmentID")]
    pub equipment_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(rename = "isActive", alias = "is_active", default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    #[default]
    Normal,
    Urgent,
    Critical,
}

impl UrgencyLevel {
    /// `>= 7` days is critical, `3..7` urgent, anything younger normal.
    pub fn from_days(days_pending: i64) -> Self {
        if days_pending >= 7 {
            UrgencyLevel::Critical
        } else if days_pending >= 3 {
            UrgencyLevel::Urgent
        } else {
            UrgencyLevel::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Normal => "normal",
            UrgencyLevel::Urgent => "urgent",
            UrgencyLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UrgencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(UrgencyLevel::Normal),
            "urgent" => Ok(UrgencyLevel::Urgent),
            "critical" => Ok(UrgencyLevel::Critical),
            other => Err(format!("unknown urgency level '{}'", other)),
        }
    }
}

/// Whole days elapsed since `created_at`, rounded down.
pub fn days_pending(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_seconds().div_euclid(SECONDS_PER_DAY)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registrant {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_active: bool,
}

/// Pending join request. `days_pending` and `urgency_level` are computed on
/// the client every time the list is loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingRegistration {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub business_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user: Registrant,
    #[serde(default)]
    pub days_pending: i64,
    #[serde(default)]
    pub urgency_level: UrgencyLevel,
}

impl PendingRegistration {
    pub fn with_age(mut self, now: DateTime<Utc>) -> Self {
        self.days_pending = days_pending(self.created_at, now);
        self.urgency_level = UrgencyLevel::from_days(self.days_pending);
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BulkActionKind {
    Approve,
    Deny,
    GenerateInvite,
}

impl BulkActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkActionKind::Approve => "approve",
            BulkActionKind::Deny => "deny",
            BulkActionKind::GenerateInvite => "generate_invite",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkAction {
    #[serde(rename = "type")]
    pub kind: BulkActionKind,
    pub registration_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_permissions: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InviteOptions {
    pub email: String,
    pub expiration_days: u32,
    pub is_admin: bool,
    pub send_email: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdminStats {
    pub total_pending: usize,
    pub urgent_count: usize,
    pub today_count: usize,
    pub weekly_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn urgency_boundaries() {
        assert_eq!(UrgencyLevel::from_days(2), UrgencyLevel::Normal);
        assert_eq!(UrgencyLevel::from_days(3), UrgencyLevel::Urgent);
        assert_eq!(UrgencyLevel::from_days(6), UrgencyLevel::Urgent);
        assert_eq!(UrgencyLevel::from_days(7), UrgencyLevel::Critical);
        assert_eq!(UrgencyLevel::from_days(0), UrgencyLevel::Normal);
        assert_eq!(UrgencyLevel::from_days(30), UrgencyLevel::Critical);
    }

    #[test]
    fn days_pending_rounds_down() {
        let now = Utc::now();
        assert_eq!(days_pending(now - Duration::hours(23), now), 0);
        assert_eq!(days_pending(now - Duration::hours(25), now), 1);
        assert_eq!(days_pending(now - Duration::days(7), now), 7);
        // Clock skew: a timestamp slightly in the future is not "zero days old".
        assert_eq!(days_pending(now + Duration::hours(1), now), -1);
    }

    #[test]
    fn equipment_parses_camel_case_payload() {
        let eq: Equipment = serde_json::from_value(json!({
            "id": "equipment_2b1",
            "businessId": "b-1",
            "status": "in service",
            "type": "forklift",
            "location": "Dock 4",
            "moreFields": { "manufacturer": "Toyota", "warranty_expiry": "2026-01-01" },
            "business": { "id": "b-1", "businessName": "Acme" }
        }))
        .unwrap();
        assert_eq!(eq.status, EquipmentStatus::InService);
        assert_eq!(eq.kind, "forklift");
        assert_eq!(eq.business.name, "Acme");
        assert_eq!(eq.more_fields["manufacturer"], "Toyota");
    }

    #[test]
    fn equipment_parses_legacy_pascal_case_with_null_fields() {
        let eq: Equipment = serde_json::from_value(json!({
            "ID": "e-9",
            "BusinessID": "b-2",
            "Status": "maintenance",
            "Type": "lift",
            "Location": "Bay 1",
            "MoreFields": null,
            "Business": { "ID": "b-2", "BusinessName": "Beta" }
        }))
        .unwrap();
        assert_eq!(eq.status, EquipmentStatus::Maintenance);
        assert!(eq.more_fields.is_empty());
    }

    #[test]
    fn equipment_rejects_unknown_status() {
        let res: Result<Equipment, _> = serde_json::from_value(json!({
            "id": "e", "businessId": "b", "status": "exploded", "type": "t",
            "business": { "id": "b", "businessName": "B" }
        }));
        assert!(res.is_err());
    }

    #[test]
    fn bulk_action_serializes_wire_names() {
        let action = BulkAction {
            kind: BulkActionKind::GenerateInvite,
            registration_ids: vec!["r1".into()],
            admin_permissions: None,
        };
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value, json!({ "type": "generate_invite", "registration_ids": ["r1"] }));
    }

    #[test]
    fn invite_options_use_camel_case() {
        let opts = InviteOptions {
            email: "new@acme.test".into(),
            expiration_days: 7,
            is_admin: false,
            send_email: true,
        };
        let value = serde_json::to_value(&opts).unwrap();
        assert_eq!(value["expirationDays"], 7);
        assert_eq!(value["sendEmail"], true);
    }

    #[test]
    fn pending_registration_age_is_derived() {
        let now = Utc::now();
        let reg: PendingRegistration = serde_json::from_value(json!({
            "id": "r1",
            "user_id": "u1",
            "business_id": "b1",
            "created_at": (now - Duration::days(4) - Duration::hours(2)).to_rfc3339(),
            "user": { "username": "sam", "email": "sam@acme.test", "is_active": true }
        }))
        .unwrap();
        let reg = reg.with_age(now);
        assert_eq!(reg.days_pending, 4);
        assert_eq!(reg.urgency_level, UrgencyLevel::Urgent);
    }
}
