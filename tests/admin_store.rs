use async_trait::async_trait;
use chrono::{Duration, Utc};
use equipqr::admin::view::{SortColumn, SortDirection};
use equipqr::admin::RegistrationStore;
use equipqr::api::RegistrationService;
use equipqr::error::ApiError;
use equipqr::model::{
    BulkAction, BulkActionKind, InviteOptions, PendingRegistration, Registrant, UrgencyLevel,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

fn reg(id: &str, username: &str, days: i64) -> PendingRegistration {
    PendingRegistration {
        id: id.to_string(),
        user_id: format!("u-{}", id),
        business_id: "b-1".into(),
        created_at: Utc::now() - Duration::days(days) - Duration::hours(1),
        user: Registrant {
            username: username.to_string(),
            email: format!("{}@acme.test", username),
            is_active: false,
        },
        days_pending: 0,
        urgency_level: UrgencyLevel::Normal,
    }
}

/// Scripted backend that records every call as `"<method> <arg>"`.
#[derive(Default)]
struct RecordingService {
    lists: Mutex<VecDeque<Result<Vec<PendingRegistration>, ApiError>>>,
    decisions: Mutex<VecDeque<Result<(), ApiError>>>,
    bulk: Mutex<VecDeque<Result<Value, ApiError>>>,
    invites: Mutex<VecDeque<Result<String, ApiError>>>,
    calls: Mutex<Vec<String>>,
    approve_gate: Option<Arc<Semaphore>>,
    /// Holds list responses for one business until a permit is added.
    list_gate: Option<(String, Arc<Semaphore>)>,
}

impl RecordingService {
    async fn script_list(&self, list: Result<Vec<PendingRegistration>, ApiError>) {
        self.lists.lock().await.push_back(list);
    }

    async fn script_decision(&self, result: Result<(), ApiError>) {
        self.decisions.lock().await.push_back(result);
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

fn unscripted() -> ApiError {
    ApiError::Network("no scripted response".into())
}

#[async_trait]
impl RegistrationService for RecordingService {
    async fn pending_registrations(
        &self,
        business_id: &str,
    ) -> Result<Vec<PendingRegistration>, ApiError> {
        self.calls.lock().await.push(format!("list {}", business_id));
        let response = self.lists.lock().await.pop_front().unwrap_or_else(|| Err(unscripted()));
        if let Some((business, gate)) = &self.list_gate {
            if business == business_id {
                gate.acquire().await.unwrap().forget();
            }
        }
        response
    }

    async fn approve_registration(&self, request_id: &str) -> Result<(), ApiError> {
        self.calls.lock().await.push(format!("approve {}", request_id));
        if let Some(gate) = &self.approve_gate {
            gate.acquire().await.unwrap().forget();
        }
        self.decisions.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn deny_registration(&self, request_id: &str) -> Result<(), ApiError> {
        self.calls.lock().await.push(format!("deny {}", request_id));
        self.decisions.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn bulk_action(&self, action: &BulkAction) -> Result<Value, ApiError> {
        self.calls.lock().await.push(format!(
            "bulk {} {}",
            action.kind.as_str(),
            action.registration_ids.join(",")
        ));
        self.bulk.lock().await.pop_front().unwrap_or(Ok(Value::Null))
    }

    async fn generate_invite(&self, options: &InviteOptions) -> Result<String, ApiError> {
        self.calls.lock().await.push(format!("invite {}", options.email));
        self.invites.lock().await.pop_front().unwrap_or_else(|| Err(unscripted()))
    }
}

async fn loaded_store(list: Vec<PendingRegistration>) -> (Arc<RecordingService>, RegistrationStore) {
    let service = Arc::new(RecordingService::default());
    service.script_list(Ok(list)).await;
    let store = RegistrationStore::new(service.clone(), 20);
    store.load("b-1").await.unwrap();
    (service, store)
}

fn ids(list: &[PendingRegistration]) -> Vec<&str> {
    list.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test]
async fn load_derives_ages_and_replaces_list() {
    let (service, store) =
        loaded_store(vec![reg("r1", "ann", 0), reg("r2", "bob", 4), reg("r3", "cy", 9)]).await;

    let list = store.registrations();
    let levels: Vec<_> = list.iter().map(|r| (r.days_pending, r.urgency_level)).collect();
    assert_eq!(
        levels,
        vec![
            (0, UrgencyLevel::Normal),
            (4, UrgencyLevel::Urgent),
            (9, UrgencyLevel::Critical)
        ]
    );
    assert!(!store.is_loading());
    assert_eq!(store.business_id().as_deref(), Some("b-1"));

    service.script_list(Ok(vec![reg("r4", "dee", 1)])).await;
    assert_eq!(store.reload().await.unwrap(), 1);
    assert_eq!(ids(&store.registrations()), vec!["r4"]);
    assert_eq!(service.calls().await, vec!["list b-1", "list b-1"]);
}

#[tokio::test]
async fn failed_load_keeps_previous_list() {
    let (service, store) = loaded_store(vec![reg("r1", "ann", 0)]).await;
    service
        .script_list(Err(ApiError::Http {
            status: 500,
            message: Some("boom".into()),
        }))
        .await;

    assert!(store.reload().await.is_err());
    assert_eq!(ids(&store.registrations()), vec!["r1"]);
    assert!(store
        .error()
        .unwrap()
        .starts_with("Failed to load registrations"));
    assert!(!store.is_loading());

    store.clear_error();
    assert!(store.error().is_none());
}

#[tokio::test]
async fn reload_without_business_is_rejected() {
    let store = RegistrationStore::new(Arc::new(RecordingService::default()), 20);
    assert!(matches!(
        store.reload().await,
        Err(ApiError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn switching_business_resets_selection_and_page() {
    let (service, store) = loaded_store(vec![reg("r1", "ann", 0), reg("r2", "bob", 1)]).await;
    store.toggle_selection("r1");
    store.set_page(3);

    service.script_list(Ok(vec![reg("r1", "ann", 0)])).await;
    store.load("b-2").await.unwrap();
    assert!(store.selected().is_empty());
    assert_eq!(store.pagination().page, 1);
}

#[tokio::test]
async fn reload_prunes_selection_of_vanished_records() {
    let (service, store) = loaded_store(vec![reg("r1", "ann", 0), reg("r2", "bob", 1)]).await;
    store.toggle_selection("r1");
    store.toggle_selection("r2");

    service.script_list(Ok(vec![reg("r2", "bob", 1)])).await;
    store.reload().await.unwrap();
    assert_eq!(store.selected(), vec!["r2".to_string()]);
}

#[tokio::test]
async fn late_response_for_previous_business_is_discarded() {
    let gate = Arc::new(Semaphore::new(0));
    let service = Arc::new(RecordingService {
        list_gate: Some(("b-1".into(), gate.clone())),
        ..Default::default()
    });
    service.script_list(Ok(vec![reg("b1-r", "ann", 0)])).await;
    service.script_list(Ok(vec![reg("b2-r", "bob", 0)])).await;
    let store = RegistrationStore::new(service.clone(), 20);

    let switch = async {
        while service.calls().await.is_empty() {
            tokio::task::yield_now().await;
        }
        store.load("b-2").await.unwrap();
        assert_eq!(ids(&store.registrations()), vec!["b2-r"]);
        // The b-1 request is still out.
        assert!(store.is_loading());
        gate.add_permits(1);
    };
    let (first, ()) = tokio::join!(store.load("b-1"), switch);
    assert_eq!(first.unwrap(), 1);

    assert_eq!(store.business_id().as_deref(), Some("b-2"));
    assert_eq!(ids(&store.registrations()), vec!["b2-r"]);
    assert!(!store.is_loading());
    assert!(store.error().is_none());
}

#[tokio::test]
async fn bulk_action_does_not_end_a_pending_load() {
    let gate = Arc::new(Semaphore::new(0));
    let service = Arc::new(RecordingService {
        list_gate: Some(("b-1".into(), gate.clone())),
        ..Default::default()
    });
    service.script_list(Ok(vec![reg("r1", "ann", 0)])).await;
    let store = RegistrationStore::new(service.clone(), 20);

    let bulk = async {
        while service.calls().await.is_empty() {
            tokio::task::yield_now().await;
        }
        let action = BulkAction {
            kind: BulkActionKind::Deny,
            registration_ids: vec!["r9".into()],
            admin_permissions: None,
        };
        store.bulk_action(&action).await.unwrap();
        assert!(store.is_loading());
        gate.add_permits(1);
    };
    let (loaded, ()) = tokio::join!(store.load("b-1"), bulk);
    assert_eq!(loaded.unwrap(), 1);
    assert!(!store.is_loading());
    assert_eq!(ids(&store.registrations()), vec!["r1"]);
}

#[tokio::test]
async fn filter_change_returns_to_first_page() {
    let list = (0..45)
        .map(|i| reg(&format!("r{:02}", i), &format!("user{:02}", i), i % 10))
        .collect();
    let (_service, store) = loaded_store(list).await;

    store.set_page(3);
    assert_eq!(store.page_view().items.len(), 5);
    store.update_filters(|f| f.urgency = Some(UrgencyLevel::Critical));
    assert_eq!(store.pagination().page, 1);

    let view = store.page_view();
    // days 7, 8, 9 in each block of ten
    assert_eq!(view.total, 12);
    assert_eq!(view.total_pages, 1);
    assert!(view
        .items
        .iter()
        .all(|r| r.urgency_level == UrgencyLevel::Critical));
}

#[tokio::test]
async fn toggle_sort_goes_ascending_then_descending() {
    let (_service, store) =
        loaded_store(vec![reg("r1", "cy", 0), reg("r2", "ann", 1), reg("r3", "bob", 2)]).await;

    let sort = store.toggle_sort(SortColumn::Username);
    assert_eq!(sort.direction, SortDirection::Asc);
    assert_eq!(ids(&store.filtered()), vec!["r2", "r3", "r1"]);

    let sort = store.toggle_sort(SortColumn::Username);
    assert_eq!(sort.direction, SortDirection::Desc);
    assert_eq!(ids(&store.filtered()), vec!["r1", "r3", "r2"]);
}

#[tokio::test]
async fn approve_removes_record_after_confirmation() {
    let (service, store) = loaded_store(vec![reg("r1", "ann", 0), reg("r2", "bob", 1)]).await;
    store.toggle_selection("r1");

    store.approve("r1").await.unwrap();
    assert_eq!(ids(&store.registrations()), vec!["r2"]);
    assert!(store.selected().is_empty());
    assert!(!store.is_action_pending("r1"));
    assert_eq!(service.calls().await.last().unwrap(), "approve r1");
}

#[tokio::test]
async fn failed_deny_keeps_record_and_reports() {
    let (service, store) = loaded_store(vec![reg("r1", "ann", 0)]).await;
    service
        .script_decision(Err(ApiError::Http {
            status: 403,
            message: Some("forbidden".into()),
        }))
        .await;

    assert!(store.deny("r1").await.is_err());
    assert_eq!(ids(&store.registrations()), vec!["r1"]);
    assert!(store
        .error()
        .unwrap()
        .starts_with("Failed to deny registration"));
    assert!(!store.is_action_pending("r1"));
}

#[tokio::test]
async fn actions_are_tracked_per_registration() {
    let gate = Arc::new(Semaphore::new(0));
    let service = Arc::new(RecordingService {
        approve_gate: Some(gate.clone()),
        ..Default::default()
    });
    service
        .script_list(Ok(vec![reg("r1", "ann", 0), reg("r2", "bob", 1)]))
        .await;
    let store = RegistrationStore::new(service.clone(), 20);
    store.load("b-1").await.unwrap();

    let other = async {
        while !store.is_action_pending("r1") {
            tokio::task::yield_now().await;
        }
        // Same record: rejected without a request.
        assert!(matches!(
            store.approve("r1").await,
            Err(ApiError::InvalidInput(_))
        ));
        // Another record proceeds while r1 is in flight.
        assert!(!store.is_action_pending("r2"));
        store.deny("r2").await.unwrap();
        assert!(store.is_action_pending("r1"));
        gate.add_permits(1);
    };
    let (first, ()) = tokio::join!(store.approve("r1"), other);
    first.unwrap();

    assert!(store.registrations().is_empty());
    assert_eq!(
        service.calls().await,
        vec!["list b-1", "approve r1", "deny r2"]
    );
}

#[tokio::test]
async fn bulk_action_removes_ids_and_clears_selection() {
    let (service, store) =
        loaded_store(vec![reg("r1", "ann", 0), reg("r2", "bob", 1), reg("r3", "cy", 2)]).await;
    store.toggle_selection("r1");
    store.toggle_selection("r3");

    let response = store
        .bulk_selected(BulkActionKind::Approve, Some(false))
        .await
        .unwrap();
    assert!(response.is_null());
    assert_eq!(ids(&store.registrations()), vec!["r2"]);
    assert!(store.selected().is_empty());
    assert!(!store.is_loading());
    assert_eq!(service.calls().await.last().unwrap(), "bulk approve r1,r3");
}

#[tokio::test]
async fn failed_bulk_action_changes_nothing() {
    let (service, store) = loaded_store(vec![reg("r1", "ann", 0), reg("r2", "bob", 1)]).await;
    service
        .bulk
        .lock()
        .await
        .push_back(Err(ApiError::Network("timeout".into())));
    store.toggle_selection("r1");

    assert!(store.bulk_selected(BulkActionKind::Deny, None).await.is_err());
    assert_eq!(ids(&store.registrations()), vec!["r1", "r2"]);
    assert_eq!(store.selected(), vec!["r1".to_string()]);
    assert!(store.error().unwrap().starts_with("Failed to perform bulk deny"));
}

#[tokio::test]
async fn empty_bulk_action_is_rejected_locally() {
    let (service, store) = loaded_store(vec![reg("r1", "ann", 0)]).await;
    let action = BulkAction {
        kind: BulkActionKind::GenerateInvite,
        registration_ids: Vec::new(),
        admin_permissions: None,
    };
    assert!(matches!(
        store.bulk_action(&action).await,
        Err(ApiError::InvalidInput(_))
    ));
    assert_eq!(service.calls().await, vec!["list b-1"]);
}

#[tokio::test]
async fn bulk_response_is_passed_through() {
    let (service, store) = loaded_store(vec![reg("r1", "ann", 0)]).await;
    service
        .bulk
        .lock()
        .await
        .push_back(Ok(json!({ "invites": ["https://equipqr.test/invite/abc"] })));

    let action = BulkAction {
        kind: BulkActionKind::GenerateInvite,
        registration_ids: vec!["r1".into()],
        admin_permissions: None,
    };
    let response = store.bulk_action(&action).await.unwrap();
    assert_eq!(response["invites"][0], "https://equipqr.test/invite/abc");
}

#[tokio::test]
async fn select_page_takes_only_visible_records() {
    let list = (0..25).map(|i| reg(&format!("r{:02}", i), "u", 0)).collect();
    let (_service, store) = loaded_store(list).await;
    store.set_page(2);

    store.select_page();
    assert_eq!(store.selected().len(), 5);
    store.clear_selection();
    assert!(store.selected().is_empty());
}

#[tokio::test]
async fn invite_failure_sets_error() {
    let (service, store) = loaded_store(Vec::new()).await;
    let options = InviteOptions {
        email: "new@acme.test".into(),
        expiration_days: 7,
        is_admin: false,
        send_email: false,
    };
    assert!(store.generate_invite(&options).await.is_err());
    assert!(store
        .error()
        .unwrap()
        .starts_with("Failed to generate invite"));

    service
        .invites
        .lock()
        .await
        .push_back(Ok("https://equipqr.test/invite/xyz".into()));
    let link = store.generate_invite(&options).await.unwrap();
    assert_eq!(link, "https://equipqr.test/invite/xyz");
}
