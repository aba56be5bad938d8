//! Admin registration store: the pending-registration list of one business
//! plus the view state (filters, sort, page, selection) layered over it.
//!
//! Mutations happen only after the backend confirms them. A failed call
//! leaves the list untouched and records a message in [`RegistrationStore::error`].
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::api::RegistrationService;
use crate::error::ApiError;
use crate::model::{AdminStats, BulkAction, BulkActionKind, InviteOptions, PendingRegistration};

use self::view::{
    admin_stats, filter_and_sort, paginate, FilterState, PageView, Pagination, SortColumn,
    SortState,
};

pub mod view;

#[derive(Debug, Default)]
struct StoreState {
    business_id: Option<String>,
    registrations: Vec<PendingRegistration>,
    filters: FilterState,
    sort: SortState,
    pagination: Pagination,
    selected: Vec<String>,
    action_loading: HashSet<String>,
    /// Loads and bulk actions currently awaiting the backend.
    in_flight: usize,
    /// Bumped by every `load`; only the newest load may apply its result.
    load_generation: u64,
    error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Decision {
    Approve,
    Deny,
}

impl Decision {
    fn verb(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Deny => "deny",
        }
    }
}

pub struct RegistrationStore {
    service: Arc<dyn RegistrationService>,
    state: Mutex<StoreState>,
}

impl std::fmt::Debug for RegistrationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationStore").finish_non_exhaustive()
    }
}

impl RegistrationStore {
    pub fn new(service: Arc<dyn RegistrationService>, page_size: usize) -> Self {
        let state = StoreState {
            pagination: Pagination {
                page: 1,
                page_size: page_size.max(1),
            },
            ..Default::default()
        };
        Self {
            service,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch the pending list of `business_id`, derive ages as of now and
    /// replace the local list in one step. Returns the number loaded.
    /// A load overtaken by a newer one discards its response.
    #[instrument(skip(self))]
    pub async fn load(&self, business_id: &str) -> Result<usize, ApiError> {
        let generation = {
            let mut state = self.state();
            state.in_flight += 1;
            state.load_generation += 1;
            state.error = None;
            if state.business_id.as_deref() != Some(business_id) {
                state.business_id = Some(business_id.to_string());
                state.selected.clear();
                state.pagination.page = 1;
            }
            state.load_generation
        };

        let result = self.service.pending_registrations(business_id).await;

        let mut state = self.state();
        state.in_flight -= 1;
        if state.load_generation != generation {
            debug!("superseded by a newer load; discarding response");
            return result.map(|list| list.len());
        }
        match result {
            Ok(list) => {
                let now = Utc::now();
                let list: Vec<_> = list.into_iter().map(|r| r.with_age(now)).collect();
                let count = list.len();
                let ids: HashSet<&str> = list.iter().map(|r| r.id.as_str()).collect();
                let selected = state
                    .selected
                    .iter()
                    .filter(|id| ids.contains(id.as_str()))
                    .cloned()
                    .collect();
                state.selected = selected;
                state.registrations = list;
                info!(count, "loaded pending registrations");
                Ok(count)
            }
            Err(err) => {
                warn!(?err, "failed to load registrations");
                state.error = Some(format!("Failed to load registrations: {}", err));
                Err(err)
            }
        }
    }

    /// Re-fetch the current business.
    pub async fn reload(&self) -> Result<usize, ApiError> {
        let business_id = self
            .state()
            .business_id
            .clone()
            .ok_or(ApiError::InvalidInput("no business selected"))?;
        self.load(&business_id).await
    }

    pub fn business_id(&self) -> Option<String> {
        self.state().business_id.clone()
    }

    pub fn registrations(&self) -> Vec<PendingRegistration> {
        self.state().registrations.clone()
    }

    pub fn filters(&self) -> FilterState {
        self.state().filters.clone()
    }

    /// Edit the filters in place; always returns to page 1.
    pub fn update_filters(&self, edit: impl FnOnce(&mut FilterState)) {
        let mut state = self.state();
        edit(&mut state.filters);
        state.pagination.page = 1;
    }

    pub fn sort(&self) -> SortState {
        self.state().sort
    }

    pub fn toggle_sort(&self, column: SortColumn) -> SortState {
        let mut state = self.state();
        state.sort = state.sort.toggled(column);
        state.sort
    }

    pub fn set_sort(&self, sort: SortState) {
        self.state().sort = sort;
    }

    pub fn pagination(&self) -> Pagination {
        self.state().pagination
    }

    pub fn set_page(&self, page: usize) {
        self.state().pagination.page = page.max(1);
    }

    pub fn set_page_size(&self, page_size: usize) {
        let mut state = self.state();
        state.pagination.page_size = page_size.max(1);
        state.pagination.page = 1;
    }

    /// Filtered and sorted list, all pages.
    pub fn filtered(&self) -> Vec<PendingRegistration> {
        let state = self.state();
        filter_and_sort(&state.registrations, &state.filters, state.sort)
    }

    pub fn page_view(&self) -> PageView {
        let state = self.state();
        let filtered = filter_and_sort(&state.registrations, &state.filters, state.sort);
        paginate(&filtered, state.pagination)
    }

    pub fn stats(&self) -> AdminStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> AdminStats {
        admin_stats(&self.state().registrations, now)
    }

    pub fn toggle_selection(&self, id: &str) {
        let mut state = self.state();
        match state.selected.iter().position(|s| s == id) {
            Some(pos) => {
                state.selected.remove(pos);
            }
            None => state.selected.push(id.to_string()),
        }
    }

    /// Select exactly the records on the current page.
    pub fn select_page(&self) {
        let ids = self.page_view().items.into_iter().map(|r| r.id).collect();
        self.state().selected = ids;
    }

    pub fn clear_selection(&self) {
        self.state().selected.clear();
    }

    pub fn selected(&self) -> Vec<String> {
        self.state().selected.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state().in_flight > 0
    }

    pub fn is_action_pending(&self, id: &str) -> bool {
        self.state().action_loading.contains(id)
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn clear_error(&self) {
        self.state().error = None;
    }

    pub async fn approve(&self, id: &str) -> Result<(), ApiError> {
        self.decide(Decision::Approve, id).await
    }

    pub async fn deny(&self, id: &str) -> Result<(), ApiError> {
        self.decide(Decision::Deny, id).await
    }

    #[instrument(skip(self))]
    async fn decide(&self, decision: Decision, id: &str) -> Result<(), ApiError> {
        if !self.state().action_loading.insert(id.to_string()) {
            return Err(ApiError::InvalidInput(
                "an action is already pending for this registration",
            ));
        }

        let result = match decision {
            Decision::Approve => self.service.approve_registration(id).await,
            Decision::Deny => self.service.deny_registration(id).await,
        };

        let mut state = self.state();
        state.action_loading.remove(id);
        match result {
            Ok(()) => {
                state.registrations.retain(|r| r.id != id);
                state.selected.retain(|s| s != id);
                info!(verb = decision.verb(), "registration removed");
                Ok(())
            }
            Err(err) => {
                warn!(?err, verb = decision.verb(), "registration action failed");
                state.error = Some(format!("Failed to {} registration: {}", decision.verb(), err));
                Err(err)
            }
        }
    }

    /// Apply `action`; on success every listed registration leaves the list
    /// and the selection is cleared.
    #[instrument(skip_all, fields(kind = action.kind.as_str(), count = action.registration_ids.len()))]
    pub async fn bulk_action(&self, action: &BulkAction) -> Result<Value, ApiError> {
        if action.registration_ids.is_empty() {
            return Err(ApiError::InvalidInput("bulk action needs at least one registration"));
        }
        self.state().in_flight += 1;

        let result = self.service.bulk_action(action).await;

        let mut state = self.state();
        state.in_flight -= 1;
        match result {
            Ok(value) => {
                let done: HashSet<&str> =
                    action.registration_ids.iter().map(String::as_str).collect();
                state.registrations.retain(|r| !done.contains(r.id.as_str()));
                state.selected.clear();
                info!("bulk action applied");
                Ok(value)
            }
            Err(err) => {
                warn!(?err, "bulk action failed");
                state.error = Some(format!(
                    "Failed to perform bulk {}: {}",
                    action.kind.as_str(),
                    err
                ));
                Err(err)
            }
        }
    }

    /// Run `kind` over the current selection.
    pub async fn bulk_selected(
        &self,
        kind: BulkActionKind,
        admin_permissions: Option<bool>,
    ) -> Result<Value, ApiError> {
        let action = BulkAction {
            kind,
            registration_ids: self.selected(),
            admin_permissions,
        };
        self.bulk_action(&action).await
    }

    pub async fn generate_invite(&self, options: &InviteOptions) -> Result<String, ApiError> {
        match self.service.generate_invite(options).await {
            Ok(link) => Ok(link),
            Err(err) => {
                warn!(?err, "invite generation failed");
                self.state().error = Some(format!("Failed to generate invite: {}", err));
                Err(err)
            }
        }
    }
}
