use log::{debug, error, warn};
use rusqlite::Connection;
use serde_json::Value;

use crate::alerts::{Alert, AlertInput, AlertState, AlertStateInfo, Alerts};
use crate::clock::Clock;
use crate::dashboards::Dashboards;
use crate::database::Database;
use crate::error::AlertSyncError;
use crate::permissions::DashboardPermissions;
use crate::query::{AlertListItem, AlertListQuery, ListingFilters};
use crate::reconcile::{ReconcileSummary, Reconciliation};
use crate::state_transition::StateTransitions;
use crate::tags::{Tag, Tags};

/// Entry point for hosts: every mutating call is one immediate transaction
/// that either commits fully or leaves the store untouched.
pub struct AlertService {
    db: Database,
    clock: Box<dyn Clock>,
    permissions: Box<dyn DashboardPermissions>,
}

impl AlertService {
    pub fn new(
        db: Database,
        clock: Box<dyn Clock>,
        permissions: Box<dyn DashboardPermissions>,
    ) -> Self {
        AlertService {
            db,
            clock,
            permissions,
        }
    }

    pub fn reconcile(
        &self,
        dashboard_id: i64,
        desired: &[AlertInput],
        acting_user_id: i64,
    ) -> Result<ReconcileSummary, AlertSyncError> {
        let conn = self.db.get_connection()?;
        let now = self.clock.now_timestamp();

        Database::immediate_transaction(&conn, |c| {
            Reconciliation::apply(c, now, dashboard_id, desired, acting_user_id)
        })
        .inspect_err(|e| {
            if e.is_storage_failure() {
                error!("Reconcile of dashboard {} failed: {}", dashboard_id, e);
            } else {
                warn!("Reconcile of dashboard {} rejected: {}", dashboard_id, e);
            }
        })
    }

    pub fn set_state(
        &self,
        alert_id: i64,
        new_state: AlertState,
        eval_data: Option<&Value>,
        execution_error: &str,
    ) -> Result<Alert, AlertSyncError> {
        let conn = self.db.get_connection()?;
        let now = self.clock.now_timestamp();

        Database::immediate_transaction(&conn, |c| {
            StateTransitions::set_state(c, now, alert_id, new_state, eval_data, execution_error)
        })
    }

    /// Pauses or resumes `alert_ids`; an empty list means every alert.
    pub fn set_paused(&self, alert_ids: &[i64], paused: bool) -> Result<usize, AlertSyncError> {
        let conn = self.db.get_connection()?;
        let now = self.clock.now_timestamp();

        Database::immediate_transaction(&conn, |c| {
            StateTransitions::set_paused(c, now, alert_ids, paused)
        })
    }

    pub fn list_alerts(
        &self,
        filters: &ListingFilters,
    ) -> Result<Vec<AlertListItem>, AlertSyncError> {
        let query = AlertListQuery::build(filters, self.permissions.as_ref())?;
        debug!("Listing alerts for user {}: {:?}", filters.user.user_id, query);

        let conn = self.db.get_connection()?;
        query.execute(&conn)
    }

    pub fn get_alert_by_id(&self, alert_id: i64) -> Result<Alert, AlertSyncError> {
        let conn = self.db.get_connection()?;
        Alerts::require_by_id(&conn, alert_id)
    }

    pub fn get_alert_tags(&self, alert_id: i64) -> Result<Vec<Tag>, AlertSyncError> {
        let conn = self.db.get_connection()?;
        Tags::for_alert(&conn, alert_id)
    }

    pub fn get_alerts_for_dashboard(&self, dashboard_id: i64) -> Result<Vec<Alert>, AlertSyncError> {
        let conn = self.db.get_connection()?;
        Alerts::get_for_dashboard(&conn, dashboard_id)
    }

    pub fn get_all_alerts(&self) -> Result<Vec<Alert>, AlertSyncError> {
        let conn = self.db.get_connection()?;
        Alerts::get_all(&conn)
    }

    pub fn get_alert_states_for_dashboard(
        &self,
        org_id: i64,
        dashboard_id: i64,
        user_id: i64,
    ) -> Result<Vec<AlertStateInfo>, AlertSyncError> {
        let conn = self.db.get_connection()?;
        Alerts::states_for_dashboard(&conn, org_id, dashboard_id, user_id)
    }

    /// Removes a dashboard and cascades to its alerts. Returns the number of
    /// alerts deleted.
    pub fn delete_dashboard(&self, dashboard_id: i64) -> Result<usize, AlertSyncError> {
        self.with_transaction(|c| Dashboards::delete(c, dashboard_id))
    }

    /// Runs `f` as one unit of work on a pooled connection.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T, AlertSyncError>
    where
        F: FnOnce(&Connection) -> Result<T, AlertSyncError>,
    {
        let conn = self.db.get_connection()?;
        Database::immediate_transaction(&conn, f)
    }
}
