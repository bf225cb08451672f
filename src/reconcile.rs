use log::{debug, info, Level};
use logging_timer::timer;
use rusqlite::Connection;
use serde::Serialize;

use crate::alerts::{AlertInput, Alerts};
use crate::error::AlertSyncError;
use crate::tags::Tags;

/// What one reconciliation pass did, by alert id.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub inserted: Vec<i64>,
    pub updated: Vec<i64>,
    pub unchanged: Vec<i64>,
    pub deleted: Vec<i64>,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Makes the alerts `acting_user_id` owns on a dashboard match a desired set.
///
/// Every desired alert is processed in one pass:
/// - no row for (dashboard, panel, owner): insert one for that owner in the
///   `Unknown` state. The owner is the input's `user_id`, else the acting user
/// - row owned by the acting user: update it if a reconciled field changed
/// - row owned by someone else: the whole pass fails with `Unauthorized`
///
/// Tag associations are rewritten for every desired alert. Afterwards, the
/// acting user's alerts whose panel no longer appears in the desired set are
/// deleted. Other users' existing alerts are never updated or deleted.
pub struct Reconciliation;

impl Reconciliation {
    /// IMPORTANT: Caller must hold an immediate transaction. Any error leaves
    /// partial writes behind that the caller has to roll back.
    pub fn apply(
        conn: &Connection,
        now: i64,
        dashboard_id: i64,
        desired: &[AlertInput],
        acting_user_id: i64,
    ) -> Result<ReconcileSummary, AlertSyncError> {
        let _tmr = timer!(Level::Debug; "Reconciliation::apply", "dashboard {}", dashboard_id);

        let existing_alerts = Alerts::get_for_dashboard(conn, dashboard_id)?;
        let mut summary = ReconcileSummary::default();

        for input in desired {
            let owner_id = input.user_id.unwrap_or(acting_user_id);

            let alert = match Alerts::get_for_owner(conn, dashboard_id, input.panel_id, owner_id)? {
                None => {
                    let alert = Alerts::insert(conn, dashboard_id, owner_id, input, now)?;
                    summary.inserted.push(alert.id);
                    alert
                }
                Some(existing) if existing.user_id != acting_user_id => {
                    debug!(
                        "Rejecting update of alert {} owned by user {} (acting user {})",
                        existing.id, existing.user_id, acting_user_id
                    );
                    return Err(AlertSyncError::unauthorized_update());
                }
                Some(existing) if existing.contains_updates(input) => {
                    let alert = Alerts::update_definition(conn, &existing, input, now)?;
                    summary.updated.push(alert.id);
                    alert
                }
                Some(existing) => {
                    summary.unchanged.push(existing.id);
                    existing
                }
            };

            Tags::replace_for_alert(conn, alert.id, &input.settings)?;
        }

        for missing in existing_alerts.iter().filter(|existing| {
            existing.user_id == acting_user_id
                && !desired.iter().any(|input| input.panel_id == existing.panel_id)
        }) {
            Alerts::delete_by_id_internal(conn, missing.id, "Removed from dashboard")?;
            summary.deleted.push(missing.id);
        }

        if summary.is_noop() {
            debug!(
                "Dashboard {} already matches for user {}",
                dashboard_id, acting_user_id
            );
            return Ok(summary);
        }

        info!(
            "Reconciled dashboard {} for user {}: {} inserted, {} updated, {} unchanged, {} deleted",
            dashboard_id,
            acting_user_id,
            summary.inserted.len(),
            summary.updated.len(),
            summary.unchanged.len(),
            summary.deleted.len()
        );

        Ok(summary)
    }
}
