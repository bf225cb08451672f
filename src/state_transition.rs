use log::info;
use rusqlite::{params, Connection, ToSql};
use serde_json::Value;

use crate::alerts::{Alert, AlertState, Alerts, ExecutionErrorUpdate};
use crate::error::AlertSyncError;

pub struct StateTransitions;

impl StateTransitions {
    /// Moves one alert to `new_state`, recording the evaluation payload and error.
    ///
    /// Paused alerts reject every change (`InvalidTransition`) and a change to
    /// the current state is rejected as `NoOpTransition`. An empty
    /// `execution_error` clears the stored error.
    ///
    /// IMPORTANT: Caller must hold an immediate transaction
    pub fn set_state(
        conn: &Connection,
        now: i64,
        alert_id: i64,
        new_state: AlertState,
        eval_data: Option<&Value>,
        execution_error: &str,
    ) -> Result<Alert, AlertSyncError> {
        let alert = Alerts::require_by_id(conn, alert_id)?;

        if alert.state == AlertState::Paused {
            return Err(AlertSyncError::InvalidTransition);
        }

        if alert.state == new_state {
            return Err(AlertSyncError::NoOpTransition);
        }

        let eval_data = eval_data.map(serde_json::to_string).transpose()?;
        let error_update = ExecutionErrorUpdate::from_message(execution_error);

        conn.execute(
            "UPDATE alert SET
                state = ?,
                state_changes = state_changes + 1,
                new_state_date = ?,
                eval_data = ?,
                execution_error = ?
            WHERE id = ?",
            params![
                new_state.as_str(),
                now,
                eval_data,
                error_update.column_value(),
                alert_id,
            ],
        )?;

        info!(
            "Alert {} changed state: {} -> {}",
            alert_id, alert.state, new_state
        );

        Alerts::require_by_id(conn, alert_id)
    }

    /// Pauses (or resumes into `Unknown`) the given alerts, or every alert when
    /// `alert_ids` is empty. This is an administrative override and skips the
    /// checks `set_state` applies. Returns the number of rows changed.
    ///
    /// IMPORTANT: Caller must hold an immediate transaction
    pub fn set_paused(
        conn: &Connection,
        now: i64,
        alert_ids: &[i64],
        paused: bool,
    ) -> Result<usize, AlertSyncError> {
        let new_state = if paused {
            AlertState::Paused
        } else {
            AlertState::Unknown
        };

        let mut sql = String::from("UPDATE alert SET state = ?, new_state_date = ?");
        let mut params_vec: Vec<Box<dyn ToSql>> =
            vec![Box::new(new_state.as_str()), Box::new(now)];

        if !alert_ids.is_empty() {
            sql.push_str(&format!(
                " WHERE id IN (?{})",
                ",?".repeat(alert_ids.len() - 1)
            ));
            for alert_id in alert_ids {
                params_vec.push(Box::new(*alert_id));
            }
        }

        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(AsRef::as_ref).collect();
        let count = conn.execute(&sql, &params_refs[..])?;

        info!(
            "Set {} alert(s) to {} ({})",
            count,
            new_state,
            if alert_ids.is_empty() {
                "all alerts".to_string()
            } else {
                format!("ids {:?}", alert_ids)
            }
        );

        Ok(count)
    }
}
