use std::fmt;
use std::str::FromStr;

use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AlertSyncError;

/// Written by older releases to force the column update; read back as "".
const LEGACY_CLEARED_ERROR: &str = " ";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Unknown,
    Ok,
    Alerting,
    NoData,
    Pending,
    Paused,
}

impl AlertState {
    pub const ALL: [AlertState; 6] = [
        AlertState::Unknown,
        AlertState::Ok,
        AlertState::Alerting,
        AlertState::NoData,
        AlertState::Pending,
        AlertState::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Unknown => "unknown",
            AlertState::Ok => "ok",
            AlertState::Alerting => "alerting",
            AlertState::NoData => "no_data",
            AlertState::Pending => "pending",
            AlertState::Paused => "paused",
        }
    }
}

impl FromStr for AlertState {
    type Err = AlertSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| AlertSyncError::Error(format!("Invalid alert state: '{}'", s)))
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted alert row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: i64,
    pub dashboard_id: i64,
    pub panel_id: i64,
    pub org_id: i64,
    pub user_id: i64,
    pub name: String,
    pub message: String,
    pub settings: Value,
    pub state: AlertState,
    pub new_state_date: i64,
    pub eval_data: Option<Value>,
    pub eval_date: Option<i64>,
    pub execution_error: String,
    pub state_changes: i64,
    pub frequency: i64,
    pub for_secs: i64,
    pub created: i64,
    pub updated: i64,
}

/// One entry of a desired alert set handed to reconciliation.
///
/// `user_id` names the owner the caller believes the alert belongs to; when
/// absent the acting user is assumed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AlertInput {
    pub panel_id: i64,
    pub org_id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "empty_settings")]
    pub settings: Value,
    #[serde(default)]
    pub frequency: i64,
    #[serde(default)]
    pub for_secs: i64,
}

fn empty_settings() -> Value {
    Value::Object(Default::default())
}

impl AlertInput {
    pub fn new(panel_id: i64, org_id: i64, name: &str) -> Self {
        AlertInput {
            panel_id,
            org_id,
            user_id: None,
            name: name.to_owned(),
            message: String::new(),
            settings: empty_settings(),
            frequency: 0,
            for_secs: 0,
        }
    }
}

impl Alert {
    /// True when `desired` differs from this row in a field reconciliation owns.
    /// State and evaluation fields are never part of the comparison.
    pub fn contains_updates(&self, desired: &AlertInput) -> bool {
        self.name != desired.name
            || self.message != desired.message
            || self.settings != desired.settings
            || self.frequency != desired.frequency
            || self.for_secs != desired.for_secs
    }
}

/// Write-side form of `execution_error`. `Cleared` is stored as a real empty
/// string, never as the legacy single-space marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionErrorUpdate {
    Cleared,
    Set(String),
}

impl ExecutionErrorUpdate {
    pub fn from_message(message: &str) -> Self {
        if message.is_empty() {
            ExecutionErrorUpdate::Cleared
        } else {
            ExecutionErrorUpdate::Set(message.to_owned())
        }
    }

    pub fn column_value(&self) -> &str {
        match self {
            ExecutionErrorUpdate::Cleared => "",
            ExecutionErrorUpdate::Set(message) => message.as_str(),
        }
    }
}

pub fn normalize_execution_error(stored: String) -> String {
    if stored == LEGACY_CLEARED_ERROR {
        String::new()
    } else {
        stored
    }
}

/// Dashboard panel state summary for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertStateInfo {
    pub id: i64,
    pub dashboard_id: i64,
    pub panel_id: i64,
    pub state: AlertState,
    pub new_state_date: i64,
}

fn json_column(row: &Row, idx: usize) -> rusqlite::Result<Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn opt_json_column(row: &Row, idx: usize) -> rusqlite::Result<Option<Value>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => json_column(row, idx).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn state_column(row: &Row, idx: usize) -> rusqlite::Result<AlertState> {
    let state: String = row.get(idx)?;
    state.parse().map_err(|_| {
        rusqlite::Error::InvalidColumnType(idx, "state".to_string(), rusqlite::types::Type::Text)
    })
}

pub struct Alerts;

impl Alerts {
    const COLUMNS: &str = "id,
        dashboard_id,
        panel_id,
        org_id,
        user_id,
        name,
        message,
        settings,
        state,
        new_state_date,
        eval_data,
        eval_date,
        execution_error,
        state_changes,
        frequency,
        for_secs,
        created,
        updated";

    fn from_row(row: &Row) -> rusqlite::Result<Alert> {
        Ok(Alert {
            id: row.get(0)?,
            dashboard_id: row.get(1)?,
            panel_id: row.get(2)?,
            org_id: row.get(3)?,
            user_id: row.get(4)?,
            name: row.get(5)?,
            message: row.get(6)?,
            settings: json_column(row, 7)?,
            state: state_column(row, 8)?,
            new_state_date: row.get(9)?,
            eval_data: opt_json_column(row, 10)?,
            eval_date: row.get(11)?,
            execution_error: normalize_execution_error(row.get(12)?),
            state_changes: row.get(13)?,
            frequency: row.get(14)?,
            for_secs: row.get(15)?,
            created: row.get(16)?,
            updated: row.get(17)?,
        })
    }

    fn query_alerts(
        conn: &Connection,
        where_clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Alert>, AlertSyncError> {
        let sql = format!("SELECT {} FROM alert {}", Self::COLUMNS, where_clause);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params, Self::from_row)?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }

    pub fn get_by_id(conn: &Connection, alert_id: i64) -> Result<Option<Alert>, AlertSyncError> {
        let sql = format!("SELECT {} FROM alert WHERE id = ?", Self::COLUMNS);
        conn.query_row(&sql, [alert_id], Self::from_row)
            .optional()
            .map_err(AlertSyncError::DatabaseError)
    }

    pub fn require_by_id(conn: &Connection, alert_id: i64) -> Result<Alert, AlertSyncError> {
        Self::get_by_id(conn, alert_id)?
            .ok_or_else(|| AlertSyncError::NotFound(format!("Could not find alert {}", alert_id)))
    }

    /// The single alert a user owns on a dashboard panel, if any.
    pub fn get_for_owner(
        conn: &Connection,
        dashboard_id: i64,
        panel_id: i64,
        user_id: i64,
    ) -> Result<Option<Alert>, AlertSyncError> {
        let sql = format!(
            "SELECT {} FROM alert WHERE dashboard_id = ? AND panel_id = ? AND user_id = ?",
            Self::COLUMNS
        );
        conn.query_row(&sql, [dashboard_id, panel_id, user_id], Self::from_row)
            .optional()
            .map_err(AlertSyncError::DatabaseError)
    }

    pub fn get_for_dashboard(
        conn: &Connection,
        dashboard_id: i64,
    ) -> Result<Vec<Alert>, AlertSyncError> {
        Self::query_alerts(conn, "WHERE dashboard_id = ? ORDER BY id", [dashboard_id])
    }

    pub fn get_all(conn: &Connection) -> Result<Vec<Alert>, AlertSyncError> {
        Self::query_alerts(conn, "ORDER BY id", [])
    }

    pub fn states_for_dashboard(
        conn: &Connection,
        org_id: i64,
        dashboard_id: i64,
        user_id: i64,
    ) -> Result<Vec<AlertStateInfo>, AlertSyncError> {
        let mut stmt = conn.prepare(
            "SELECT
                id,
                dashboard_id,
                panel_id,
                state,
                new_state_date
            FROM alert
            WHERE org_id = ? AND dashboard_id = ? AND user_id = ?
            ORDER BY panel_id",
        )?;

        let rows = stmt.query_map([org_id, dashboard_id, user_id], |row| {
            Ok(AlertStateInfo {
                id: row.get(0)?,
                dashboard_id: row.get(1)?,
                panel_id: row.get(2)?,
                state: state_column(row, 3)?,
                new_state_date: row.get(4)?,
            })
        })?;

        let mut states = Vec::new();
        for row in rows {
            states.push(row?);
        }
        Ok(states)
    }

    /// Inserts a new alert owned by `owner_id` in the `Unknown` state.
    ///
    /// IMPORTANT: Caller must hold an immediate transaction
    pub fn insert(
        conn: &Connection,
        dashboard_id: i64,
        owner_id: i64,
        input: &AlertInput,
        now: i64,
    ) -> Result<Alert, AlertSyncError> {
        let settings = serde_json::to_string(&input.settings)?;

        let alert_id: i64 = conn.query_row(
            "INSERT INTO alert (
                dashboard_id, panel_id, org_id, user_id,
                name, message, settings,
                state, new_state_date, execution_error, state_changes,
                frequency, for_secs, created, updated
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, '', 0, ?, ?, ?, ?)
            RETURNING id",
            params![
                dashboard_id,
                input.panel_id,
                input.org_id,
                owner_id,
                input.name,
                input.message,
                settings,
                AlertState::Unknown.as_str(),
                now,
                input.frequency,
                input.for_secs,
                now,
                now,
            ],
            |row| row.get(0),
        )?;

        debug!("Alert inserted: name={}, id={}", input.name, alert_id);

        Self::require_by_id(conn, alert_id)
    }

    /// Rewrites the reconciled fields of `existing` from `input`. State,
    /// evaluation data and ownership are left as they are.
    ///
    /// IMPORTANT: Caller must hold an immediate transaction
    pub fn update_definition(
        conn: &Connection,
        existing: &Alert,
        input: &AlertInput,
        now: i64,
    ) -> Result<Alert, AlertSyncError> {
        let settings = serde_json::to_string(&input.settings)?;

        let rows_affected = conn.execute(
            "UPDATE alert SET
                name = ?,
                message = ?,
                settings = ?,
                frequency = ?,
                for_secs = ?,
                updated = ?
            WHERE id = ?",
            params![
                input.name,
                input.message,
                settings,
                input.frequency,
                input.for_secs,
                now,
                existing.id,
            ],
        )?;

        if rows_affected == 0 {
            return Err(AlertSyncError::NotFound(format!(
                "Could not find alert {}",
                existing.id
            )));
        }

        debug!("Alert updated: name={}, id={}", input.name, existing.id);

        Self::require_by_id(conn, existing.id)
    }

    /// Deletes one alert together with its annotations, notification state and
    /// tag associations.
    ///
    /// IMPORTANT: Caller must hold an immediate transaction
    pub fn delete_by_id_internal(
        conn: &Connection,
        alert_id: i64,
        reason: &str,
    ) -> Result<(), AlertSyncError> {
        debug!("Deleting alert: id={}, reason={}", alert_id, reason);

        conn.execute("DELETE FROM alert WHERE id = ?", [alert_id])?;
        conn.execute("DELETE FROM annotation WHERE alert_id = ?", [alert_id])?;
        conn.execute(
            "DELETE FROM alert_notification_state WHERE alert_id = ?",
            [alert_id],
        )?;
        conn.execute("DELETE FROM alert_rule_tag WHERE alert_id = ?", [alert_id])?;

        Ok(())
    }

    /// Cascade for a removed dashboard. Returns the number of alerts deleted.
    ///
    /// IMPORTANT: Caller must hold an immediate transaction
    pub fn delete_for_dashboard(
        conn: &Connection,
        dashboard_id: i64,
    ) -> Result<usize, AlertSyncError> {
        let alerts = Self::get_for_dashboard(conn, dashboard_id)?;

        for alert in &alerts {
            // An error here rolls the whole transaction back, so stop at the first one
            Self::delete_by_id_internal(conn, alert.id, "Dashboard deleted")?;
        }

        Ok(alerts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_db::TestDb;
    use crate::database::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn insert(conn: &Connection, panel_id: i64, owner_id: i64, name: &str) -> Alert {
        Database::immediate_transaction(conn, |c| {
            Alerts::insert(c, 10, owner_id, &AlertInput::new(panel_id, 1, name), 1_000)
        })
        .unwrap()
    }

    #[test]
    fn test_state_string_conversion() {
        for state in AlertState::ALL {
            assert_eq!(state.as_str().parse::<AlertState>().unwrap(), state);
        }
        assert!("bogus".parse::<AlertState>().is_err());
        assert_eq!(AlertState::NoData.to_string(), "no_data");
    }

    #[test]
    fn test_insert_starts_unknown() {
        let test_db = TestDb::new();
        let conn = test_db.db.get_connection().unwrap();

        let alert = insert(&conn, 1, 7, "cpu");

        assert_eq!(alert.state, AlertState::Unknown);
        assert_eq!(alert.user_id, 7);
        assert_eq!(alert.created, 1_000);
        assert_eq!(alert.updated, 1_000);
        assert_eq!(alert.new_state_date, 1_000);
        assert_eq!(alert.execution_error, "");
        assert_eq!(alert.settings, json!({}));
    }

    #[test]
    fn test_owner_lookup_is_per_user() {
        let test_db = TestDb::new();
        let conn = test_db.db.get_connection().unwrap();

        let first = insert(&conn, 1, 1, "user 1");
        let second = insert(&conn, 1, 2, "user 2");

        let found = Alerts::get_for_owner(&conn, 10, 1, 2).unwrap().unwrap();
        assert_eq!(found.id, second.id);
        let found = Alerts::get_for_owner(&conn, 10, 1, 1).unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(Alerts::get_for_owner(&conn, 10, 1, 3).unwrap().is_none());
        assert!(Alerts::get_for_owner(&conn, 11, 1, 1).unwrap().is_none());
    }

    #[test]
    fn test_triple_is_unique_in_storage() {
        let test_db = TestDb::new();
        let conn = test_db.db.get_connection().unwrap();

        insert(&conn, 1, 1, "first");
        let dup = Database::immediate_transaction(&conn, |c| {
            Alerts::insert(c, 10, 1, &AlertInput::new(1, 1, "dup"), 2_000)
        });
        assert!(matches!(dup, Err(AlertSyncError::DatabaseError(_))));
        assert_eq!(Alerts::get_for_dashboard(&conn, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_contains_updates_ignores_state() {
        let test_db = TestDb::new();
        let conn = test_db.db.get_connection().unwrap();
        let mut alert = insert(&conn, 1, 1, "cpu");

        let mut input = AlertInput::new(1, 1, "cpu");
        assert!(!alert.contains_updates(&input));

        alert.state = AlertState::Alerting;
        assert!(!alert.contains_updates(&input));

        input.settings = json!({"conditions": []});
        assert!(alert.contains_updates(&input));

        let mut input = AlertInput::new(1, 1, "cpu");
        input.frequency = 60;
        assert!(alert.contains_updates(&input));
    }

    #[test]
    fn test_legacy_cleared_error_reads_as_empty() {
        let test_db = TestDb::new();
        let conn = test_db.db.get_connection().unwrap();
        let alert = insert(&conn, 1, 1, "cpu");

        conn.execute(
            "UPDATE alert SET execution_error = ' ' WHERE id = ?",
            [alert.id],
        )
        .unwrap();

        let alert = Alerts::require_by_id(&conn, alert.id).unwrap();
        assert_eq!(alert.execution_error, "");
    }

    #[test]
    fn test_require_by_id_not_found() {
        let test_db = TestDb::new();
        let conn = test_db.db.get_connection().unwrap();

        let err = Alerts::require_by_id(&conn, 404).unwrap_err();
        assert!(matches!(err, AlertSyncError::NotFound(_)));
    }

    #[test]
    fn test_delete_cascades_dependent_rows() {
        let test_db = TestDb::new();
        let conn = test_db.db.get_connection().unwrap();
        let doomed = insert(&conn, 1, 1, "doomed");
        let survivor = insert(&conn, 2, 1, "survivor");

        for alert_id in [doomed.id, survivor.id] {
            conn.execute(
                "INSERT INTO annotation (alert_id, text, created) VALUES (?, 'x', 0)",
                [alert_id],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO alert_notification_state (alert_id, notifier_id, state, updated_at)
                 VALUES (?, 1, 'ok', 0)",
                [alert_id],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO alert_rule_tag (alert_id, tag_id) VALUES (?, 1)",
                [alert_id],
            )
            .unwrap();
        }

        Database::immediate_transaction(&conn, |c| {
            Alerts::delete_by_id_internal(c, doomed.id, "test")
        })
        .unwrap();

        for table in ["annotation", "alert_notification_state", "alert_rule_tag"] {
            let remaining: Vec<i64> = conn
                .prepare(&format!("SELECT alert_id FROM {}", table))
                .unwrap()
                .query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap();
            assert_eq!(remaining, vec![survivor.id], "table {}", table);
        }
        assert!(Alerts::get_by_id(&conn, doomed.id).unwrap().is_none());
    }

    #[test]
    fn test_states_for_dashboard_only_returns_own_alerts() {
        let test_db = TestDb::new();
        let conn = test_db.db.get_connection().unwrap();
        let mine = insert(&conn, 1, 1, "mine");
        insert(&conn, 1, 2, "theirs");

        let states = Alerts::states_for_dashboard(&conn, 1, 10, 1).unwrap();
        assert_eq!(
            states,
            vec![AlertStateInfo {
                id: mine.id,
                dashboard_id: 10,
                panel_id: 1,
                state: AlertState::Unknown,
                new_state_date: 1_000,
            }]
        );
    }
}
