use log::info;
use rusqlite::{params, Connection};

use crate::alerts::Alerts;
use crate::error::AlertSyncError;
use crate::permissions::{OrgRole, PermissionType};

/// Who a `dashboard_acl` entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclSubject {
    User(i64),
    Role(OrgRole),
}

/// The slice of dashboard bookkeeping the alert store depends on: the rows
/// listings join against, their ACL entries, and the delete cascade.
pub struct Dashboards;

impl Dashboards {
    pub fn insert(
        conn: &Connection,
        org_id: i64,
        uid: &str,
        title: &str,
    ) -> Result<i64, AlertSyncError> {
        let dashboard_id = conn.query_row(
            "INSERT INTO dashboard (org_id, uid, slug, title) VALUES (?, ?, ?, ?) RETURNING id",
            params![org_id, uid, Self::slugify(title), title],
            |row| row.get(0),
        )?;
        Ok(dashboard_id)
    }

    pub fn grant(
        conn: &Connection,
        dashboard_id: i64,
        subject: AclSubject,
        permission: PermissionType,
    ) -> Result<(), AlertSyncError> {
        let (user_id, role) = match subject {
            AclSubject::User(user_id) => (Some(user_id), None),
            AclSubject::Role(role) => (None, Some(role.as_str())),
        };

        conn.execute(
            "INSERT INTO dashboard_acl (dashboard_id, user_id, role, permission) VALUES (?, ?, ?, ?)",
            params![dashboard_id, user_id, role, permission.as_i64()],
        )?;
        Ok(())
    }

    /// Removes a dashboard, its ACL entries and every alert defined on it.
    /// Returns the number of alerts removed.
    ///
    /// IMPORTANT: Caller must hold an immediate transaction
    pub fn delete(conn: &Connection, dashboard_id: i64) -> Result<usize, AlertSyncError> {
        let alerts_deleted = Alerts::delete_for_dashboard(conn, dashboard_id)?;

        conn.execute(
            "DELETE FROM dashboard_acl WHERE dashboard_id = ?",
            [dashboard_id],
        )?;
        let rows_affected = conn.execute("DELETE FROM dashboard WHERE id = ?", [dashboard_id])?;

        if rows_affected == 0 {
            return Err(AlertSyncError::NotFound(format!(
                "Dashboard with id {} not found",
                dashboard_id
            )));
        }

        info!(
            "Deleted dashboard {} and {} alert(s)",
            dashboard_id, alerts_deleted
        );

        Ok(alerts_deleted)
    }

    fn slugify(title: &str) -> String {
        let mut slug = String::with_capacity(title.len());
        for c in title.trim().chars() {
            if c.is_alphanumeric() {
                slug.extend(c.to_lowercase());
            } else if !slug.ends_with('-') && !slug.is_empty() {
                slug.push('-');
            }
        }
        slug.trim_end_matches('-').to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertInput;
    use crate::database::test_db::TestDb;
    use crate::database::Database;

    #[test]
    fn test_slugify() {
        assert_eq!(Dashboards::slugify("CPU & Memory Usage "), "cpu-memory-usage");
        assert_eq!(Dashboards::slugify("--Prod--"), "prod");
    }

    #[test]
    fn test_delete_cascades_to_alerts() {
        let test_db = TestDb::new();
        let conn = test_db.db.get_connection().unwrap();

        let (doomed, kept) = Database::immediate_transaction(&conn, |c| {
            let doomed = Dashboards::insert(c, 1, "doomed", "Doomed")?;
            let kept = Dashboards::insert(c, 1, "kept", "Kept")?;
            Dashboards::grant(c, doomed, AclSubject::User(1), PermissionType::View)?;
            for user_id in [1, 2] {
                Alerts::insert(c, doomed, user_id, &AlertInput::new(1, 1, "a"), 0)?;
            }
            Alerts::insert(c, kept, 1, &AlertInput::new(1, 1, "b"), 0)?;
            Ok((doomed, kept))
        })
        .unwrap();

        let deleted =
            Database::immediate_transaction(&conn, |c| Dashboards::delete(c, doomed)).unwrap();

        assert_eq!(deleted, 2);
        assert!(Alerts::get_for_dashboard(&conn, doomed).unwrap().is_empty());
        assert_eq!(Alerts::get_for_dashboard(&conn, kept).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_missing_dashboard_rolls_back() {
        let test_db = TestDb::new();
        let conn = test_db.db.get_connection().unwrap();

        let err =
            Database::immediate_transaction(&conn, |c| Dashboards::delete(c, 77)).unwrap_err();
        assert!(matches!(err, AlertSyncError::NotFound(_)));
    }
}
