use std::str::FromStr;

use rusqlite::ToSql;

use crate::error::AlertSyncError;
use crate::query::Filter;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OrgRole {
    Viewer,
    Editor,
    Admin,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Viewer => "Viewer",
            OrgRole::Editor => "Editor",
            OrgRole::Admin => "Admin",
        }
    }
}

impl FromStr for OrgRole {
    type Err = AlertSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "viewer" => Ok(OrgRole::Viewer),
            "editor" => Ok(OrgRole::Editor),
            "admin" => Ok(OrgRole::Admin),
            _ => Err(AlertSyncError::Error(format!("Invalid org role: '{}'", s))),
        }
    }
}

/// Identity of the caller a listing is produced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedInUser {
    pub org_id: i64,
    pub user_id: i64,
    pub role: OrgRole,
}

impl SignedInUser {
    pub fn is_admin(&self) -> bool {
        self.role == OrgRole::Admin
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionType {
    View = 1,
    Edit = 2,
    Admin = 4,
}

impl PermissionType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

/// Source of the dashboard view check applied to non-admin listings.
///
/// The check is a SQL predicate over `alert.dashboard_id` so that ordering and
/// the row limit apply to the permitted rows only.
pub trait DashboardPermissions: Send + Sync {
    fn dashboard_filter(&self, user: &SignedInUser, permission: PermissionType)
        -> Box<dyn Filter>;
}

/// Permissions stored in `dashboard_acl`. An entry grants access when it
/// names the user, or the user's role, with a sufficient permission level.
#[derive(Debug, Default, Clone, Copy)]
pub struct AclPermissions;

impl DashboardPermissions for AclPermissions {
    fn dashboard_filter(
        &self,
        user: &SignedInUser,
        permission: PermissionType,
    ) -> Box<dyn Filter> {
        Box::new(AclFilter {
            user_id: user.user_id,
            role: user.role,
            permission,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct AclFilter {
    user_id: i64,
    role: OrgRole,
    permission: PermissionType,
}

impl Filter for AclFilter {
    fn to_predicate_parts(&self) -> Result<(String, Vec<Box<dyn ToSql>>), AlertSyncError> {
        let pred_str = "alert.dashboard_id IN (
            SELECT dashboard_acl.dashboard_id
            FROM dashboard_acl
            WHERE (dashboard_acl.user_id = ? OR dashboard_acl.role = ?)
            AND dashboard_acl.permission >= ?)"
            .to_owned();
        let pred_vec: Vec<Box<dyn ToSql>> = vec![
            Box::new(self.user_id),
            Box::new(self.role.as_str()),
            Box::new(self.permission.as_i64()),
        ];

        Ok((pred_str, pred_vec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("admin".parse::<OrgRole>().unwrap(), OrgRole::Admin);
        assert_eq!("Viewer".parse::<OrgRole>().unwrap(), OrgRole::Viewer);
        assert!("owner".parse::<OrgRole>().is_err());
    }

    #[test]
    fn test_permission_ordering() {
        assert!(PermissionType::Admin > PermissionType::Edit);
        assert!(PermissionType::Edit > PermissionType::View);
        assert_eq!(PermissionType::View.as_i64(), 1);
    }

    #[test]
    fn test_acl_filter_binds_user_role_and_level() {
        let user = SignedInUser {
            org_id: 1,
            user_id: 42,
            role: OrgRole::Editor,
        };
        let filter = AclPermissions.dashboard_filter(&user, PermissionType::View);
        let (sql, params) = filter.to_predicate_parts().unwrap();

        assert_eq!(sql.matches('?').count(), 3);
        assert_eq!(params.len(), 3);
        assert!(sql.starts_with("alert.dashboard_id IN ("));
    }
}
