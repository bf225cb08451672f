use rusqlite::{Connection, Row, ToSql};
use serde::Serialize;
use serde_json::Value;

use crate::alerts::{normalize_execution_error, opt_json_column, state_column, AlertState};
use crate::error::AlertSyncError;
use crate::permissions::{DashboardPermissions, PermissionType, SignedInUser};

use super::filter::{
    DashboardIdFilter, Filter, NameFilter, PanelIdFilter, ScopeFilter, StateFilter,
};

/// Caller-supplied listing criteria. Everything except `user` is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFilters {
    pub user: SignedInUser,
    pub query: String,
    pub dashboard_ids: Vec<i64>,
    pub panel_id: i64,
    pub states: Vec<String>,
    pub limit: Option<u32>,
}

impl ListingFilters {
    pub fn for_user(user: SignedInUser) -> Self {
        ListingFilters {
            user,
            query: String::new(),
            dashboard_ids: Vec::new(),
            panel_id: 0,
            states: Vec::new(),
            limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertListItem {
    pub id: i64,
    pub dashboard_id: i64,
    pub dashboard_uid: String,
    pub dashboard_slug: String,
    pub panel_id: i64,
    pub user_id: i64,
    pub name: String,
    pub state: AlertState,
    pub new_state_date: i64,
    pub eval_data: Option<Value>,
    pub eval_date: Option<i64>,
    pub execution_error: String,
}

impl AlertListItem {
    const COLUMNS: &str = "alert.id,
        alert.dashboard_id,
        dashboard.uid,
        dashboard.slug,
        alert.panel_id,
        alert.user_id,
        alert.name,
        alert.state,
        alert.new_state_date,
        alert.eval_data,
        alert.eval_date,
        alert.execution_error";

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(AlertListItem {
            id: row.get(0)?,
            dashboard_id: row.get(1)?,
            dashboard_uid: row.get(2)?,
            dashboard_slug: row.get(3)?,
            panel_id: row.get(4)?,
            user_id: row.get(5)?,
            name: row.get(6)?,
            state: state_column(row, 7)?,
            new_state_date: row.get(8)?,
            eval_data: opt_json_column(row, 9)?,
            eval_date: row.get(10)?,
            execution_error: normalize_execution_error(row.get(11)?),
        })
    }
}

/// A listing query: an ordered list of predicates, ANDed together in the
/// order they were added, with the parameters bound in the same order.
#[derive(Debug)]
pub struct AlertListQuery {
    filters: Vec<Box<dyn Filter>>,
    limit: Option<u32>,
}

impl AlertListQuery {
    const SQL_TEMPLATE: &str = "SELECT {select_list}
        FROM alert
        INNER JOIN dashboard ON dashboard.id = alert.dashboard_id{where_clause}
        ORDER BY alert.name ASC{limit_clause}";

    pub fn build(
        listing: &ListingFilters,
        permissions: &dyn DashboardPermissions,
    ) -> Result<Self, AlertSyncError> {
        let user = &listing.user;

        // Not an optional filter: non-admins never see other users' alerts
        let scope = if user.is_admin() {
            ScopeFilter::Org(user.org_id)
        } else {
            ScopeFilter::Owner(user.user_id)
        };

        let mut query = AlertListQuery {
            filters: Vec::new(),
            limit: listing.limit.filter(|limit| *limit > 0),
        };

        query.add_filter(scope);
        if let Some(name_filter) = NameFilter::new(&listing.query) {
            query.add_filter(name_filter);
        }
        if let Some(dashboard_filter) = DashboardIdFilter::new(&listing.dashboard_ids) {
            query.add_filter(dashboard_filter);
        }
        if let Some(panel_filter) = PanelIdFilter::new(listing.panel_id) {
            query.add_filter(panel_filter);
        }
        if let Some(state_filter) = StateFilter::from_tokens(&listing.states)? {
            query.add_filter(state_filter);
        }
        if !user.is_admin() {
            query
                .filters
                .push(permissions.dashboard_filter(user, PermissionType::View));
        }

        Ok(query)
    }

    fn add_filter<F>(&mut self, filter: F)
    where
        F: Filter + 'static,
    {
        self.filters.push(Box::new(filter));
    }

    pub fn build_sql(&self) -> Result<(String, Vec<Box<dyn ToSql>>), AlertSyncError> {
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();
        let mut where_clause = String::new();

        let mut first = true;
        for filter in &self.filters {
            match first {
                true => {
                    where_clause.push_str("\nWHERE ");
                    first = false;
                }
                false => where_clause.push_str("\nAND "),
            }

            let (pred_str, pred_vec) = filter.to_predicate_parts()?;
            where_clause.push_str(&pred_str);
            params_vec.extend(pred_vec);
        }

        let limit_clause = match self.limit {
            Some(limit) => {
                params_vec.push(Box::new(i64::from(limit)));
                "\nLIMIT ?"
            }
            None => "",
        };

        let sql = Self::SQL_TEMPLATE
            .replace("{select_list}", AlertListItem::COLUMNS)
            .replace("{where_clause}", &where_clause)
            .replace("{limit_clause}", limit_clause);

        Ok((sql, params_vec))
    }

    pub fn execute(&self, conn: &Connection) -> Result<Vec<AlertListItem>, AlertSyncError> {
        let (sql, params_vec) = self.build_sql()?;
        let sql_params: Vec<&dyn ToSql> = params_vec.iter().map(AsRef::as_ref).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(&sql_params[..], AlertListItem::from_row)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }
}
