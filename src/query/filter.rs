use rusqlite::ToSql;
use std::fmt::Debug;

use crate::alerts::AlertState;
use crate::error::AlertSyncError;

/// Defines the behavior of a filter.
pub trait Filter: Debug {
    /// return predicate text and params, params in the order their `?` appear
    fn to_predicate_parts(&self) -> Result<(String, Vec<Box<dyn ToSql>>), AlertSyncError>;
}

/// The mandatory visibility clause. Admins see their org, everyone else only
/// the alerts they own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFilter {
    Org(i64),
    Owner(i64),
}

impl Filter for ScopeFilter {
    fn to_predicate_parts(&self) -> Result<(String, Vec<Box<dyn ToSql>>), AlertSyncError> {
        let (pred_str, id) = match self {
            ScopeFilter::Org(org_id) => ("alert.org_id = ?", *org_id),
            ScopeFilter::Owner(user_id) => ("alert.user_id = ?", *user_id),
        };
        let pred_vec: Vec<Box<dyn ToSql>> = vec![Box::new(id)];

        Ok((pred_str.to_owned(), pred_vec))
    }
}

/// Case-insensitive substring match on the alert name. The text is matched
/// as given, surrounding whitespace included.
///
/// Case folding is SQLite's built-in `lower()`, which only folds ASCII
/// letters: "cpu" finds "CPU" but "ä" does not find "Ä".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameFilter {
    text: String,
}

impl NameFilter {
    const ESCAPE: char = '\\';

    /// None when `text` is blank.
    pub fn new(text: &str) -> Option<Self> {
        if text.trim().is_empty() {
            return None;
        }
        Some(NameFilter {
            text: text.to_owned(),
        })
    }

    fn like_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.text.len() + 2);
        pattern.push('%');
        for c in self.text.chars() {
            if matches!(c, '%' | '_') || c == Self::ESCAPE {
                pattern.push(Self::ESCAPE);
            }
            pattern.push(c);
        }
        pattern.push('%');
        pattern
    }
}

impl Filter for NameFilter {
    fn to_predicate_parts(&self) -> Result<(String, Vec<Box<dyn ToSql>>), AlertSyncError> {
        let pred_str = format!("lower(alert.name) LIKE lower(?) ESCAPE '{}'", Self::ESCAPE);
        let pred_vec: Vec<Box<dyn ToSql>> = vec![Box::new(self.like_pattern())];

        Ok((pred_str, pred_vec))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardIdFilter {
    dashboard_ids: Vec<i64>,
}

impl DashboardIdFilter {
    /// None for an empty set, which means "no restriction".
    pub fn new(dashboard_ids: &[i64]) -> Option<Self> {
        if dashboard_ids.is_empty() {
            return None;
        }
        Some(DashboardIdFilter {
            dashboard_ids: dashboard_ids.to_vec(),
        })
    }
}

impl Filter for DashboardIdFilter {
    fn to_predicate_parts(&self) -> Result<(String, Vec<Box<dyn ToSql>>), AlertSyncError> {
        let pred_str = format!(
            "alert.dashboard_id IN (?{})",
            ",?".repeat(self.dashboard_ids.len() - 1)
        );
        let pred_vec: Vec<Box<dyn ToSql>> = self
            .dashboard_ids
            .iter()
            .map(|id| Box::new(*id) as Box<dyn ToSql>)
            .collect();

        Ok((pred_str, pred_vec))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelIdFilter {
    panel_id: i64,
}

impl PanelIdFilter {
    /// None for panel id 0, which means "any panel".
    pub fn new(panel_id: i64) -> Option<Self> {
        (panel_id != 0).then_some(PanelIdFilter { panel_id })
    }
}

impl Filter for PanelIdFilter {
    fn to_predicate_parts(&self) -> Result<(String, Vec<Box<dyn ToSql>>), AlertSyncError> {
        let pred_vec: Vec<Box<dyn ToSql>> = vec![Box::new(self.panel_id)];
        Ok(("alert.panel_id = ?".to_owned(), pred_vec))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSpec {
    pub state: AlertState,
    pub negated: bool,
}

/// OR-combined list of `state` / `not_state` tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFilter {
    state_specs: Vec<StateSpec>,
}

impl StateFilter {
    pub const ALL_TOKEN: &str = "all";
    pub const NEGATION_PREFIX: &str = "not_";

    /// Parses state tokens. Returns None when there is nothing to filter on:
    /// no tokens, or an `all` token anywhere in the list.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Option<Self>, AlertSyncError> {
        let mut state_specs = Vec::with_capacity(tokens.len());

        for token in tokens {
            let token = token.as_ref().trim();
            if token == Self::ALL_TOKEN {
                return Ok(None);
            }

            let (state_str, negated) = match token.strip_prefix(Self::NEGATION_PREFIX) {
                Some(rest) => (rest, true),
                None => (token, false),
            };

            let state = state_str.parse::<AlertState>().map_err(|_| {
                AlertSyncError::InvalidFilter(format!("Unknown state token: '{}'", token))
            })?;
            state_specs.push(StateSpec { state, negated });
        }

        if state_specs.is_empty() {
            return Ok(None);
        }

        Ok(Some(StateFilter { state_specs }))
    }
}

impl Filter for StateFilter {
    fn to_predicate_parts(&self) -> Result<(String, Vec<Box<dyn ToSql>>), AlertSyncError> {
        let mut pred_str = String::from("(");
        let mut pred_vec: Vec<Box<dyn ToSql>> = Vec::new();
        let mut first = true;

        for state_spec in &self.state_specs {
            match first {
                true => first = false,
                false => pred_str.push_str(" OR "),
            }

            match state_spec.negated {
                true => pred_str.push_str("alert.state <> ?"),
                false => pred_str.push_str("alert.state = ?"),
            }
            pred_vec.push(Box::new(state_spec.state.as_str()));
        }

        pred_str.push(')');

        Ok((pred_str, pred_vec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::types::{ToSqlOutput, Value};

    fn param_values(params: &[Box<dyn ToSql>]) -> Vec<Value> {
        params
            .iter()
            .map(|p| match p.to_sql().unwrap() {
                ToSqlOutput::Borrowed(v) => Value::from(v),
                ToSqlOutput::Owned(v) => v,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_scope_filter() {
        let (sql, params) = ScopeFilter::Org(3).to_predicate_parts().unwrap();
        assert_eq!(sql, "alert.org_id = ?");
        assert_eq!(param_values(&params), vec![Value::Integer(3)]);

        let (sql, params) = ScopeFilter::Owner(8).to_predicate_parts().unwrap();
        assert_eq!(sql, "alert.user_id = ?");
        assert_eq!(param_values(&params), vec![Value::Integer(8)]);
    }

    #[test]
    fn test_name_filter_escapes_wildcards() {
        assert!(NameFilter::new("   ").is_none());

        let filter = NameFilter::new("100%_cpu").unwrap();
        let (sql, params) = filter.to_predicate_parts().unwrap();
        assert_eq!(sql, "lower(alert.name) LIKE lower(?) ESCAPE '\\'");
        assert_eq!(
            param_values(&params),
            vec![Value::Text("%100\\%\\_cpu%".to_owned())]
        );
    }

    #[test]
    fn test_name_filter_keeps_surrounding_whitespace() {
        let (_, params) = NameFilter::new(" cpu ").unwrap().to_predicate_parts().unwrap();
        assert_eq!(param_values(&params), vec![Value::Text("% cpu %".to_owned())]);
    }

    #[test]
    fn test_dashboard_id_filter() {
        assert!(DashboardIdFilter::new(&[]).is_none());

        let (sql, params) = DashboardIdFilter::new(&[4, 5, 6])
            .unwrap()
            .to_predicate_parts()
            .unwrap();
        assert_eq!(sql, "alert.dashboard_id IN (?,?,?)");
        assert_eq!(
            param_values(&params),
            vec![Value::Integer(4), Value::Integer(5), Value::Integer(6)]
        );
    }

    #[test]
    fn test_panel_id_filter_zero_is_any() {
        assert!(PanelIdFilter::new(0).is_none());
        let (sql, _) = PanelIdFilter::new(2).unwrap().to_predicate_parts().unwrap();
        assert_eq!(sql, "alert.panel_id = ?");
    }

    #[test]
    fn test_state_filter_tokens() {
        let filter = StateFilter::from_tokens(&["alerting", "not_paused"])
            .unwrap()
            .unwrap();
        let (sql, params) = filter.to_predicate_parts().unwrap();

        assert_eq!(sql, "(alert.state = ? OR alert.state <> ?)");
        assert_eq!(
            param_values(&params),
            vec![
                Value::Text("alerting".to_owned()),
                Value::Text("paused".to_owned())
            ]
        );
    }

    #[test]
    fn test_state_filter_all_disables() {
        assert!(StateFilter::from_tokens(&["all"]).unwrap().is_none());
        assert!(StateFilter::from_tokens(&["ok", "all"]).unwrap().is_none());
        assert!(StateFilter::from_tokens::<&str>(&[]).unwrap().is_none());
    }

    #[test]
    fn test_state_filter_rejects_unknown_tokens() {
        let err = StateFilter::from_tokens(&["not_sleepy"]).unwrap_err();
        assert!(matches!(err, AlertSyncError::InvalidFilter(_)));
        assert!(StateFilter::from_tokens(&["not_"]).is_err());
    }
}
