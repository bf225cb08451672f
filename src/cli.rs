use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use flexi_logger::{Logger, LoggerHandle};
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;

use crate::alerts::{AlertInput, AlertState};
use crate::clock::SystemClock;
use crate::config::{Config, CONFIG};
use crate::dashboards::{AclSubject, Dashboards};
use crate::database::Database;
use crate::error::AlertSyncError;
use crate::permissions::{AclPermissions, OrgRole, PermissionType, SignedInUser};
use crate::query::ListingFilters;
use crate::service::AlertService;

#[derive(Parser)]
#[command(
    name = "alertsync",
    version,
    about = "AlertSync: per-user dashboard alert store"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the data directory)
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Database file (overrides the configured path)
    #[arg(long = "dbpath", short = 'd', global = true)]
    pub dbpath: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Make a user's alerts on a dashboard match a JSON file of desired alerts
    Reconcile {
        #[arg(long = "dashboard")]
        dashboard: i64,

        /// Acting user
        #[arg(long = "user")]
        user: i64,

        /// JSON array of desired alerts
        #[arg(long = "file", short = 'f')]
        file: PathBuf,
    },

    /// Record an evaluation result for one alert
    #[command(name = "set-state")]
    SetState {
        #[arg(long = "alert")]
        alert: i64,

        /// One of: unknown, ok, alerting, no_data, pending, paused
        #[arg(long = "state")]
        state: String,

        /// Execution error; empty clears the stored error
        #[arg(long = "error", default_value = "")]
        error: String,

        /// Evaluation payload as JSON
        #[arg(long = "eval-data")]
        eval_data: Option<String>,
    },

    /// Pause alerts (all alerts when no ids are given)
    Pause {
        #[arg(long = "ids", value_delimiter = ',')]
        ids: Vec<i64>,

        /// Resume instead of pausing
        #[arg(long = "resume", default_value_t = false)]
        resume: bool,
    },

    /// List the alerts a user may see
    List(ListArgs),

    /// Show one alert
    Get {
        #[arg(long = "alert")]
        alert: i64,
    },

    /// Show every alert, or every alert on one dashboard
    Alerts {
        #[arg(long = "dashboard")]
        dashboard: Option<i64>,
    },

    /// Show a user's alert states on a dashboard
    #[command(name = "dashboard-states")]
    DashboardStates {
        #[arg(long = "org")]
        org: i64,

        #[arg(long = "dashboard")]
        dashboard: i64,

        #[arg(long = "user")]
        user: i64,
    },

    /// Create a dashboard
    #[command(name = "add-dashboard")]
    AddDashboard {
        #[arg(long = "org")]
        org: i64,

        #[arg(long = "uid")]
        uid: String,

        #[arg(long = "title")]
        title: String,
    },

    /// Grant a user or a role access to a dashboard
    Grant {
        #[arg(long = "dashboard")]
        dashboard: i64,

        #[arg(long = "user", conflicts_with = "role", required_unless_present = "role")]
        user: Option<i64>,

        #[arg(long = "role")]
        role: Option<String>,

        #[arg(
            long = "permission",
            value_parser = clap::builder::PossibleValuesParser::new(["view", "edit", "admin"]),
            default_value = "view"
        )]
        permission: String,
    },

    /// Delete a dashboard and every alert on it
    #[command(name = "delete-dashboard")]
    DeleteDashboard {
        #[arg(long = "dashboard")]
        dashboard: i64,
    },
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long = "user")]
    pub user: i64,

    #[arg(long = "org")]
    pub org: i64,

    #[arg(long = "role", default_value = "viewer")]
    pub role: String,

    /// Case-insensitive name substring
    #[arg(long = "query", short = 'q', default_value = "")]
    pub query: String,

    #[arg(long = "dashboard", value_delimiter = ',')]
    pub dashboards: Vec<i64>,

    #[arg(long = "panel", default_value_t = 0)]
    pub panel: i64,

    /// State tokens: a state, not_<state>, or all
    #[arg(long = "state", value_delimiter = ',')]
    pub states: Vec<String>,

    #[arg(long = "limit")]
    pub limit: Option<u32>,
}

impl ListArgs {
    fn to_filters(&self) -> Result<ListingFilters, AlertSyncError> {
        let user = SignedInUser {
            org_id: self.org,
            user_id: self.user,
            role: self.role.parse::<OrgRole>()?,
        };

        Ok(ListingFilters {
            query: self.query.clone(),
            dashboard_ids: self.dashboards.clone(),
            panel_id: self.panel,
            states: self.states.clone(),
            limit: self.limit,
            ..ListingFilters::for_user(user)
        })
    }
}

impl Cli {
    pub fn handle_command_line() -> Result<(), AlertSyncError> {
        let args = Cli::parse();

        let project_dirs = ProjectDirs::from("", "", "alertsync").ok_or_else(|| {
            AlertSyncError::Error("Could not determine project directories".to_string())
        })?;

        let config = CONFIG.get_or_init(|| {
            let mut config = Config::load_config(&project_dirs, args.config.as_deref());
            if let Some(dbpath) = &args.dbpath {
                config.database.set_path(dbpath.clone());
            }
            config
        });

        let _logger = Self::start_logger(config)?;
        debug!(
            "Command-line args: {:?}",
            std::env::args_os().collect::<Vec<_>>()
        );

        fs::create_dir_all(project_dirs.data_local_dir())?;
        let db_path = config.database.db_path(project_dirs.data_local_dir());
        let db = Database::open(&db_path, &config.database)?;
        let service = AlertService::new(db, Box::new(SystemClock), Box::new(AclPermissions));

        Self::run(&service, args.command)
    }

    fn start_logger(config: &Config) -> Result<LoggerHandle, AlertSyncError> {
        Logger::try_with_str(config.logging.log_spec())
            .and_then(|logger| logger.start())
            .map_err(|e| AlertSyncError::Error(format!("Failed to start logger: {}", e)))
    }

    fn run(service: &AlertService, command: Command) -> Result<(), AlertSyncError> {
        match command {
            Command::Reconcile {
                dashboard,
                user,
                file,
            } => {
                let contents = fs::read_to_string(&file)?;
                let desired: Vec<AlertInput> = serde_json::from_str(&contents)?;
                info!(
                    "Reconciling {} desired alert(s) from {}",
                    desired.len(),
                    file.display()
                );
                Self::print_json(&service.reconcile(dashboard, &desired, user)?)
            }
            Command::SetState {
                alert,
                state,
                error,
                eval_data,
            } => {
                let new_state = state.parse::<AlertState>()?;
                let eval_data = eval_data
                    .as_deref()
                    .map(serde_json::from_str::<Value>)
                    .transpose()?;
                Self::print_json(&service.set_state(alert, new_state, eval_data.as_ref(), &error)?)
            }
            Command::Pause { ids, resume } => {
                let count = service.set_paused(&ids, !resume)?;
                Self::print_json(&serde_json::json!({ "alerts_affected": count }))
            }
            Command::List(list_args) => {
                Self::print_json(&service.list_alerts(&list_args.to_filters()?)?)
            }
            Command::Get { alert } => {
                let alert = service.get_alert_by_id(alert)?;
                let tags = service.get_alert_tags(alert.id)?;
                Self::print_json(&serde_json::json!({ "alert": alert, "tags": tags }))
            }
            Command::Alerts { dashboard } => match dashboard {
                Some(dashboard_id) => {
                    Self::print_json(&service.get_alerts_for_dashboard(dashboard_id)?)
                }
                None => Self::print_json(&service.get_all_alerts()?),
            },
            Command::DashboardStates {
                org,
                dashboard,
                user,
            } => Self::print_json(&service.get_alert_states_for_dashboard(org, dashboard, user)?),
            Command::AddDashboard { org, uid, title } => {
                let dashboard_id =
                    service.with_transaction(|c| Dashboards::insert(c, org, &uid, &title))?;
                Self::print_json(&serde_json::json!({ "dashboard_id": dashboard_id }))
            }
            Command::Grant {
                dashboard,
                user,
                role,
                permission,
            } => {
                let subject = match (user, role) {
                    (Some(user_id), _) => AclSubject::User(user_id),
                    (None, Some(role)) => AclSubject::Role(role.parse::<OrgRole>()?),
                    (None, None) => {
                        return Err(AlertSyncError::Error(
                            "Either --user or --role is required".to_string(),
                        ))
                    }
                };
                let permission = match permission.as_str() {
                    "admin" => PermissionType::Admin,
                    "edit" => PermissionType::Edit,
                    _ => PermissionType::View,
                };
                service.with_transaction(|c| Dashboards::grant(c, dashboard, subject, permission))
            }
            Command::DeleteDashboard { dashboard } => {
                let count = service.delete_dashboard(dashboard)?;
                Self::print_json(&serde_json::json!({ "alerts_deleted": count }))
            }
        }
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AlertSyncError> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_requires_command() {
        let result = Cli::try_parse_from(["alertsync"]);
        assert!(result.is_err(), "Should require a command");
    }

    #[test]
    fn test_cli_parsing_reconcile() {
        let cli = Cli::try_parse_from([
            "alertsync",
            "--dbpath",
            "/tmp/a.db",
            "reconcile",
            "--dashboard",
            "3",
            "--user",
            "7",
            "-f",
            "alerts.json",
        ])
        .unwrap();

        assert_eq!(cli.dbpath.as_deref(), Some("/tmp/a.db"));
        match cli.command {
            Command::Reconcile {
                dashboard,
                user,
                file,
            } => {
                assert_eq!((dashboard, user), (3, 7));
                assert_eq!(file, PathBuf::from("alerts.json"));
            }
            _ => panic!("expected reconcile"),
        }
    }

    #[test]
    fn test_cli_parsing_pause_ids_and_resume() {
        let cli = Cli::try_parse_from(["alertsync", "pause", "--ids", "1,2,3"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Pause { ref ids, resume: false } if ids == &vec![1, 2, 3]
        ));

        let cli = Cli::try_parse_from(["alertsync", "pause", "--resume"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Pause { ref ids, resume: true } if ids.is_empty()
        ));
    }

    #[test]
    fn test_cli_list_args_to_filters() {
        let cli = Cli::try_parse_from([
            "alertsync",
            "list",
            "--user",
            "5",
            "--org",
            "2",
            "--role",
            "Admin",
            "--dashboard",
            "4,9",
            "--state",
            "alerting,not_paused",
            "--limit",
            "20",
        ])
        .unwrap();

        let Command::List(list_args) = cli.command else {
            panic!("expected list");
        };
        let filters = list_args.to_filters().unwrap();

        assert!(filters.user.is_admin());
        assert_eq!(filters.user.org_id, 2);
        assert_eq!(filters.dashboard_ids, vec![4, 9]);
        assert_eq!(filters.states, vec!["alerting", "not_paused"]);
        assert_eq!(filters.panel_id, 0);
        assert_eq!(filters.limit, Some(20));
    }

    #[test]
    fn test_cli_list_rejects_unknown_role() {
        let cli = Cli::try_parse_from([
            "alertsync", "list", "--user", "5", "--org", "2", "--role", "owner",
        ])
        .unwrap();

        let Command::List(list_args) = cli.command else {
            panic!("expected list");
        };
        assert!(list_args.to_filters().is_err());
    }

    #[test]
    fn test_cli_grant_requires_subject() {
        let result = Cli::try_parse_from(["alertsync", "grant", "--dashboard", "1"]);
        assert!(result.is_err());

        let result = Cli::try_parse_from([
            "alertsync", "grant", "--dashboard", "1", "--user", "2", "--role", "editor",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parsing_invalid_arguments() {
        let result = Cli::try_parse_from(["alertsync", "nonexistent-command"]);
        assert!(result.is_err(), "Should reject unknown commands");

        let result = Cli::try_parse_from(["alertsync", "get", "--invalid-flag"]);
        assert!(result.is_err(), "Should reject unknown flags on get");
    }
}
