mod alerts;
mod cli;
mod clock;
mod config;
mod dashboards;
mod database;
mod error;
mod permissions;
mod query;
mod reconcile;
mod schema;
mod service;
mod state_transition;
mod tags;

use cli::Cli;
use log::error;

fn main() {
    if let Err(err) = Cli::handle_command_line() {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
