//! Command-line arguments for the `crew-roster` binary.

use crate::keys::{CrewId, LocationId, ShowId, TrackId};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "crew-roster")]
#[command(about = "Inspect and edit a crew roster window", long_about = None)]
pub struct RosterArgs {
    /// JSON session config; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base URL of the roster REST API
    #[arg(long, env = "ROSTER_URL")]
    pub server: Option<String>,

    #[arg(long, env = "ROSTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(short, long)]
    pub location: Option<LocationId>,

    /// First date of the window (YYYY-MM-DD); defaults to today
    #[arg(short, long)]
    pub start: Option<String>,

    /// Window length in days
    #[arg(long)]
    pub days: Option<u32>,

    #[command(subcommand)]
    pub command: RosterCommand,
}

#[derive(Subcommand, Debug)]
pub enum RosterCommand {
    /// Print the window as a grid
    Show {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Mark a crew member working, optionally on a track
    Assign {
        date: String,
        crew: CrewId,
        /// Show occurrence; omit for the date-level cell
        #[arg(long)]
        show: Option<ShowId>,
        #[arg(long)]
        track: Option<TrackId>,
    },
    /// Mark a crew member off
    Unassign {
        date: String,
        crew: CrewId,
        #[arg(long)]
        show: Option<ShowId>,
    },
    /// Set (or with no options, delete) a crew member's shift
    Shift {
        date: String,
        crew: CrewId,
        /// HH:MM
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Copy the previous window onto the current one
    CopyWeek,
    /// Turn everyone off for one date
    ClearDay { date: String },
}
