//! crew-roster: inspect and edit one roster window from the command line
//!
//! Usage:
//!   crew-roster --location 3 show                     # Text grid for this week
//!   crew-roster -l 3 -s 2024-01-01 show --json        # JSON dump of the window
//!   crew-roster -l 3 assign 2024-01-02 17 --show 40 --track 2
//!   crew-roster -l 3 shift 2024-01-02 17 --start 09:00 --end 17:30
//!   crew-roster -l 3 copy-week                        # Replay last week

use chrono::NaiveDate;
use clap::Parser;
use crew_roster::cli::{RosterArgs, RosterCommand};
use crew_roster::keys::{normalize_time, parse_date};
use crew_roster::{RestGateway, RosterSession, SessionConfig, SessionError};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Serialize)]
struct DayView {
    date: NaiveDate,
    shows: Vec<crew_roster::ShowInstance>,
    cells: Vec<CellView>,
}

#[derive(Serialize)]
struct CellView {
    crew_id: u64,
    show_id: Option<u64>,
    track_id: Option<u32>,
}

fn date_arg(value: &str) -> Result<NaiveDate, SessionError> {
    parse_date(value).ok_or_else(|| SessionError::InvalidInput(format!("bad date: {}", value)))
}

fn time_arg(value: Option<String>) -> Result<Option<chrono::NaiveTime>, SessionError> {
    match value {
        None => Ok(None),
        Some(text) => normalize_time(&Value::String(text.clone()))
            .map(Some)
            .ok_or_else(|| SessionError::InvalidInput(format!("bad time: {}", text))),
    }
}

#[tokio::main]
async fn main() {
    let args = RosterArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match args.config {
        Some(ref path) => match SessionConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("[roster] Failed to load config {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => SessionConfig::new(0),
    };
    if let Some(location) = args.location {
        config.location_id = location;
    }
    if let Some(ref server) = args.server {
        config.gateway.base_url = server.clone();
    }
    if args.api_key.is_some() {
        config.gateway.api_key = args.api_key.clone();
    }
    if let Some(days) = args.days {
        config.range_length = days;
    }
    if config.location_id == 0 {
        tracing::error!("[roster] No location given (--location or config file)");
        std::process::exit(2);
    }

    let start = match args.start {
        Some(ref s) => match date_arg(s) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!("[roster] {}", e);
                std::process::exit(2);
            }
        },
        None => chrono::Local::now().date_naive(),
    };

    let gateway = match RestGateway::new(&config.gateway) {
        Ok(g) => g,
        Err(e) => {
            tracing::error!("[roster] Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        "[roster] Location {} via {}",
        config.location_id,
        config.gateway.base_url
    );

    let session = RosterSession::open(config, Arc::new(gateway), start).await;
    let errors = session.slice_errors().await;
    if errors.any() {
        tracing::warn!("[roster] Some slices failed to load: {:?}", errors);
    }

    if let Err(e) = run(&session, args.command).await {
        tracing::error!("[roster] {}", e);
        session.close().await;
        std::process::exit(1);
    }

    let status = session.close().await;
    if status.save_paused {
        tracing::error!(
            "[roster] Saving paused with {} unsaved write(s): {}",
            status.pending_writes,
            status.save_error.unwrap_or_default()
        );
        std::process::exit(1);
    }
}

async fn run(session: &RosterSession, command: RosterCommand) -> Result<(), SessionError> {
    match command {
        RosterCommand::Show { json } => show(session, json).await,
        RosterCommand::Assign {
            date,
            crew,
            show,
            track,
        } => {
            let date = date_arg(&date)?;
            let assignment = match track {
                Some(track) => session.assign_crew_to_track(date, crew, show, track).await?,
                None => session.set_working_for(date, crew, show, true).await?,
            };
            println!("{} crew {} working, track {:?}", date, crew, assignment.track_id);
            Ok(())
        }
        RosterCommand::Unassign { date, crew, show } => {
            let date = date_arg(&date)?;
            session.set_working_for(date, crew, show, false).await?;
            println!("{} crew {} off", date, crew);
            Ok(())
        }
        RosterCommand::Shift {
            date,
            crew,
            start,
            end,
            description,
        } => {
            let date = date_arg(&date)?;
            let shift = session
                .set_shift_for(date, crew, time_arg(start)?, time_arg(end)?, description)
                .await?;
            if shift.is_empty() {
                println!("{} crew {} shift removed", date, crew);
            } else {
                println!("{} crew {} shift {:?}", date, crew, shift);
            }
            Ok(())
        }
        RosterCommand::CopyWeek => {
            let report = session.copy_previous_week().await?;
            println!(
                "Copied {} assignment(s), {} shift(s); skipped {}",
                report.assignments, report.shifts, report.skipped
            );
            Ok(())
        }
        RosterCommand::ClearDay { date } => {
            let date = date_arg(&date)?;
            let cleared = session.clear_day(date).await?;
            println!("Cleared {} cell(s) on {}", cleared, date);
            Ok(())
        }
    }
}

async fn show(session: &RosterSession, json: bool) -> Result<(), SessionError> {
    let crew = session.crew().await;
    let mut days = Vec::new();
    for date in session.dates().await {
        let shows = session.shows_for_date(date).await;
        let show_ids: Vec<Option<u64>> = if shows.is_empty() {
            vec![None]
        } else {
            shows.iter().map(|s| Some(s.id)).collect()
        };
        let mut cells = Vec::new();
        for member in &crew {
            for show_id in &show_ids {
                if session.is_working(date, member.id, *show_id).await {
                    cells.push(CellView {
                        crew_id: member.id,
                        show_id: *show_id,
                        track_id: session.track_id(date, member.id, *show_id).await,
                    });
                }
            }
        }
        days.push(DayView { date, shows, cells });
    }

    if json {
        let out = serde_json::json!({ "crew": crew, "days": days });
        match serde_json::to_string_pretty(&out) {
            Ok(text) => println!("{}", text),
            Err(e) => return Err(SessionError::InvalidInput(e.to_string())),
        }
        return Ok(());
    }

    for day in &days {
        println!("{} ({})", day.date, day.date.format("%a"));
        for show in &day.shows {
            let time = show
                .time
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_else(|| "--:--".to_string());
            println!("  show {} at {}", show.id, time);
        }
        for member in &crew {
            let working: Vec<String> = day
                .cells
                .iter()
                .filter(|c| c.crew_id == member.id)
                .map(|c| match (c.show_id, c.track_id) {
                    (Some(s), Some(t)) => format!("{}#{}", s, t),
                    (Some(s), None) => s.to_string(),
                    (None, Some(t)) => format!("day#{}", t),
                    (None, None) => "day".to_string(),
                })
                .collect();
            let shift = session.shift(day.date, member.id).await;
            if working.is_empty() && shift.is_none() {
                continue;
            }
            let shift_label = shift
                .map(|s| {
                    format!(
                        "{}-{} {}",
                        s.start.map(|t| t.format("%H:%M").to_string()).unwrap_or_default(),
                        s.end.map(|t| t.format("%H:%M").to_string()).unwrap_or_default(),
                        s.day_description.unwrap_or_default()
                    )
                })
                .unwrap_or_default();
            let off = if session.is_day_off(day.date, member.id).await {
                " (day off)"
            } else {
                ""
            };
            println!(
                "    {:<20} {:<24} {}{}",
                member.name,
                working.join(","),
                shift_label.trim(),
                off
            );
        }
    }
    Ok(())
}
