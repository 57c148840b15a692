pub mod models {
    pub mod timetable;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
}
pub mod parser;
pub mod schema;
pub mod services {
    pub mod seed;
    pub mod snapshot;
    pub mod sync;
    pub mod timeline;
}

use crate::client::TimetableClient;
use crate::config::Config;
use crate::services::snapshot::AvailabilityError;
use crate::services::{seed, snapshot, sync, timeline};
use diesel::PgConnection;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{debug, error, info};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const USAGE: &str = "usage: freerooms [--env-file PATH] [snapshot BUILDING [DATE [TIME]] | schedule BUILDING [DATE]]";

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

/// One full pass over the allow-list: sync each building and, when its feed
/// changed, regenerate its timelines from the handed-off events. Per-building
/// failures are logged and absorbed; the next pass retries.
fn run_sync_pass(conn: &mut PgConnection, client: Option<&TimetableClient>, cfg: &Config) {
    for code in &cfg.allowed_buildings {
        let outcome = match sync::sync_building(conn, client, code) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Sync: {}: {}", code, e);
                continue;
            }
        };
        if !outcome.changed {
            continue;
        }
        if outcome.processed == 0 {
            info!("Timeline: {}: feed changed but holds no usable events; keeping timeline", code);
            continue;
        }
        if let Err(e) = timeline::generate_for_building(conn, cfg, client, code, Some(outcome.events)) {
            error!("Timeline: {}: {}", code, e);
        }
    }
}

/// Steady-cadence sync loop, ticking only inside the configured local-time
/// window.
fn run_sync_loop(conn: &mut PgConnection, client: Option<&TimetableClient>, cfg: &Config) -> ! {
    loop {
        let tick_start = Instant::now();

        let local_time = snapshot::current_local_moment(cfg.timezone).time();
        if local_time >= cfg.sync_window_start && local_time < cfg.sync_window_end {
            run_sync_pass(conn, client, cfg);
        } else {
            debug!("Sync loop: outside active window; tick skipped");
        }

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < cfg.sync_interval {
            thread::sleep(cfg.sync_interval - elapsed);
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| format!("render output failed: {}", e))?;
    println!("{}", rendered);
    Ok(())
}

fn is_not_available(err: &AvailabilityError) -> bool {
    matches!(
        err,
        AvailabilityError::UnknownBuilding(_) | AvailabilityError::NoSchedule { .. }
    )
}

/// Print the state of every room of `building` at the (optionally supplied)
/// moment. A building that has never produced a timeline gets one on-demand
/// sync attempt before the miss is surfaced.
fn run_snapshot_command(
    conn: &mut PgConnection,
    cfg: &Config,
    client: Option<&TimetableClient>,
    building: &str,
    date: Option<&str>,
    time: Option<&str>,
) -> Result<(), String> {
    if !cfg.is_building_allowed(building) {
        return Err(format!("building {} is not in the configured allow-list", building));
    }
    match snapshot::snapshots_at(conn, cfg, building, date, time) {
        Ok(snaps) => print_json(&snaps),
        Err(e) if is_not_available(&e) => {
            info!("Query: {}: {}; attempting on-demand sync", building, e);
            timeline::generate_for_building(conn, cfg, client, building, None)?;
            let snaps = snapshot::snapshots_at(conn, cfg, building, date, time).map_err(|e| e.to_string())?;
            print_json(&snaps)
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Print the full generated day schedule of `building`, ordered by floor,
/// room number and slot start.
fn run_schedule_command(
    conn: &mut PgConnection,
    cfg: &Config,
    client: Option<&TimetableClient>,
    building: &str,
    date: Option<&str>,
) -> Result<(), String> {
    if !cfg.is_building_allowed(building) {
        return Err(format!("building {} is not in the configured allow-list", building));
    }
    let now = snapshot::current_local_moment(cfg.timezone);
    let day = snapshot::resolve_query_moment(date, None, cfg.day_window_start, now).date();
    match snapshot::day_schedule_entries(conn, building, day) {
        Ok(entries) => print_json(&entries),
        Err(e) if is_not_available(&e) => {
            info!("Query: {}: {}; attempting on-demand sync", building, e);
            timeline::generate_for_building(conn, cfg, client, building, None)?;
            let entries = snapshot::day_schedule_entries(conn, building, day).map_err(|e| e.to_string())?;
            print_json(&entries)
        }
        Err(e) => Err(e.to_string()),
    }
}

pub fn run(command: &[String]) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (buildings={}, timezone={}, day_window={}-{}, sync_interval={}s, loop_enabled={}, feed_configured={})",
        cfg.allowed_buildings.join(","),
        cfg.timezone,
        cfg.day_window_start.format("%H:%M"),
        cfg.day_window_end.format("%H:%M"),
        cfg.sync_interval.as_secs(),
        cfg.sync_loop_enabled,
        cfg.timetable_base_url.is_some()
    );

    // 2) Connect DB
    let mut conn = PgConnection::establish(&cfg.database_url).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database");

    // 3) Apply pending database migrations
    apply_database_migrations(&mut conn)?;

    // 4) Init feed client
    let client = cfg
        .timetable_base_url
        .as_ref()
        .map(|base| TimetableClient::new(base.clone(), cfg.request_timeout));

    // 5) One-off query commands
    match command {
        [] => {}
        [cmd, building, rest @ ..] if cmd == "snapshot" && rest.len() <= 2 => {
            return run_snapshot_command(
                &mut conn,
                &cfg,
                client.as_ref(),
                building,
                rest.first().map(String::as_str),
                rest.get(1).map(String::as_str),
            );
        }
        [cmd, building, rest @ ..] if cmd == "schedule" && rest.len() <= 1 => {
            return run_schedule_command(
                &mut conn,
                &cfg,
                client.as_ref(),
                building,
                rest.first().map(String::as_str),
            );
        }
        _ => return Err(USAGE.to_string()),
    }

    // 6) Optional deterministic demo schedule
    if cfg.seed_demo_data {
        let today = snapshot::current_local_moment(cfg.timezone).date();
        seed::run(&mut conn, &cfg, today)?;
    }

    // 7) Sync: single pass (cron mode) or steady loop
    if cfg.sync_loop_enabled {
        info!(
            "Starting sync loop: buildings={}, interval={}s, active {}-{}",
            cfg.allowed_buildings.len(),
            cfg.sync_interval.as_secs(),
            cfg.sync_window_start.format("%H:%M"),
            cfg.sync_window_end.format("%H:%M")
        );
        run_sync_loop(&mut conn, client.as_ref(), &cfg);
    } else {
        info!("Sync loop disabled via SYNC_LOOP_ENABLED; running a single pass");
        run_sync_pass(&mut conn, client.as_ref(), &cfg);
    }

    Ok(())
}

#[derive(Debug)]
struct CliArgs {
    env_file: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_cli_args() -> Result<CliArgs, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;
    let mut command = Vec::new();
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                env_file = Some(PathBuf::from(&s["--env-file=".len()..]));
            }
            Some(s) if s.starts_with("--") => return Err(format!("unrecognised argument: {}\n{}", s, USAGE)),
            Some(s) => command.push(s.to_string()),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    Ok(CliArgs { env_file, command })
}

fn configure_env(cli_env_file: Option<&Path>) -> Result<Option<PathBuf>, String> {
    match cli_env_file {
        Some(path) => {
            if !path.is_file() {
                return Err(format!("env file not found: {}", path.display()));
            }
            load_env_file(path)?;
            Ok(Some(path.to_path_buf()))
        }
        None => {
            let default_path = PathBuf::from(".env");
            if default_path.is_file() {
                load_env_file(&default_path)?;
                Ok(Some(default_path))
            } else {
                Ok(None)
            }
        }
    }
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let contents = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;

    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| format!("{}:{}: missing '=' in assignment", path.display(), index + 1))?;
        let key = key.trim();
        if key.is_empty() || key.chars().any(|c| c.is_whitespace()) {
            return Err(format!("{}:{}: invalid variable name", path.display(), index + 1));
        }

        let value = value.trim();
        let value = if (value.starts_with('"') && value.ends_with('"') && value.len() >= 2)
            || (value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2)
        {
            &value[1..value.len() - 1]
        } else {
            value.split('#').next().unwrap_or_default().trim_end()
        };

        // Values already supplied via the process environment win.
        if std::env::var_os(key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }

    Ok(())
}

fn main() {
    let cli = match parse_cli_args() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let loaded_env = match configure_env(cli.env_file.as_deref()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(path) = loaded_env.as_ref() {
        info!("Environment loaded from .env file: {}", path.display());
    }

    info!(
        "freerooms {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(&cli.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
