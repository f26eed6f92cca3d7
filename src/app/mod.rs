mod episode;
mod extension;
mod host;
mod page;
mod plugin;
mod scheduler;
mod site;
mod source;
mod tracking;
mod tui;


use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::db::Database;
use crate::paths::database_file_path;
use crate::settings::{ResolvedSettings, resolve_settings};

use self::episode::{format_clock, format_last_watched_display, truncate};
use self::extension::{ExtensionApi, SqliteExtensionApi};
use self::host::{ConsoleIndicator, Host, load_scenario};
use self::plugin::WatchPlugin;
use self::site::{SiteProfile, build_profiles, profile_by_name, profile_for_url};
use self::tracking::load_progress_rows;

pub fn run(cli: Cli) -> Result<()> {
    let settings = resolve_settings(cli.config.as_deref())?;
    if let Some(path) = &settings.config_path {
        info!("using config {}", path.display());
    }
    let db = open_db(cli.db.as_deref())?;

    match cli.command {
        Some(Command::Replay { scenario }) => run_replay(&settings, db, &scenario)?,
        Some(Command::List { site }) => run_list(&db, site.as_deref())?,
        Some(Command::Forget { key }) => run_forget(db, &key)?,
        Some(Command::Sites) => run_sites(&settings),
        Some(Command::Tui) | None => tui::run_tui(&db)?,
    }

    Ok(())
}

fn run_replay(settings: &ResolvedSettings, db: Database, scenario_path: &Path) -> Result<()> {
    let scenario = load_scenario(scenario_path)?;
    let profiles = build_profiles(&settings.sites);
    let profile = match scenario.site.as_deref() {
        Some(name) => profile_by_name(&profiles, name)
            .cloned()
            .with_context(|| format!("unknown site profile `{name}`"))?,
        None => profile_for_url(&profiles, &scenario.url)
            .cloned()
            .unwrap_or_else(SiteProfile::generic),
    };
    let site_name = profile.name.clone();

    let (broadcast_tx, broadcast_rx) = mpsc::channel::<Value>();
    let plugin = WatchPlugin::new(profile, settings.tracker, Box::new(ConsoleIndicator::default()));
    let mut host = Host::new(
        plugin,
        &scenario.url,
        scenario.page,
        Duration::from_millis(scenario.timeupdate_ms),
    );
    host.load(Box::new(SqliteExtensionApi::new(db, Some(broadcast_tx))));
    host.replay(scenario.steps, Duration::from_millis(scenario.run_for_ms));
    let exhausted = host.plugin().discovery_exhausted();
    let elapsed = host.now();
    host.unload();

    let broadcasts: Vec<Value> = broadcast_rx.try_iter().collect();
    println!(
        "\nReplayed {} on `{site_name}`: {} progress updates saved.",
        format_clock(elapsed.as_secs_f64()),
        broadcasts.len()
    );
    if let Some(last) = broadcasts.last() {
        let key = last.get("key").and_then(Value::as_str).unwrap_or("-");
        let progress = last
            .pointer("/status/progress")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        println!("  Last: {key} at {progress:.1}%");
    } else if exhausted {
        println!("  No video source was found; the page was left untracked.");
    }
    Ok(())
}

fn run_list(db: &Database, site: Option<&str>) -> Result<()> {
    let rows = load_progress_rows(db, site)?;
    if rows.is_empty() {
        println!("No saved progress yet. Run `watchtrack replay <scenario.json>` first.");
        return Ok(());
    }

    println!(
        "{:<14} {:<32} {:<8} {:<9} {:<17} {:<24}",
        "SITE", "SERIES", "EP", "WATCHED", "POSITION", "LAST WATCHED"
    );
    for row in rows {
        println!(
            "{:<14} {:<32} {:<8} {:<9} {:<17} {:<24}",
            truncate(&row.site, 14),
            truncate(&row.record.series, 32),
            truncate(&row.episode_number, 8),
            format!(
                "{:.0}%{}",
                row.record.progress,
                if row.record.finished { " *" } else { "" }
            ),
            format!(
                "{} / {}",
                format_clock(row.record.current_time),
                format_clock(row.record.duration)
            ),
            format_last_watched_display(&row.record.last_watched)
        );
    }
    Ok(())
}

fn run_forget(db: Database, key: &str) -> Result<()> {
    let mut api = SqliteExtensionApi::new(db, None);
    if api.storage_remove(key)? {
        println!("Removed {key}.");
    } else {
        println!("No saved progress under {key}.");
    }
    Ok(())
}

fn run_sites(settings: &ResolvedSettings) {
    let profiles = build_profiles(&settings.sites);
    match &settings.config_path {
        Some(path) => println!("Config: {}", path.display()),
        None => println!("Config: none (built-in profiles only)"),
    }
    println!("{:<16} {:<36} {:<14} {:<30}", "NAME", "HOSTS", "PATH", "LOCATORS");
    for profile in profiles {
        println!(
            "{:<16} {:<36} {:<14} {:<30}",
            truncate(&profile.name, 16),
            truncate(&profile.hosts.join(","), 36),
            profile.path_prefix.as_deref().unwrap_or("-"),
            truncate(&profile.locators.join(" | "), 30)
        );
    }
}

fn open_db(path_override: Option<&Path>) -> Result<Database> {
    let db_path = database_file_path(path_override)?;
    let db = Database::open(&db_path)?;
    db.migrate()?;
    Ok(db)
}
