use anyhow::Result;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use super::Status;
use crate::db::Database;

const PROGRESS_INFIX: &str = "_progress_";

/// What is persisted under a progress key and broadcast to other extension contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProgressRecord {
    pub(crate) title: String,
    pub(crate) series: String,
    pub(crate) progress: f64,
    pub(crate) current_time: f64,
    pub(crate) duration: f64,
    pub(crate) finished: bool,
    /// RFC 3339.
    pub(crate) last_watched: String,
    pub(crate) url: String,
}

impl ProgressRecord {
    pub(crate) fn from_status(status: &Status, url: &str, at: DateTime<Utc>) -> Self {
        Self {
            title: status.title.clone(),
            series: status.series.clone(),
            progress: status.progress,
            current_time: status.current_time,
            duration: status.duration,
            finished: status.finished,
            last_watched: at.to_rfc3339(),
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProgressKey {
    pub(crate) site: String,
    pub(crate) series: String,
    pub(crate) episode_number: String,
}

pub(crate) fn progress_key(site: &str, series: &str, episode_number: &str) -> String {
    format!("{site}{PROGRESS_INFIX}{series}_{episode_number}")
}

/// Inverse of [`progress_key`]. The episode label never contains `_`, the series may.
pub(crate) fn parse_progress_key(key: &str) -> Option<ProgressKey> {
    let (site, rest) = key.split_once(PROGRESS_INFIX)?;
    let (series, episode_number) = rest.rsplit_once('_')?;
    if site.is_empty() || series.is_empty() || episode_number.is_empty() {
        return None;
    }
    Some(ProgressKey {
        site: site.to_string(),
        series: series.to_string(),
        episode_number: episode_number.to_string(),
    })
}

/// A stored record together with the key parts it was saved under.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProgressRow {
    pub(crate) key: String,
    pub(crate) site: String,
    pub(crate) episode_number: String,
    pub(crate) record: ProgressRecord,
}

/// Progress rows, most recently updated first. Unreadable records are skipped with a warning.
pub(crate) fn load_progress_rows(db: &Database, site: Option<&str>) -> Result<Vec<ProgressRow>> {
    let mut rows = Vec::new();
    for entry in db.list_matching(PROGRESS_INFIX)? {
        let Some(parsed) = parse_progress_key(&entry.key) else {
            continue;
        };
        if site.is_some_and(|site| !parsed.site.eq_ignore_ascii_case(site)) {
            continue;
        }
        match serde_json::from_str::<ProgressRecord>(&entry.value) {
            Ok(record) => rows.push(ProgressRow {
                key: entry.key,
                site: parsed.site,
                episode_number: parsed.episode_number,
                record,
            }),
            Err(err) => warn!("skipping unreadable progress record {}: {err}", entry.key),
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_parses_back_even_with_underscores_in_series() {
        let key = progress_key("animeplay", "Steins_Gate", "12");
        assert_eq!(key, "animeplay_progress_Steins_Gate_12");
        let parsed = parse_progress_key(&key).expect("key should parse");
        assert_eq!(parsed.site, "animeplay");
        assert_eq!(parsed.series, "Steins_Gate");
        assert_eq!(parsed.episode_number, "12");
    }

    #[test]
    fn unrelated_keys_do_not_parse() {
        assert!(parse_progress_key("settings_theme").is_none());
        assert!(parse_progress_key("_progress_Show_1").is_none());
    }

    fn record(progress: f64) -> ProgressRecord {
        ProgressRecord {
            title: "Show Episode 1".to_string(),
            series: "Show".to_string(),
            progress,
            current_time: progress * 6.0,
            duration: 600.0,
            finished: progress >= 90.0,
            last_watched: "2026-01-02T03:04:05+00:00".to_string(),
            url: "https://site.example/show/1".to_string(),
        }
    }

    #[test]
    fn load_progress_rows_filters_by_site_and_skips_garbage() {
        let db = Database::open_in_memory().expect("db");
        let raw = |record: &ProgressRecord| serde_json::to_string(record).expect("encode");
        db.set(&progress_key("alpha", "Show", "1"), &raw(&record(40.0)))
            .expect("set");
        db.set(&progress_key("beta", "Show", "2"), &raw(&record(95.0)))
            .expect("set");
        db.set(&progress_key("alpha", "Show", "3"), "{\"progress\": 1}")
            .expect("set");
        db.set("alpha_settings", "{}").expect("set");

        let all = load_progress_rows(&db, None).expect("rows");
        assert_eq!(all.len(), 2);

        let alpha = load_progress_rows(&db, Some("ALPHA")).expect("rows");
        assert_eq!(alpha.len(), 1);
        assert_eq!(alpha[0].site, "alpha");
        assert_eq!(alpha[0].episode_number, "1");
        assert_eq!(alpha[0].record.progress, 40.0);
    }

    #[test]
    fn record_serializes_with_camel_case_fields() {
        let status = Status {
            title: "Ep 1".to_string(),
            series: "Show".to_string(),
            episode_number: "1".to_string(),
            progress: 50.0,
            finished: false,
            current_time: 300.0,
            duration: 600.0,
        };
        let at = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        let record = ProgressRecord::from_status(&status, "https://site.example/ep-1", at);
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["currentTime"], 300.0);
        assert_eq!(value["lastWatched"], "2026-01-02T03:04:05+00:00");
        assert_eq!(value["finished"], false);
    }
}
