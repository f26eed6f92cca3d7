use anyhow::Result;
use ratatui::widgets::TableState;

use crate::db::Database;

use super::super::tracking::{ProgressRow, load_progress_rows};
use super::TuiFilter;

pub(super) fn visible_rows(rows: &[ProgressRow], filter: TuiFilter) -> Vec<ProgressRow> {
    rows.iter()
        .filter(|row| filter.accepts(row))
        .cloned()
        .collect()
}

pub(super) fn refresh_items(
    db: &Database,
    filter: TuiFilter,
    items: &mut Vec<ProgressRow>,
    table_state: &mut TableState,
    preferred_key: Option<&str>,
) -> Result<()> {
    let rows = load_progress_rows(db, None)?;
    *items = visible_rows(&rows, filter);
    reselect(items, table_state, preferred_key);
    Ok(())
}

pub(super) fn reselect(items: &[ProgressRow], table_state: &mut TableState, preferred_key: Option<&str>) {
    if items.is_empty() {
        table_state.select(None);
        return;
    }

    if let Some(key) = preferred_key
        && let Some(idx) = items.iter().position(|item| item.key == key)
    {
        table_state.select(Some(idx));
        return;
    }

    match table_state.selected() {
        Some(selected) => table_state.select(Some(selected.min(items.len() - 1))),
        None => table_state.select(Some(0)),
    }
}

pub(super) fn status_info(msg: &str) -> String {
    format!("INFO: {msg}")
}

pub(super) fn status_error(msg: &str) -> String {
    format!("ERROR: {msg}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::tracking::{ProgressRecord, progress_key};

    fn row(episode: &str, progress: f64) -> ProgressRow {
        ProgressRow {
            key: progress_key("demo", "Show", episode),
            site: "demo".to_string(),
            episode_number: episode.to_string(),
            record: ProgressRecord {
                title: format!("Show Episode {episode}"),
                series: "Show".to_string(),
                progress,
                current_time: progress * 6.0,
                duration: 600.0,
                finished: progress >= 90.0,
                last_watched: "2026-01-02T03:04:05+00:00".to_string(),
                url: format!("https://demo.example/show/{episode}"),
            },
        }
    }

    #[test]
    fn filters_split_finished_and_in_progress() {
        let rows = vec![row("1", 100.0), row("2", 40.0), row("3", 91.0)];
        assert_eq!(visible_rows(&rows, TuiFilter::All).len(), 3);
        assert_eq!(visible_rows(&rows, TuiFilter::InProgress).len(), 1);
        assert_eq!(visible_rows(&rows, TuiFilter::Finished).len(), 2);
    }

    #[test]
    fn reselect_prefers_key_then_clamps() {
        let rows = vec![row("1", 10.0), row("2", 20.0)];
        let mut state = TableState::default();
        reselect(&rows, &mut state, Some(&progress_key("demo", "Show", "2")));
        assert_eq!(state.selected(), Some(1));

        state.select(Some(5));
        reselect(&rows, &mut state, None);
        assert_eq!(state.selected(), Some(1));

        reselect(&[], &mut state, None);
        assert_eq!(state.selected(), None);
    }

    #[test]
    fn refresh_reads_from_the_database() {
        let db = Database::open_in_memory().expect("db");
        let stored = row("4", 55.0);
        db.set(
            &stored.key,
            &serde_json::to_string(&stored.record).expect("encode"),
        )
        .expect("set");
        let mut items = Vec::new();
        let mut state = TableState::default();
        refresh_items(&db, TuiFilter::All, &mut items, &mut state, None).expect("refresh");
        assert_eq!(items, vec![stored]);
        assert_eq!(state.selected(), Some(0));
    }
}
