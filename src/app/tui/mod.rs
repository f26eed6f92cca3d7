mod actions;
mod render;
mod session;

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::TableState;

use crate::db::Database;

use super::episode::{format_clock, format_last_watched_display, truncate};
use super::tracking::ProgressRow;

use self::actions::{refresh_items, status_error, status_info};
use self::render::draw_tui;
use self::session::TuiSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TuiFilter {
    All,
    InProgress,
    Finished,
}

impl TuiFilter {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::InProgress => "IN PROGRESS",
            Self::Finished => "FINISHED",
        }
    }

    pub(crate) fn move_left(self) -> Self {
        match self {
            Self::All => Self::All,
            Self::InProgress => Self::All,
            Self::Finished => Self::InProgress,
        }
    }

    pub(crate) fn move_right(self) -> Self {
        match self {
            Self::All => Self::InProgress,
            Self::InProgress => Self::Finished,
            Self::Finished => Self::Finished,
        }
    }

    pub(crate) fn accepts(self, row: &ProgressRow) -> bool {
        match self {
            Self::All => true,
            Self::InProgress => !row.record.finished,
            Self::Finished => row.record.finished,
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct PendingDelete {
    pub(super) key: String,
    pub(super) title: String,
}

#[derive(Debug, Clone)]
pub(super) struct PendingNotice {
    pub(super) title: &'static str,
    pub(super) message: String,
}

fn details_notice(row: &ProgressRow) -> PendingNotice {
    PendingNotice {
        title: "Episode",
        message: format!(
            "{}\n\nEpisode {} on {}\n{} / {}\n\n{}\n\nLast watched {}\n\nPress any key to continue.",
            truncate(&row.record.title, 56),
            row.episode_number,
            row.site,
            format_clock(row.record.current_time),
            format_clock(row.record.duration),
            truncate(&row.record.url, 64),
            format_last_watched_display(&row.record.last_watched),
        ),
    }
}

pub(crate) fn run_tui(db: &Database) -> Result<()> {
    let mut session = TuiSession::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
        .context("failed to initialize terminal backend")?;
    terminal.clear()?;

    let mut filter = TuiFilter::All;
    let mut items = Vec::new();
    let mut table_state = TableState::default();
    refresh_items(db, filter, &mut items, &mut table_state, None)?;
    let mut pending_delete = None::<PendingDelete>;
    let mut pending_notice = None::<PendingNotice>;
    let mut status = if items.is_empty() {
        status_info("No saved progress yet. Run `watchtrack replay <scenario.json>` to record some.")
    } else {
        status_info("Ready.")
    };

    loop {
        terminal.draw(|frame| {
            draw_tui(
                frame,
                &items,
                &mut table_state,
                filter,
                &status,
                pending_delete.as_ref(),
                pending_notice.as_ref(),
            )
        })?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if pending_notice.is_some() {
            pending_notice = None;
            continue;
        }

        if let Some(dialog) = pending_delete.as_ref() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Enter => {
                    let deleting_key = dialog.key.clone();
                    let deleting_title = dialog.title.clone();
                    pending_delete = None;
                    match db.remove(&deleting_key) {
                        Ok(true) => {
                            status = status_info(&format!("Deleted progress: {deleting_title}"));
                        }
                        Ok(false) => {
                            status = status_error("Delete failed: record no longer exists.");
                        }
                        Err(err) => status = status_error(&format!("Delete failed: {err}")),
                    }
                    refresh_items(db, filter, &mut items, &mut table_state, None)?;
                }
                KeyCode::Esc | KeyCode::Char('n') => {
                    pending_delete = None;
                    status = status_info("Delete canceled.");
                }
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') => break,
            KeyCode::Char('r') => {
                let selected_key = table_state
                    .selected()
                    .and_then(|idx| items.get(idx))
                    .map(|row| row.key.clone());
                refresh_items(db, filter, &mut items, &mut table_state, selected_key.as_deref())?;
                status = status_info(&format!("Reloaded {} records.", items.len()));
            }
            KeyCode::Up => {
                if let Some(selected) = table_state.selected() {
                    table_state.select(Some(selected.saturating_sub(1)));
                }
            }
            KeyCode::Down => {
                if let Some(selected) = table_state.selected()
                    && !items.is_empty()
                {
                    let next = (selected + 1).min(items.len().saturating_sub(1));
                    table_state.select(Some(next));
                }
            }
            KeyCode::Left | KeyCode::Right => {
                let next = if key.code == KeyCode::Left {
                    filter.move_left()
                } else {
                    filter.move_right()
                };
                if next != filter {
                    filter = next;
                    refresh_items(db, filter, &mut items, &mut table_state, None)?;
                    status = status_info(&format!("Showing {}.", filter.label().to_lowercase()));
                }
            }
            KeyCode::Char('d') => {
                let Some(selected) = table_state.selected().and_then(|idx| items.get(idx)) else {
                    status = status_error("Delete failed: no record selected.");
                    continue;
                };
                pending_delete = Some(PendingDelete {
                    key: selected.key.clone(),
                    title: selected.record.title.clone(),
                });
                status = status_info("Confirm delete: y/Enter to delete, n/Esc to cancel.");
            }
            KeyCode::Enter => {
                if let Some(selected) = table_state.selected().and_then(|idx| items.get(idx)) {
                    pending_notice = Some(details_notice(selected));
                }
            }
            _ => {}
        }
    }

    terminal.show_cursor()?;
    session.leave()?;
    Ok(())
}
