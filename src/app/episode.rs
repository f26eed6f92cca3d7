use chrono::{DateTime, Local};
use url::Url;

use super::page::Document;
use super::site::SiteProfile;

/// Label used when no episode number can be recovered from the page.
pub(crate) const UNKNOWN_EPISODE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EpisodeMetadata {
    pub(crate) title: String,
    pub(crate) series: String,
    pub(crate) episode_number: String,
}

pub(crate) fn extract_metadata(
    document: &dyn Document,
    profile: &SiteProfile,
    url: &str,
) -> EpisodeMetadata {
    let page_title = document
        .title()
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty());

    let series = selected_text(document, profile.series_selector.as_deref())
        .or_else(|| page_title.as_deref().map(series_from_page_title))
        .map(|series| sanitize_series(&series))
        .filter(|series| !series.is_empty())
        .or_else(|| host_of(url))
        .unwrap_or_else(|| profile.name.clone());

    let episode_number = selected_text(document, profile.episode_selector.as_deref())
        .and_then(|text| parse_episode_label(&text))
        .or_else(|| page_title.as_deref().and_then(parse_episode_label))
        .or_else(|| episode_from_url(url))
        .unwrap_or_else(|| UNKNOWN_EPISODE.to_string());

    let title = selected_text(document, profile.title_selector.as_deref())
        .or(page_title)
        .unwrap_or_else(|| {
            if episode_number == UNKNOWN_EPISODE {
                series.clone()
            } else {
                format!("{series} Episode {episode_number}")
            }
        });

    EpisodeMetadata {
        title,
        series,
        episode_number,
    }
}

fn selected_text(document: &dyn Document, selector: Option<&str>) -> Option<String> {
    let text = document.text(selector?)?;
    let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!trimmed.is_empty()).then_some(trimmed)
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_string)
}

/// "Show Name - Episode 3 | Site" -> "Show Name".
pub(crate) fn series_from_page_title(title: &str) -> String {
    let mut head = title;
    for separator in [" | ", " - ", " – ", " — "] {
        if let Some((left, _)) = head.split_once(separator) {
            head = left;
        }
    }
    let head = head.trim();
    let lower = head.to_lowercase();
    match find_episode_keyword(&lower) {
        Some(idx) if idx > 0 && lower.len() == head.len() && head.is_char_boundary(idx) => {
            head[..idx].trim().to_string()
        }
        _ => head.to_string(),
    }
}

/// Drops a trailing "(Sub)", "(Dub)" or "(24 episodes)" so keys stay stable across variants.
pub(crate) fn sanitize_series(series: &str) -> String {
    let trimmed = series.trim();
    if let Some(open_idx) = trimmed.rfind('(')
        && trimmed.ends_with(')')
    {
        let inner = trimmed[open_idx + 1..trimmed.len() - 1].trim().to_lowercase();
        if matches!(inner.as_str(), "sub" | "dub" | "subbed" | "dubbed") || inner.ends_with("episodes")
        {
            return trimmed[..open_idx].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn find_episode_keyword(lower: &str) -> Option<usize> {
    for keyword in ["episode", "ep.", "ep "] {
        let mut from = 0;
        while let Some(rel) = lower[from..].find(keyword) {
            let idx = from + rel;
            let at_word_start = lower[..idx]
                .chars()
                .next_back()
                .is_none_or(|ch| !ch.is_alphanumeric());
            if at_word_start {
                return Some(idx);
            }
            from = idx + keyword.len();
        }
    }
    None
}

/// Pulls an episode label out of free text such as "Episode 12", "EP.05" or "13.5".
pub(crate) fn parse_episode_label(text: &str) -> Option<String> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }
    if let Some(label) = normalize_episode_label(&lower) {
        return Some(label);
    }

    let idx = find_episode_keyword(&lower)?;
    let rest = &lower[idx..];
    let rest = rest.trim_start_matches(|ch: char| ch.is_alphabetic());
    let rest = rest.trim_start_matches(|ch: char| !ch.is_ascii_digit());
    let number: String = rest
        .chars()
        .take_while(|ch| ch.is_ascii_digit() || *ch == '.')
        .collect();
    normalize_episode_label(number.trim_end_matches('.'))
}

/// "012" -> "12", "13.50" -> "13.5"; anything non-numeric is rejected.
pub(crate) fn normalize_episode_label(raw: &str) -> Option<String> {
    let value = parse_episode_f64(raw)?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if is_effective_integer(value) {
        return integer_episode_label(value);
    }
    Some(format!("{value}"))
}

pub(crate) fn episode_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    for (key, value) in parsed.query_pairs() {
        if matches!(key.as_ref(), "ep" | "episode")
            && let Some(label) = normalize_episode_label(&value)
        {
            return Some(label);
        }
    }
    let segments: Vec<String> = parsed
        .path_segments()
        .map(|segments| segments.map(str::to_string).collect())
        .unwrap_or_default();
    segments
        .iter()
        .rev()
        .filter(|segment| !segment.is_empty())
        .find_map(|segment| {
            let spaced = segment.replace(['-', '_'], " ");
            find_episode_keyword(&format!("{} ", spaced.to_lowercase()))?;
            parse_episode_label(&spaced)
        })
}

pub(crate) fn parse_episode_f64(ep: &str) -> Option<f64> {
    ep.trim().parse::<f64>().ok()
}

pub(crate) fn integer_episode_label(value: f64) -> Option<String> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let rounded = value.round();
    if !is_effective_integer(rounded) {
        return None;
    }
    Some(format!("{}", rounded as i64))
}

pub(crate) fn is_effective_integer(value: f64) -> bool {
    (value - value.round()).abs() < 0.000_001
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub(crate) fn format_last_watched_display(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M %:z")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

/// Seconds as "m:ss" or "h:mm:ss".
pub(crate) fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

pub(crate) fn build_progress_gauge(progress: f64, finished: bool) -> (f64, String) {
    let ratio = (progress / 100.0).clamp(0.0, 1.0);
    let label = if finished {
        format!("{progress:.1}% (finished)")
    } else {
        format!("{progress:.1}%")
    };
    (ratio, label)
}

pub(crate) fn text_progress_bar(progress: f64, width: usize) -> String {
    let filled = ((progress / 100.0).clamp(0.0, 1.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
