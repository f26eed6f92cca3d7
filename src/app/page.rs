use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Identifies a nested browsing context by the id its host page gave it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct FrameRef(String);

impl FrameRef {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub(crate) fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum FrameAccessError {
    #[error("frame `{0}` is cross-origin")]
    AccessDenied(FrameRef),
    #[error("frame `{0}` is not attached to the page")]
    Detached(FrameRef),
}

/// Observable state of a `<video>` element as the page reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct VideoElement {
    pub(crate) current_time: f64,
    /// `None` while the element has no metadata (NaN in the DOM).
    pub(crate) duration: Option<f64>,
    pub(crate) paused: bool,
    /// HTMLMediaElement.readyState, 0..=4.
    pub(crate) ready_state: u8,
    pub(crate) src: Option<String>,
}

impl Default for VideoElement {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: None,
            paused: true,
            ready_state: 0,
            src: None,
        }
    }
}

impl VideoElement {
    pub(crate) fn known_duration(&self) -> Option<f64> {
        self.duration.filter(|value| value.is_finite() && *value > 0.0)
    }

    pub(crate) fn has_source(&self) -> bool {
        self.src.as_deref().is_some_and(|src| !src.trim().is_empty())
    }

    /// Advances playback; returns true when this call moved the element onto its end.
    fn advance(&mut self, elapsed_secs: f64) -> bool {
        if self.paused || elapsed_secs <= 0.0 {
            return false;
        }
        let Some(duration) = self.known_duration() else {
            return false;
        };
        if self.current_time >= duration {
            return false;
        }
        self.current_time = (self.current_time + elapsed_secs).min(duration);
        if self.current_time >= duration {
            self.paused = true;
            return true;
        }
        false
    }
}

/// Read-only view of one document. Locators and selectors are opaque strings to the tracker.
pub(crate) trait Document {
    /// Video elements matching `locator`, in document order.
    fn videos(&self, locator: &str) -> Vec<VideoElement>;
    fn text(&self, selector: &str) -> Option<String>;
    fn title(&self) -> Option<String>;
    fn frames(&self) -> Vec<FrameRef>;
    fn frame_document(&self, frame: &FrameRef) -> Result<&dyn Document, FrameAccessError>;
}

/// The top-level page a plugin runs in.
pub(crate) trait Page {
    fn document(&self) -> &dyn Document;
    /// Generic cross-document messaging to a nested frame.
    fn post_message(&mut self, frame: &FrameRef, message: &Value) -> Result<(), FrameAccessError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct StaticDocument {
    pub(crate) title: Option<String>,
    pub(crate) texts: BTreeMap<String, String>,
    pub(crate) videos: Vec<LocatedVideo>,
    pub(crate) frames: Vec<StaticFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LocatedVideo {
    pub(crate) locator: String,
    pub(crate) video: VideoElement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StaticFrame {
    pub(crate) id: String,
    pub(crate) origin: FrameOrigin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum FrameOrigin {
    SameOrigin {
        document: StaticDocument,
    },
    CrossOrigin {
        #[serde(default)]
        video: Option<VideoElement>,
        /// Whether a cooperating script inside the frame answers discovery requests.
        #[serde(default = "default_cooperative")]
        cooperative: bool,
        /// Sent verbatim instead of a well-formed report.
        #[serde(default)]
        reply_override: Option<Value>,
    },
}

fn default_cooperative() -> bool {
    true
}

impl StaticDocument {
    #[cfg(test)]
    pub(crate) fn with_video(mut self, locator: &str, video: VideoElement) -> Self {
        self.set_video(locator, video);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_frame(mut self, id: &str, origin: FrameOrigin) -> Self {
        self.frames.push(StaticFrame {
            id: id.to_string(),
            origin,
        });
        self
    }

    #[cfg(test)]
    pub(crate) fn with_text(mut self, selector: &str, text: &str) -> Self {
        self.texts.insert(selector.to_string(), text.to_string());
        self
    }

    /// Replaces the first element under `locator`, or appends one.
    pub(crate) fn set_video(&mut self, locator: &str, video: VideoElement) {
        match self.videos.iter_mut().find(|entry| entry.locator == locator) {
            Some(entry) => entry.video = video,
            None => self.videos.push(LocatedVideo {
                locator: locator.to_string(),
                video,
            }),
        }
    }

    pub(crate) fn remove_video(&mut self, locator: &str) -> bool {
        let before = self.videos.len();
        self.videos.retain(|entry| entry.locator != locator);
        self.videos.len() != before
    }

    pub(crate) fn frame_mut(&mut self, id: &str) -> Option<&mut StaticFrame> {
        for frame in &mut self.frames {
            if frame.id == id {
                return Some(frame);
            }
            if let FrameOrigin::SameOrigin { document } = &mut frame.origin
                && let Some(found) = document.frame_mut(id)
            {
                return Some(found);
            }
        }
        None
    }

    pub(crate) fn frame(&self, id: &str) -> Option<&StaticFrame> {
        for frame in &self.frames {
            if frame.id == id {
                return Some(frame);
            }
            if let FrameOrigin::SameOrigin { document } = &frame.origin
                && let Some(found) = document.frame(id)
            {
                return Some(found);
            }
        }
        None
    }

    /// Advances every playing video. Returns true when a directly accessible video ended.
    pub(crate) fn advance_playback(&mut self, elapsed_secs: f64) -> bool {
        let mut local_ended = false;
        for entry in &mut self.videos {
            local_ended |= entry.video.advance(elapsed_secs);
        }
        for frame in &mut self.frames {
            match &mut frame.origin {
                FrameOrigin::SameOrigin { document } => {
                    local_ended |= document.advance_playback(elapsed_secs);
                }
                FrameOrigin::CrossOrigin {
                    video: Some(video), ..
                } => {
                    video.advance(elapsed_secs);
                }
                FrameOrigin::CrossOrigin { video: None, .. } => {}
            }
        }
        local_ended
    }

    /// True while any directly accessible video is playing.
    pub(crate) fn has_playing_local_video(&self) -> bool {
        self.videos.iter().any(|entry| !entry.video.paused)
            || self.frames.iter().any(|frame| match &frame.origin {
                FrameOrigin::SameOrigin { document } => document.has_playing_local_video(),
                FrameOrigin::CrossOrigin { .. } => false,
            })
    }
}

impl Document for StaticDocument {
    fn videos(&self, locator: &str) -> Vec<VideoElement> {
        self.videos
            .iter()
            .filter(|entry| entry.locator == locator)
            .map(|entry| entry.video.clone())
            .collect()
    }

    fn text(&self, selector: &str) -> Option<String> {
        self.texts.get(selector).cloned()
    }

    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn frames(&self) -> Vec<FrameRef> {
        self.frames
            .iter()
            .map(|frame| FrameRef::new(frame.id.clone()))
            .collect()
    }

    fn frame_document(&self, frame: &FrameRef) -> Result<&dyn Document, FrameAccessError> {
        let found = self
            .frames
            .iter()
            .find(|candidate| candidate.id == frame.id())
            .ok_or_else(|| FrameAccessError::Detached(frame.clone()))?;
        match &found.origin {
            FrameOrigin::SameOrigin { document } => Ok(document),
            FrameOrigin::CrossOrigin { .. } => Err(FrameAccessError::AccessDenied(frame.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing(current_time: f64, duration: f64) -> VideoElement {
        VideoElement {
            current_time,
            duration: Some(duration),
            paused: false,
            ready_state: 4,
            src: Some("blob:video".to_string()),
        }
    }

    #[test]
    fn cross_origin_frame_access_is_denied() {
        let doc = StaticDocument::default().with_frame(
            "player",
            FrameOrigin::CrossOrigin {
                video: None,
                cooperative: true,
                reply_override: None,
            },
        );
        let err = doc
            .frame_document(&FrameRef::new("player"))
            .err()
            .expect("cross-origin access must fail");
        assert_eq!(err, FrameAccessError::AccessDenied(FrameRef::new("player")));
    }

    #[test]
    fn unknown_frame_is_detached() {
        let doc = StaticDocument::default();
        assert!(matches!(
            doc.frame_document(&FrameRef::new("gone")),
            Err(FrameAccessError::Detached(_))
        ));
    }

    #[test]
    fn advance_playback_reports_local_end_once() {
        let mut doc = StaticDocument::default().with_video("video", playing(9.5, 10.0));
        assert!(doc.advance_playback(1.0));
        assert_eq!(doc.videos("video")[0].current_time, 10.0);
        assert!(!doc.advance_playback(1.0));
        assert!(!doc.has_playing_local_video());
    }

    #[test]
    fn cross_origin_playback_does_not_count_as_local_end() {
        let mut doc = StaticDocument::default().with_frame(
            "player",
            FrameOrigin::CrossOrigin {
                video: Some(playing(9.5, 10.0)),
                cooperative: true,
                reply_override: None,
            },
        );
        assert!(!doc.advance_playback(1.0));
    }

    #[test]
    fn frame_lookup_descends_into_same_origin_documents() {
        let inner = StaticDocument::default().with_frame(
            "deep",
            FrameOrigin::CrossOrigin {
                video: None,
                cooperative: false,
                reply_override: None,
            },
        );
        let mut doc = StaticDocument::default()
            .with_frame("outer", FrameOrigin::SameOrigin { document: inner });
        assert!(doc.frame("deep").is_some());
        assert!(doc.frame_mut("deep").is_some());
        assert!(doc.frame("missing").is_none());
    }

    #[test]
    fn document_deserializes_from_scenario_json() {
        let raw = r##"{
            "title": "Episode 3",
            "texts": {"h1.series": "Show"},
            "videos": [{"locator": "video", "video": {"currentTime": 12.5, "duration": 600, "readyState": 4}}],
            "frames": [{"id": "embed", "origin": {"kind": "cross_origin"}}]
        }"##;
        let doc: StaticDocument = serde_json::from_str(raw).expect("document should parse");
        let video = &doc.videos("video")[0];
        assert_eq!(video.current_time, 12.5);
        assert!(video.paused);
        assert!(matches!(
            &doc.frames[0].origin,
            FrameOrigin::CrossOrigin {
                cooperative: true,
                ..
            }
        ));
    }
}
