use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Value, json};

use super::episode::{format_clock, text_progress_bar};
use super::extension::ExtensionApi;
use super::page::{Document, FrameAccessError, FrameOrigin, FrameRef, Page, StaticDocument, VideoElement};
use super::plugin::Plugin;
use super::scheduler::Scheduler;
use super::source::HostContext;
use super::tracking::{MediaEvent, ProgressIndicator, Status};

const DEFAULT_RUN_FOR_MS: u64 = 60_000;
const DEFAULT_TIMEUPDATE_MS: u64 = 250;

/// A recorded page plus the things that happen to it, replayed against a plugin.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Scenario {
    pub(crate) url: String,
    /// Site profile to use; matched from `url` when absent.
    #[serde(default)]
    pub(crate) site: Option<String>,
    #[serde(default)]
    pub(crate) page: StaticDocument,
    #[serde(default)]
    pub(crate) steps: Vec<ScenarioStep>,
    #[serde(default = "default_run_for_ms")]
    pub(crate) run_for_ms: u64,
    /// How often a playing local video raises `timeupdate`.
    #[serde(default = "default_timeupdate_ms")]
    pub(crate) timeupdate_ms: u64,
}

fn default_run_for_ms() -> u64 {
    DEFAULT_RUN_FOR_MS
}

fn default_timeupdate_ms() -> u64 {
    DEFAULT_TIMEUPDATE_MS
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ScenarioStep {
    pub(crate) at_ms: u64,
    #[serde(flatten)]
    pub(crate) action: StepAction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub(crate) enum StepAction {
    /// Inserts or replaces a video, at the top level or inside `frame`.
    SetVideo {
        #[serde(default)]
        frame: Option<String>,
        #[serde(default = "default_locator")]
        locator: String,
        video: VideoElement,
    },
    RemoveVideo {
        #[serde(default)]
        frame: Option<String>,
        #[serde(default = "default_locator")]
        locator: String,
    },
    Media {
        event: MediaEvent,
    },
    /// Delivers an arbitrary payload as if `frame` had posted it.
    FrameMessage {
        frame: String,
        message: Value,
    },
    Navigate {
        url: String,
        #[serde(default)]
        page: Option<StaticDocument>,
    },
    TrackNow,
    Unload,
}

fn default_locator() -> String {
    "video".to_string()
}

pub(crate) fn load_scenario(path: &Path) -> Result<Scenario> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse scenario {}", path.display()))
}

/// Page whose cross-origin frames answer discovery requests the way a cooperating frame script would.
#[derive(Debug, Default)]
pub(crate) struct ScriptedPage {
    pub(crate) document: StaticDocument,
    inbox: VecDeque<(FrameRef, Value)>,
    pub(crate) posted: usize,
}

impl ScriptedPage {
    pub(crate) fn new(document: StaticDocument) -> Self {
        Self {
            document,
            inbox: VecDeque::new(),
            posted: 0,
        }
    }

    pub(crate) fn push_message(&mut self, frame: FrameRef, message: Value) {
        self.inbox.push_back((frame, message));
    }

    fn next_message(&mut self) -> Option<(FrameRef, Value)> {
        self.inbox.pop_front()
    }
}

fn frame_report(video: &VideoElement) -> Value {
    json!({
        "iFrameVideoData": {
            "iFrameVideo": true,
            "currTime": video.current_time,
            "dur": video.known_duration().unwrap_or(0.0),
            "paused": video.paused,
        }
    })
}

impl Page for ScriptedPage {
    fn document(&self) -> &dyn Document {
        &self.document
    }

    fn post_message(&mut self, frame: &FrameRef, message: &Value) -> Result<(), FrameAccessError> {
        let target = self
            .document
            .frame(frame.id())
            .ok_or_else(|| FrameAccessError::Detached(frame.clone()))?;
        self.posted += 1;
        if message.get("iFrameVideoRequest").is_none() {
            return Ok(());
        }
        let reply = match &target.origin {
            FrameOrigin::CrossOrigin {
                cooperative: true,
                reply_override: Some(raw),
                ..
            } => Some(raw.clone()),
            FrameOrigin::CrossOrigin {
                cooperative: true,
                video: Some(video),
                ..
            } => Some(frame_report(video)),
            _ => None,
        };
        if let Some(reply) = reply {
            self.inbox.push_back((frame.clone(), reply));
        }
        Ok(())
    }
}

fn set_video_in(document: &mut StaticDocument, frame: Option<&str>, locator: &str, video: VideoElement) {
    let Some(id) = frame else {
        document.set_video(locator, video);
        return;
    };
    match document.frame_mut(id).map(|frame| &mut frame.origin) {
        Some(FrameOrigin::SameOrigin { document }) => document.set_video(locator, video),
        Some(FrameOrigin::CrossOrigin { video: slot, .. }) => *slot = Some(video),
        None => warn!("scenario references unknown frame `{id}`"),
    }
}

fn remove_video_in(document: &mut StaticDocument, frame: Option<&str>, locator: &str) {
    let Some(id) = frame else {
        document.remove_video(locator);
        return;
    };
    match document.frame_mut(id).map(|frame| &mut frame.origin) {
        Some(FrameOrigin::SameOrigin { document }) => {
            document.remove_video(locator);
        }
        Some(FrameOrigin::CrossOrigin { video, .. }) => *video = None,
        None => warn!("scenario references unknown frame `{id}`"),
    }
}

/// Drives one plugin over virtual time: timers, media events, frame messages and playback.
pub(crate) struct Host<P: Plugin> {
    plugin: P,
    page: ScriptedPage,
    timers: Scheduler,
    url: String,
    timeupdate_interval: Duration,
    last_timeupdate: Option<Duration>,
}

impl<P: Plugin> Host<P> {
    pub(crate) fn new(plugin: P, url: &str, document: StaticDocument, timeupdate_interval: Duration) -> Self {
        Self {
            plugin,
            page: ScriptedPage::new(document),
            timers: Scheduler::new(),
            url: url.to_string(),
            timeupdate_interval: timeupdate_interval.max(Duration::from_millis(1)),
            last_timeupdate: None,
        }
    }

    pub(crate) fn plugin(&self) -> &P {
        &self.plugin
    }

    #[cfg(test)]
    pub(crate) fn page(&self) -> &ScriptedPage {
        &self.page
    }

    #[cfg(test)]
    pub(crate) fn timers(&self) -> &Scheduler {
        &self.timers
    }

    pub(crate) fn now(&self) -> Duration {
        self.timers.now()
    }

    /// Hands the plugin its extension api and matches the initial url.
    pub(crate) fn load(&mut self, api: Box<dyn ExtensionApi>) {
        self.plugin.on_load(api);
        let url = self.url.clone();
        self.match_page(&url);
    }

    fn match_page(&mut self, url: &str) {
        if !self.plugin.matches(url) {
            info!("`{}` does not handle {url}", self.plugin.name());
            let mut ctx = HostContext {
                page: &mut self.page,
                timers: &mut self.timers,
            };
            self.plugin.on_page_leave(&mut ctx);
            return;
        }
        let mut ctx = HostContext {
            page: &mut self.page,
            timers: &mut self.timers,
        };
        self.plugin.on_page_match(url, &mut ctx);
    }

    pub(crate) fn navigate(&mut self, url: &str, document: Option<StaticDocument>) {
        if let Some(document) = document {
            self.page = ScriptedPage::new(document);
            self.last_timeupdate = None;
        }
        self.url = url.to_string();
        self.match_page(url);
    }

    pub(crate) fn unload(&mut self) {
        let mut ctx = HostContext {
            page: &mut self.page,
            timers: &mut self.timers,
        };
        self.plugin.on_unload(&mut ctx);
    }

    pub(crate) fn media_event(&mut self, event: MediaEvent) {
        let mut ctx = HostContext {
            page: &mut self.page,
            timers: &mut self.timers,
        };
        self.plugin.on_media_event(event, &mut ctx);
    }

    pub(crate) fn track_now(&mut self) -> Option<Status> {
        let url = self.url.clone();
        let mut ctx = HostContext {
            page: &mut self.page,
            timers: &mut self.timers,
        };
        self.plugin.track_progress(&url, &mut ctx)
    }

    pub(crate) fn set_video(&mut self, frame: Option<&str>, locator: &str, video: VideoElement) {
        set_video_in(&mut self.page.document, frame, locator, video);
    }

    pub(crate) fn remove_video(&mut self, frame: Option<&str>, locator: &str) {
        remove_video_in(&mut self.page.document, frame, locator);
    }

    pub(crate) fn post_from_frame(&mut self, frame: &str, message: Value) {
        self.page.push_message(FrameRef::new(frame), message);
        self.deliver_messages();
    }

    pub(crate) fn apply(&mut self, action: StepAction) {
        match action {
            StepAction::SetVideo {
                frame,
                locator,
                video,
            } => self.set_video(frame.as_deref(), &locator, video),
            StepAction::RemoveVideo { frame, locator } => {
                self.remove_video(frame.as_deref(), &locator);
            }
            StepAction::Media { event } => self.media_event(event),
            StepAction::FrameMessage { frame, message } => self.post_from_frame(&frame, message),
            StepAction::Navigate { url, page } => self.navigate(&url, page),
            StepAction::TrackNow => match self.track_now() {
                Some(status) => info!("track now: {:.1}%", status.progress),
                None => info!("track now: no status available"),
            },
            StepAction::Unload => self.unload(),
        }
        self.deliver_messages();
    }

    /// Runs every scripted step at its time, then keeps the clock going until `end`.
    pub(crate) fn replay(&mut self, mut steps: Vec<ScenarioStep>, end: Duration) {
        steps.sort_by_key(|step| step.at_ms);
        for step in steps {
            let at = Duration::from_millis(step.at_ms);
            if at > end {
                debug!("step at {at:?} is past the end of the run; skipped");
                continue;
            }
            self.run_until(at);
            self.apply(step.action);
        }
        self.run_until(end);
    }

    pub(crate) fn run_until(&mut self, end: Duration) {
        loop {
            self.deliver_messages();
            let timer_due = self.timers.next_due();
            let next = [timer_due, self.next_timeupdate()].into_iter().flatten().min();
            match next {
                Some(at) if at <= end => {
                    self.advance_clock(at);
                    if let Some((_, kind)) = self.timers.pop_due(at) {
                        let mut ctx = HostContext {
                            page: &mut self.page,
                            timers: &mut self.timers,
                        };
                        self.plugin.on_timer(kind, &mut ctx);
                    } else if self.page.document.has_playing_local_video() {
                        self.last_timeupdate = Some(at);
                        self.media_event(MediaEvent::TimeUpdate);
                    }
                }
                _ => {
                    self.advance_clock(end);
                    self.deliver_messages();
                    return;
                }
            }
        }
    }

    fn next_timeupdate(&self) -> Option<Duration> {
        if !self.page.document.has_playing_local_video() {
            return None;
        }
        let now = self.timers.now();
        Some(match self.last_timeupdate {
            Some(last) => (last + self.timeupdate_interval).max(now),
            None => now + self.timeupdate_interval,
        })
    }

    fn advance_clock(&mut self, to: Duration) {
        let now = self.timers.now();
        if to <= now {
            return;
        }
        let ended = self.page.document.advance_playback((to - now).as_secs_f64());
        self.timers.advance_to(to);
        if ended {
            self.media_event(MediaEvent::Ended);
        }
    }

    fn deliver_messages(&mut self) {
        while let Some((frame, message)) = self.page.next_message() {
            let mut ctx = HostContext {
                page: &mut self.page,
                timers: &mut self.timers,
            };
            self.plugin.on_frame_message(&frame, &message, &mut ctx);
        }
    }
}

/// Prints each status as a one-line bar on stdout.
#[derive(Debug, Default)]
pub(crate) struct ConsoleIndicator {
    last: Option<String>,
}

impl ProgressIndicator for ConsoleIndicator {
    fn set_status(&mut self, status: &Status) {
        let line = format!(
            "{} | ep {} {} {:>5.1}%  {} / {}{}",
            status.series,
            status.episode_number,
            text_progress_bar(status.progress, 20),
            status.progress,
            format_clock(status.current_time),
            format_clock(status.duration),
            if status.finished { "  finished" } else { "" }
        );
        if self.last.as_deref() != Some(line.as_str()) {
            println!("{line}");
            self.last = Some(line);
        }
    }

    fn clear(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_doc(video: Option<VideoElement>, cooperative: bool, reply_override: Option<Value>) -> StaticDocument {
        StaticDocument::default().with_frame(
            "player",
            FrameOrigin::CrossOrigin {
                video,
                cooperative,
                reply_override,
            },
        )
    }

    fn video(current_time: f64, duration: f64) -> VideoElement {
        VideoElement {
            current_time,
            duration: Some(duration),
            paused: false,
            ready_state: 4,
            src: None,
        }
    }

    fn request() -> Value {
        json!({ "iFrameVideoRequest": { "session": "s-1" } })
    }

    #[test]
    fn cooperative_frame_replies_with_its_video() {
        let mut page = ScriptedPage::new(remote_doc(Some(video(12.0, 600.0)), true, None));
        page.post_message(&FrameRef::new("player"), &request())
            .expect("frame is attached");
        let (from, reply) = page.next_message().expect("a reply should be queued");
        assert_eq!(from, FrameRef::new("player"));
        assert_eq!(reply["iFrameVideoData"]["currTime"], 12.0);
        assert_eq!(reply["iFrameVideoData"]["dur"], 600.0);
    }

    #[test]
    fn silent_and_empty_frames_do_not_reply() {
        let mut silent = ScriptedPage::new(remote_doc(Some(video(1.0, 10.0)), false, None));
        silent
            .post_message(&FrameRef::new("player"), &request())
            .expect("attached");
        assert!(silent.next_message().is_none());

        let mut empty = ScriptedPage::new(remote_doc(None, true, None));
        empty
            .post_message(&FrameRef::new("player"), &request())
            .expect("attached");
        assert!(empty.next_message().is_none());
        assert_eq!(empty.posted, 1);
    }

    #[test]
    fn reply_override_is_sent_verbatim() {
        let raw = json!({ "iFrameVideoData": { "iFrameVideo": true, "currTime": 5 } });
        let mut page = ScriptedPage::new(remote_doc(None, true, Some(raw.clone())));
        page.post_message(&FrameRef::new("player"), &request())
            .expect("attached");
        assert_eq!(page.next_message().map(|(_, reply)| reply), Some(raw));
    }

    #[test]
    fn posting_to_a_missing_frame_is_detached() {
        let mut page = ScriptedPage::default();
        assert!(matches!(
            page.post_message(&FrameRef::new("gone"), &request()),
            Err(FrameAccessError::Detached(_))
        ));
    }

    #[test]
    fn set_video_targets_frames() {
        let mut doc = remote_doc(None, true, None)
            .with_frame("inline", FrameOrigin::SameOrigin { document: StaticDocument::default() });
        set_video_in(&mut doc, Some("player"), "video", video(3.0, 30.0));
        set_video_in(&mut doc, Some("inline"), "video", video(4.0, 40.0));
        assert!(matches!(
            doc.frame("player").map(|frame| &frame.origin),
            Some(FrameOrigin::CrossOrigin { video: Some(_), .. })
        ));
        remove_video_in(&mut doc, Some("player"), "video");
        assert!(matches!(
            doc.frame("player").map(|frame| &frame.origin),
            Some(FrameOrigin::CrossOrigin { video: None, .. })
        ));
        assert!(doc.has_playing_local_video());
    }

    #[test]
    fn scenario_parses_with_defaults() {
        let raw = r#"{
            "url": "https://animeplay.example/watch/show-episode-2",
            "steps": [
                {"at_ms": 1000, "action": "set_video", "video": {"currentTime": 0, "duration": 600, "paused": false, "readyState": 4}},
                {"at_ms": 2000, "action": "media", "event": "timeupdate"},
                {"at_ms": 3000, "action": "frame_message", "frame": "player", "message": {"hello": 1}},
                {"at_ms": 4000, "action": "track_now"},
                {"at_ms": 5000, "action": "unload"}
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(raw).expect("scenario should parse");
        assert_eq!(scenario.run_for_ms, DEFAULT_RUN_FOR_MS);
        assert_eq!(scenario.timeupdate_ms, DEFAULT_TIMEUPDATE_MS);
        assert_eq!(scenario.steps.len(), 5);
        assert!(matches!(
            &scenario.steps[0].action,
            StepAction::SetVideo { locator, frame: None, .. } if locator == "video"
        ));
        assert!(matches!(
            scenario.steps[1].action,
            StepAction::Media {
                event: MediaEvent::TimeUpdate
            }
        ));
    }

    #[test]
    fn unknown_scenario_fields_are_rejected() {
        assert!(serde_json::from_str::<Scenario>(r#"{"url": "https://x.example", "speed": 2}"#).is_err());
    }
}
