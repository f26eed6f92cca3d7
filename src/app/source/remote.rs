use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use super::super::page::FrameRef;
use super::super::scheduler::{Scheduler, TimerId, TimerKind};
use super::{HostContext, VideoProbe, VideoSourceHandle};
use crate::settings::BridgeSettings;

/// Report payload a cooperating frame script posts back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IFrameVideoData {
    pub(crate) i_frame_video: bool,
    pub(crate) curr_time: f64,
    pub(crate) dur: f64,
    #[serde(default)]
    pub(crate) paused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IFrameVideoMessage {
    pub(crate) i_frame_video_data: IFrameVideoData,
}

#[derive(Debug, Error)]
pub(crate) enum ReportError {
    #[error("not a video report: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("report is not flagged as an iframe video")]
    NotFlagged,
    #[error("report carries an invalid {field}: {value}")]
    InvalidNumber { field: &'static str, value: f64 },
}

/// Validates an untrusted cross-frame payload.
pub(crate) fn parse_report(raw: &Value) -> Result<IFrameVideoData, ReportError> {
    let message = IFrameVideoMessage::deserialize(raw)?;
    let data = message.i_frame_video_data;
    if !data.i_frame_video {
        return Err(ReportError::NotFlagged);
    }
    for (field, value) in [("currTime", data.curr_time), ("dur", data.dur)] {
        if !value.is_finite() || value < 0.0 {
            return Err(ReportError::InvalidNumber { field, value });
        }
    }
    Ok(data)
}

pub(crate) fn discovery_request(session_id: &str) -> Value {
    json!({ "iFrameVideoRequest": { "session": session_id } })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BridgeState {
    Idle,
    RequestSent,
    Reported,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RemoteReport {
    pub(crate) handle: VideoSourceHandle,
    pub(crate) received_at: Duration,
}

impl RemoteReport {
    pub(crate) fn is_fresh(&self, now: Duration, staleness_window: Duration) -> bool {
        now.saturating_sub(self.received_at) <= staleness_window && self.handle.has_duration()
    }
}

#[derive(Debug)]
struct BridgeSession {
    id: String,
    frame: FrameRef,
    timer: TimerId,
    /// When the oldest request still without an answer went out.
    awaiting_since: Option<Duration>,
}

/// Talks to a cooperating script in one cross-origin frame and caches what it reports.
#[derive(Debug)]
pub(crate) struct RemoteFrameBridge {
    settings: BridgeSettings,
    state: BridgeState,
    session: Option<BridgeSession>,
    report: Option<RemoteReport>,
    /// Frame of the latest session, kept after a timeout.
    last_target: Option<FrameRef>,
    sessions_started: u64,
}

impl RemoteFrameBridge {
    pub(crate) fn new(settings: BridgeSettings) -> Self {
        Self {
            settings,
            state: BridgeState::Idle,
            session: None,
            report: None,
            last_target: None,
            sessions_started: 0,
        }
    }

    pub(crate) fn state(&self) -> BridgeState {
        self.state
    }

    pub(crate) fn frame(&self) -> Option<&FrameRef> {
        self.session.as_ref().map(|session| &session.frame)
    }

    pub(crate) fn last_target(&self) -> Option<&FrameRef> {
        self.last_target.as_ref()
    }

    pub(crate) fn has_active_session(&self) -> bool {
        self.session.is_some()
    }

    /// Starts (or restarts) discovery against `frame`: one request now, then one per interval.
    pub(crate) fn begin_session(&mut self, frame: FrameRef, ctx: &mut HostContext<'_>) {
        self.cancel_session(ctx.timers);
        self.sessions_started += 1;
        let id = format!("watchtrack-{}-{}", frame.id(), self.sessions_started);
        let timer = ctx
            .timers
            .schedule_repeating(TimerKind::BridgeRequest, self.settings.request_interval);
        info!("remote bridge session {id} started for frame `{frame}`");
        self.last_target = Some(frame.clone());
        self.session = Some(BridgeSession {
            id,
            frame,
            timer,
            awaiting_since: None,
        });
        self.send_request(ctx);
    }

    /// Repeating-send tick.
    pub(crate) fn on_request_tick(&mut self, ctx: &mut HostContext<'_>) {
        let now = ctx.now();
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Some(since) = session.awaiting_since
            && now.saturating_sub(since) >= self.settings.response_timeout
        {
            info!(
                "remote bridge session {} timed out after {:?} without a report",
                session.id, self.settings.response_timeout
            );
            self.cancel_session(ctx.timers);
            self.state = BridgeState::TimedOut;
            return;
        }
        self.send_request(ctx);
    }

    fn send_request(&mut self, ctx: &mut HostContext<'_>) {
        let now = ctx.now();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let request = discovery_request(&session.id);
        if let Err(err) = ctx.page.post_message(&session.frame, &request) {
            debug!("discovery request for session {} not delivered: {err}", session.id);
        }
        session.awaiting_since.get_or_insert(now);
        self.state = BridgeState::RequestSent;
    }

    /// Accepts a message from `from`. Returns whether it was taken as a report.
    pub(crate) fn on_message(&mut self, from: &FrameRef, raw: &Value, now: Duration) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if &session.frame != from {
            return false;
        }
        let data = match parse_report(raw) {
            Ok(data) => data,
            Err(err) => {
                debug!("ignoring message from frame `{from}`: {err}");
                return false;
            }
        };
        session.awaiting_since = None;
        self.report = Some(RemoteReport {
            handle: VideoSourceHandle::from_remote_report(&data),
            received_at: now,
        });
        self.state = BridgeState::Reported;
        true
    }

    /// The cached handle if it is fresh. A stale cache is dropped so it cannot be served later.
    pub(crate) fn latest(&mut self, now: Duration) -> Option<VideoSourceHandle> {
        let report = self.report?;
        if report.is_fresh(now, self.settings.staleness_window) {
            return Some(report.handle);
        }
        if report.handle.has_duration() {
            debug!(
                "dropping stale remote report ({:?} old)",
                now.saturating_sub(report.received_at)
            );
        }
        self.report = None;
        None
    }

    pub(crate) fn teardown(&mut self, timers: &mut Scheduler) {
        self.cancel_session(timers);
        self.report = None;
        self.last_target = None;
        self.state = BridgeState::Idle;
    }

    fn cancel_session(&mut self, timers: &mut Scheduler) {
        if let Some(session) = self.session.take()
            && !timers.cancel(session.timer)
        {
            warn!("remote bridge session {} had no live request timer", session.id);
        }
    }
}

impl VideoProbe for RemoteFrameBridge {
    fn probe(&mut self, ctx: &mut HostContext<'_>) -> Option<VideoSourceHandle> {
        self.latest(ctx.now())
    }
}
