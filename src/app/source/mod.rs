mod local;
mod reconcile;
mod remote;

use std::time::Duration;

pub(crate) use local::*;
pub(crate) use reconcile::*;
pub(crate) use remote::*;

use super::page::{Page, VideoElement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Readiness {
    NotReady,
    HaveMetadata,
    CanPlay,
    Ready,
}

impl Readiness {
    pub(crate) fn from_ready_state(ready_state: u8) -> Self {
        match ready_state {
            0 => Self::NotReady,
            1 => Self::HaveMetadata,
            2 | 3 => Self::CanPlay,
            _ => Self::Ready,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SourceOrigin {
    Local,
    RemoteFrame,
}

/// Immutable snapshot of a video's observable state, wherever it was read from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct VideoSourceHandle {
    pub(crate) current_time: f64,
    /// 0 means unknown.
    pub(crate) duration: f64,
    pub(crate) paused: bool,
    pub(crate) readiness: Readiness,
    pub(crate) origin: SourceOrigin,
}

impl VideoSourceHandle {
    pub(crate) fn from_local_element(element: &VideoElement) -> Self {
        let duration = element.known_duration().unwrap_or(0.0);
        Self {
            current_time: clamp_time(element.current_time, duration),
            duration,
            paused: element.paused,
            readiness: Readiness::from_ready_state(element.ready_state),
            origin: SourceOrigin::Local,
        }
    }

    pub(crate) fn from_remote_report(data: &IFrameVideoData) -> Self {
        let duration = if data.dur.is_finite() && data.dur > 0.0 {
            data.dur
        } else {
            0.0
        };
        Self {
            current_time: clamp_time(data.curr_time, duration),
            duration,
            paused: data.paused,
            readiness: if duration > 0.0 {
                Readiness::Ready
            } else {
                Readiness::HaveMetadata
            },
            origin: SourceOrigin::RemoteFrame,
        }
    }

    pub(crate) fn has_duration(&self) -> bool {
        self.duration > 0.0
    }
}

fn clamp_time(current_time: f64, duration: f64) -> f64 {
    let time = if current_time.is_finite() {
        current_time.max(0.0)
    } else {
        0.0
    };
    if duration > 0.0 { time.min(duration) } else { time }
}

/// Borrowed host state handed to every plugin entry point.
pub(crate) struct HostContext<'a> {
    pub(crate) page: &'a mut dyn Page,
    pub(crate) timers: &'a mut super::scheduler::Scheduler,
}

impl HostContext<'_> {
    pub(crate) fn now(&self) -> Duration {
        self.timers.now()
    }
}

/// A place a video's state can be read from.
pub(crate) trait VideoProbe {
    fn probe(&mut self, ctx: &mut HostContext<'_>) -> Option<VideoSourceHandle>;
}
