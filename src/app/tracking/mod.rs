mod outlet;
mod record;

use std::time::Duration;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

pub(crate) use outlet::*;
pub(crate) use record::*;

use super::episode::EpisodeMetadata;
use super::scheduler::{Scheduler, TimerId, TimerKind};
use super::source::{HostContext, SourceOrigin, SourceReconciler, VideoSourceHandle};
use crate::settings::ProgressSettings;

/// Playback notifications a local `<video>` element raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum MediaEvent {
    TimeUpdate,
    Play,
    Pause,
    Seeked,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickSource {
    Event(MediaEvent),
    Timer,
    Forced,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Status {
    pub(crate) title: String,
    pub(crate) series: String,
    pub(crate) episode_number: String,
    /// Percentage watched, 0..=100.
    pub(crate) progress: f64,
    pub(crate) finished: bool,
    pub(crate) current_time: f64,
    pub(crate) duration: f64,
}

/// `None` while the duration is unknown; end-of-media always reads as 100% and finished.
pub(crate) fn compute_status(
    handle: &VideoSourceHandle,
    metadata: &EpisodeMetadata,
    end_of_media: bool,
    finished_threshold: f64,
) -> Option<Status> {
    if !handle.has_duration() {
        return None;
    }
    let (progress, finished) = if end_of_media {
        (100.0, true)
    } else {
        let progress = (handle.current_time * 100.0 / handle.duration).clamp(0.0, 100.0);
        (progress, progress >= finished_threshold)
    };
    Some(Status {
        title: metadata.title.clone(),
        series: metadata.series.clone(),
        episode_number: metadata.episode_number.clone(),
        progress,
        finished,
        current_time: handle.current_time,
        duration: handle.duration,
    })
}

/// Receives every computed status.
pub(crate) trait StatusSink {
    fn emit(&mut self, status: &Status, url: &str);
}

/// Host-side on-page widget showing the current status.
pub(crate) trait ProgressIndicator {
    fn set_status(&mut self, status: &Status);
    fn clear(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateMode {
    /// Driven by media events from a local element.
    Events,
    /// Driven by a fixed-interval poll; remote frames raise no events here.
    Polling,
}

#[derive(Debug)]
struct TrackingSession {
    url: String,
    metadata: EpisodeMetadata,
    mode: UpdateMode,
    poll_timer: Option<TimerId>,
    last_event_emit: Option<Duration>,
    last_status: Option<Status>,
}

#[derive(Debug)]
pub(crate) struct ProgressTracker {
    settings: ProgressSettings,
    session: Option<TrackingSession>,
}

impl ProgressTracker {
    pub(crate) fn new(settings: ProgressSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self) -> bool {
        self.session.is_some()
    }

    #[cfg(test)]
    pub(crate) fn mode(&self) -> Option<UpdateMode> {
        self.session.as_ref().map(|session| session.mode)
    }

    #[cfg(test)]
    pub(crate) fn last_status(&self) -> Option<&Status> {
        self.session
            .as_ref()
            .and_then(|session| session.last_status.as_ref())
    }

    pub(crate) fn on_source_ready(
        &mut self,
        handle: &VideoSourceHandle,
        metadata: EpisodeMetadata,
        url: &str,
        timers: &mut Scheduler,
    ) {
        self.teardown(timers);
        let mut session = TrackingSession {
            url: url.to_string(),
            metadata,
            mode: UpdateMode::Events,
            poll_timer: None,
            last_event_emit: None,
            last_status: None,
        };
        sync_mode(&mut session, handle.origin, self.settings.poll_interval, timers);
        debug!(
            "tracking `{}` episode {} in {:?} mode",
            session.metadata.series, session.metadata.episode_number, session.mode
        );
        self.session = Some(session);
    }

    /// Re-reads the current source and emits a fresh status when one can be computed.
    pub(crate) fn tick(
        &mut self,
        source: TickSource,
        reconciler: &mut SourceReconciler,
        ctx: &mut HostContext<'_>,
        sink: &mut dyn StatusSink,
    ) -> Option<Status> {
        let Some(session) = self.session.as_mut() else {
            trace!("progress tick {source:?} ignored; nothing is being tracked");
            return None;
        };
        let now = ctx.now();

        if let TickSource::Event(event) = source
            && event != MediaEvent::Ended
            && let Some(last) = session.last_event_emit
            && now.saturating_sub(last) < self.settings.event_debounce
        {
            trace!("{event:?} debounced");
            return None;
        }

        let Some(handle) = reconciler.resolve(ctx) else {
            debug!("progress tick {source:?}: no video source available");
            return None;
        };
        sync_mode(session, handle.origin, self.settings.poll_interval, ctx.timers);

        let end_of_media = source == TickSource::Event(MediaEvent::Ended);
        let Some(status) = compute_status(
            &handle,
            &session.metadata,
            end_of_media,
            self.settings.finished_threshold,
        ) else {
            debug!("progress tick {source:?}: duration not known yet");
            return None;
        };

        if matches!(source, TickSource::Event(_)) {
            session.last_event_emit = Some(now);
        }
        sink.emit(&status, &session.url);
        session.last_status = Some(status.clone());
        Some(status)
    }

    pub(crate) fn teardown(&mut self, timers: &mut Scheduler) {
        if let Some(session) = self.session.take()
            && let Some(timer) = session.poll_timer
        {
            timers.cancel(timer);
        }
    }
}

fn sync_mode(
    session: &mut TrackingSession,
    origin: SourceOrigin,
    poll_interval: Duration,
    timers: &mut Scheduler,
) {
    let wanted = match origin {
        SourceOrigin::Local => UpdateMode::Events,
        SourceOrigin::RemoteFrame => UpdateMode::Polling,
    };
    match (wanted, session.poll_timer) {
        (UpdateMode::Polling, None) => {
            session.poll_timer = Some(timers.schedule_repeating(TimerKind::ProgressPoll, poll_interval));
        }
        (UpdateMode::Events, Some(timer)) => {
            timers.cancel(timer);
            session.poll_timer = None;
        }
        _ => {}
    }
    if session.mode != wanted {
        trace!("update mode {:?} -> {wanted:?}", session.mode);
        session.mode = wanted;
    }
}
