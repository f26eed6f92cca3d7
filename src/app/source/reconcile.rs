use std::time::Duration;

use log::{debug, info};
use serde_json::Value;

use super::super::page::FrameRef;
use super::super::scheduler::{Scheduler, TimerId, TimerKind};
use super::{HostContext, LocalProbe, RemoteFrameBridge, VideoProbe, VideoSourceHandle};
use crate::settings::{DiscoverySettings, TrackerSettings};

/// Bounded retry policy for discovery ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RetryPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) fast_attempts: u32,
    pub(crate) fast_delay: Duration,
    pub(crate) slow_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the tick that follows failed attempt number `attempts`.
    pub(crate) fn delay_after(&self, attempts: u32) -> Duration {
        if attempts <= self.fast_attempts {
            self.fast_delay
        } else {
            self.slow_delay
        }
    }
}

impl From<DiscoverySettings> for RetryPolicy {
    fn from(settings: DiscoverySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            fast_attempts: settings.fast_attempts,
            fast_delay: settings.fast_delay,
            slow_delay: settings.slow_delay,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DiscoveryState {
    pub(crate) attempts: u32,
    pub(crate) max_attempts: u32,
    pub(crate) last_result: Option<VideoSourceHandle>,
    pub(crate) exhausted: bool,
}

impl DiscoveryState {
    fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }
}

/// Outcome of one discovery tick.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DiscoveryStep {
    Found {
        handle: VideoSourceHandle,
        url: String,
    },
    Retrying {
        attempts: u32,
        delay: Duration,
    },
    Exhausted,
    /// Tick arrived with no discovery running.
    Inactive,
}

/// Single source of truth for the current video: local DOM first, remote frame second.
#[derive(Debug)]
pub(crate) struct SourceReconciler {
    local: LocalProbe,
    remote: RemoteFrameBridge,
    policy: RetryPolicy,
    discovery: DiscoveryState,
    discovery_timer: Option<TimerId>,
    url: Option<String>,
}

impl SourceReconciler {
    pub(crate) fn new(locators: Vec<String>, settings: &TrackerSettings) -> Self {
        let policy = RetryPolicy::from(settings.discovery);
        Self {
            local: LocalProbe::new(locators, settings.max_frame_depth),
            remote: RemoteFrameBridge::new(settings.bridge),
            policy,
            discovery: DiscoveryState::new(policy.max_attempts),
            discovery_timer: None,
            url: None,
        }
    }

    pub(crate) fn discovery(&self) -> &DiscoveryState {
        &self.discovery
    }

    #[cfg(test)]
    pub(crate) fn bridge(&self) -> &RemoteFrameBridge {
        &self.remote
    }

    #[cfg(test)]
    pub(crate) fn is_discovering(&self) -> bool {
        self.discovery_timer.is_some()
    }

    /// Local always wins; the remote bridge only covers what the local walk cannot reach.
    pub(crate) fn resolve(&mut self, ctx: &mut HostContext<'_>) -> Option<VideoSourceHandle> {
        let scan = self.local.scan(ctx.page.document(), self.local.max_depth());
        if let Some(handle) = scan.handle {
            if self.remote.has_active_session() {
                debug!("local video found; stopping remote bridge");
                self.remote.teardown(ctx.timers);
            }
            return Some(handle);
        }
        self.ensure_bridge_session(&scan.cross_origin_frames, ctx);
        self.remote.probe(ctx)
    }

    fn ensure_bridge_session(&mut self, candidates: &[FrameRef], ctx: &mut HostContext<'_>) {
        let Some(first) = candidates.first() else {
            return;
        };
        let current_still_present = self
            .remote
            .frame()
            .is_some_and(|frame| candidates.contains(frame));
        if current_still_present {
            return;
        }
        match self.remote.last_target() {
            Some(previous) if previous == first => {
                debug!("restarting remote bridge for frame `{first}`");
            }
            Some(previous) => debug!("re-targeting remote bridge from `{previous}` to `{first}`"),
            None => {}
        }
        self.remote.begin_session(first.clone(), ctx);
    }

    pub(crate) fn start_discovery(&mut self, url: &str, timers: &mut Scheduler) {
        self.cancel_discovery(timers);
        self.discovery = DiscoveryState::new(self.policy.max_attempts);
        self.url = Some(url.to_string());
        self.discovery_timer = Some(timers.schedule_once(TimerKind::DiscoveryTick, Duration::ZERO));
    }

    pub(crate) fn on_discovery_tick(&mut self, ctx: &mut HostContext<'_>) -> DiscoveryStep {
        if self.discovery_timer.take().is_none() {
            return DiscoveryStep::Inactive;
        }
        let Some(url) = self.url.clone() else {
            return DiscoveryStep::Inactive;
        };

        if let Some(handle) = self.resolve(ctx) {
            self.discovery.attempts = 0;
            self.discovery.last_result = Some(handle);
            info!("video source found for {url} ({:?})", handle.origin);
            return DiscoveryStep::Found { handle, url };
        }

        self.discovery.attempts += 1;
        let attempts = self.discovery.attempts;
        if attempts >= self.discovery.max_attempts {
            self.discovery.exhausted = true;
            self.remote.teardown(ctx.timers);
            info!("no video source for {url} after {attempts} attempts; page left untracked");
            return DiscoveryStep::Exhausted;
        }

        let delay = self.policy.delay_after(attempts);
        debug!("no video source yet for {url} (attempt {attempts}); retrying in {delay:?}");
        self.discovery_timer = Some(ctx.timers.schedule_once(TimerKind::DiscoveryTick, delay));
        DiscoveryStep::Retrying { attempts, delay }
    }

    pub(crate) fn on_bridge_tick(&mut self, ctx: &mut HostContext<'_>) {
        self.remote.on_request_tick(ctx);
    }

    pub(crate) fn on_frame_message(&mut self, from: &FrameRef, raw: &Value, now: Duration) -> bool {
        self.remote.on_message(from, raw, now)
    }

    fn cancel_discovery(&mut self, timers: &mut Scheduler) {
        if let Some(timer) = self.discovery_timer.take() {
            timers.cancel(timer);
        }
    }

    pub(crate) fn teardown(&mut self, timers: &mut Scheduler) {
        self.cancel_discovery(timers);
        self.remote.teardown(timers);
        self.url = None;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::app::page::{
        Document, FrameAccessError, FrameOrigin, Page, StaticDocument, VideoElement,
    };
    use crate::app::source::{BridgeState, SourceOrigin};

    #[derive(Default)]
    struct TestPage {
        document: StaticDocument,
        posted: usize,
    }

    impl Page for TestPage {
        fn document(&self) -> &dyn Document {
            &self.document
        }

        fn post_message(&mut self, _frame: &FrameRef, _message: &Value) -> Result<(), FrameAccessError> {
            self.posted += 1;
            Ok(())
        }
    }

    fn settings(max_attempts: u32) -> TrackerSettings {
        let mut settings = TrackerSettings::default();
        settings.discovery.max_attempts = max_attempts;
        settings.discovery.fast_attempts = 2;
        settings
    }

    fn local_video(current_time: f64, duration: f64) -> VideoElement {
        VideoElement {
            current_time,
            duration: Some(duration),
            paused: false,
            ready_state: 4,
            src: None,
        }
    }

    fn remote_page() -> TestPage {
        TestPage {
            document: StaticDocument::default().with_frame(
                "player",
                FrameOrigin::CrossOrigin {
                    video: None,
                    cooperative: true,
                    reply_override: None,
                },
            ),
            posted: 0,
        }
    }

    fn report(curr_time: f64, dur: f64) -> Value {
        json!({ "iFrameVideoData": { "iFrameVideo": true, "currTime": curr_time, "dur": dur, "paused": false } })
    }

    #[test]
    fn retry_policy_switches_to_slow_delay() {
        let policy = RetryPolicy::from(settings(10).discovery);
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(500));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
    }

    #[test]
    fn local_source_wins_over_fresh_remote_report() {
        let mut page = remote_page();
        page.document.set_video("video", local_video(30.0, 600.0));
        let mut timers = Scheduler::new();
        let mut reconciler = SourceReconciler::new(vec!["video".to_string()], &settings(5));

        // Prime the bridge directly so both sources have data.
        reconciler.remote.begin_session(
            FrameRef::new("player"),
            &mut HostContext {
                page: &mut page,
                timers: &mut timers,
            },
        );
        assert!(reconciler.on_frame_message(&FrameRef::new("player"), &report(99.0, 1440.0), Duration::ZERO));

        let handle = reconciler
            .resolve(&mut HostContext {
                page: &mut page,
                timers: &mut timers,
            })
            .expect("a source should resolve");
        assert_eq!(handle.origin, SourceOrigin::Local);
        assert_eq!(handle.current_time, 30.0);
    }

    #[test]
    fn local_video_stops_an_open_bridge_session() {
        let mut page = remote_page();
        let mut timers = Scheduler::new();
        let mut reconciler = SourceReconciler::new(vec!["video".to_string()], &settings(5));

        let first = reconciler.resolve(&mut HostContext {
            page: &mut page,
            timers: &mut timers,
        });
        assert!(first.is_none());
        assert_eq!(timers.active_count(), 1);

        page.document.set_video("video", local_video(5.0, 600.0));
        let handle = reconciler
            .resolve(&mut HostContext {
                page: &mut page,
                timers: &mut timers,
            })
            .expect("local video should resolve");
        assert_eq!(handle.origin, SourceOrigin::Local);
        assert_eq!(timers.active_count(), 0);
        assert_eq!(reconciler.bridge().state(), BridgeState::Idle);

        while let Some((_, kind)) = timers.pop_due(Duration::from_secs(60)) {
            assert_ne!(kind, TimerKind::BridgeRequest);
        }
        assert_eq!(page.posted, 1);
    }

    #[test]
    fn timed_out_bridge_restarts_against_the_same_frame() {
        let mut page = remote_page();
        let mut timers = Scheduler::new();
        let mut reconciler = SourceReconciler::new(vec!["video".to_string()], &settings(5));
        reconciler.resolve(&mut HostContext {
            page: &mut page,
            timers: &mut timers,
        });

        while let Some((_, TimerKind::BridgeRequest)) = timers.pop_due(Duration::from_secs(10)) {
            reconciler.on_bridge_tick(&mut HostContext {
                page: &mut page,
                timers: &mut timers,
            });
        }
        assert_eq!(reconciler.bridge().state(), BridgeState::TimedOut);
        assert_eq!(timers.active_count(), 0);
        let sent_before_restart = page.posted;

        let again = reconciler.resolve(&mut HostContext {
            page: &mut page,
            timers: &mut timers,
        });
        assert!(again.is_none());
        assert_eq!(reconciler.bridge().state(), BridgeState::RequestSent);
        assert_eq!(reconciler.bridge().frame(), Some(&FrameRef::new("player")));
        assert_eq!(page.posted, sent_before_restart + 1);
        assert_eq!(timers.active_count(), 1);
    }

    #[test]
    fn cross_origin_frame_starts_a_bridge_session_and_remote_report_resolves() {
        let mut page = remote_page();
        let mut timers = Scheduler::new();
        let mut reconciler = SourceReconciler::new(vec!["video".to_string()], &settings(5));

        let first = reconciler.resolve(&mut HostContext {
            page: &mut page,
            timers: &mut timers,
        });
        assert!(first.is_none());
        assert_eq!(page.posted, 1);
        assert_eq!(reconciler.bridge().state(), BridgeState::RequestSent);

        assert!(reconciler.on_frame_message(&FrameRef::new("player"), &report(60.0, 1200.0), Duration::ZERO));
        let handle = reconciler
            .resolve(&mut HostContext {
                page: &mut page,
                timers: &mut timers,
            })
            .expect("remote report should resolve");
        assert_eq!(handle.origin, SourceOrigin::RemoteFrame);
        // The existing session is reused, not restarted.
        assert_eq!(page.posted, 1);
    }

    #[test]
    fn discovery_stops_after_max_attempts() {
        let mut page = TestPage::default();
        let mut timers = Scheduler::new();
        let mut reconciler = SourceReconciler::new(vec!["video".to_string()], &settings(3));
        reconciler.start_discovery("https://site.example/watch/1", &mut timers);

        let mut steps = Vec::new();
        while let Some((_, kind)) = timers.pop_due(Duration::from_secs(60)) {
            assert_eq!(kind, TimerKind::DiscoveryTick);
            steps.push(reconciler.on_discovery_tick(&mut HostContext {
                page: &mut page,
                timers: &mut timers,
            }));
        }

        assert_eq!(
            steps,
            vec![
                DiscoveryStep::Retrying {
                    attempts: 1,
                    delay: Duration::from_millis(500)
                },
                DiscoveryStep::Retrying {
                    attempts: 2,
                    delay: Duration::from_millis(500)
                },
                DiscoveryStep::Exhausted,
            ]
        );
        assert!(reconciler.discovery().exhausted);
        assert_eq!(timers.active_count(), 0);
        assert!(!reconciler.is_discovering());
    }

    #[test]
    fn discovery_resets_attempts_once_a_video_appears() {
        let mut page = TestPage::default();
        let mut timers = Scheduler::new();
        let mut reconciler = SourceReconciler::new(vec!["video".to_string()], &settings(10));
        reconciler.start_discovery("https://site.example/watch/2", &mut timers);

        timers.pop_due(Duration::from_secs(60)).expect("first tick");
        let step = reconciler.on_discovery_tick(&mut HostContext {
            page: &mut page,
            timers: &mut timers,
        });
        assert!(matches!(step, DiscoveryStep::Retrying { attempts: 1, .. }));

        page.document.set_video("video", local_video(0.0, 600.0));
        timers.pop_due(Duration::from_secs(60)).expect("second tick");
        let step = reconciler.on_discovery_tick(&mut HostContext {
            page: &mut page,
            timers: &mut timers,
        });
        assert!(matches!(step, DiscoveryStep::Found { ref url, .. } if url == "https://site.example/watch/2"));
        assert_eq!(reconciler.discovery().attempts, 0);
        assert!(reconciler.discovery().last_result.is_some());
        assert_eq!(timers.active_count(), 0);
    }

    #[test]
    fn teardown_cancels_discovery_and_bridge_timers() {
        let mut page = remote_page();
        let mut timers = Scheduler::new();
        let mut reconciler = SourceReconciler::new(vec!["video".to_string()], &settings(10));
        reconciler.start_discovery("https://site.example/watch/3", &mut timers);
        timers.pop_due(Duration::ZERO).expect("immediate tick");
        reconciler.on_discovery_tick(&mut HostContext {
            page: &mut page,
            timers: &mut timers,
        });
        assert_eq!(timers.active_count(), 2);

        reconciler.teardown(&mut timers);
        reconciler.teardown(&mut timers);
        assert_eq!(timers.active_count(), 0);
        assert_eq!(
            reconciler.on_discovery_tick(&mut HostContext {
                page: &mut page,
                timers: &mut timers,
            }),
            DiscoveryStep::Inactive
        );
    }
}
