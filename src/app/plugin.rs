use log::{debug, info, trace};
use serde_json::Value;

use super::episode::extract_metadata;
use super::extension::ExtensionApi;
use super::page::FrameRef;
use super::scheduler::TimerKind;
use super::site::SiteProfile;
use super::source::{DiscoveryStep, HostContext, SourceReconciler};
use super::tracking::{
    MediaEvent, ProgressIndicator, ProgressOutlet, ProgressTracker, Status, TickSource,
};
use crate::settings::TrackerSettings;

/// Lifecycle and callbacks the host drives a content-script plugin through.
pub(crate) trait Plugin {
    fn name(&self) -> &str;
    fn matches(&self, url: &str) -> bool;
    fn on_load(&mut self, api: Box<dyn ExtensionApi>);
    /// Safe to call repeatedly; leaves no timers behind.
    fn on_unload(&mut self, ctx: &mut HostContext<'_>);
    fn on_page_match(&mut self, url: &str, ctx: &mut HostContext<'_>);
    /// The page moved to a url this plugin does not handle. The plugin stays loaded.
    fn on_page_leave(&mut self, ctx: &mut HostContext<'_>);
    fn track_progress(&mut self, url: &str, ctx: &mut HostContext<'_>) -> Option<Status>;
    fn on_timer(&mut self, kind: TimerKind, ctx: &mut HostContext<'_>);
    fn on_frame_message(&mut self, from: &FrameRef, message: &Value, ctx: &mut HostContext<'_>);
    fn on_media_event(&mut self, event: MediaEvent, ctx: &mut HostContext<'_>);
}

struct PageSession {
    url: String,
    reconciler: SourceReconciler,
    tracker: ProgressTracker,
}

/// Tracks episode progress on one site profile.
pub(crate) struct WatchPlugin {
    profile: SiteProfile,
    settings: TrackerSettings,
    outlet: ProgressOutlet,
    session: Option<PageSession>,
}

impl WatchPlugin {
    pub(crate) fn new(
        profile: SiteProfile,
        settings: TrackerSettings,
        indicator: Box<dyn ProgressIndicator>,
    ) -> Self {
        let outlet = ProgressOutlet::new(&profile.name, indicator);
        Self {
            profile,
            settings,
            outlet,
            session: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn current_url(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.url.as_str())
    }

    #[cfg(test)]
    pub(crate) fn is_tracking(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.tracker.is_active())
    }

    pub(crate) fn discovery_exhausted(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.reconciler.discovery().exhausted)
    }

    fn teardown_session(&mut self, ctx: &mut HostContext<'_>) {
        if let Some(mut session) = self.session.take() {
            session.reconciler.teardown(ctx.timers);
            session.tracker.teardown(ctx.timers);
            debug!("stopped tracking {}", session.url);
        }
    }

    fn on_discovery_tick(&mut self, ctx: &mut HostContext<'_>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.reconciler.on_discovery_tick(ctx) {
            DiscoveryStep::Found { handle, url } => {
                let metadata = extract_metadata(ctx.page.document(), &self.profile, &url);
                info!(
                    "tracking {} episode {} on {}",
                    metadata.series, metadata.episode_number, self.profile.name
                );
                session
                    .tracker
                    .on_source_ready(&handle, metadata, &url, ctx.timers);
                session.tracker.tick(
                    TickSource::Forced,
                    &mut session.reconciler,
                    ctx,
                    &mut self.outlet,
                );
            }
            DiscoveryStep::Exhausted => {
                self.outlet.clear_indicator();
            }
            DiscoveryStep::Retrying { .. } | DiscoveryStep::Inactive => {}
        }
    }
}

impl Plugin for WatchPlugin {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn matches(&self, url: &str) -> bool {
        self.profile.matches(url)
    }

    fn on_load(&mut self, api: Box<dyn ExtensionApi>) {
        self.outlet.attach(api);
        debug!("plugin `{}` loaded", self.profile.name);
    }

    fn on_unload(&mut self, ctx: &mut HostContext<'_>) {
        self.teardown_session(ctx);
        self.outlet.clear_indicator();
        if self.outlet.detach().is_some() {
            debug!("plugin `{}` unloaded", self.profile.name);
        }
    }

    fn on_page_match(&mut self, url: &str, ctx: &mut HostContext<'_>) {
        if !self.profile.matches(url) {
            debug!("`{}` ignores page match for {url}", self.profile.name);
            return;
        }
        self.teardown_session(ctx);
        self.outlet.reset_session();
        self.outlet.clear_indicator();

        let mut reconciler = SourceReconciler::new(self.profile.locators.clone(), &self.settings);
        reconciler.start_discovery(url, ctx.timers);
        self.session = Some(PageSession {
            url: url.to_string(),
            reconciler,
            tracker: ProgressTracker::new(self.settings.progress),
        });
        debug!("page matched `{}`: {url}", self.profile.name);
    }

    fn on_page_leave(&mut self, ctx: &mut HostContext<'_>) {
        self.teardown_session(ctx);
        self.outlet.clear_indicator();
    }

    fn track_progress(&mut self, url: &str, ctx: &mut HostContext<'_>) -> Option<Status> {
        let session = self.session.as_mut()?;
        if session.url != url {
            debug!("track_progress for {url} ignored; current page is {}", session.url);
            return None;
        }
        session.tracker.tick(
            TickSource::Forced,
            &mut session.reconciler,
            ctx,
            &mut self.outlet,
        )
    }

    fn on_timer(&mut self, kind: TimerKind, ctx: &mut HostContext<'_>) {
        match kind {
            TimerKind::DiscoveryTick => self.on_discovery_tick(ctx),
            TimerKind::BridgeRequest => {
                if let Some(session) = self.session.as_mut() {
                    session.reconciler.on_bridge_tick(ctx);
                }
            }
            TimerKind::ProgressPoll => {
                if let Some(session) = self.session.as_mut() {
                    session.tracker.tick(
                        TickSource::Timer,
                        &mut session.reconciler,
                        ctx,
                        &mut self.outlet,
                    );
                }
            }
        }
    }

    fn on_frame_message(&mut self, from: &FrameRef, message: &Value, ctx: &mut HostContext<'_>) {
        match self.session.as_mut() {
            Some(session) => {
                session
                    .reconciler
                    .on_frame_message(from, message, ctx.now());
            }
            None => trace!("message from frame `{from}` ignored; no page session"),
        }
    }

    fn on_media_event(&mut self, event: MediaEvent, ctx: &mut HostContext<'_>) {
        if let Some(session) = self.session.as_mut() {
            session.tracker.tick(
                TickSource::Event(event),
                &mut session.reconciler,
                ctx,
                &mut self.outlet,
            );
        }
    }
}
