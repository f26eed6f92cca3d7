use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct TimerId(u64);

/// What a timer wakes up. The plugin dispatches on this instead of storing callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    DiscoveryTick,
    BridgeRequest,
    ProgressPoll,
}

#[derive(Debug, Clone)]
struct Timer {
    id: TimerId,
    kind: TimerKind,
    due: Duration,
    interval: Option<Duration>,
}

/// Single-threaded timer queue over virtual time.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    now: Duration,
    next_id: u64,
    timers: Vec<Timer>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn now(&self) -> Duration {
        self.now
    }

    pub(crate) fn schedule_once(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        self.push(kind, self.now + delay, None)
    }

    /// First fire is one `interval` from now.
    pub(crate) fn schedule_repeating(&mut self, kind: TimerKind, interval: Duration) -> TimerId {
        // A zero interval would spin the loop at a single instant.
        let interval = interval.max(Duration::from_millis(1));
        self.push(kind, self.now + interval, Some(interval))
    }

    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|timer| timer.id != id);
        self.timers.len() != before
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self, id: TimerId) -> bool {
        self.timers.iter().any(|timer| timer.id == id)
    }

    #[cfg(test)]
    pub(crate) fn active_count(&self) -> usize {
        self.timers.len()
    }

    pub(crate) fn next_due(&self) -> Option<Duration> {
        self.timers.iter().map(|timer| timer.due).min()
    }

    /// Moves the clock forward without firing anything. Never moves it backwards.
    pub(crate) fn advance_to(&mut self, at: Duration) {
        if at > self.now {
            self.now = at;
        }
    }

    /// Pops the earliest timer due at or before `until`, advancing the clock to its due time.
    /// Repeating timers are re-armed before they are returned.
    pub(crate) fn pop_due(&mut self, until: Duration) -> Option<(TimerId, TimerKind)> {
        let idx = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.due <= until)
            .min_by_key(|(_, timer)| (timer.due, timer.id))
            .map(|(idx, _)| idx)?;

        let Timer {
            id,
            kind,
            due,
            interval,
        } = self.timers[idx].clone();
        self.now = self.now.max(due);
        match interval {
            Some(interval) => self.timers[idx].due = due + interval,
            None => {
                self.timers.swap_remove(idx);
            }
        }
        Some((id, kind))
    }

    fn push(&mut self, kind: TimerKind, due: Duration, interval: Option<Duration>) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.push(Timer {
            id,
            kind,
            due,
            interval,
        });
        id
    }
}
