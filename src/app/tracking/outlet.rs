use std::collections::HashSet;

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::json;

use super::super::extension::ExtensionApi;
use super::record::{ProgressRecord, progress_key};
use super::{ProgressIndicator, Status, StatusSink};

/// Delivers statuses to the on-page indicator, extension storage and the broadcast channel.
/// Storage and broadcast failures are logged and never reach the caller.
pub(crate) struct ProgressOutlet {
    site: String,
    api: Option<Box<dyn ExtensionApi>>,
    indicator: Box<dyn ProgressIndicator>,
    resumed: HashSet<String>,
}

impl ProgressOutlet {
    pub(crate) fn new(site: &str, indicator: Box<dyn ProgressIndicator>) -> Self {
        Self {
            site: site.to_string(),
            api: None,
            indicator,
            resumed: HashSet::new(),
        }
    }

    pub(crate) fn attach(&mut self, api: Box<dyn ExtensionApi>) {
        self.api = Some(api);
    }

    pub(crate) fn detach(&mut self) -> Option<Box<dyn ExtensionApi>> {
        self.api.take()
    }

    /// Forget which episodes already logged their resume point.
    pub(crate) fn reset_session(&mut self) {
        self.resumed.clear();
    }

    pub(crate) fn clear_indicator(&mut self) {
        self.indicator.clear();
    }

    fn log_resume_point(api: &mut dyn ExtensionApi, key: &str) {
        match api.storage_get(key) {
            Ok(Some(previous)) => {
                let progress = previous.get("progress").and_then(|value| value.as_f64());
                let current_time = previous.get("currentTime").and_then(|value| value.as_f64());
                match (progress, current_time) {
                    (Some(progress), Some(current_time)) => {
                        info!("resuming {key}: previously {progress:.1}% at {current_time:.0}s");
                    }
                    _ => debug!("stored progress for {key} has an unexpected shape"),
                }
            }
            Ok(None) => debug!("no stored progress for {key}"),
            Err(err) => warn!("failed to read stored progress for {key}: {err:#}"),
        }
    }
}

impl StatusSink for ProgressOutlet {
    fn emit(&mut self, status: &Status, url: &str) {
        self.indicator.set_status(status);

        let Some(api) = self.api.as_deref_mut() else {
            debug!("extension api not loaded; progress not persisted");
            return;
        };
        let key = progress_key(&self.site, &status.series, &status.episode_number);
        if self.resumed.insert(key.clone()) {
            Self::log_resume_point(api, &key);
        }

        let record = ProgressRecord::from_status(status, url, Utc::now());
        let value = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(err) => {
                warn!("failed to encode progress for {key}: {err}");
                return;
            }
        };
        if let Err(err) = api.storage_set(&key, &value) {
            warn!("failed to persist progress for {key}: {err:#}");
        }
        let message = json!({ "type": "progress", "key": key, "status": value });
        if let Err(err) = api.send_message(&message) {
            warn!("failed to broadcast progress for {key}: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use anyhow::{Result, anyhow};
    use serde_json::Value;

    use super::*;

    #[derive(Default)]
    struct Calls {
        gets: Vec<String>,
        sets: Vec<(String, Value)>,
        messages: Vec<Value>,
        indicator: Vec<f64>,
    }

    struct FakeApi {
        calls: Rc<RefCell<Calls>>,
        fail_writes: bool,
    }

    impl ExtensionApi for FakeApi {
        fn storage_get(&mut self, key: &str) -> Result<Option<Value>> {
            self.calls.borrow_mut().gets.push(key.to_string());
            Ok(None)
        }

        fn storage_set(&mut self, key: &str, value: &Value) -> Result<()> {
            if self.fail_writes {
                return Err(anyhow!("quota exceeded"));
            }
            self.calls.borrow_mut().sets.push((key.to_string(), value.clone()));
            Ok(())
        }

        fn storage_remove(&mut self, _key: &str) -> Result<bool> {
            Ok(false)
        }

        fn send_message(&mut self, message: &Value) -> Result<()> {
            if self.fail_writes {
                return Err(anyhow!("no listeners"));
            }
            self.calls.borrow_mut().messages.push(message.clone());
            Ok(())
        }
    }

    struct FakeIndicator(Rc<RefCell<Calls>>);

    impl ProgressIndicator for FakeIndicator {
        fn set_status(&mut self, status: &Status) {
            self.0.borrow_mut().indicator.push(status.progress);
        }

        fn clear(&mut self) {}
    }

    fn status(progress: f64) -> Status {
        Status {
            title: "Show Episode 2".to_string(),
            series: "Show".to_string(),
            episode_number: "2".to_string(),
            progress,
            finished: progress >= 90.0,
            current_time: progress * 6.0,
            duration: 600.0,
        }
    }

    fn outlet(fail_writes: bool) -> (ProgressOutlet, Rc<RefCell<Calls>>) {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let mut outlet = ProgressOutlet::new("demo", Box::new(FakeIndicator(calls.clone())));
        outlet.attach(Box::new(FakeApi {
            calls: calls.clone(),
            fail_writes,
        }));
        (outlet, calls)
    }

    #[test]
    fn emit_persists_and_broadcasts_under_the_progress_key() {
        let (mut outlet, calls) = outlet(false);
        outlet.emit(&status(25.0), "https://demo.example/show/2");
        outlet.emit(&status(30.0), "https://demo.example/show/2");

        let calls = calls.borrow();
        assert_eq!(calls.gets, vec!["demo_progress_Show_2".to_string()]);
        assert_eq!(calls.sets.len(), 2);
        assert_eq!(calls.sets[1].1["progress"], 30.0);
        assert_eq!(calls.sets[1].1["url"], "https://demo.example/show/2");
        assert_eq!(calls.messages[0]["type"], "progress");
        assert_eq!(calls.messages[0]["key"], "demo_progress_Show_2");
        assert_eq!(calls.indicator, vec![25.0, 30.0]);
    }

    #[test]
    fn storage_failures_are_swallowed() {
        let (mut outlet, calls) = outlet(true);
        outlet.emit(&status(50.0), "https://demo.example/show/2");
        let calls = calls.borrow();
        assert!(calls.sets.is_empty());
        assert_eq!(calls.indicator, vec![50.0]);
    }

    #[test]
    fn without_api_only_the_indicator_updates() {
        let calls = Rc::new(RefCell::new(Calls::default()));
        let mut outlet = ProgressOutlet::new("demo", Box::new(FakeIndicator(calls.clone())));
        outlet.emit(&status(10.0), "https://demo.example/show/2");
        assert_eq!(calls.borrow().indicator, vec![10.0]);
        assert!(outlet.detach().is_none());
    }
}
