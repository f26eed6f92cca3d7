use url::Url;

use crate::settings::SiteFileConfig;

pub(crate) const GENERIC_SITE: &str = "generic";

/// How one streaming site is recognised and where its player and labels live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SiteProfile {
    pub(crate) name: String,
    /// Exact hosts, `*.domain` wildcards, or `*` for any host.
    pub(crate) hosts: Vec<String>,
    pub(crate) path_prefix: Option<String>,
    pub(crate) locators: Vec<String>,
    pub(crate) title_selector: Option<String>,
    pub(crate) series_selector: Option<String>,
    pub(crate) episode_selector: Option<String>,
}

impl SiteProfile {
    pub(crate) fn generic() -> Self {
        Self {
            name: GENERIC_SITE.to_string(),
            hosts: vec!["*".to_string()],
            path_prefix: None,
            locators: vec!["video".to_string()],
            title_selector: None,
            series_selector: None,
            episode_selector: None,
        }
    }

    pub(crate) fn from_config(site: SiteFileConfig) -> Self {
        let locators = if site.locators.is_empty() {
            vec!["video".to_string()]
        } else {
            site.locators
        };
        Self {
            name: site.name.trim().to_string(),
            hosts: site
                .hosts
                .into_iter()
                .map(|host| host.trim().to_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
            path_prefix: site.path_prefix.filter(|prefix| !prefix.is_empty()),
            locators,
            title_selector: site.title_selector,
            series_selector: site.series_selector,
            episode_selector: site.episode_selector,
        }
    }

    pub(crate) fn matches(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        if !self.hosts.iter().any(|pattern| host_matches(pattern, &host)) {
            return false;
        }
        self.path_prefix
            .as_deref()
            .is_none_or(|prefix| parsed.path().starts_with(prefix))
    }
}

fn host_matches(pattern: &str, host: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(domain) = pattern.strip_prefix("*.") {
        return host == domain || host.ends_with(&format!(".{domain}"));
    }
    pattern == host
}

/// Configured sites first, in file order, then the catch-all profile.
pub(crate) fn build_profiles(sites: &[SiteFileConfig]) -> Vec<SiteProfile> {
    let mut profiles: Vec<SiteProfile> = sites
        .iter()
        .cloned()
        .map(SiteProfile::from_config)
        .collect();
    if !profiles.iter().any(|profile| profile.name == GENERIC_SITE) {
        profiles.push(SiteProfile::generic());
    }
    profiles
}

pub(crate) fn profile_for_url<'a>(profiles: &'a [SiteProfile], url: &str) -> Option<&'a SiteProfile> {
    profiles.iter().find(|profile| profile.matches(url))
}

pub(crate) fn profile_by_name<'a>(profiles: &'a [SiteProfile], name: &str) -> Option<&'a SiteProfile> {
    profiles
        .iter()
        .find(|profile| profile.name.eq_ignore_ascii_case(name))
}
