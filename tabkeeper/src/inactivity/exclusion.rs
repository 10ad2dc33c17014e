//! Which tabs are never suspended

use serde::{Deserialize, Serialize};
use url::Url;

use crate::platform::{is_internal_url, LiveTab};
use crate::settings::InactivitySettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    Active,
    Loading,
    Internal,
    Pinned,
    Audible,
    Discarded,
    ProtectedDomain,
}

/// First rule that keeps `tab` loaded, if any
pub fn exclusion_reason(tab: &LiveTab, settings: &InactivitySettings) -> Option<ExclusionReason> {
    if tab.active {
        Some(ExclusionReason::Active)
    } else if tab.is_loading() {
        Some(ExclusionReason::Loading)
    } else if is_internal_url(&tab.url) {
        Some(ExclusionReason::Internal)
    } else if tab.pinned && settings.exclude_pinned {
        Some(ExclusionReason::Pinned)
    } else if tab.audible && settings.exclude_audible {
        Some(ExclusionReason::Audible)
    } else if tab.discarded {
        Some(ExclusionReason::Discarded)
    } else if matches_protected_domain(&tab.url, &settings.protected_domains) {
        Some(ExclusionReason::ProtectedDomain)
    } else {
        None
    }
}

pub fn should_exclude_from_auto_close(tab: &LiveTab, settings: &InactivitySettings) -> bool {
    exclusion_reason(tab, settings).is_some()
}

/// Whether the URL's host matches any rule.
///
/// `example.com` matches that host only. `*.example.com` matches
/// `example.com` and every subdomain. URLs without a parseable host never
/// match.
pub fn matches_protected_domain(url: &str, rules: &[String]) -> bool {
    let Some(host) = host_of(url) else {
        return false;
    };
    rules.iter().any(|rule| rule_matches(&host, rule))
}

fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = normalize_host(parsed.host_str()?);
    (!host.is_empty()).then_some(host)
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

fn rule_matches(host: &str, rule: &str) -> bool {
    let rule = normalize_host(rule);
    match rule.strip_prefix("*.") {
        Some(base) if !base.is_empty() => {
            host == base
                || host
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        Some(_) => false,
        None => !rule.is_empty() && host == rule,
    }
}
