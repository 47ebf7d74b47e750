use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::canonical::{canonicalize, host_of, path_of};
use crate::model::{Endpoint, Page, Site, Sink, WatchFrequency};
use crate::novelty::{self, NoveltyState};
use crate::reconcile::WatchSet;
use crate::seen_store::{SeenNamespace, SeenStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SitePhase {
    #[default]
    Collapsed,
    Expanding,
    Expanded,
    Refreshing,
}

impl SitePhase {
    pub fn is_open(self) -> bool {
        !matches!(self, Self::Collapsed)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardView {
    pub query: String,
    pub sites: Vec<SiteView>,
    pub sites_error: Option<String>,
    pub selected_site: Option<String>,
    pub alerts: Option<AlertsView>,
}

impl DashboardView {
    pub fn site(&self, site_id: &str) -> Option<&SiteView> {
        self.sites.iter().find(|site| site.id == site_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteView {
    pub id: String,
    pub hosts: Vec<String>,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub phase: SitePhase,
    pub novelty: NoveltyState,
    pub watched_count: usize,
    pub pending_watches: Vec<String>,
    pub groups: Vec<HostGroup>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostGroup {
    pub host: String,
    pub pages: Vec<PageView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
    pub path: String,
    pub url_norm: String,
    pub scanned_at: Option<DateTime<Utc>>,
    pub is_new: bool,
    pub watch: Option<WatchBadge>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchBadge {
    pub freq_min: u32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub has_unseen_change: bool,
}

impl WatchBadge {
    pub fn freq_label(&self) -> String {
        WatchFrequency::from_minutes(self.freq_min)
            .map(|freq| freq.label().to_owned())
            .unwrap_or_else(|| format!("{}m", self.freq_min))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertsView {
    pub site_id: String,
    pub sinks: Vec<Sink>,
    pub assets: Vec<Endpoint>,
}

/// Case-insensitive substring match over site id and hosts.
pub fn filter_sites<'a>(sites: &'a [Site], query: &str) -> Vec<&'a Site> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return sites.iter().collect();
    }
    sites
        .iter()
        .filter(|site| {
            site.id.to_lowercase().contains(&query)
                || site.hosts.join(" ").to_lowercase().contains(&query)
        })
        .collect()
}

/// Groups pages by host (hosts and paths sorted) and annotates each with its
/// novelty and watch badge.
pub fn group_pages_by_host(
    pages: &[Page],
    watches: Option<&WatchSet>,
    seen: &SeenStore,
) -> Vec<HostGroup> {
    let mut by_host: BTreeMap<String, Vec<PageView>> = BTreeMap::new();
    for page in pages {
        let raw = if page.url_norm.is_empty() {
            page.url.as_deref().unwrap_or_default()
        } else {
            page.url_norm.as_str()
        };
        let url_norm = canonicalize(raw);
        let host = if page.host.is_empty() {
            host_of(raw).unwrap_or_default()
        } else {
            page.host.clone()
        };
        let path = if page.path.is_empty() {
            path_of(raw)
        } else {
            page.path.clone()
        };

        let baseline = seen.get(SeenNamespace::Pages, &url_norm);
        let watch = watches.and_then(|set| set.get(&url_norm)).map(|watch| WatchBadge {
            freq_min: watch.freq_min,
            next_run_at: watch.next_run_at,
            has_unseen_change: novelty::watch_has_unseen_change(watch, baseline),
        });

        by_host.entry(host).or_default().push(PageView {
            path,
            scanned_at: page.scanned_at,
            is_new: novelty::page_is_new(page, baseline),
            url_norm,
            watch,
        });
    }

    by_host
        .into_iter()
        .map(|(host, mut pages)| {
            pages.sort_by(|a, b| a.path.cmp(&b.path));
            HostGroup { host, pages }
        })
        .collect()
}

/// `42s ago`, `5m ago`, `3h ago`, `2d ago`.
pub fn time_ago(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds().max(0);
    if secs < 60 {
        return format!("{secs}s ago");
    }
    let mins = secs / 60;
    if mins < 60 {
        return format!("{mins}m ago");
    }
    let hours = mins / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    format!("{}d ago", hours / 24)
}

/// Countdown until `at`: `now`, `12m`, `3h 5m`, `2d 4h`.
pub fn time_until(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (at - now).num_seconds();
    if secs <= 0 {
        return "now".to_owned();
    }
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let mins = (secs % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else {
        format!("{mins}m")
    }
}
