use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::canonical::canonicalize;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::{Gateway, WatchUpsert};
use crate::model::{DiscordSettings, Endpoint, ListQuery, Page, Sink, SinkKind, Site, Watch};
use crate::novelty::{AlertTimes, NoveltyState};
use crate::reconcile::{WatchReconciler, WatchSet};
use crate::seen_store::{SeenNamespace, SeenStore};
use crate::view::{self, AlertsView, DashboardView, SitePhase, SiteView};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub sites_limit: u32,
    pub pages_limit: u32,
    pub alerts_limit: u32,
    pub detail_limit: u32,
    pub watch_ttl: Duration,
    pub scan_refresh_attempts: u32,
    pub scan_refresh_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            sites_limit: config.sites_limit,
            pages_limit: config.pages_limit,
            alerts_limit: config.alerts_limit,
            detail_limit: config.detail_limit,
            watch_ttl: Duration::from_secs(config.watch_ttl_secs),
            scan_refresh_attempts: config.scan_refresh_attempts.max(1),
            scan_refresh_delay: Duration::from_millis(config.scan_refresh_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchToggle {
    Watched,
    Unwatched,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteDetail {
    pub pages: Vec<Page>,
    pub endpoints: Vec<Endpoint>,
    pub sinks: Vec<Sink>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Alerts {
    sinks: Vec<Sink>,
    assets: Vec<Endpoint>,
}

#[derive(Debug, Default)]
struct SiteEntry {
    phase: SitePhase,
    generation: u64,
    cancel: Option<CancellationToken>,
    pages: Option<Vec<Page>>,
    alerts: Alerts,
    alert_times: AlertTimes,
    watches_fetched_at: Option<Instant>,
    pending_watches: HashSet<String>,
    error: Option<String>,
}

impl SiteEntry {
    fn begin(&mut self, phase: SitePhase, parent: &CancellationToken) -> (u64, CancellationToken) {
        if let Some(previous) = self.cancel.take() {
            previous.cancel();
        }
        self.generation += 1;
        let token = parent.child_token();
        self.cancel = Some(token.clone());
        self.phase = phase;
        (self.generation, token)
    }

    fn is_current(&self, generation: u64, phase: SitePhase) -> bool {
        self.generation == generation && self.phase == phase
    }

    fn watches_stale(&self, ttl: Duration) -> bool {
        self.watches_fetched_at
            .is_none_or(|fetched_at| fetched_at.elapsed() >= ttl)
    }

    fn apply(&mut self, fetched: SiteFetch) {
        self.pages = Some(fetched.pages);
        match fetched.alerts {
            Some(alerts) => {
                self.alert_times = AlertTimes::from_alerts(&alerts.sinks, &alerts.assets);
                self.alerts = alerts;
            }
            None => {
                self.alert_times = AlertTimes::default();
                self.alerts = Alerts::default();
            }
        }
        if fetched.watches_complete {
            self.watches_fetched_at = Some(Instant::now());
        }
        self.error = (!fetched.errors.is_empty()).then(|| fetched.errors.join("; "));
        self.cancel = None;
        self.phase = SitePhase::Expanded;
    }
}

#[derive(Debug, Default)]
struct SessionState {
    sites: Vec<Site>,
    sites_error: Option<String>,
    query: String,
    entries: HashMap<String, SiteEntry>,
    selected_site: Option<String>,
}

#[derive(Debug)]
struct SiteFetch {
    pages: Vec<Page>,
    alerts: Option<Alerts>,
    watches_complete: bool,
    errors: Vec<String>,
}

enum WatchOp {
    Upsert(WatchUpsert),
    Delete(String),
    ScanNow(String),
}

impl WatchOp {
    fn key(&self) -> String {
        match self {
            Self::Upsert(upsert) => canonicalize(&upsert.url),
            Self::Delete(url_norm) | Self::ScanNow(url_norm) => canonicalize(url_norm),
        }
    }
}

/// Drives the dashboard: per-site expansion state, watch mutations and
/// acknowledgements, published as a [`DashboardView`].
pub struct SessionController {
    gateway: Arc<dyn Gateway>,
    seen: Arc<SeenStore>,
    reconciler: WatchReconciler,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    view_tx: watch::Sender<DashboardView>,
    shutdown: CancellationToken,
}

impl SessionController {
    pub fn new(gateway: Arc<dyn Gateway>, seen: Arc<SeenStore>, settings: SessionSettings) -> Self {
        let (view_tx, _) = watch::channel(DashboardView::default());
        Self {
            reconciler: WatchReconciler::new(Arc::clone(&gateway)),
            gateway,
            seen,
            settings,
            state: Mutex::new(SessionState::default()),
            view_tx,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.view_tx.subscribe()
    }

    pub fn view(&self) -> DashboardView {
        self.view_tx.borrow().clone()
    }

    pub fn seen(&self) -> &SeenStore {
        &self.seen
    }

    /// Cancels every in-flight fetch and stops the refresh loop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn phase(&self, site_id: &str) -> SitePhase {
        self.lock()
            .entries
            .get(site_id)
            .map(|entry| entry.phase)
            .unwrap_or_default()
    }

    pub fn novelty(&self, site_id: &str) -> NoveltyState {
        let times = self
            .lock()
            .entries
            .get(site_id)
            .map(|entry| entry.alert_times)
            .unwrap_or_default();
        times.state(self.seen.get(SeenNamespace::Sites, site_id))
    }

    pub fn is_watched(&self, site_id: &str, url_norm: &str) -> bool {
        self.reconciler.is_watched(site_id, url_norm)
    }

    pub fn watch_for(&self, site_id: &str, url_norm: &str) -> Option<Watch> {
        self.reconciler.watch_for(site_id, url_norm)
    }

    pub fn watches(&self, site_id: &str) -> Option<WatchSet> {
        self.reconciler.watch_set(site_id)
    }

    pub fn set_query(&self, query: &str) {
        self.lock().query = query.to_owned();
        self.publish();
    }

    pub async fn load_sites(&self) {
        if let Err(err) = self.try_load_sites().await {
            tracing::warn!(%err, "site list load failed");
            self.clear_sites(err.to_string());
        }
    }

    /// Reloads the site list after a scan, retrying to absorb backend
    /// indexing lag. Returns whether a load succeeded.
    pub async fn refresh_sites_with_retry(&self) -> bool {
        let attempts = self.settings.scan_refresh_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.try_load_sites().await {
                Ok(()) => return true,
                Err(err) => {
                    tracing::debug!(attempt, %err, "site list refresh failed");
                    last_err = Some(err);
                }
            }
            if attempt == attempts {
                break;
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.settings.scan_refresh_delay) => {}
            }
        }
        if let Some(err) = last_err {
            tracing::warn!(attempts, %err, "site list still unavailable after scan");
            self.clear_sites(err.to_string());
        }
        false
    }

    pub async fn toggle(&self, site_id: &str) {
        if self.phase(site_id).is_open() {
            self.collapse(site_id);
        } else {
            self.expand(site_id).await;
        }
    }

    /// Opens a site. The first expansion fetches pages, watches and alerts,
    /// then acknowledges the site; later ones reuse the cached data.
    pub async fn expand(&self, site_id: &str) {
        let started = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let entry = state.entries.entry(site_id.to_owned()).or_default();
            if entry.phase.is_open() {
                return;
            }
            state.selected_site = Some(site_id.to_owned());
            if entry.pages.is_some() {
                entry.phase = SitePhase::Expanded;
                None
            } else {
                Some(entry.begin(SitePhase::Expanding, &self.shutdown))
            }
        };
        self.publish();
        let Some((generation, token)) = started else {
            return;
        };

        let fetched = match self.fetch_until_cancelled(&token, site_id, true).await {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::debug!(site_id, cancelled = err.is_cancelled(), "expansion dropped");
                return;
            }
        };

        {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(site_id) else {
                return;
            };
            if !entry.is_current(generation, SitePhase::Expanding) {
                tracing::debug!(site_id, generation, "discarding stale expansion");
                return;
            }
            entry.apply(fetched);
        }

        self.acknowledge_site(site_id);
        tracing::debug!(site_id, "site expanded");
    }

    /// Closes a site, cancelling any fetch in flight. Cached data is kept.
    pub fn collapse(&self, site_id: &str) {
        {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(site_id) else {
                return;
            };
            if let Some(token) = entry.cancel.take() {
                token.cancel();
                entry.generation += 1;
            }
            entry.phase = SitePhase::Collapsed;
        }
        self.publish();
    }

    /// Re-fetches pages and alerts of an expanded site; watches only when
    /// the cached set is older than the configured TTL.
    pub async fn refresh(&self, site_id: &str) {
        let (generation, token, include_watches) = {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(site_id) else {
                return;
            };
            if entry.phase != SitePhase::Expanded {
                return;
            }
            let include_watches = entry.watches_stale(self.settings.watch_ttl);
            let (generation, token) = entry.begin(SitePhase::Refreshing, &self.shutdown);
            (generation, token, include_watches)
        };
        self.publish();

        let fetched = match self.fetch_until_cancelled(&token, site_id, include_watches).await {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::debug!(site_id, cancelled = err.is_cancelled(), "refresh dropped");
                return;
            }
        };

        {
            let mut state = self.lock();
            let Some(entry) = state.entries.get_mut(site_id) else {
                return;
            };
            if !entry.is_current(generation, SitePhase::Refreshing) {
                tracing::debug!(site_id, generation, "discarding stale refresh");
                return;
            }
            entry.apply(fetched);
        }
        self.publish();
    }

    /// Fetches the alert summary of a site without expanding or
    /// acknowledging it. A failed fetch leaves the site at `none`. Sites
    /// with an expansion or refresh in flight keep their current summary.
    pub async fn load_status(&self, site_id: &str) -> NoveltyState {
        let alerts = self.fetch_alerts(site_id).await;
        {
            let mut state = self.lock();
            let entry = state.entries.entry(site_id.to_owned()).or_default();
            match alerts {
                _ if entry.cancel.is_some() => {
                    tracing::debug!(site_id, "fetch in flight, status result dropped");
                }
                Ok(alerts) => {
                    entry.alert_times = AlertTimes::from_alerts(&alerts.sinks, &alerts.assets);
                    entry.alerts = alerts;
                }
                Err(err) => {
                    tracing::warn!(site_id, %err, "alert summary load failed");
                    entry.alert_times = AlertTimes::default();
                }
            }
        }
        self.publish();
        self.novelty(site_id)
    }

    /// Status of every listed site, fetched concurrently.
    pub async fn load_statuses(&self) {
        let site_ids: Vec<String> = self.lock().sites.iter().map(|site| site.id.clone()).collect();
        futures::future::join_all(site_ids.iter().map(|site_id| self.load_status(site_id))).await;
    }

    /// One timer tick: reload the site list, refresh every expanded site and
    /// re-read the alert summary of the collapsed ones. Sites still expanding
    /// or refreshing are left to their own fetch.
    pub async fn refresh_all(&self) {
        self.load_sites().await;
        let (expanded, collapsed) = {
            let state = self.lock();
            let mut expanded = Vec::new();
            let mut collapsed = Vec::new();
            for site in &state.sites {
                let phase = state
                    .entries
                    .get(&site.id)
                    .map_or(SitePhase::Collapsed, |entry| entry.phase);
                match phase {
                    SitePhase::Expanded => expanded.push(site.id.clone()),
                    SitePhase::Collapsed => collapsed.push(site.id.clone()),
                    SitePhase::Expanding | SitePhase::Refreshing => {}
                }
            }
            (expanded, collapsed)
        };
        let refreshes = futures::future::join_all(expanded.iter().map(|site_id| self.refresh(site_id)));
        let statuses =
            futures::future::join_all(collapsed.iter().map(|site_id| self.load_status(site_id)));
        tokio::join!(refreshes, statuses);
    }

    pub async fn run_auto_refresh(&self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tracing::debug!("periodic refresh");
            self.refresh_all().await;
        }
    }

    pub fn acknowledge_site(&self, site_id: &str) {
        if let Err(err) = self
            .seen
            .mark_seen(SeenNamespace::Sites, site_id, Utc::now())
        {
            tracing::warn!(site_id, ?err, "failed to persist site acknowledgement");
        }
        self.publish();
    }

    /// Acknowledges a page (or watched URL) as looked at.
    pub fn open_page(&self, url_norm: &str) {
        let key = canonicalize(url_norm);
        if let Err(err) = self.seen.mark_seen(SeenNamespace::Pages, &key, Utc::now()) {
            tracing::warn!(url_norm = %key, ?err, "failed to persist page acknowledgement");
        }
        self.publish();
    }

    pub async fn add_watch(&self, site_id: &str, url: &str, freq_min: u32) -> Result<()> {
        let url = validate_watch_url(url)?;
        validate_freq(freq_min)?;
        self.apply_watch_op(
            site_id,
            WatchOp::Upsert(WatchUpsert {
                url,
                freq_min,
                enabled: true,
            }),
        )
        .await
    }

    pub async fn toggle_watch(
        &self,
        site_id: &str,
        url_norm: &str,
        freq_min: u32,
    ) -> Result<WatchToggle> {
        if let Some(existing) = self.reconciler.watch_for(site_id, url_norm) {
            self.apply_watch_op(site_id, WatchOp::Delete(existing.url_norm))
                .await?;
            return Ok(WatchToggle::Unwatched);
        }
        self.add_watch(site_id, &canonicalize(url_norm), freq_min)
            .await?;
        Ok(WatchToggle::Watched)
    }

    pub async fn remove_watch(&self, site_id: &str, url_norm: &str) -> Result<()> {
        let target = self.stored_url_norm(site_id, url_norm);
        self.apply_watch_op(site_id, WatchOp::Delete(target)).await
    }

    pub async fn set_watch_frequency(
        &self,
        site_id: &str,
        url_norm: &str,
        freq_min: u32,
    ) -> Result<()> {
        validate_freq(freq_min)?;
        let url = self
            .reconciler
            .watch_for(site_id, url_norm)
            .map(|watch| watch.submit_url().to_owned())
            .unwrap_or_else(|| url_norm.trim().to_owned());
        self.apply_watch_op(
            site_id,
            WatchOp::Upsert(WatchUpsert {
                url,
                freq_min,
                enabled: true,
            }),
        )
        .await
    }

    pub async fn scan_watch_now(&self, site_id: &str, url_norm: &str) -> Result<()> {
        let target = self.stored_url_norm(site_id, url_norm);
        self.apply_watch_op(site_id, WatchOp::ScanNow(target)).await
    }

    /// Re-reads the watch list of a site regardless of cache age.
    pub async fn reload_watches(&self, site_id: &str) -> WatchSet {
        let set = self.reconciler.reconcile(site_id).await;
        self.note_watches_fetched(site_id, &set);
        self.publish();
        set
    }

    /// Starts a one-off scan and then polls the site list until the backend
    /// has indexed it.
    pub async fn trigger_scan(&self, target: &str) -> Result<()> {
        let target = validate_scan_target(target)?;
        self.gateway.trigger_scan(&target).await?;
        tracing::info!(target = %target, "scan requested");
        self.refresh_sites_with_retry().await;
        Ok(())
    }

    pub async fn site_detail(&self, site_id: &str, filter: &str) -> SiteDetail {
        let limit = self.settings.detail_limit;
        let pages_query = ListQuery::pages(limit);
        let endpoints_query = ListQuery::endpoints(limit);
        let sinks_query = ListQuery::sinks(limit);
        let fetched = tokio::try_join!(
            self.gateway.list_pages(site_id, &pages_query),
            self.gateway.list_endpoints(site_id, &endpoints_query),
            self.gateway
                .list_sinks(site_id, &sinks_query, Some(SinkKind::ALL.as_slice())),
        );
        let (pages, endpoints, sinks) = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::warn!(site_id, %err, "site detail load failed");
                return SiteDetail {
                    error: Some(err.to_string()),
                    ..SiteDetail::default()
                };
            }
        };

        let needle = filter.trim().to_lowercase();
        if needle.is_empty() {
            return SiteDetail {
                pages,
                endpoints,
                sinks,
                error: None,
            };
        }
        SiteDetail {
            pages: pages
                .into_iter()
                .filter(|page| page.url_norm.to_lowercase().contains(&needle))
                .collect(),
            endpoints: endpoints
                .into_iter()
                .filter(|ep| ep.endpoint.to_lowercase().contains(&needle))
                .collect(),
            sinks: sinks
                .into_iter()
                .filter(|sink| {
                    sink.source_url.to_lowercase().contains(&needle)
                        || sink.kind.as_str().to_lowercase().contains(&needle)
                })
                .collect(),
            error: None,
        }
    }

    pub async fn discord_settings(&self) -> DiscordSettings {
        match self.gateway.discord_settings().await {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(%err, "discord settings load failed");
                DiscordSettings::default()
            }
        }
    }

    /// An empty webhook keeps the stored one and only updates `enabled`.
    pub async fn save_discord_settings(&self, webhook_url: &str, enabled: bool) -> Result<()> {
        let webhook_url = webhook_url.trim();
        if !webhook_url.is_empty() && !is_discord_webhook(webhook_url) {
            return Err(Error::validation("webhook url must be a Discord webhook"));
        }
        self.gateway
            .set_discord_settings(webhook_url, enabled)
            .await
    }

    pub async fn test_discord(&self) -> Result<()> {
        self.gateway.test_discord_settings().await
    }

    async fn try_load_sites(&self) -> Result<()> {
        let sites = self.gateway.list_sites(self.settings.sites_limit).await?;
        {
            let mut state = self.lock();
            state.sites = sites;
            state.sites_error = None;
        }
        self.publish();
        Ok(())
    }

    fn clear_sites(&self, error: String) {
        {
            let mut state = self.lock();
            state.sites.clear();
            state.sites_error = Some(error);
        }
        self.publish();
    }

    /// Runs a site fetch unless `token` fires first, in which case the
    /// partial fetch is dropped and `Error::Cancelled` returned.
    async fn fetch_until_cancelled(
        &self,
        token: &CancellationToken,
        site_id: &str,
        include_watches: bool,
    ) -> Result<SiteFetch> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            fetched = self.fetch_site(site_id, include_watches) => Ok(fetched),
        }
    }

    async fn fetch_site(&self, site_id: &str, include_watches: bool) -> SiteFetch {
        let pages_query = ListQuery::pages(self.settings.pages_limit);
        let pages = self.gateway.list_pages(site_id, &pages_query);
        let alerts = self.fetch_alerts(site_id);
        let watches = async {
            if include_watches {
                Some(self.reconciler.reconcile(site_id).await)
            } else {
                None
            }
        };
        let (pages, alerts, watches) = tokio::join!(pages, alerts, watches);

        let mut errors = Vec::new();
        let pages = pages.unwrap_or_else(|err| {
            tracing::warn!(site_id, %err, "page list load failed");
            errors.push(format!("pages: {err}"));
            Vec::new()
        });
        let alerts = match alerts {
            Ok(alerts) => Some(alerts),
            Err(err) => {
                tracing::warn!(site_id, %err, "alert summary load failed");
                errors.push(format!("alerts: {err}"));
                None
            }
        };
        let failed_variants = watches
            .as_ref()
            .map_or(0, |set| set.failed_variants.len());
        if failed_variants > 0 {
            errors.push(format!("watches: {failed_variants} host(s) unavailable"));
        }
        let watches_complete = watches.is_some() && failed_variants == 0;

        SiteFetch {
            pages,
            alerts,
            watches_complete,
            errors,
        }
    }

    async fn fetch_alerts(&self, site_id: &str) -> Result<Alerts> {
        let limit = self.settings.alerts_limit;
        let sinks_query = ListQuery::sinks(limit);
        let endpoints_query = ListQuery::endpoints(limit);
        let (sinks, assets) = tokio::try_join!(
            self.gateway.list_sinks(site_id, &sinks_query, None),
            self.gateway.list_endpoints(site_id, &endpoints_query),
        )?;
        Ok(Alerts { sinks, assets })
    }

    async fn apply_watch_op(&self, site_id: &str, op: WatchOp) -> Result<()> {
        let key = op.key();
        {
            let mut state = self.lock();
            let entry = state.entries.entry(site_id.to_owned()).or_default();
            if !entry.pending_watches.insert(key.clone()) {
                return Err(Error::validation(format!(
                    "an update for {key} is already in flight"
                )));
            }
        }
        self.publish();

        let result = match &op {
            WatchOp::Upsert(upsert) => self.gateway.create_or_update_watch(upsert).await,
            WatchOp::Delete(url_norm) => self.gateway.delete_watch(url_norm).await,
            WatchOp::ScanNow(url_norm) => self.gateway.scan_now(url_norm).await,
        };
        let set = match &result {
            Ok(()) => Some(self.reconciler.reconcile(site_id).await),
            Err(err) => {
                tracing::warn!(site_id, url_norm = %key, %err, "watch update failed");
                None
            }
        };

        {
            let mut state = self.lock();
            if let Some(entry) = state.entries.get_mut(site_id) {
                entry.pending_watches.remove(&key);
                entry.error = result.as_ref().err().map(ToString::to_string);
            }
        }
        if let Some(set) = &set {
            self.note_watches_fetched(site_id, set);
        }
        self.publish();
        result
    }

    fn note_watches_fetched(&self, site_id: &str, set: &WatchSet) {
        if !set.failed_variants.is_empty() {
            return;
        }
        if let Some(entry) = self.lock().entries.get_mut(site_id) {
            entry.watches_fetched_at = Some(Instant::now());
        }
    }

    fn stored_url_norm(&self, site_id: &str, url_norm: &str) -> String {
        self.reconciler
            .watch_for(site_id, url_norm)
            .map(|watch| watch.url_norm)
            .unwrap_or_else(|| canonicalize(url_norm))
    }

    fn publish(&self) {
        let view = self.build_view();
        self.view_tx.send_replace(view);
    }

    fn build_view(&self) -> DashboardView {
        let state = self.lock();
        let sites = view::filter_sites(&state.sites, &state.query)
            .into_iter()
            .map(|site| {
                let entry = state.entries.get(&site.id);
                let watches = self.reconciler.watch_set(&site.id);
                let phase = entry.map(|entry| entry.phase).unwrap_or_default();
                let groups = match entry.and_then(|entry| entry.pages.as_deref()) {
                    Some(pages) if phase.is_open() => {
                        view::group_pages_by_host(pages, watches.as_ref(), &self.seen)
                    }
                    _ => Vec::new(),
                };
                let mut pending_watches: Vec<String> = entry
                    .map(|entry| entry.pending_watches.iter().cloned().collect())
                    .unwrap_or_default();
                pending_watches.sort();

                SiteView {
                    id: site.id.clone(),
                    hosts: site.hosts.clone(),
                    last_scan_at: site.last_scan_at,
                    phase,
                    novelty: entry
                        .map(|entry| entry.alert_times)
                        .unwrap_or_default()
                        .state(self.seen.get(SeenNamespace::Sites, &site.id)),
                    watched_count: watches.as_ref().map(WatchSet::len).unwrap_or(0),
                    pending_watches,
                    groups,
                    error: entry.and_then(|entry| entry.error.clone()),
                }
            })
            .collect();

        let alerts = state.selected_site.as_ref().and_then(|site_id| {
            state.entries.get(site_id).map(|entry| AlertsView {
                site_id: site_id.clone(),
                sinks: entry.alerts.sinks.clone(),
                assets: entry.alerts.assets.clone(),
            })
        });

        DashboardView {
            query: state.query.clone(),
            sites,
            sites_error: state.sites_error.clone(),
            selected_site: state.selected_site.clone(),
            alerts,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate_freq(freq_min: u32) -> Result<()> {
    if freq_min == 0 {
        return Err(Error::validation("freq_min must be greater than zero"));
    }
    Ok(())
}

fn validate_watch_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("url is required"));
    }
    let candidate = if has_http_scheme(trimmed) {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate)
        .map_err(|err| Error::validation(format!("invalid url {trimmed:?}: {err}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::validation(format!("url must be http/https: {trimmed}")));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::validation(format!("url has no host: {trimmed}")));
    }
    Ok(trimmed.to_owned())
}

fn validate_scan_target(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("enter a domain or URL to scan"));
    }
    let candidate = if has_http_scheme(trimmed) {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    };
    let valid = Url::parse(&candidate)
        .ok()
        .and_then(|url| url.host_str().map(|host| host.contains('.')))
        .unwrap_or(false);
    if !valid {
        return Err(Error::validation(format!(
            "not a valid domain or URL: {trimmed}"
        )));
    }
    Ok(trimmed.to_owned())
}

fn has_http_scheme(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn is_discord_webhook(url: &str) -> bool {
    url.starts_with("https://discord.com/api/webhooks/")
        || url.contains("discordapp.com/api/webhooks/")
}
