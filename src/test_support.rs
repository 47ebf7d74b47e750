use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone as _, Utc};
use tokio::sync::Notify;

use crate::canonical::{canonicalize, host_of};
use crate::error::{Error, RemoteError, Result, TransportError};
use crate::gateway::{Gateway, WatchUpsert};
use crate::model::{DiscordSettings, Endpoint, ListQuery, Page, Sink, SinkKind, Site, Watch};

pub(crate) fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap()
}

pub(crate) fn watch(url_norm: &str, freq_min: u32) -> Watch {
    Watch {
        site_id: host_of(url_norm),
        url: Some(url_norm.to_owned()),
        url_norm: url_norm.to_owned(),
        freq_min,
        enabled: true,
        last_run_at: None,
        next_run_at: None,
        last_change_at: None,
        updated_at: None,
        created_at: None,
    }
}

pub(crate) fn page(url_norm: &str, scanned_at: i64) -> Page {
    Page {
        url_norm: url_norm.to_owned(),
        url: None,
        host: host_of(url_norm).unwrap_or_default(),
        path: crate::canonical::path_of(url_norm),
        scanned_at: Some(at(scanned_at)),
    }
}

pub(crate) fn sink(detected_at: i64) -> Sink {
    Sink {
        kind: SinkKind::Eval,
        source_url: "https://example.com/app.js".to_owned(),
        func: "run".to_owned(),
        line: 1,
        col: 1,
        last_detected_at: Some(at(detected_at)),
    }
}

pub(crate) fn endpoint(path: &str, last_seen: i64) -> Endpoint {
    Endpoint {
        endpoint: path.to_owned(),
        category: Some("api".to_owned()),
        seen_count: 1,
        last_seen: Some(at(last_seen)),
    }
}

#[derive(Default)]
struct FakeState {
    sites: Vec<Site>,
    pages: HashMap<String, Vec<Page>>,
    sinks: HashMap<String, Vec<Sink>>,
    endpoints: HashMap<String, Vec<Endpoint>>,
    watches: HashMap<String, Vec<Watch>>,
    failing_watch_lists: HashSet<String>,
    site_list_failures: u32,
    fail_alerts: bool,
    fail_writes: bool,
    discord: DiscordSettings,
    calls: Vec<String>,
}

/// Scripted in-memory backend.
#[derive(Default)]
pub(crate) struct FakeGateway {
    state: Mutex<FakeState>,
    pages_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn add_site(&self, id: &str) {
        self.state().sites.push(Site {
            id: id.to_owned(),
            hosts: vec![id.to_owned()],
            last_scan_at: None,
        });
    }

    pub(crate) fn add_page(&self, site_id: &str, page: Page) {
        self.state()
            .pages
            .entry(site_id.to_owned())
            .or_default()
            .push(page);
    }

    pub(crate) fn add_sink(&self, site_id: &str, sink: Sink) {
        self.state()
            .sinks
            .entry(site_id.to_owned())
            .or_default()
            .push(sink);
    }

    pub(crate) fn add_endpoint(&self, site_id: &str, endpoint: Endpoint) {
        self.state()
            .endpoints
            .entry(site_id.to_owned())
            .or_default()
            .push(endpoint);
    }

    pub(crate) fn add_watch(&self, site_id: &str, watch: Watch) {
        self.state()
            .watches
            .entry(site_id.to_owned())
            .or_default()
            .push(watch);
    }

    pub(crate) fn fail_watch_list(&self, site_id: &str) {
        self.state().failing_watch_lists.insert(site_id.to_owned());
    }

    pub(crate) fn fail_site_list(&self, times: u32) {
        self.state().site_list_failures = times;
    }

    pub(crate) fn fail_alerts(&self, fail: bool) {
        self.state().fail_alerts = fail;
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Makes every `list_pages` call wait until the returned handle is notified.
    pub(crate) fn gate_pages(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.pages_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn calls(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub(crate) fn watches_for(&self, site_id: &str) -> Vec<Watch> {
        self.state()
            .watches
            .get(site_id)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }

    fn check_writes(&self) -> Result<()> {
        if self.state().fail_writes {
            return Err(RemoteError {
                status_code: 500,
                body: "write failed".to_owned(),
            }
            .into());
        }
        Ok(())
    }
}

fn network(endpoint: &str) -> Error {
    TransportError::Network {
        endpoint: endpoint.to_owned(),
        message: "connection refused".to_owned(),
    }
    .into()
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn list_sites(&self, limit: u32) -> Result<Vec<Site>> {
        self.record("list_sites".to_owned());
        let mut state = self.state();
        if state.site_list_failures > 0 {
            state.site_list_failures -= 1;
            return Err(network("/api/sites"));
        }
        Ok(state.sites.iter().take(limit as usize).cloned().collect())
    }

    async fn list_pages(&self, site_id: &str, query: &ListQuery) -> Result<Vec<Page>> {
        self.record(format!("list_pages:{site_id}"));
        let gate = self.pages_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self
            .state()
            .pages
            .get(site_id)
            .map(|pages| pages.iter().take(query.limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_sinks(
        &self,
        site_id: &str,
        query: &ListQuery,
        _kinds: Option<&[SinkKind]>,
    ) -> Result<Vec<Sink>> {
        self.record(format!("list_sinks:{site_id}"));
        let state = self.state();
        if state.fail_alerts {
            return Err(network("/api/sinks"));
        }
        Ok(state
            .sinks
            .get(site_id)
            .map(|items| items.iter().take(query.limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_endpoints(&self, site_id: &str, query: &ListQuery) -> Result<Vec<Endpoint>> {
        self.record(format!("list_endpoints:{site_id}"));
        Ok(self
            .state()
            .endpoints
            .get(site_id)
            .map(|items| items.iter().take(query.limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_watches(&self, site_id: &str) -> Result<Vec<Watch>> {
        self.record(format!("list_watches:{site_id}"));
        let state = self.state();
        if state.failing_watch_lists.contains(site_id) {
            return Err(RemoteError {
                status_code: 503,
                body: "unavailable".to_owned(),
            }
            .into());
        }
        Ok(state.watches.get(site_id).cloned().unwrap_or_default())
    }

    async fn create_or_update_watch(&self, upsert: &WatchUpsert) -> Result<()> {
        self.record(format!("create_watch:{}", upsert.url));
        self.check_writes()?;
        let url_norm = canonicalize(&upsert.url);
        let site_id = host_of(&url_norm).unwrap_or_default();
        let mut state = self.state();
        let items = state.watches.entry(site_id).or_default();
        match items.iter_mut().find(|w| w.url_norm == url_norm) {
            Some(existing) => {
                existing.freq_min = upsert.freq_min;
                existing.enabled = upsert.enabled;
                existing.url = Some(upsert.url.clone());
            }
            None => {
                let mut created = watch(&url_norm, upsert.freq_min);
                created.url = Some(upsert.url.clone());
                created.enabled = upsert.enabled;
                items.push(created);
            }
        }
        Ok(())
    }

    async fn delete_watch(&self, url_norm: &str) -> Result<()> {
        self.record(format!("delete_watch:{url_norm}"));
        self.check_writes()?;
        for items in self.state().watches.values_mut() {
            items.retain(|w| w.url_norm != url_norm);
        }
        Ok(())
    }

    async fn scan_now(&self, url_norm: &str) -> Result<()> {
        self.record(format!("scan_now:{url_norm}"));
        self.check_writes()?;
        let now = Utc::now();
        for items in self.state().watches.values_mut() {
            for w in items.iter_mut().filter(|w| w.url_norm == url_norm) {
                w.last_run_at = Some(now);
            }
        }
        Ok(())
    }

    async fn trigger_scan(&self, url: &str) -> Result<()> {
        self.record(format!("trigger_scan:{url}"));
        self.check_writes()
    }

    async fn discord_settings(&self) -> Result<DiscordSettings> {
        self.record("discord_get".to_owned());
        Ok(self.state().discord.clone())
    }

    async fn set_discord_settings(&self, webhook_url: &str, enabled: bool) -> Result<()> {
        self.record("discord_set".to_owned());
        self.check_writes()?;
        let mut state = self.state();
        state.discord.enabled = enabled;
        if !webhook_url.is_empty() {
            state.discord.webhook_masked = "https://di…xxxx".to_owned();
        }
        Ok(())
    }

    async fn test_discord_settings(&self) -> Result<()> {
        self.record("discord_test".to_owned());
        if !self.state().discord.enabled {
            return Err(RemoteError {
                status_code: 400,
                body: "discord not configured/enabled".to_owned(),
            }
            .into());
        }
        Ok(())
    }
}
