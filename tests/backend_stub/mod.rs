use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// In-memory dashboard backend. Collections hold raw JSON so tests can
/// serve exactly what the real backend sends (nulls, zero times, `_id`).
#[derive(Debug, Default)]
pub struct BackendState {
    pub sites: Option<Vec<Value>>,
    pub pages: HashMap<String, Vec<Value>>,
    pub sinks: HashMap<String, Vec<Value>>,
    pub endpoints: HashMap<String, Vec<Value>>,
    pub watches: HashMap<String, Vec<Value>>,
    pub failing_watch_hosts: HashSet<String>,
    pub discord_enabled: bool,
    pub discord_webhook: String,
    pub scans: Vec<String>,
    pub requests: Vec<String>,
}

#[allow(dead_code)]
impl BackendState {
    /// One site with pages under both host spellings, one sink, one asset
    /// and a watch stored under the `www.` spelling.
    pub fn demo() -> Self {
        let mut state = Self {
            sites: Some(vec![json!({
                "_id": "example.com",
                "hosts": ["example.com", "www.example.com"],
                "last_scan_at": "2026-01-01T00:00:00Z",
            })]),
            ..Self::default()
        };
        state.pages.insert(
            "example.com".to_owned(),
            vec![
                json!({
                    "url_norm": "https://example.com/",
                    "host": "example.com",
                    "path": "/",
                    "scanned_at": "2026-01-01T00:00:00Z",
                }),
                json!({
                    "url_norm": "https://www.example.com/login",
                    "host": "www.example.com",
                    "path": "/login",
                    "scanned_at": "2026-01-01T00:05:00Z",
                }),
            ],
        );
        state.sinks.insert(
            "example.com".to_owned(),
            vec![json!({
                "kind": "eval",
                "source_url": "https://example.com/app.js",
                "func": "boot",
                "line": 12,
                "col": 4,
                "last_detected_at": "2026-01-02T00:00:00Z",
            })],
        );
        state.endpoints.insert(
            "example.com".to_owned(),
            vec![json!({
                "endpoint": "/api/v1/users",
                "category": "api",
                "seen_count": 3,
                "last_seen": "2026-01-03T00:00:00Z",
            })],
        );
        state.add_watch(
            "www.example.com",
            json!({
                "site_id": "www.example.com",
                "url": "https://www.example.com/login",
                "url_norm": "https://www.example.com/login",
                "freq_min": 60,
                "enabled": true,
                "last_run_at": null,
                "next_run_at": "2099-01-01T00:00:00Z",
                "last_change_at": "0001-01-01T00:00:00Z",
            }),
        );
        state
    }

    pub fn add_watch(&mut self, site_id: &str, watch: Value) {
        self.watches
            .entry(site_id.to_owned())
            .or_default()
            .push(watch);
    }

    pub fn watch_count(&self) -> usize {
        self.watches.values().map(Vec::len).sum()
    }

    pub fn requests_matching(&self, needle: &str) -> Vec<String> {
        self.requests
            .iter()
            .filter(|line| line.contains(needle))
            .cloned()
            .collect()
    }
}

pub struct BackendStub {
    pub base_url: String,
    state: Arc<Mutex<BackendState>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl BackendStub {
    pub fn spawn(state: BackendState) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start backend stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");
        let state = Arc::new(Mutex::new(state));

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let shared = Arc::clone(&state);

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }

                let method = request.method().to_string();
                let raw_url = request.url().to_string();
                let (status, payload) = {
                    let mut state = shared.lock().expect("lock backend state");
                    state.requests.push(format!("{method} {raw_url}"));
                    route(&mut state, &method, &raw_url, &body)
                };

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(payload)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().expect("lock backend state")
    }
}

impl Drop for BackendStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn route(state: &mut BackendState, method: &str, raw_url: &str, body: &str) -> (u16, String) {
    let url = url::Url::parse(&format!("http://stub{raw_url}")).expect("parse request url");
    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let site_id = params.get("site_id").cloned().unwrap_or_default();
    let limit = params
        .get("limit")
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(usize::MAX);

    match (method, url.path()) {
        ("GET", "/api/sites") => {
            let items = state
                .sites
                .as_ref()
                .map(|sites| Value::from(take(sites, limit)))
                .unwrap_or(Value::Null);
            ok(json!({ "items": items }))
        }
        ("GET", "/api/pages") => ok(items(state.pages.get(&site_id), limit)),
        ("GET", "/api/sinks") => ok(items(state.sinks.get(&site_id), limit)),
        ("GET", "/api/endpoints") => ok(items(state.endpoints.get(&site_id), limit)),
        ("GET", "/api/watches") => {
            if state.failing_watch_hosts.contains(&site_id) {
                return (503, "watch store unavailable".to_owned());
            }
            ok(items(state.watches.get(&site_id), usize::MAX))
        }
        ("POST", "/api/watches/create") => upsert_watch(state, body),
        ("POST", "/api/watches/delete") => {
            let Some(url_norm) = field(body, "url_norm") else {
                return (400, "url_norm required".to_owned());
            };
            for watches in state.watches.values_mut() {
                watches.retain(|w| w["url_norm"] != url_norm.as_str());
            }
            ok(json!({ "ok": true }))
        }
        ("POST", "/api/watches/scan-now") => {
            let Some(url_norm) = field(body, "url_norm") else {
                return (400, "url_norm required".to_owned());
            };
            let mut found = false;
            for watch in state.watches.values_mut().flatten() {
                if watch["url_norm"] == url_norm.as_str() {
                    watch["next_run_at"] = json!("2026-01-01T00:00:00Z");
                    found = true;
                }
            }
            if !found {
                return (404, "watch not found".to_owned());
            }
            ok(json!({ "ok": true }))
        }
        ("POST", "/api/scan") => {
            let Some(target) = field(body, "url") else {
                return (400, "url required".to_owned());
            };
            let host = normalize(&target)
                .and_then(|(_, host)| Some(host).filter(|host| !host.is_empty()))
                .unwrap_or_else(|| target.clone());
            let sites = state.sites.get_or_insert_with(Vec::new);
            if !sites.iter().any(|site| site["_id"] == host.as_str()) {
                sites.push(json!({ "_id": host, "hosts": [host] }));
            }
            state.scans.push(target);
            ok(json!({ "ok": true }))
        }
        ("GET", "/api/settings/discord") => ok(json!({
            "enabled": state.discord_enabled,
            "webhook_masked": mask(&state.discord_webhook),
        })),
        ("POST", "/api/settings/discord/set") => {
            let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
            if let Some(webhook) = parsed["webhook_url"].as_str().filter(|w| !w.is_empty()) {
                state.discord_webhook = webhook.to_owned();
            }
            state.discord_enabled = parsed["enabled"].as_bool().unwrap_or(false);
            ok(json!({ "ok": true }))
        }
        ("POST", "/api/settings/discord/test") => {
            if !state.discord_enabled || state.discord_webhook.is_empty() {
                return (400, "discord not configured/enabled".to_owned());
            }
            ok(json!({ "ok": true }))
        }
        _ => (404, "not found".to_owned()),
    }
}

fn upsert_watch(state: &mut BackendState, body: &str) -> (u16, String) {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => return (400, "invalid json".to_owned()),
    };
    let raw = parsed["url"].as_str().unwrap_or_default().trim().to_owned();
    let Some((url_norm, host)) = normalize(&raw) else {
        return (400, "url required".to_owned());
    };
    let freq_min = parsed["freq_min"].as_i64().filter(|f| *f > 0).unwrap_or(1440);
    let enabled = parsed["enabled"].as_bool().unwrap_or(true);

    let watches = state.watches.entry(host.clone()).or_default();
    match watches.iter_mut().find(|w| w["url_norm"] == url_norm.as_str()) {
        Some(existing) => {
            existing["freq_min"] = json!(freq_min);
            existing["enabled"] = json!(enabled);
            existing["url"] = json!(raw);
            existing["updated_at"] = json!("2026-01-05T00:00:00Z");
        }
        None => watches.push(json!({
            "site_id": host,
            "url": raw,
            "url_norm": url_norm,
            "freq_min": freq_min,
            "enabled": enabled,
            "next_run_at": "2099-01-01T00:00:00Z",
            "updated_at": "2026-01-04T00:00:00Z",
        })),
    }
    ok(json!({ "ok": true }))
}

fn normalize(raw: &str) -> Option<(String, String)> {
    if raw.is_empty() {
        return None;
    }
    let candidate = if raw.contains("://") {
        raw.to_owned()
    } else {
        format!("http://{raw}")
    };
    let mut url = url::Url::parse(&candidate).ok()?;
    url.set_fragment(None);
    let host = url.host_str()?.to_owned();
    Some((url.to_string(), host))
}

fn field(body: &str, name: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed[name]
        .as_str()
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn items(collection: Option<&Vec<Value>>, limit: usize) -> Value {
    json!({ "items": collection.map(|items| take(items, limit)).unwrap_or_default() })
}

fn take(items: &[Value], limit: usize) -> Vec<Value> {
    items.iter().take(limit).cloned().collect()
}

fn mask(webhook: &str) -> String {
    if webhook.len() <= 12 {
        return String::new();
    }
    format!("{}…{}", &webhook[..8], &webhook[webhook.len() - 4..])
}

fn ok(value: Value) -> (u16, String) {
    (200, value.to_string())
}
