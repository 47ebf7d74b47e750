use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, RemoteError, Result, TransportError};
use crate::model::{
    DiscordSettings, Endpoint, ItemsEnvelope, ListQuery, Page, Sink, SinkKind, Site, Watch,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchUpsert {
    pub url: String,
    pub freq_min: u32,
    pub enabled: bool,
}

/// Typed access to the dashboard backend.
///
/// Every call either returns the decoded payload or an error; nothing is
/// swallowed here.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn list_sites(&self, limit: u32) -> Result<Vec<Site>>;
    async fn list_pages(&self, site_id: &str, query: &ListQuery) -> Result<Vec<Page>>;
    async fn list_sinks(
        &self,
        site_id: &str,
        query: &ListQuery,
        kinds: Option<&[SinkKind]>,
    ) -> Result<Vec<Sink>>;
    async fn list_endpoints(&self, site_id: &str, query: &ListQuery) -> Result<Vec<Endpoint>>;
    async fn list_watches(&self, site_id: &str) -> Result<Vec<Watch>>;
    async fn create_or_update_watch(&self, watch: &WatchUpsert) -> Result<()>;
    async fn delete_watch(&self, url_norm: &str) -> Result<()>;
    async fn scan_now(&self, url_norm: &str) -> Result<()>;
    async fn trigger_scan(&self, url: &str) -> Result<()>;
    async fn discord_settings(&self) -> Result<DiscordSettings>;
    async fn set_discord_settings(&self, webhook_url: &str, enabled: bool) -> Result<()>;
    async fn test_discord_settings(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            anyhow::bail!("api base url is empty");
        }
        let base_url = Url::parse(&format!("{trimmed}/"))
            .map_err(|err| anyhow::anyhow!("parse api base url {trimmed:?}: {err}"))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            anyhow::bail!("api base url must be http/https: {base_url}");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        let mut url = self.base_url.join(path).map_err(|err| TransportError::Network {
            endpoint: path.to_owned(),
            message: format!("build url: {err}"),
        })?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!(%url, "GET");
        let request = self.client.get(url.clone());
        let raw = self.send(request, &url).await?;
        decode(&url, &raw)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, url: Url, body: &B) -> Result<String> {
        tracing::debug!(%url, "POST");
        let request = self.client.post(url.clone()).json(body);
        self.send(request, &url).await
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<String> {
        let response = request
            .header(USER_AGENT, concat!("sitewatch/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| network_error(url, &err))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| network_error(url, &err))?;
        if !status.is_success() {
            return Err(RemoteError {
                status_code: status.as_u16(),
                body: raw.trim().to_owned(),
            }
            .into());
        }
        Ok(raw)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn list_sites(&self, limit: u32) -> Result<Vec<Site>> {
        let url = self.endpoint("api/sites", &[("limit", limit.to_string())])?;
        let envelope: ItemsEnvelope<Site> = self.get_json(url).await?;
        Ok(envelope.items)
    }

    async fn list_pages(&self, site_id: &str, query: &ListQuery) -> Result<Vec<Page>> {
        let url = self.endpoint("api/pages", &list_params(site_id, query))?;
        let envelope: ItemsEnvelope<Page> = self.get_json(url).await?;
        Ok(envelope.items)
    }

    async fn list_sinks(
        &self,
        site_id: &str,
        query: &ListQuery,
        kinds: Option<&[SinkKind]>,
    ) -> Result<Vec<Sink>> {
        let mut params = list_params(site_id, query);
        if let Some(kinds) = kinds.filter(|kinds| !kinds.is_empty()) {
            params.push(("kind", SinkKind::csv(kinds)));
        }
        let url = self.endpoint("api/sinks", &params)?;
        let envelope: ItemsEnvelope<Sink> = self.get_json(url).await?;
        Ok(envelope.items)
    }

    async fn list_endpoints(&self, site_id: &str, query: &ListQuery) -> Result<Vec<Endpoint>> {
        let url = self.endpoint("api/endpoints", &list_params(site_id, query))?;
        let envelope: ItemsEnvelope<Endpoint> = self.get_json(url).await?;
        Ok(envelope.items)
    }

    async fn list_watches(&self, site_id: &str) -> Result<Vec<Watch>> {
        let url = self.endpoint("api/watches", &[("site_id", site_id.to_owned())])?;
        let envelope: ItemsEnvelope<Watch> = self.get_json(url).await?;
        Ok(envelope.items)
    }

    async fn create_or_update_watch(&self, watch: &WatchUpsert) -> Result<()> {
        let url = self.endpoint("api/watches/create", &[])?;
        self.post_json(url, watch).await?;
        Ok(())
    }

    async fn delete_watch(&self, url_norm: &str) -> Result<()> {
        let url = self.endpoint("api/watches/delete", &[])?;
        self.post_json(url, &serde_json::json!({ "url_norm": url_norm }))
            .await?;
        Ok(())
    }

    async fn scan_now(&self, url_norm: &str) -> Result<()> {
        let url = self.endpoint("api/watches/scan-now", &[])?;
        self.post_json(url, &serde_json::json!({ "url_norm": url_norm }))
            .await?;
        Ok(())
    }

    async fn trigger_scan(&self, target: &str) -> Result<()> {
        let url = self.endpoint("api/scan", &[])?;
        self.post_json(url, &serde_json::json!({ "url": target }))
            .await?;
        Ok(())
    }

    async fn discord_settings(&self) -> Result<DiscordSettings> {
        let url = self.endpoint("api/settings/discord", &[])?;
        self.get_json(url).await
    }

    async fn set_discord_settings(&self, webhook_url: &str, enabled: bool) -> Result<()> {
        let url = self.endpoint("api/settings/discord/set", &[])?;
        self.post_json(
            url,
            &serde_json::json!({ "webhook_url": webhook_url, "enabled": enabled }),
        )
        .await?;
        Ok(())
    }

    async fn test_discord_settings(&self) -> Result<()> {
        let url = self.endpoint("api/settings/discord/test", &[])?;
        self.post_json(url, &serde_json::json!({})).await?;
        Ok(())
    }
}

fn list_params(site_id: &str, query: &ListQuery) -> Vec<(&'static str, String)> {
    vec![
        ("site_id", site_id.to_owned()),
        ("limit", query.limit.to_string()),
        ("sort", query.sort.to_owned()),
        ("order", query.order.as_str().to_owned()),
    ]
}

fn decode<T: DeserializeOwned>(url: &Url, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|err| Error::Parse {
        endpoint: url.path().to_owned(),
        message: err.to_string(),
    })
}

fn network_error(url: &Url, err: &reqwest::Error) -> Error {
    TransportError::Network {
        endpoint: url.path().to_owned(),
        message: err.to_string(),
    }
    .into()
}
