use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike as _, Utc};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(rename = "_id", alias = "site_id")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hosts: Vec<String>,
    #[serde(default, deserialize_with = "optional_time")]
    pub last_scan_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub url_norm: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, deserialize_with = "optional_time")]
    pub scanned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watch {
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub url_norm: String,
    pub freq_min: u32,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, deserialize_with = "optional_time")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_time")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_time")]
    pub last_change_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_time")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "optional_time")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Watch {
    /// The URL to resubmit when upserting this watch again.
    pub fn submit_url(&self) -> &str {
        self.url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(&self.url_norm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchFrequency {
    Hourly,
    SixHours,
    Daily,
    Weekly,
}

impl WatchFrequency {
    pub const ALL: [WatchFrequency; 4] = [
        WatchFrequency::Hourly,
        WatchFrequency::SixHours,
        WatchFrequency::Daily,
        WatchFrequency::Weekly,
    ];

    pub fn minutes(self) -> u32 {
        match self {
            Self::Hourly => 60,
            Self::SixHours => 360,
            Self::Daily => 1440,
            Self::Weekly => 10080,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Hourly => "1h",
            Self::SixHours => "6h",
            Self::Daily => "24h",
            Self::Weekly => "1w",
        }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|freq| freq.minutes() == minutes)
    }
}

/// Parses a frequency given either as a UI label (`6h`) or in minutes.
///
/// Minute values outside the enumerated options are accepted; only zero is
/// rejected.
pub fn parse_freq_min(raw: &str) -> anyhow::Result<u32> {
    let raw = raw.trim().to_ascii_lowercase();
    if let Some(freq) = WatchFrequency::ALL
        .into_iter()
        .find(|freq| freq.label() == raw)
    {
        return Ok(freq.minutes());
    }
    let minutes: u32 = raw.parse().map_err(|_| {
        anyhow::anyhow!("unsupported frequency: {raw:?} (expected 1h, 6h, 24h, 1w or minutes)")
    })?;
    if minutes == 0 {
        anyhow::bail!("frequency must be greater than zero");
    }
    Ok(minutes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SinkKind {
    #[serde(rename = "postMessageSend")]
    PostMessageSend,
    #[serde(rename = "postMessageRecv")]
    PostMessageRecv,
    #[serde(rename = "innerHTML")]
    InnerHtml,
    #[serde(rename = "eval")]
    Eval,
    #[serde(rename = "newFunction")]
    NewFunction,
    #[serde(rename = "setTimeoutStr")]
    SetTimeoutStr,
    #[serde(rename = "setIntervalStr")]
    SetIntervalStr,
    #[serde(rename = "documentWrite")]
    DocumentWrite,
    #[serde(rename = "fetch")]
    Fetch,
    #[serde(rename = "XMLHttpRequest")]
    XmlHttpRequest,
    #[serde(rename = "syncXHR")]
    SyncXhr,
    #[serde(rename = "inlineEventHandler")]
    InlineEventHandler,
    #[serde(rename = "directDOM")]
    DirectDom,
    #[serde(other)]
    Unknown,
}

impl SinkKind {
    pub const ALL: [SinkKind; 13] = [
        SinkKind::PostMessageSend,
        SinkKind::PostMessageRecv,
        SinkKind::InnerHtml,
        SinkKind::Eval,
        SinkKind::NewFunction,
        SinkKind::SetTimeoutStr,
        SinkKind::SetIntervalStr,
        SinkKind::DocumentWrite,
        SinkKind::Fetch,
        SinkKind::XmlHttpRequest,
        SinkKind::SyncXhr,
        SinkKind::InlineEventHandler,
        SinkKind::DirectDom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostMessageSend => "postMessageSend",
            Self::PostMessageRecv => "postMessageRecv",
            Self::InnerHtml => "innerHTML",
            Self::Eval => "eval",
            Self::NewFunction => "newFunction",
            Self::SetTimeoutStr => "setTimeoutStr",
            Self::SetIntervalStr => "setIntervalStr",
            Self::DocumentWrite => "documentWrite",
            Self::Fetch => "fetch",
            Self::XmlHttpRequest => "XMLHttpRequest",
            Self::SyncXhr => "syncXHR",
            Self::InlineEventHandler => "inlineEventHandler",
            Self::DirectDom => "directDOM",
            Self::Unknown => "unknown",
        }
    }

    pub fn csv(kinds: &[SinkKind]) -> String {
        kinds
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SinkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SinkKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("unknown sink kind: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sink {
    pub kind: SinkKind,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub func: String,
    #[serde(default)]
    pub line: i64,
    #[serde(default)]
    pub col: i64,
    #[serde(default, deserialize_with = "optional_time")]
    pub last_detected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub endpoint: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub seen_count: u64,
    #[serde(default, deserialize_with = "optional_time")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_masked: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub limit: u32,
    pub sort: &'static str,
    pub order: SortOrder,
}

impl ListQuery {
    pub fn pages(limit: u32) -> Self {
        Self {
            limit,
            sort: "scanned_at",
            order: SortOrder::Desc,
        }
    }

    pub fn sinks(limit: u32) -> Self {
        Self {
            limit,
            sort: "last_detected_at",
            order: SortOrder::Desc,
        }
    }

    pub fn endpoints(limit: u32) -> Self {
        Self {
            limit,
            sort: "last_seen",
            order: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub(crate) struct ItemsEnvelope<T> {
    #[serde(default = "Vec::new", deserialize_with = "null_as_default")]
    pub items: Vec<T>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// The backend serializes unset times as the zero time (year 1).
fn optional_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(value.filter(|at| at.year() > 1))
}
