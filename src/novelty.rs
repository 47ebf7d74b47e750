use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Endpoint, Page, Sink, Watch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoveltyState {
    #[default]
    None,
    New,
    Danger,
    Both,
}

impl NoveltyState {
    pub fn from_flags(has_danger: bool, has_new_asset: bool) -> Self {
        match (has_danger, has_new_asset) {
            (true, true) => Self::Both,
            (true, false) => Self::Danger,
            (false, true) => Self::New,
            (false, false) => Self::None,
        }
    }

    pub fn has_danger(self) -> bool {
        matches!(self, Self::Danger | Self::Both)
    }

    pub fn has_new_asset(self) -> bool {
        matches!(self, Self::New | Self::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::New => "new",
            Self::Danger => "danger",
            Self::Both => "both",
        }
    }
}

/// Latest alert timestamps for a site, the only remote input novelty needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertTimes {
    pub latest_sink_at: Option<DateTime<Utc>>,
    pub latest_asset_at: Option<DateTime<Utc>>,
}

impl AlertTimes {
    pub fn from_alerts(sinks: &[Sink], endpoints: &[Endpoint]) -> Self {
        Self {
            latest_sink_at: sinks.iter().filter_map(|sink| sink.last_detected_at).max(),
            latest_asset_at: endpoints.iter().filter_map(|ep| ep.last_seen).max(),
        }
    }

    /// Classifies the site against its acknowledged baseline (epoch millis,
    /// absent means never seen).
    pub fn state(&self, baseline: Option<i64>) -> NoveltyState {
        site_state(
            self.latest_sink_at.map(|at| at.timestamp_millis()),
            self.latest_asset_at.map(|at| at.timestamp_millis()),
            baseline.unwrap_or(0),
        )
    }
}

pub fn site_state(
    latest_sink_at: Option<i64>,
    latest_asset_at: Option<i64>,
    baseline: i64,
) -> NoveltyState {
    let has_danger = latest_sink_at.is_some_and(|at| at > baseline);
    let has_new_asset = latest_asset_at.is_some_and(|at| at > baseline);
    NoveltyState::from_flags(has_danger, has_new_asset)
}

pub fn page_is_new(page: &Page, baseline: Option<i64>) -> bool {
    newer_than_baseline(page.scanned_at, baseline)
}

/// A watched URL whose last detected change has not been looked at yet.
pub fn watch_has_unseen_change(watch: &Watch, baseline: Option<i64>) -> bool {
    newer_than_baseline(watch.last_change_at, baseline)
}

fn newer_than_baseline(at: Option<DateTime<Utc>>, baseline: Option<i64>) -> bool {
    let Some(at) = at else {
        return false;
    };
    match baseline {
        Some(seen) => at.timestamp_millis() > seen,
        None => true,
    }
}
