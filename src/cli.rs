use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// YAML config file (defaults apply when omitted).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL (overrides config and `SITEWATCH_API_BASE`).
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// Directory for acknowledgement state.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` is set.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List monitored sites with their novelty marker.
    Sites(SitesArgs),
    /// Expand a site: pages grouped by host, watch badges and alerts.
    Expand(SiteArgs),
    /// Full page, endpoint and sink listing for a site.
    Detail(DetailArgs),
    Watch {
        #[command(subcommand)]
        command: WatchCommand,
    },
    Ack {
        #[command(subcommand)]
        command: AckCommand,
    },
    /// Request a one-off scan of a domain or URL.
    Scan(ScanArgs),
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    /// Keep the dashboard refreshed until interrupted.
    Monitor(MonitorArgs),
}

#[derive(Debug, Args)]
pub struct SitesArgs {
    /// Case-insensitive filter over site id and hosts.
    #[arg(long, default_value = "")]
    pub query: String,
}

#[derive(Debug, Args)]
pub struct SiteArgs {
    /// Site id as listed by `sites`.
    #[arg(long)]
    pub site: String,
}

#[derive(Debug, Args)]
pub struct DetailArgs {
    #[arg(long)]
    pub site: String,

    /// Substring filter applied to every listing.
    #[arg(long, default_value = "")]
    pub filter: String,
}

#[derive(Debug, Subcommand)]
pub enum WatchCommand {
    /// Watched URLs of a site, merged across host spellings.
    List(SiteArgs),
    Add(WatchAddArgs),
    /// Watch the URL if unwatched, otherwise unwatch it.
    Toggle(WatchAddArgs),
    Remove(WatchUrlArgs),
    Freq(WatchFreqArgs),
    ScanNow(WatchUrlArgs),
}

#[derive(Debug, Args)]
pub struct WatchUrlArgs {
    #[arg(long)]
    pub site: String,

    #[arg(long)]
    pub url: String,
}

#[derive(Debug, Args)]
pub struct WatchAddArgs {
    #[arg(long)]
    pub site: String,

    #[arg(long)]
    pub url: String,

    /// Check frequency: 1h, 6h, 24h, 1w or minutes (default: config).
    #[arg(long)]
    pub freq: Option<String>,
}

#[derive(Debug, Args)]
pub struct WatchFreqArgs {
    #[arg(long)]
    pub site: String,

    #[arg(long)]
    pub url: String,

    /// 1h, 6h, 24h, 1w or minutes.
    #[arg(long)]
    pub freq: String,
}

#[derive(Debug, Subcommand)]
pub enum AckCommand {
    /// Mark a site's alerts as seen.
    Site(SiteArgs),
    /// Mark a page (or watched URL change) as seen.
    Page(PageArgs),
}

#[derive(Debug, Args)]
pub struct PageArgs {
    #[arg(long)]
    pub url: String,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Domain or URL (http:// is assumed without a scheme).
    #[arg(long)]
    pub url: String,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    /// Show the Discord notification settings.
    Show,
    Set(SettingsSetArgs),
    /// Send a test notification.
    Test,
}

#[derive(Debug, Args)]
pub struct SettingsSetArgs {
    /// Discord webhook URL. Omit to keep the stored one.
    #[arg(long, default_value = "")]
    pub webhook: String,

    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub enabled: bool,
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Refresh period (default: config `refresh_interval_secs`).
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Sites to keep expanded.
    #[arg(long = "site")]
    pub sites: Vec<String>,
}
