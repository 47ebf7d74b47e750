use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;

use crate::cli::{
    AckCommand, Cli, Command, DetailArgs, MonitorArgs, SettingsCommand, SettingsSetArgs, SiteArgs,
    SitesArgs, WatchAddArgs, WatchCommand, WatchFreqArgs, WatchUrlArgs,
};
use crate::config::Config;
use crate::gateway::HttpGateway;
use crate::model::{WatchFrequency, parse_freq_min};
use crate::novelty::NoveltyState;
use crate::seen_store::{LocalFsKvStore, SeenStore};
use crate::session::{SessionController, SessionSettings, WatchToggle};
use crate::view::{DashboardView, SiteView, time_ago, time_until};

struct Context {
    config: Config,
    session: SessionController,
}

impl Context {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = Config::load(cli.config.as_deref()).context("load config")?;
        if let Some(api_base) = &cli.api_base {
            config.api_base = api_base.clone();
        }
        if let Some(state_dir) = &cli.state_dir {
            config.state_dir = state_dir.clone();
        }
        config.validate()?;
        tracing::debug!(?config, "resolved config");

        let gateway = HttpGateway::new(&config.api_base).context("create gateway")?;
        let seen = SeenStore::load(LocalFsKvStore::new(&config.state_dir));
        let session = SessionController::new(
            Arc::new(gateway),
            Arc::new(seen),
            SessionSettings::from(&config),
        );
        Ok(Self { config, session })
    }

    fn freq_or_default(&self, raw: Option<&str>) -> anyhow::Result<u32> {
        match raw {
            Some(raw) => parse_freq_min(raw),
            None => Ok(self.config.default_freq_min),
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::open(&cli)?;
    match cli.command {
        Command::Sites(args) => sites(&ctx, args).await.context("sites"),
        Command::Expand(args) => expand(&ctx, args).await.context("expand"),
        Command::Detail(args) => detail(&ctx, args).await.context("detail"),
        Command::Watch { command } => watch(&ctx, command).await.context("watch"),
        Command::Ack { command } => {
            ack(&ctx, command);
            Ok(())
        }
        Command::Scan(args) => {
            ctx.session
                .trigger_scan(&args.url)
                .await
                .context("scan")?;
            println!("scan requested for {}", args.url.trim());
            print_sites(&ctx.session.view());
            Ok(())
        }
        Command::Settings { command } => settings(&ctx, command).await.context("settings"),
        Command::Monitor(args) => monitor(&ctx, args).await.context("monitor"),
    }
}

async fn sites(ctx: &Context, args: SitesArgs) -> anyhow::Result<()> {
    load_site_list(&ctx.session).await?;
    ctx.session.set_query(&args.query);
    ctx.session.load_statuses().await;
    print_sites(&ctx.session.view());
    Ok(())
}

async fn expand(ctx: &Context, args: SiteArgs) -> anyhow::Result<()> {
    load_site_list(&ctx.session).await?;
    ctx.session.expand(&args.site).await;

    let view = ctx.session.view();
    let site = view
        .site(&args.site)
        .with_context(|| format!("unknown site: {}", args.site))?;
    print_site_line(site);
    if let Some(err) = &site.error {
        eprintln!("warning: {err}");
    }

    let now = Utc::now();
    for group in &site.groups {
        println!("{}", group.host);
        for page in &group.pages {
            let mut line = format!("  {}", page.path);
            if page.is_new {
                line.push_str("  [new]");
            }
            if let Some(badge) = &page.watch {
                line.push_str(&format!("  [watch {}", badge.freq_label()));
                if let Some(next) = badge.next_run_at {
                    line.push_str(&format!(", next in {}", time_until(next, now)));
                }
                line.push(']');
                if badge.has_unseen_change {
                    line.push_str("  [changed]");
                }
            }
            println!("{line}");
        }
    }

    if let Some(alerts) = &view.alerts {
        println!("latest sinks:");
        for sink in &alerts.sinks {
            println!(
                "  {}  {}:{}:{}  {}  {}",
                sink.kind,
                sink.source_url,
                sink.line,
                sink.col,
                sink.func,
                ago(sink.last_detected_at, now)
            );
        }
        println!("latest assets:");
        for asset in &alerts.assets {
            println!(
                "  {}  {}  seen {}x  {}",
                asset.endpoint,
                asset.category.as_deref().unwrap_or("-"),
                asset.seen_count,
                ago(asset.last_seen, now)
            );
        }
    }
    Ok(())
}

async fn detail(ctx: &Context, args: DetailArgs) -> anyhow::Result<()> {
    let detail = ctx.session.site_detail(&args.site, &args.filter).await;
    if let Some(err) = detail.error {
        anyhow::bail!("load {}: {err}", args.site);
    }

    let now = Utc::now();
    println!("pages ({}):", detail.pages.len());
    for page in &detail.pages {
        println!("  {}  {}", page.url_norm, ago(page.scanned_at, now));
    }
    println!("endpoints ({}):", detail.endpoints.len());
    for ep in &detail.endpoints {
        println!("  {}  seen {}x  {}", ep.endpoint, ep.seen_count, ago(ep.last_seen, now));
    }
    println!("sinks ({}):", detail.sinks.len());
    for sink in &detail.sinks {
        println!(
            "  {}  {}:{}:{}  {}",
            sink.kind, sink.source_url, sink.line, sink.col, sink.func
        );
    }
    Ok(())
}

async fn watch(ctx: &Context, command: WatchCommand) -> anyhow::Result<()> {
    let session = &ctx.session;
    match command {
        WatchCommand::List(args) => {
            let set = session.reload_watches(&args.site).await;
            if !set.failed_variants.is_empty() {
                eprintln!(
                    "warning: watch list unavailable for {}",
                    set.failed_variants.join(", ")
                );
            }
            let now = Utc::now();
            for (url_norm, watch) in &set.by_url {
                let label = WatchFrequency::from_minutes(watch.freq_min)
                    .map(|freq| freq.label().to_owned())
                    .unwrap_or_else(|| format!("{}m", watch.freq_min));
                let next = watch
                    .next_run_at
                    .map(|at| time_until(at, now))
                    .unwrap_or_else(|| "-".to_owned());
                let state = if watch.enabled { "enabled" } else { "disabled" };
                println!("{url_norm}\t{label}\t{state}\tnext {next}");
            }
        }
        WatchCommand::Add(WatchAddArgs { site, url, freq }) => {
            let freq_min = ctx.freq_or_default(freq.as_deref())?;
            session.add_watch(&site, &url, freq_min).await?;
            println!("watching {}", url.trim());
        }
        WatchCommand::Toggle(WatchAddArgs { site, url, freq }) => {
            let freq_min = ctx.freq_or_default(freq.as_deref())?;
            session.reload_watches(&site).await;
            match session.toggle_watch(&site, &url, freq_min).await? {
                WatchToggle::Watched => println!("watching {}", url.trim()),
                WatchToggle::Unwatched => println!("unwatched {}", url.trim()),
            }
        }
        WatchCommand::Remove(WatchUrlArgs { site, url }) => {
            session.reload_watches(&site).await;
            session.remove_watch(&site, &url).await?;
            println!("unwatched {}", url.trim());
        }
        WatchCommand::Freq(WatchFreqArgs { site, url, freq }) => {
            let freq_min = parse_freq_min(&freq)?;
            session.reload_watches(&site).await;
            session.set_watch_frequency(&site, &url, freq_min).await?;
            println!("{} now every {freq_min}m", url.trim());
        }
        WatchCommand::ScanNow(WatchUrlArgs { site, url }) => {
            session.reload_watches(&site).await;
            session.scan_watch_now(&site, &url).await?;
            println!("scan queued for {}", url.trim());
        }
    }
    Ok(())
}

fn ack(ctx: &Context, command: AckCommand) {
    match command {
        AckCommand::Site(args) => {
            ctx.session.acknowledge_site(&args.site);
            println!("acknowledged {}", args.site);
        }
        AckCommand::Page(args) => {
            ctx.session.open_page(&args.url);
            println!("acknowledged {}", args.url.trim());
        }
    }
}

async fn settings(ctx: &Context, command: SettingsCommand) -> anyhow::Result<()> {
    match command {
        SettingsCommand::Show => {
            let settings = ctx.session.discord_settings().await;
            println!("enabled: {}", settings.enabled);
            let webhook = if settings.webhook_masked.is_empty() {
                "(not set)"
            } else {
                settings.webhook_masked.as_str()
            };
            println!("webhook: {webhook}");
        }
        SettingsCommand::Set(SettingsSetArgs { webhook, enabled }) => {
            ctx.session.save_discord_settings(&webhook, enabled).await?;
            println!("saved");
        }
        SettingsCommand::Test => {
            ctx.session.test_discord().await?;
            println!("test notification sent");
        }
    }
    Ok(())
}

async fn monitor(ctx: &Context, args: MonitorArgs) -> anyhow::Result<()> {
    let session = &ctx.session;
    let every = args
        .interval_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.config.refresh_interval());
    if every.is_zero() {
        anyhow::bail!("--interval-secs must be greater than zero");
    }

    session.load_sites().await;
    session.load_statuses().await;
    for site_id in &args.sites {
        session.expand(site_id).await;
    }

    let mut rx = session.subscribe();
    let mut last = novelty_by_site(&rx.borrow_and_update());
    print_sites(&session.view());
    tracing::info!(interval_secs = every.as_secs(), "monitoring");

    let refresher = session.run_auto_refresh(every);
    tokio::pin!(refresher);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("listen for ctrl-c")?;
                session.shutdown();
                break;
            }
            _ = &mut refresher => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = novelty_by_site(&rx.borrow_and_update());
                for (site_id, state) in &current {
                    let previous = last.get(site_id).copied().unwrap_or_default();
                    if previous != *state {
                        println!("{site_id}: {} -> {}", previous.as_str(), state.as_str());
                    }
                }
                last = current;
            }
        }
    }
    Ok(())
}

async fn load_site_list(session: &SessionController) -> anyhow::Result<()> {
    session.load_sites().await;
    if let Some(err) = session.view().sites_error {
        anyhow::bail!("load sites: {err}");
    }
    Ok(())
}

fn novelty_by_site(view: &DashboardView) -> HashMap<String, NoveltyState> {
    view.sites
        .iter()
        .map(|site| (site.id.clone(), site.novelty))
        .collect()
}

fn print_sites(view: &DashboardView) {
    if let Some(err) = &view.sites_error {
        eprintln!("warning: {err}");
    }
    for site in &view.sites {
        print_site_line(site);
    }
}

fn print_site_line(site: &SiteView) {
    let scanned = ago(site.last_scan_at, Utc::now());
    println!(
        "{}\t{}\t{}\t{}",
        site.id,
        site.novelty.as_str(),
        scanned,
        site.hosts.join(",")
    );
}

fn ago(at: Option<chrono::DateTime<Utc>>, now: chrono::DateTime<Utc>) -> String {
    at.map(|at| time_ago(at, now))
        .unwrap_or_else(|| "never".to_owned())
}
