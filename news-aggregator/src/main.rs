use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use news_aggregator::config::{DEFAULT_DELIVERY_URL, DEFAULT_MANAGEMENT_URL};
use news_aggregator::mapper::{
    FIELD_ACTIVE, FIELD_DESCRIPTION, FIELD_EXPIRATION_DATE, FIELD_PRIORITY, FIELD_SHOW_ON_APP,
    FIELD_SHOW_ON_WEB, FIELD_TITLE,
};
use news_aggregator::sources::{
    DeliveryClient, HttpEventSink, InMemoryContentRepository, InMemoryManagementRepository,
    LogEventSink, ManagementClient,
};
use news_aggregator::{
    AggregatorConfig, Audience, ChangeNotification, ContentRepository, EventSink, ManagementEntry,
    ManagementRepository, NewsAggregator, NewsResponse, RawEntry, SystemClock, TokioSleeper,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "news-aggregator", version, about = "Ranked news cache with change propagation and expiry sweeping")]
struct Cli {
    #[arg(long, env = "CONTENTFUL_SPACE_ID", default_value = "")]
    space_id: String,

    #[arg(long, env = "CONTENTFUL_ENVIRONMENT", default_value = "master")]
    environment: String,

    #[arg(long, env = "CONTENTFUL_DELIVERY_TOKEN", default_value = "", hide_env_values = true)]
    delivery_token: String,

    #[arg(long, env = "CONTENTFUL_MANAGEMENT_TOKEN", default_value = "", hide_env_values = true)]
    management_token: String,

    #[arg(long, env = "CONTENTFUL_DELIVERY_URL", default_value = DEFAULT_DELIVERY_URL)]
    delivery_url: String,

    #[arg(long, env = "CONTENTFUL_MANAGEMENT_URL", default_value = DEFAULT_MANAGEMENT_URL)]
    management_url: String,

    /// Zone creation timestamps are normalized into
    #[arg(long, env = "NEWS_TIMEZONE", default_value = "America/Argentina/Buenos_Aires")]
    timezone: String,

    #[arg(long, env = "NEWS_SWEEP_SECONDS", default_value_t = 60)]
    sweep_seconds: u64,

    /// REST bridge of the message bus; events are only logged when unset
    #[arg(long, env = "EVENT_BRIDGE_URL")]
    event_bridge_url: Option<String>,

    #[arg(long, env = "EVENT_TOPIC", default_value = "websocket")]
    event_topic: String,

    /// Use in-memory repositories seeded with sample news
    #[arg(long, global = true)]
    demo: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the expiry sweeper until interrupted
    Serve,
    /// Run a single expiry sweep
    Sweep,
    /// Print the ranked news list for an audience
    Rank {
        #[arg(long)]
        audience: Audience,
    },
    /// Process one change notification
    Notify {
        #[arg(long)]
        topic: String,
        /// JSON file with the notification payload
        #[arg(long)]
        payload: Option<PathBuf>,
    },
}

struct Services {
    content: Arc<dyn ContentRepository>,
    management: Arc<dyn ManagementRepository>,
    sink: Arc<dyn EventSink>,
}

fn build_config(cli: &Cli) -> AggregatorConfig {
    AggregatorConfig {
        space_id: cli.space_id.clone(),
        environment: cli.environment.clone(),
        delivery_token: cli.delivery_token.clone(),
        management_token: cli.management_token.clone(),
        delivery_url: cli.delivery_url.clone(),
        management_url: cli.management_url.clone(),
        reference_timezone: cli.timezone.clone(),
        sweep_period: Duration::from_secs(cli.sweep_seconds),
        event_topic: cli.event_topic.clone(),
        event_bridge_url: cli.event_bridge_url.clone(),
        ..Default::default()
    }
}

fn remote_services(config: &AggregatorConfig) -> Result<Services> {
    config.validate_remote()?;

    let sink: Arc<dyn EventSink> = match &config.event_bridge_url {
        Some(url) => Arc::new(HttpEventSink::new(url, &config.fetch)?),
        None => {
            warn!("No event bridge configured, events will only be logged");
            Arc::new(LogEventSink)
        }
    };

    Ok(Services {
        content: Arc::new(DeliveryClient::new(config)?),
        management: Arc::new(ManagementClient::new(config)?),
        sink,
    })
}

async fn demo_services(config: &AggregatorConfig) -> Services {
    let now = Utc::now();
    let stamp = |offset: ChronoDuration| (now + offset).to_rfc3339_opts(SecondsFormat::Secs, true);

    let content = InMemoryContentRepository::new();
    let samples = [
        ("welcome", "Welcome to the academy", true, true, false, None),
        ("java-path", "New Java learning path", true, true, true, Some(ChronoDuration::days(3))),
        ("rust-meetup", "Rust meetup on Friday", true, false, true, Some(ChronoDuration::days(1))),
        ("old-promo", "Expired promotion", true, true, false, Some(ChronoDuration::days(-2))),
        ("draft", "Unreleased draft", false, true, true, None),
    ];
    for (index, (id, title, active, app, pinned, expires)) in samples.into_iter().enumerate() {
        let mut entry = RawEntry::new(id)
            .with_created_at(stamp(ChronoDuration::hours(-(index as i64) * 6)))
            .with_field(FIELD_TITLE, title)
            .with_field(FIELD_ACTIVE, active)
            .with_field(FIELD_SHOW_ON_APP, app)
            .with_field(FIELD_SHOW_ON_WEB, true)
            .with_field(FIELD_PRIORITY, pinned)
            .with_field(FIELD_DESCRIPTION, format!("{} (demo)", title));
        if let Some(offset) = expires {
            entry = entry.with_field(FIELD_EXPIRATION_DATE, stamp(offset));
        }
        content.insert(&config.primary_content_type, entry).await;
    }
    for n in 1..=4 {
        let entry = RawEntry::new(format!("evergreen-{}", n))
            .with_created_at(stamp(ChronoDuration::days(-30)))
            .with_field(FIELD_TITLE, format!("Evergreen resource #{}", n))
            .with_field(FIELD_SHOW_ON_APP, n % 2 == 0)
            .with_field(FIELD_SHOW_ON_WEB, true);
        content.insert(&config.extras_content_type, entry).await;
    }

    let management = InMemoryManagementRepository::new(config.locale.clone());
    let expired = [("old-promo", Some(7)), ("stale-draft", None)];
    for (id, published) in expired {
        let mut entry = ManagementEntry::new(id, 8)
            .with_field(FIELD_TITLE, &config.locale, id)
            .with_field(&config.expiration_field, &config.locale, stamp(ChronoDuration::days(-2)));
        if let Some(version) = published {
            entry = entry.published(version);
        }
        management.insert(&config.primary_content_type, entry).await;
    }

    Services {
        content: Arc::new(content),
        management: Arc::new(management),
        sink: Arc::new(LogEventSink),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli);
    config.validate()?;

    let services = if cli.demo {
        info!("Running with in-memory demo repositories");
        demo_services(&config).await
    } else {
        remote_services(&config)?
    };

    let aggregator = NewsAggregator::new(
        config,
        services.content,
        services.sink,
        Arc::new(SystemClock),
        Arc::new(TokioSleeper),
    )?;

    match cli.command {
        Command::Serve => {
            let sweeper = Arc::new(aggregator.expiry_sweeper(services.management));
            let handle = sweeper.spawn();
            info!("Serving; press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
            handle.abort();
            info!("Shutting down");
        }
        Command::Sweep => {
            let report = aggregator.expiry_sweeper(services.management).run_once().await?;
            info!(
                "Sweep {} matched {} entries, purged {}, failed {}",
                report.run_id,
                report.matched,
                report.purged.len(),
                report.failures.len()
            );
        }
        Command::Rank { audience } => match aggregator.news_for(audience).await? {
            NewsResponse::Items(items) => println!("{}", serde_json::to_string_pretty(&*items)?),
            NewsResponse::NoContent => info!("No content for {}", audience),
        },
        Command::Notify { topic, payload } => {
            let payload: Option<serde_json::Value> = match payload {
                Some(path) => {
                    let raw = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    Some(serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))?)
                }
                None => None,
            };
            let outcome = aggregator.handle_change(&ChangeNotification::new(topic, payload)).await?;
            info!("Notification outcome: {:?}", outcome);
        }
    }

    Ok(())
}
