use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser};
use std::time::Duration;

use stackend_realtime::config::{load_config_from_path, Community, CONFIG_FILE_PATH};
use stackend_realtime::logger::{self, LogTag};
use stackend_realtime::realtime::{
    EventType, Initializer, InstanceRegistry, Listener, RawEvent, RealTimeListener, Subscription,
};

#[derive(Parser, Debug)]
#[command(name = "stackend-realtime")]
#[command(about = "Follow the realtime notification stream of a Stackend community", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, default_value = CONFIG_FILE_PATH)]
    config: String,

    /// API server, overrides the config file
    #[arg(long)]
    server: Option<String>,

    /// API context path, overrides the config file
    #[arg(long)]
    context_path: Option<String>,

    /// Internal community name (xcapCommunityName)
    #[arg(long)]
    community: String,

    /// Community permalink, defaults to the community name
    #[arg(long)]
    permalink: Option<String>,

    #[arg(long, default_value_t = 0)]
    community_id: i64,

    /// Socket address to use instead of the one derived from the config
    #[arg(long)]
    address: Option<String>,

    /// Comment stream to follow as <context>:<referenceId>; may be repeated
    #[arg(long = "comments", value_name = "CONTEXT:REFERENCE_ID")]
    comments: Vec<String>,

    /// Seconds between PINGs, 0 disables
    #[arg(long, default_value_t = 30)]
    ping_secs: u64,

    #[command(flatten)]
    #[allow(dead_code)]
    log: LogFlags,
}

/// Accepted so clap does not reject them; read through `arguments`
#[derive(ClapArgs, Debug)]
#[allow(dead_code)]
struct LogFlags {
    #[arg(long)]
    debug_realtime: bool,
    #[arg(long)]
    debug_transport: bool,
    #[arg(long)]
    debug_queue: bool,
    #[arg(long)]
    debug_router: bool,
    #[arg(long)]
    debug_registry: bool,
    #[arg(long)]
    verbose: bool,
    #[arg(long)]
    quiet: bool,
}

fn parse_comments(spec: &str) -> Result<Subscription> {
    let (context, reference_id) = spec
        .rsplit_once(':')
        .with_context(|| format!("'{}' is not <context>:<referenceId>", spec))?;
    let reference_id: i64 = reference_id
        .parse()
        .with_context(|| format!("Invalid referenceId in '{}'", spec))?;
    Ok(Subscription::comments(context, reference_id)?)
}

fn describe(event: EventType, raw: Option<&RawEvent>) -> String {
    match raw {
        Some(RawEvent::Closed { code, reason }) => {
            format!("{} (code {:?}, reason '{}')", event, code, reason)
        }
        Some(RawEvent::Error(error)) => format!("{}: {}", event, error),
        _ => event.to_string(),
    }
}

/// Logs every broadcast of every connection the registry creates
fn event_logger() -> Initializer {
    Initializer::new(|manager| {
        let name = manager.community().xcap_community_name.clone();
        let listener = Listener::new(move |event, raw, message| match message {
            Some(message) => logger::info(
                LogTag::Realtime,
                &format!(
                    "[{}] {} {:?} {} {}",
                    name,
                    event,
                    message.message_type,
                    message.community_context.as_deref().unwrap_or("-"),
                    message.component_name.as_deref().unwrap_or("-"),
                ),
            ),
            None => logger::info(
                LogTag::Realtime,
                &format!("[{}] {}", name, describe(event, raw)),
            ),
        });
        if let Err(e) = manager.add_listener(listener, None, None, None) {
            logger::error(LogTag::System, &format!("Failed to attach event logger: {}", e));
        }
    })
}

async fn run(args: Args) -> Result<()> {
    let mut config = load_config_from_path(&args.config)?;
    if let Some(server) = args.server {
        config.server = server;
    }
    if let Some(context_path) = args.context_path {
        config.context_path = context_path;
    }

    let subscriptions = args
        .comments
        .iter()
        .map(|spec| parse_comments(spec))
        .collect::<Result<Vec<_>>>()?;

    let permalink = args.permalink.as_deref().unwrap_or(&args.community);
    let community = Community::new(args.community_id, &args.community, permalink);

    let registry = InstanceRegistry::new(config);
    registry.add_initializer(event_logger());

    let manager = match args.address.as_deref() {
        Some(address) => registry.get_instance_at(&community, address)?,
        None => registry.get_instance(&community)?,
    };
    logger::info(
        LogTag::System,
        &format!("🚀 Following {} at {}", community.xcap_community_name, manager.address()),
    );

    for subscription in &subscriptions {
        let key = subscription.key();
        let listener = RealTimeListener::new(move |message, payload| {
            logger::info(
                LogTag::Realtime,
                &format!(
                    "{} {:?}: {} #{} by user {}",
                    key, message.message_type, payload.object_type, payload.id, payload.user_id
                ),
            )
        });
        manager.subscribe(subscription, listener)?;
    }

    let mut ping = (args.ping_secs > 0).then(|| {
        let period = Duration::from_secs(args.ping_secs);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = async {
                match ping.as_mut() {
                    Some(interval) => { interval.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                if let Err(e) = manager.ping() {
                    logger::warning(LogTag::System, &format!("PING failed: {}", e));
                }
            }
        }
    }

    let removed = registry.remove_all();
    logger::info(
        LogTag::System,
        &format!("✅ Shut down {} connection(s)", removed),
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logger::init();

    if let Err(e) = run(args).await {
        logger::error(LogTag::System, &format!("❌ {:#}", e));
        std::process::exit(1);
    }
}
