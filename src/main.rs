use clap::Parser;
use iptv_gateway::browser::Browser;
use iptv_gateway::channel::{self, Channel};
use iptv_gateway::config::{Args, Settings};
use iptv_gateway::epg::ingestor::EpgIngestor;
use iptv_gateway::provider::cache::SegmentCache;
use iptv_gateway::provider::core::ProviderCore;
use iptv_gateway::provider::demo::DemoProvider;
use iptv_gateway::tuner::pool::TunerPool;
use iptv_gateway::{create_app, GatewayContext};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(&args.config)?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    info!("starting iptv-gateway (upstream={})", settings.upstream.base_url);

    let cache_dir = PathBuf::from(&settings.cache.dir);
    tokio::fs::create_dir_all(&cache_dir).await.ok();

    let channels = load_or_seed_channels(&cache_dir);
    info!("loaded {} channels", channels.len());

    let browser_profile_dir = cache_dir.join("browser-profile");
    let browser = match Browser::launch(settings.server.debug_port, &browser_profile_dir.to_string_lossy()).await {
        Ok(b) => b,
        Err(e) => {
            error!("failed to launch shared browser: {e}");
            return Err(e);
        }
    };

    let pool = TunerPool::initialize(
        settings.tuners.pool_size,
        settings.tuners.clone(),
        settings.encoder.clone(),
        browser.clone(),
        settings.upstream.base_url.clone(),
    )
    .await;

    let epg_config = Arc::new(tokio::sync::RwLock::new(settings.epg.clone()));
    let epg = EpgIngestor::new(browser.clone(), settings.upstream.base_url.clone(), cache_dir.clone(), epg_config.clone());
    epg.load_cache().await;
    epg.start_auto_refresh();

    let segment_cache = Arc::new(SegmentCache::new(
        settings.cache.segment_cache_size,
        Duration::from_secs(settings.cache.segment_ttl_secs),
    ));
    spawn_segment_cache_janitor(segment_cache.clone());

    // Real provider scraping trivia is out of scope (spec.md §1); the demo
    // provider is registered so the VOD surface has something to serve.
    let mut providers: HashMap<String, Arc<ProviderCore>> = HashMap::new();
    let demo = Arc::new(DemoProvider::new("demo", vec!["https://cdn.example.com/demo/master.m3u8".to_string()]));
    providers.insert(
        "demo".to_string(),
        ProviderCore::new(
            demo,
            Duration::from_secs(settings.vod.refresh_interval_secs),
            Duration::from_secs(settings.vod.inactivity_timeout_secs),
        ),
    );

    let http_client = reqwest::Client::builder().build()?;

    let ctx = Arc::new(GatewayContext {
        channels,
        pool,
        providers,
        segment_cache,
        epg,
        http_client,
        vod: settings.vod.clone(),
        epg_config,
        browser,
    });

    let app = create_app(ctx.clone());

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal(ctx))
        .await?;
    Ok(())
}

/// On SIGINT/SIGTERM: cancel every tuner's encoder and idle reaper, stop the
/// EPG auto-refresh timer, and close the shared browser (spec.md §5
/// shutdown semantics) before the HTTP listener actually stops accepting.
async fn wait_for_shutdown_signal(ctx: Arc<GatewayContext>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining tuners and closing browser");
    ctx.pool.shutdown().await;
    ctx.epg.stop_auto_refresh().await;
    ctx.browser.shutdown().await;
}

/// Loads the channel list from the on-disk cache (spec.md §6 persisted state
/// layout); falls back to a single placeholder channel so the gateway still
/// boots for local testing against a mock guide.
fn load_or_seed_channels(cache_dir: &PathBuf) -> Vec<Channel> {
    let path = cache_dir.join("channels.json");
    match channel::load_channels(path.to_string_lossy().as_ref()) {
        Ok(channels) if !channels.is_empty() => channels,
        _ => {
            info!("no channel cache at {path:?}, seeding a placeholder channel");
            vec![Channel {
                id: "demo".to_string(),
                name: "Demo Channel".to_string(),
                number: "1".to_string(),
                category: "Demo".to_string(),
                search_terms: vec!["demo".to_string()],
            }]
        }
    }
}

fn spawn_segment_cache_janitor(cache: Arc<SegmentCache>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            cache.sweep_expired().await;
        }
    });
}
