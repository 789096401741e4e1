use age_prediction_api::{api, config::Config, model::load_predictor, state::AppState, ui::run_terminal_dashboard};
use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info};

static DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(true)
        .compact()
        .init();

    // Load config
    let cfg_path = env::var("AGE_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg_path = PathBuf::from(cfg_path);
    let cfg = Config::load_from_path(&cfg_path)?;
    info!(
        "rate limit: capacity={} refill_rate={}/s",
        cfg.rate_limit.capacity, cfg.rate_limit.refill_rate
    );

    // State
    let predictor = load_predictor(&cfg.model.path);
    let addr: SocketAddr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port).parse()?;
    let app_state = Arc::new(AppState::new(cfg, predictor)?);

    // Config watcher
    {
        let app_state = app_state.clone();
        let cfg_path = cfg_path.clone();
        tokio::spawn(async move {
            if let Err(e) = watch_config_and_apply(cfg_path, app_state).await {
                error!("config watcher error: {:?}", e);
            }
        });
    }

    // Terminal dashboard (off by default; set AGE_TUI=1 to enable)
    let enable_tui = env::var("AGE_TUI").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
    if enable_tui {
        let app = app_state.clone();
        tokio::spawn(async move { run_terminal_dashboard(app).await; });
    }

    // HTTP server
    let router = api::router(app_state);
    info!("listening on http://{}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {:?}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn watch_config_and_apply(cfg_path: PathBuf, app: Arc<AppState>) -> Result<()> {
    use tokio::sync::mpsc;
    let (tx, mut rx) = mpsc::channel::<()>(8);

    let mut watcher: RecommendedWatcher = Watcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(ev) = res {
                match ev.kind {
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => {
                        let _ = tx.try_send(());
                    }
                    _ => {}
                }
            }
        },
        notify::Config::default(),
    )?;

    let watch_dir = match cfg_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => std::path::Path::new("."),
    };
    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;

    while rx.recv().await.is_some() {
        match Config::load_from_path(&cfg_path) {
            Ok(new_cfg) => match app.apply_config(new_cfg).await {
                Ok(()) => info!("applied new config (hot reload)"),
                Err(e) => error!("config reloaded with errors: {}", e),
            },
            Err(e) => {
                error!("failed to reload config: {:?}", e);
            }
        }
    }
    Ok(())
}
