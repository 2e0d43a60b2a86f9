use crate::config::Config;
use crate::library::VideoLibrary;
use anyhow::{Context, Result};
use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use hlsduo_av::{get_tool_path, FfmpegTranscoder, Transcoder};
use hlsduo_stream::{StreamCoordinator, StreamSettings};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

pub mod error;
pub mod routes_stream;
pub mod routes_videos;

pub const HLS_PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const HLS_SEGMENT_CONTENT_TYPE: &str = "video/MP2T";

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub coordinator: Arc<StreamCoordinator>,
    pub library: Arc<VideoLibrary>,
}

impl AppContext {
    pub fn new(config: Config, transcoder: Arc<dyn Transcoder>) -> Self {
        let mut settings = StreamSettings::new(&config.storage.hls_root);
        settings.tail_interval = config.stream.tail_interval();

        Self {
            coordinator: Arc::new(StreamCoordinator::new(settings, transcoder)),
            library: Arc::new(VideoLibrary::new(&config.storage.videos_dir)),
            config: Arc::new(config),
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let hls = Router::new()
        .nest_service("/hls", ServeDir::new(&ctx.config.storage.hls_root))
        .layer(middleware::from_fn(hls_content_type));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api",
            routes_videos::video_routes().merge(routes_stream::stream_routes()),
        )
        .merge(hls)
        .nest_service("/videos", ServeDir::new(&ctx.config.storage.videos_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(ctx);

    // SPA fallback: serves index.html for any route that doesn't match a file
    if let Some(dir) = static_dir {
        if dir.exists() {
            tracing::info!("Serving static files from {:?}", dir);
            let index_path = dir.join("index.html");
            app = app.fallback_service(
                ServeDir::new(&dir)
                    .append_index_html_on_directories(true)
                    .not_found_service(ServeFile::new(index_path)),
            );
        }
    }

    app
}

async fn health_check() -> &'static str {
    "ok"
}

/// Content type for files under the HLS root, by extension.
fn hls_content_type_for(path: &str) -> Option<&'static str> {
    if path.ends_with(".m3u8") {
        Some(HLS_PLAYLIST_CONTENT_TYPE)
    } else if path.ends_with(".ts") {
        Some(HLS_SEGMENT_CONTENT_TYPE)
    } else {
        None
    }
}

async fn hls_content_type(req: Request, next: Next) -> Response {
    let content_type = hls_content_type_for(req.uri().path());
    let mut response = next.run(req).await;

    if let Some(content_type) = content_type {
        if response.status().is_success() {
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            // Live playlists change every segment.
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }
    }
    response
}

/// Build the production transcoder from configuration.
///
/// A missing ffmpeg is not fatal here; starting a stream then fails with a
/// launch error instead.
pub fn ffmpeg_transcoder(config: &Config) -> Arc<dyn Transcoder> {
    let program = match get_tool_path("ffmpeg", config.tools.ffmpeg_path.as_deref()) {
        Ok(path) => {
            tracing::info!("Using ffmpeg at {}", path.display());
            path
        }
        Err(e) => {
            tracing::warn!("{e}; streams will fail to start until ffmpeg is installed");
            PathBuf::from("ffmpeg")
        }
    };
    Arc::new(FfmpegTranscoder::new(
        program,
        config.stream.encode_settings(),
    ))
}

/// Start the HTTP server
///
/// Runs until SIGINT/SIGTERM, then stops both streams and releases the
/// source buffer before returning.
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    tokio::fs::create_dir_all(&config.storage.hls_root)
        .await
        .with_context(|| format!("Failed to create HLS root {:?}", config.storage.hls_root))?;

    let transcoder = ffmpeg_transcoder(&config);
    let static_dir = config.server.static_dir.clone();
    let ctx = AppContext::new(config, transcoder);
    ctx.library
        .ensure_dir()
        .await
        .context("Failed to prepare video storage")?;
    tracing::info!("Videos directory: {}", ctx.library.root().display());

    let coordinator = Arc::clone(&ctx.coordinator);
    let app = create_router(ctx, static_dir);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    tracing::info!("Stopping streams...");
    if let Err(e) = coordinator.close().await {
        tracing::error!("Failed to stop streams cleanly: {}", e);
    }

    served?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
