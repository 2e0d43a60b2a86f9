use crate::server::{error::AppError, AppContext, HLS_PLAYLIST_CONTENT_TYPE};
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use hlsduo_common::Error;
use hlsduo_stream::PipelineStatus;
use serde::{Deserialize, Serialize};

pub fn stream_routes() -> Router<AppContext> {
    Router::new()
        .route("/stream/start", post(start_stream))
        .route("/stream/stop", post(stop_stream))
        .route("/stream/status", get(stream_status))
        .route("/stream/:name/index.m3u8", get(stream_playlist))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartStreamRequest {
    video_path: String,
    stream_type: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartStreamResponse {
    message: &'static str,
    #[serde(rename = "type")]
    stream_type: String,
    play_url: String,
}

async fn start_stream(
    State(ctx): State<AppContext>,
    Json(payload): Json<StartStreamRequest>,
) -> Result<Json<StartStreamResponse>, AppError> {
    let video_path = payload.video_path.trim();
    if video_path.is_empty() {
        return Err(Error::invalid_input("videoPath cannot be empty").into());
    }

    let started = ctx
        .coordinator
        .start_stream(&payload.stream_type, std::path::Path::new(video_path))
        .await?;

    Ok(Json(StartStreamResponse {
        message: "Streaming started",
        stream_type: started.name.to_string(),
        play_url: started.playlist_url,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StopStreamRequest {
    stream_type: String,
}

#[derive(Serialize)]
struct StopStreamResponse {
    message: &'static str,
    #[serde(rename = "type")]
    stream_type: String,
}

async fn stop_stream(
    State(ctx): State<AppContext>,
    Json(payload): Json<StopStreamRequest>,
) -> Result<Json<StopStreamResponse>, AppError> {
    ctx.coordinator.stop_stream(&payload.stream_type).await?;

    Ok(Json(StopStreamResponse {
        message: "Streaming stopped",
        stream_type: payload.stream_type,
    }))
}

async fn stream_status(State(ctx): State<AppContext>) -> Json<Vec<PipelineStatus>> {
    Json(ctx.coordinator.statuses())
}

async fn stream_playlist(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let playlist = ctx.coordinator.playlist(&name)?;
    Ok((
        [
            (header::CONTENT_TYPE, HLS_PLAYLIST_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        playlist,
    ))
}
