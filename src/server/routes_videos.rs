use crate::library::VideoInfo;
use crate::server::{error::AppError, AppContext};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::{get, post},
    Json, Router,
};
use hlsduo_common::Error;
use serde::Serialize;

/// Multipart field carrying the uploaded file.
const UPLOAD_FIELD: &str = "video";

pub fn video_routes() -> Router<AppContext> {
    Router::new()
        .route("/videos", get(list_videos))
        .route(
            "/upload",
            post(upload_video).layer(DefaultBodyLimit::disable()),
        )
}

async fn list_videos(State(ctx): State<AppContext>) -> Result<Json<Vec<VideoInfo>>, AppError> {
    Ok(Json(ctx.library.list().await?))
}

#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
    filename: String,
}

async fn upload_video(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| Error::invalid_input("upload is missing a file name"))?;

        let mut upload = ctx.library.begin_upload(&file_name).await?;
        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    upload.abort().await;
                    return Err(bad_multipart(e).into());
                }
            };
            if let Err(e) = upload.write(&chunk).await {
                upload.abort().await;
                return Err(e.into());
            }
        }

        let filename = upload.finish().await?;
        return Ok(Json(UploadResponse {
            message: "Upload successful",
            filename,
        }));
    }

    Err(Error::invalid_input(format!("multipart field '{UPLOAD_FIELD}' is required")).into())
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> Error {
    Error::invalid_input(format!("malformed upload: {e}"))
}
