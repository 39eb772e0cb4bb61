// src/routes/media_routes.rs

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::{
    error::ApiError,
    integrations::media::sanitize_folder,
    middleware::auth_context::CallerContext,
    models::{ApiOk, AppState},
};

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_FOLDER: &str = "uploads";

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/media",
        post(upload_media).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
    )
}

#[derive(Debug, Serialize)]
pub struct UploadResult {
    pub secure_url: String,
}

#[derive(Debug, Default)]
struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    folder: Option<String>,
}

fn bad_upload(msg: impl Into<String>) -> ApiError {
    ApiError::BadRequest("INVALID_UPLOAD", msg.into())
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_upload(e.body_text()))?
    {
        match field.name() {
            Some("file") => {
                let is_image = field
                    .content_type()
                    .is_some_and(|ct| ct.starts_with("image/"));
                if !is_image {
                    return Err(bad_upload("only image files can be uploaded"));
                }
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(|e| bad_upload(e.body_text()))?;
                form.file = Some((file_name, bytes.to_vec()));
            }
            Some("folder") => {
                form.folder = Some(field.text().await.map_err(|e| bad_upload(e.body_text()))?);
            }
            _ => {}
        }
    }
    Ok(form)
}

pub async fn upload_media(
    State(state): State<AppState>,
    caller: CallerContext,
    multipart: Multipart,
) -> Result<Json<ApiOk<UploadResult>>, ApiError> {
    let form = read_form(multipart).await?;
    let Some((file_name, bytes)) = form.file.filter(|(_, b)| !b.is_empty()) else {
        return Err(bad_upload("file is required"));
    };
    let folder = match form.folder.as_deref() {
        None => DEFAULT_FOLDER.to_string(),
        Some(f) => sanitize_folder(f).ok_or_else(|| bad_upload("invalid folder name"))?,
    };

    let size = bytes.len();
    let secure_url = state.media.upload(bytes, &file_name, &folder).await?;
    tracing::info!(user_id = %caller.user_id, folder = %folder, size, "media uploaded");
    Ok(Json(ApiOk { data: UploadResult { secure_url } }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::integrations::media::fake::FakeMediaHost;

    const BOUNDARY: &str = "XBOUNDARYX";

    fn multipart_body(parts: &[(&str, Option<(&str, &str)>, &str)]) -> String {
        let mut out = String::new();
        for (name, file, content) in parts {
            out.push_str(&format!("--{BOUNDARY}\r\n"));
            match file {
                Some((file_name, content_type)) => out.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )),
                None => out.push_str(&format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")),
            }
            out.push_str(content);
            out.push_str("\r\n");
        }
        out.push_str(&format!("--{BOUNDARY}--\r\n"));
        out
    }

    // Mounted without the auth layer; the caller rides in the request extensions.
    fn app(media: Arc<FakeMediaHost>) -> Router {
        let mut state = crate::routes::test_support::lazy_state();
        state.media = media;
        let caller = crate::routes::test_support::caller(crate::models::Role::Doctor);
        Router::new()
            .route("/media", post(upload_media))
            .layer(axum::Extension(caller))
            .with_state(state)
    }

    fn request(body: String) -> Request<Body> {
        Request::post("/media")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_returns_secure_url() {
        let media = Arc::new(FakeMediaHost::default());
        let body = multipart_body(&[
            ("folder", None, "pets"),
            ("file", Some(("thor.png", "image/png")), "PNGDATA"),
        ]);
        let res = app(media.clone()).oneshot(request(body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["data"]["secure_url"], "https://media.test/pets/thor.png");
        assert_eq!(*media.uploads.lock().unwrap(), vec![("pets".to_string(), "thor.png".to_string(), 7)]);
    }

    #[tokio::test]
    async fn test_non_image_and_bad_folder_are_rejected() {
        let media = Arc::new(FakeMediaHost::default());
        let body = multipart_body(&[("file", Some(("notes.txt", "text/plain")), "hello")]);
        let res = app(media.clone()).oneshot(request(body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let body = multipart_body(&[
            ("folder", None, "../secrets"),
            ("file", Some(("a.png", "image/png")), "x"),
        ]);
        let res = app(media.clone()).oneshot(request(body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(media.uploads.lock().unwrap().is_empty());
    }
}
