//! Image uploads referenced by the `image_url` of chat messages

use futures_util::TryStreamExt;
use serde::Serialize;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::multipart::{FormData, Part};
use warp::{Buf, Filter, Rejection, Reply};

use crate::auth::token::TokenClass;
use crate::constants::MEDIA_PATH;
use crate::core::server::SharedChatServer;
use crate::error::{Result, RustyRelayError, ValidationKind};
use crate::handlers::api::{bearer, current_user, respond, HandlerResult};
use crate::handlers::with_server;

const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UploadedImage {
    pub filename: String,
    pub url: String,
}

/// `POST /upload/image` and `GET /media/<file>`
pub fn upload_routes(
    server: SharedChatServer,
) -> impl Filter<Extract = (Box<dyn Reply>,), Error = Rejection> + Clone {
    let upload = warp::path!("upload" / "image")
        .and(warp::post())
        .and(bearer())
        .and(warp::multipart::form().max_length(server.config.max_upload_bytes))
        .and(with_server(server.clone()))
        .and_then(upload_image);

    let media = warp::path(MEDIA_PATH)
        .and(warp::fs::dir(server.config.media_dir.clone()))
        .map(|file: warp::fs::File| Box::new(file) as Box<dyn Reply>);

    upload.or(media).unify()
}

async fn upload_image(token: Option<String>, form: FormData, server: SharedChatServer) -> HandlerResult {
    let result = async {
        let user = current_user(token, TokenClass::Access, &server).await?;
        let part = file_part(form).await?;
        let extension = image_extension(part.content_type())?;
        let data = read_part(part).await?;
        if data.is_empty() {
            return Err(RustyRelayError::ValidationError(ValidationKind::InvalidField(
                FILE_FIELD.to_string(),
            )));
        }

        // Client filenames are never used on disk
        let filename = format!("{}.{}", Uuid::new_v4(), extension);
        tokio::fs::create_dir_all(&server.config.media_dir).await?;
        tokio::fs::write(server.config.media_dir.join(&filename), &data).await?;
        log::info!("User {} uploaded {} ({} bytes)", user.id, filename, data.len());

        Ok::<_, RustyRelayError>(UploadedImage {
            url: format!("/{}/{}", MEDIA_PATH, filename),
            filename,
        })
    }
    .await;
    respond(result, StatusCode::CREATED)
}

async fn file_part(mut form: FormData) -> Result<Part> {
    while let Some(part) = form.try_next().await.map_err(malformed)? {
        if part.name() == FILE_FIELD {
            return Ok(part);
        }
    }
    Err(RustyRelayError::ValidationError(ValidationKind::MissingField(
        FILE_FIELD.to_string(),
    )))
}

fn image_extension(content_type: Option<&str>) -> Result<&'static str> {
    match content_type {
        Some("image/jpeg") => Ok("jpg"),
        Some("image/png") => Ok("png"),
        _ => Err(RustyRelayError::ValidationError(ValidationKind::UnsupportedMediaType)),
    }
}

async fn read_part(part: Part) -> Result<Vec<u8>> {
    part.stream()
        .try_fold(Vec::new(), |mut data, buf| async move {
            data.extend_from_slice(buf.chunk());
            Ok::<_, warp::Error>(data)
        })
        .await
        .map_err(malformed)
}

// Covers oversized bodies as well as broken multipart framing
fn malformed(err: warp::Error) -> RustyRelayError {
    log::debug!("Rejected upload body: {}", err);
    RustyRelayError::ValidationError(ValidationKind::InvalidField(FILE_FIELD.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_jpeg_and_png_accepted() {
        assert_eq!(image_extension(Some("image/jpeg")).unwrap(), "jpg");
        assert_eq!(image_extension(Some("image/png")).unwrap(), "png");
        assert_eq!(
            image_extension(Some("image/gif")).unwrap_err().error_reason(),
            "unsupported_media_type"
        );
        assert!(image_extension(None).is_err());
    }
}
