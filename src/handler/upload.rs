//! `POST /upload` (multipart, field `file`)

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::Response;
use std::convert::Infallible;

use crate::config::AppState;
use crate::error::{BoxError, HandlerError};
use crate::http;
use crate::logger;

const FILE_FIELD: &str = "file";

/// Store the first `file` part under the upload directory.
///
/// Only parts that carry a filename count as files; a request without one is
/// a 400. The body is read up to `http.max_body_size` whether or not it
/// declared a length.
pub async fn upload<B>(
    headers: &HeaderMap,
    body: B,
    state: &AppState,
) -> Result<Response<Full<Bytes>>, HandlerError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let Ok(boundary) = multer::parse_boundary(content_type) else {
        return Err(HandlerError::MissingFile(FILE_FIELD));
    };

    let limit = state.config.http.max_body_size;
    let bytes = Limited::new(body, usize::try_from(limit).unwrap_or(usize::MAX))
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                HandlerError::TooLarge(limit)
            } else {
                HandlerError::Body(e.to_string())
            }
        })?
        .to_bytes();
    let stream = futures::stream::once(async move { Ok::<_, Infallible>(bytes) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(ToString::to_string) else {
            continue;
        };
        let data = field.bytes().await?;
        let path = crate::upload::save(&state.config.upload.dir, &filename, &data).await?;
        logger::log_info(&format!(
            "[Upload] '{filename}' stored as {path} ({} bytes)",
            data.len()
        ));
        return Ok(http::build_text_response("File uploaded!"));
    }

    Err(HandlerError::MissingFile(FILE_FIELD))
}
