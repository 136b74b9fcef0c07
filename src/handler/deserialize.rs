//! `GET /deserialize?data=...`

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;

use crate::config::AppState;
use crate::error::HandlerError;
use crate::http::{self, QueryParams};
use crate::reconstruct;

/// Reconstruct an object from the UTF-8 bytes of `data` and return its repr
pub fn deserialize(
    query: &QueryParams,
    state: &AppState,
) -> Result<Response<Full<Bytes>>, HandlerError> {
    let data = query.get("data").ok_or(HandlerError::MissingParam("data"))?;
    let value = state.reconstructor.reconstruct(data.as_bytes())?;
    Ok(http::build_text_response(reconstruct::repr(&value)))
}
