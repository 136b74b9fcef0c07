//! `GET /execute?cmd=...`

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;

use crate::config::AppState;
use crate::error::HandlerError;
use crate::http::{self, QueryParams};

/// Hand the raw `cmd` value to the shell and return its stdout
pub async fn execute(
    query: &QueryParams,
    state: &AppState,
) -> Result<Response<Full<Bytes>>, HandlerError> {
    let cmd = query.get("cmd").ok_or(HandlerError::MissingParam("cmd"))?;
    let stdout = state.shell.run(cmd).await?;
    Ok(http::build_ok_response(stdout, "text/html; charset=utf-8"))
}
