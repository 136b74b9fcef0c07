//! HTTP protocol layer module
//!
//! Response builders and request query decoding, decoupled from the handlers.

pub mod query;
pub mod response;

// Re-export commonly used types
pub use query::QueryParams;
pub use response::{
    build_404_response, build_405_response, build_413_response, build_error_response,
    build_json_response, build_ok_response, build_options_response, build_text_response,
    strip_body,
};
