//! Request handler module
//!
//! Routing dispatch plus one module per exposed route.

pub mod deserialize;
pub mod execute;
pub mod router;
pub mod status;
pub mod upload;

// Re-export main entry point
pub use router::handle_request;
