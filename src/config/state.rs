// Application state module
// Holds configuration plus the capabilities and counter shared by all handlers

use std::sync::Arc;

use super::types::Config;
use super::DB_PASSWORD;
use crate::exec::{ShellRunner, SystemShell};
use crate::metrics::RequestCounter;
use crate::reconstruct::{self, ObjectReconstructor};

/// Application state
pub struct AppState {
    pub config: Config,

    /// Health-check request counter exposed on `/metrics`
    pub requests: RequestCounter,

    /// Backs `/execute`
    pub shell: Arc<dyn ShellRunner>,

    /// Backs `/deserialize`
    pub reconstructor: Arc<dyn ObjectReconstructor>,

    /// Hardcoded credential; never read by a route
    #[allow(dead_code)]
    pub db_password: &'static str,
}

impl AppState {
    /// Create state with the system shell and the configured reconstructor
    pub fn new(config: &Config) -> Self {
        Self::with_capabilities(
            config,
            Arc::new(SystemShell),
            reconstruct::from_mode(config.deserialize.mode),
        )
    }

    /// Create state with explicit capabilities (used to swap in test doubles)
    pub fn with_capabilities(
        config: &Config,
        shell: Arc<dyn ShellRunner>,
        reconstructor: Arc<dyn ObjectReconstructor>,
    ) -> Self {
        Self {
            config: config.clone(),
            requests: RequestCounter::new(),
            shell,
            reconstructor,
            db_password: DB_PASSWORD,
        }
    }
}
