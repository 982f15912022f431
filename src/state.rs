//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! Handlers never hold a database client of their own: they ask the
//! supervisor for the current handle once per request and pass that
//! snapshot to the query helpers.

use std::sync::Arc;

use crate::db::handle::ConnectionHandle;
use crate::db::supervisor::Supervisor;
use crate::db::target::Role;

/// Clone is required by Axum; `Supervisor` is a cheap channel-backed handle.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
    /// Configured role, reported even while no handle exists.
    pub role: Role,
}

impl AppState {
    #[must_use]
    pub fn new(supervisor: Supervisor, role: Role) -> Self {
        Self { supervisor, role }
    }

    /// Snapshot of the current handle for one request.
    #[must_use]
    pub fn handle(&self) -> Option<Arc<ConnectionHandle>> {
        self.supervisor.current()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::db::handle::ConnectionFactory;
    use crate::db::supervisor::ReconnectPolicy;
    use crate::db::target::Target;
    use crate::db::test_helpers::SpyFactory;

    /// `AppState` over a spy factory; no database is contacted.
    #[must_use]
    pub fn test_app_state(target: Option<Target>) -> (AppState, Arc<SpyFactory>) {
        let spy = Arc::new(SpyFactory::default());
        let factory: Arc<dyn ConnectionFactory> = spy.clone();
        let (supervisor, _task) = Supervisor::start(target, factory, ReconnectPolicy::default());
        (AppState::new(supervisor, Role::Primary), spy)
    }
}
