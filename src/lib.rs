//! Self-healing single PostgreSQL connection for a small HTTP service.
//!
//! DESIGN
//! ======
//! One process-wide session lives in a slot owned by
//! [`db::supervisor::Supervisor`]. Handlers borrow a snapshot per request
//! through [`state::AppState`] and run statements with [`db::records`].
//! When the session dies the supervisor closes it and installs a fresh one
//! after a backoff delay; [`shutdown::ShutdownCoordinator`] stops the whole
//! thing on SIGINT, SIGTERM, or SIGHUP.

pub mod config;
pub mod db;
pub mod routes;
pub mod shutdown;
pub mod state;
