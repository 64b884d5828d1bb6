//! Non-blocking, idempotent secondary index migrations for the Insightball
//! PostgreSQL schema.
//!
//! The crate is split the same way as the application backend:
//!
//! - [`domain`] owns the index-selection policy, the index lifecycle state
//!   machine, and the migration runner. It talks to storage only through the
//!   ports in [`domain::ports`].
//! - [`outbound`] holds the PostgreSQL adapters for those ports.
//! - [`config`] loads runner settings.

pub mod config;
pub mod domain;
pub mod outbound;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
