//! Offline-first data access for the DMS business data browser.
//!
//! Reads go cache-first through [`cache::SyncOrchestrator`], connectivity is
//! confirmed by [`net::ConnectivityProbe`] rather than trusted, and writes
//! made while offline wait in the durable [`sync::MutationQueue`] until the
//! remote is reachable again.

pub mod cache;
pub mod config;
pub mod db;
pub mod dms;
pub mod engine;
pub mod error;
pub mod logging;
pub mod net;
pub mod observable;
pub mod sync;

#[cfg(test)]
mod test_support;
