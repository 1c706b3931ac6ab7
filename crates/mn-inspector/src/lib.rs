//! Block and reward statistics cache for masternode networks.
//!
//! A background [`scheduler::Refresher`] polls the node, reduces block and
//! transaction lists into windowed statistics, and commits one snapshot per
//! network to the [`store::CacheStore`]. [`actions::ActionRegistry`] answers
//! queries by field name from those snapshots or live from the node.

pub mod actions;
pub mod aggregate;
pub mod app;
pub mod config;
pub mod db;
pub mod fetch;
pub mod node;
pub mod pool;
pub mod scheduler;
pub mod snapshot;
pub mod store;
