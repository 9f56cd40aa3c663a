//! # Configuration Modules
//!
//! Settings consumed by the network core: retry/probe tuning, proxy settings
//! and the event dispatch mode. Values come from a JSON file and can be
//! overridden by flat preference keys.

/// Network, proxy and event bus configuration.
pub mod config_net;
