use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Number of ingest lanes. Points of one device always share a lane and
    /// are evaluated in arrival order; lanes run concurrently.
    pub ingest_parallelism: usize,
    /// Upper bound for one point's cache write plus its synthetic evaluations.
    pub eval_timeout: HumanDuration,
    /// Capacity of the ingest, derived-value and alert channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Backing record store access.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Bound on a single history range query; exceeding it surfaces as
    /// a store-unavailable evaluation error.
    #[serde(default = "default_query_timeout")]
    pub query_timeout: HumanDuration,
    /// How far behind its newest sample the built-in in-memory store keeps
    /// a series. Unused when an external store is attached.
    #[serde(default = "default_retention")]
    pub retention: HumanDuration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            query_timeout: default_query_timeout(),
            retention: default_retention(),
        }
    }
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_query_timeout() -> HumanDuration {
    "2s".parse().expect("hardcoded duration must parse")
}

fn default_retention() -> HumanDuration {
    "30d".parse().expect("hardcoded duration must parse")
}
