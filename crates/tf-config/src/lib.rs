pub mod cache;
pub mod fleet;
pub mod logging;
pub mod metrics;
pub mod rule;
pub mod runtime;
pub mod server;
pub mod sinks;
pub mod telefuse;
pub mod types;
mod validate;

pub use cache::CacheConfig;
pub use fleet::{DeviceConfig, FleetConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use metrics::MetricsConfig;
pub use rule::{RuleConfig, SelectorConfig, SelectorMode, SyntheticConfig};
pub use runtime::{RuntimeConfig, StoreConfig};
pub use server::ServerConfig;
pub use sinks::{SinkUri, SinksConfig, parse_sink_uri};
pub use telefuse::TelefuseConfig;
pub use types::HumanDuration;
