use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Line-protocol listen address, e.g. `"tcp://127.0.0.1:9900"`.
    pub listen: String,
}

impl ServerConfig {
    /// The socket address part of `listen`, without the `tcp://` scheme.
    pub fn socket_addr(&self) -> &str {
        self.listen.strip_prefix("tcp://").unwrap_or(&self.listen)
    }
}
