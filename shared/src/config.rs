use tracing::warn;

/// Process configuration for the cache store and the TCP server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub prefix: String,
    pub host: String,
    pub tcp_port: u16,
}

impl Config {
    pub const DEFAULT_PREFIX: &str = "_";
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_TCP_PORT: u16 = 5500;

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from any variable source, e.g. a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let tcp_port = match lookup("CACHET_TCP_PORT") {
            Some(raw) => raw.parse::<u16>().unwrap_or_else(|_| {
                warn!(
                    "CACHET_TCP_PORT '{}' is not a valid port, using {}",
                    raw,
                    Self::DEFAULT_TCP_PORT
                );
                Self::DEFAULT_TCP_PORT
            }),
            None => Self::DEFAULT_TCP_PORT,
        };

        Self {
            prefix: lookup("CACHET_PREFIX").unwrap_or_else(|| Self::DEFAULT_PREFIX.to_string()),
            host: lookup("CACHET_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            tcp_port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
