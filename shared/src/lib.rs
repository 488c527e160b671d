// shared/src/lib.rs

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("check value missing: the entry was absent when it was read")]
    MissingCheckValue,
    #[error("cache store has been disposed")]
    Disposed,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Expiration in milliseconds as it travels on the wire. `0` means no expiration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TtlMs(pub u64);

impl TtlMs {
    pub const NONE: TtlMs = TtlMs(0);

    pub fn from_duration(ttl: Option<std::time::Duration>) -> Self {
        match ttl {
            // Sub-millisecond expirations round up so they never mean "forever".
            Some(d) if !d.is_zero() => {
                TtlMs(u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1))
            }
            _ => TtlMs::NONE,
        }
    }

    pub fn as_duration(self) -> Option<std::time::Duration> {
        match self.0 {
            0 => None,
            ms => Some(std::time::Duration::from_millis(ms)),
        }
    }
}

pub mod config;
