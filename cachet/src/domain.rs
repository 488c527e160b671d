use bytes::Bytes;
use std::time::Duration;

/// Version token the server attaches to every stored entry.
pub type CheckValue = u64;

/// An entry read together with its check value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub data: Bytes,
    pub cas: CheckValue,
}

impl CacheEntry {
    pub fn new(data: impl Into<Bytes>, cas: CheckValue) -> Self {
        Self {
            data: data.into(),
            cas,
        }
    }
}

/// Options sent alongside every write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageOptions {
    /// `None` stores the entry without expiration.
    pub expires_in: Option<Duration>,
}

impl StorageOptions {
    pub const UNLIMITED: StorageOptions = StorageOptions { expires_in: None };

    /// A zero duration means "never expire", any other value is passed through.
    pub fn from_ttl(expires_in: Duration) -> Self {
        if expires_in.is_zero() {
            return Self::UNLIMITED;
        }

        Self {
            expires_in: Some(expires_in),
        }
    }
}

/// Outcome of a compare-and-swap write as reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasResult {
    Stored,
    /// The entry changed since the check value was read.
    Exists,
    NotFound,
}

/// A typed value paired with the check value it had when read.
///
/// Both fields are `None` when the key was absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckResult<T> {
    pub value: Option<T>,
    pub check_value: Option<CheckValue>,
}

impl<T> CheckResult<T> {
    pub fn found(value: T, check_value: CheckValue) -> Self {
        Self {
            value: Some(value),
            check_value: Some(check_value),
        }
    }

    pub fn missing() -> Self {
        Self {
            value: None,
            check_value: None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.check_value.is_some()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

impl<T> Default for CheckResult<T> {
    fn default() -> Self {
        Self::missing()
    }
}
