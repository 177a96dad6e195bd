use core::{fmt, str::FromStr};
use std::env;

/// Environment variable read by [`Config::from_env`].
pub const MEMORY_LOCK_ENV: &str = "SEALED_MEM_MEMORY_LOCK";

/// Policy for pinning protected memory into RAM.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MemoryLock {
    /// Fail the allocation when the region cannot be locked.
    Required,
    /// Try to lock the region, log a warning and go on when it fails
    /// (e.g. when `RLIMIT_MEMLOCK` is exhausted).
    #[default]
    BestEffort,
    /// Never lock regions.
    Disabled,
}

impl FromStr for MemoryLock {
    type Err = UnknownMemoryLock;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(Self::Required),
            "best-effort" | "best_effort" => Ok(Self::BestEffort),
            "disabled" => Ok(Self::Disabled),
            _ => Err(UnknownMemoryLock(s.to_owned())),
        }
    }
}

/// Error returned when parsing an unknown [`MemoryLock`] name.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown memory lock policy '{0}', expected 'required', 'best-effort' or 'disabled'")]
pub struct UnknownMemoryLock(String);

/// Runtime options of a [`MemoryProtection`](crate::MemoryProtection).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    /// Locking policy for the regions holding sealed blobs and sealer keys.
    pub memory_lock: MemoryLock,
}

impl Config {
    /// Builds a configuration from the process environment.
    ///
    /// Unknown values are logged and replaced by their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let memory_lock = match lookup(MEMORY_LOCK_ENV) {
            None => MemoryLock::default(),
            Some(value) => value.parse().unwrap_or_else(|err| {
                log::warn!("{MEMORY_LOCK_ENV}: {err}, using the default");
                MemoryLock::default()
            }),
        };

        Self { memory_lock }
    }

    /// Sets the memory locking policy.
    pub fn with_memory_lock(mut self, memory_lock: MemoryLock) -> Self {
        self.memory_lock = memory_lock;
        self
    }
}

impl fmt::Display for MemoryLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Required => "required",
            Self::BestEffort => "best-effort",
            Self::Disabled => "disabled",
        })
    }
}
