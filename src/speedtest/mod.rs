pub mod payload;
pub mod ping;
pub mod pool;
pub mod sampler;
pub mod scheduler;
pub mod status;
pub mod timers;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt;

use crate::settings::SESSION_KEY_LENGTH;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Idle,
    Ping,
    Download,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Download,
    Upload,
}

/// Opaque per-run identifier correlating our requests with the server's byte accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn generate() -> Self {
        let key = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_KEY_LENGTH)
            .map(char::from)
            .collect();
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events the engine pushes to the UI. The UI never talks back except through `Control`.
#[derive(Debug, Clone)]
pub enum TestUpdate {
    Controls { start_enabled: bool, cancel_enabled: bool },
    Phase(TestPhase),
    Ping { mean_ms: f64, samples: Vec<f64> },
    Rate(sampler::RateUpdate),
    Cleared,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_keys_are_alphanumeric_and_fresh() {
        let a = SessionKey::generate();
        let b = SessionKey::generate();
        assert_eq!(a.as_str().len(), SESSION_KEY_LENGTH);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
