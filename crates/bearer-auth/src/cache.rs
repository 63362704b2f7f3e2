//! In-memory holder for the current bearer credential
//!
//! Pure storage: reads have no side effects and no freshness policy is applied
//! here. Callers decide whether a credential is still usable.

use std::sync::{PoisonError, RwLock};

use provider::Credential;
use tracing::debug;

/// Last known credential, replaced atomically.
///
/// The lock is never held across an `.await`, so a std `RwLock` is enough.
#[derive(Debug, Default)]
pub struct CredentialCache {
    current: RwLock<Option<Credential>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the last stored credential, if any.
    pub fn read(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the stored credential.
    pub fn store(&self, credential: Credential) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(credential);
        debug!("stored credential");
    }

    /// Drop the stored credential (sign-out). Returns what was held.
    pub fn clear(&self) -> Option<Credential> {
        let previous = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            debug!("cleared credential");
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_empty() {
        let cache = CredentialCache::new();
        assert!(cache.read().is_none());
    }

    #[test]
    fn store_replaces_previous() {
        let cache = CredentialCache::new();
        cache.store(Credential::new("tok_1", Duration::from_secs(60)));
        cache.store(Credential::new("tok_2", Duration::from_secs(60)));
        assert_eq!(cache.read().unwrap().value().expose(), "tok_2");
    }

    #[test]
    fn read_does_not_filter_stale_credentials() {
        let cache = CredentialCache::new();
        cache.store(Credential::new("tok_old", Duration::ZERO));
        let credential = cache.read().expect("stale credential is still returned");
        assert!(!credential.is_fresh());
    }

    #[test]
    fn clear_returns_previous_and_empties() {
        let cache = CredentialCache::new();
        assert!(cache.clear().is_none());

        cache.store(Credential::new("tok", Duration::from_secs(60)));
        let previous = cache.clear().unwrap();
        assert_eq!(previous.value().expose(), "tok");
        assert!(cache.read().is_none());
    }
}
