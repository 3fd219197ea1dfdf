//! Persistence collaborator.
//!
//! The engine never performs I/O itself. Hosts hand it snapshots loaded from
//! any [`ProgressStore`] and write the results back through the same trait.

use std::collections::BTreeMap;

use crate::progress::UserProgress;
use crate::ProgressError;

pub trait ProgressStore {
    /// Loads the snapshot for `user_key`, `None` when nothing was saved yet.
    ///
    /// # Errors
    /// Implementations return [`ProgressError::Persistence`] for storage
    /// failures, which callers may retry.
    fn load(&mut self, user_key: &str) -> Result<Option<UserProgress>, ProgressError>;

    /// Replaces the snapshot for `user_key`.
    ///
    /// # Errors
    /// Implementations return [`ProgressError::Persistence`] for storage
    /// failures, which callers may retry.
    fn save(&mut self, user_key: &str, snapshot: &UserProgress) -> Result<(), ProgressError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryProgressStore {
    snapshots: BTreeMap<String, UserProgress>,
}

impl InMemoryProgressStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl ProgressStore for InMemoryProgressStore {
    fn load(&mut self, user_key: &str) -> Result<Option<UserProgress>, ProgressError> {
        Ok(self.snapshots.get(user_key).cloned())
    }

    fn save(&mut self, user_key: &str, snapshot: &UserProgress) -> Result<(), ProgressError> {
        self.snapshots.insert(user_key.to_string(), snapshot.clone());
        Ok(())
    }
}

/// An authoritative store fronted by a non-authoritative local mirror.
///
/// Loads go to the authority and refresh the mirror. The mirror answers only
/// when the authority fails with a retryable error. Saves reach the authority
/// first; the mirror is updated only after the authority accepted the write.
#[derive(Debug, Clone)]
pub struct MirroredStore<S> {
    authority: S,
    mirror: InMemoryProgressStore,
}

impl<S: ProgressStore> MirroredStore<S> {
    #[must_use]
    pub fn new(authority: S) -> Self {
        Self {
            authority,
            mirror: InMemoryProgressStore::new(),
        }
    }

    #[must_use]
    pub fn authority(&self) -> &S {
        &self.authority
    }

    #[must_use]
    pub fn mirror(&self) -> &InMemoryProgressStore {
        &self.mirror
    }

    pub fn into_authority(self) -> S {
        self.authority
    }
}

impl<S: ProgressStore> ProgressStore for MirroredStore<S> {
    fn load(&mut self, user_key: &str) -> Result<Option<UserProgress>, ProgressError> {
        match self.authority.load(user_key) {
            Ok(Some(snapshot)) => {
                self.mirror.save(user_key, &snapshot)?;
                Ok(Some(snapshot))
            }
            Ok(None) => Ok(None),
            Err(err) if err.is_retryable() => match self.mirror.load(user_key)? {
                Some(snapshot) => {
                    tracing::warn!(user_key, error = %err, "authoritative load failed; serving mirror");
                    Ok(Some(snapshot))
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    fn save(&mut self, user_key: &str, snapshot: &UserProgress) -> Result<(), ProgressError> {
        self.authority.save(user_key, snapshot)?;
        self.mirror.save(user_key, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryProgressStore,
        failing: bool,
        error: Option<ProgressError>,
    }

    impl FlakyStore {
        fn fail_with(&mut self, error: ProgressError) {
            self.failing = true;
            self.error = Some(error);
        }

        fn failure(&self) -> ProgressError {
            self.error
                .clone()
                .unwrap_or_else(|| ProgressError::Persistence("down".to_string()))
        }
    }

    impl ProgressStore for FlakyStore {
        fn load(&mut self, user_key: &str) -> Result<Option<UserProgress>, ProgressError> {
            if self.failing {
                return Err(self.failure());
            }
            self.inner.load(user_key)
        }

        fn save(&mut self, user_key: &str, snapshot: &UserProgress) -> Result<(), ProgressError> {
            if self.failing {
                return Err(self.failure());
            }
            self.inner.save(user_key, snapshot)
        }
    }

    #[test]
    fn in_memory_store_round_trips() {
        let mut store = InMemoryProgressStore::new();
        assert!(must_ok(store.load("learner")).is_none());

        let snapshot = UserProgress::new("grapple-path.v1");
        must_ok(store.save("learner", &snapshot));
        assert_eq!(must_ok(store.load("learner")), Some(snapshot));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn mirror_serves_reads_when_authority_is_unavailable() {
        let mut store = MirroredStore::new(FlakyStore::default());
        let snapshot = UserProgress::new("grapple-path.v1");
        must_ok(store.save("learner", &snapshot));

        store.authority.fail_with(ProgressError::Persistence("timeout".to_string()));
        assert_eq!(must_ok(store.load("learner")), Some(snapshot));
    }

    #[test]
    fn mirror_does_not_hide_non_retryable_failures() {
        let mut store = MirroredStore::new(FlakyStore::default());
        must_ok(store.save("learner", &UserProgress::new("grapple-path.v1")));

        store
            .authority
            .fail_with(ProgressError::Migration("corrupt".to_string()));
        assert!(matches!(
            store.load("learner"),
            Err(ProgressError::Migration(_))
        ));
    }

    #[test]
    fn failed_authoritative_save_leaves_mirror_untouched() {
        let mut store = MirroredStore::new(FlakyStore::default());
        store.authority.fail_with(ProgressError::Persistence("down".to_string()));

        let result = store.save("learner", &UserProgress::new("grapple-path.v1"));
        assert!(matches!(result, Err(ProgressError::Persistence(_))));
        assert!(store.mirror().is_empty());
    }

    #[test]
    fn missing_snapshot_without_mirror_copy_surfaces_the_error() {
        let mut store = MirroredStore::new(FlakyStore::default());
        store.authority.fail_with(ProgressError::Persistence("down".to_string()));
        assert!(matches!(
            store.load("learner"),
            Err(ProgressError::Persistence(_))
        ));
    }
}
