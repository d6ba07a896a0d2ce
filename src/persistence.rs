//! Envelope persistence.
//!
//! Adapters store the flat state dict produced by
//! [`Envelope::to_state_dict`](crate::envelope::Envelope::to_state_dict),
//! keyed by a caller-chosen id (usually the envelope id).

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::envelope::StateDict;
use crate::types::{Error, Result};

/// Storage backend for envelope checkpoints.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn save_state(&self, key: &str, state: &StateDict) -> Result<()>;

    /// `Ok(None)` when nothing was saved under `key`.
    async fn load_state(&self, key: &str) -> Result<Option<StateDict>>;
}

/// Process-local adapter. Clones share the same store.
///
/// ```
/// use jeeves_runtime::persistence::{InMemoryPersistence, PersistenceAdapter};
/// use jeeves_runtime::Envelope;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryPersistence::new();
/// let env = Envelope::with_input("hello");
/// store.save_state("env-1", &env.to_state_dict().unwrap()).await.unwrap();
///
/// let state = store.load_state("env-1").await.unwrap().unwrap();
/// assert_eq!(Envelope::from_state_dict(state).unwrap(), env);
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    states: Arc<RwLock<HashMap<String, StateDict>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistence {
    async fn save_state(&self, key: &str, state: &StateDict) -> Result<()> {
        self.states
            .write()
            .await
            .insert(key.to_string(), state.clone());
        Ok(())
    }

    async fn load_state(&self, key: &str) -> Result<Option<StateDict>> {
        Ok(self.states.read().await.get(key).cloned())
    }
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    dir: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let safe = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !safe {
            return Err(Error::validation(format!(
                "persistence key '{}' must be non-empty [A-Za-z0-9_-]",
                key
            )));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl PersistenceAdapter for JsonFilePersistence {
    async fn save_state(&self, key: &str, state: &StateDict) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), "state saved");
        Ok(())
    }

    async fn load_state(&self, key: &str) -> Result<Option<StateDict>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let store = InMemoryPersistence::new();
        let env = Envelope::with_input("persist me");
        let state = env.to_state_dict().unwrap();

        store.save_state("k1", &state).await.unwrap();
        assert_eq!(store.len().await, 1);

        let loaded = store.load_state("k1").await.unwrap().unwrap();
        assert_eq!(Envelope::from_state_dict(loaded).unwrap(), env);
        assert!(store.load_state("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path().join("states"));
        let mut env = Envelope::with_input("on disk");
        env.set_output("plan", Default::default());
        let key = env.identity.envelope_id.to_string();

        store
            .save_state(&key, &env.to_state_dict().unwrap())
            .await
            .unwrap();
        let loaded = store.load_state(&key).await.unwrap().unwrap();

        assert_eq!(Envelope::from_state_dict(loaded).unwrap(), env);
        assert!(store.load_state("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePersistence::new(dir.path());
        let err = store
            .save_state("../escape", &StateDict::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
