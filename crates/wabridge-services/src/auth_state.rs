//! Auth-state store — one credential directory per owner.
//!
//! Layout:
//!   {root}/{ownerType}-{ownerId}/creds.json
//!   {root}/{ownerType}-{ownerId}/keys/{sanitized key name}.json
//!
//! Key files carry their original name, so loading never depends on the
//! name→file mapping. Writes go to a temp file and are renamed into place;
//! a crash mid-write leaves the previous version intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;

use wabridge_core::{AuthState, CredsUpdate, OwnerKey, SessionError};

const CREDS_FILE: &str = "creds.json";
const KEYS_DIR: &str = "keys";

#[derive(Serialize, Deserialize)]
struct KeyFile {
    name: String,
    value: Value,
}

/// Filesystem-backed auth-state store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuthStateStore {
    root: PathBuf,
}

impl AuthStateStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(storage(&root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, key: &OwnerKey) -> PathBuf {
        self.root.join(key.dir_name())
    }

    /// True when the owner has persisted credentials.
    pub async fn exists(&self, key: &OwnerKey) -> bool {
        fs::try_exists(self.session_dir(key).join(CREDS_FILE))
            .await
            .unwrap_or(false)
    }

    /// Load the owner's auth state. `None` means the owner has never paired
    /// (or was purged) and the next connect will produce a QR.
    pub async fn load(&self, key: &OwnerKey) -> Result<Option<AuthState>, SessionError> {
        let dir = self.session_dir(key);
        let creds_path = dir.join(CREDS_FILE);
        let text = match fs::read(&creds_path).await {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage(&creds_path)(e)),
        };
        let creds: Value = serde_json::from_slice(&text).map_err(|e| corrupt(key, &creds_path, e))?;

        let mut state = AuthState {
            creds,
            keys: Default::default(),
        };

        let keys_dir = dir.join(KEYS_DIR);
        let mut entries = match fs::read_dir(&keys_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Some(state)),
            Err(e) => return Err(storage(&keys_dir)(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(storage(&keys_dir))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await.map_err(storage(&path))?;
            let file: KeyFile =
                serde_json::from_slice(&bytes).map_err(|e| corrupt(key, &path, e))?;
            state.keys.insert(file.name, file.value);
        }

        tracing::debug!(owner = %key, keys = state.keys.len(), "auth state loaded");
        Ok(Some(state))
    }

    /// Persist a credential update: creds are replaced, keys upserted or
    /// deleted (`None`).
    pub async fn save(&self, key: &OwnerKey, update: &CredsUpdate) -> Result<(), SessionError> {
        let dir = self.session_dir(key);
        let keys_dir = dir.join(KEYS_DIR);
        fs::create_dir_all(&keys_dir).await.map_err(storage(&keys_dir))?;

        let creds = serde_json::to_vec_pretty(&update.creds).map_err(|e| corrupt(key, &dir, e))?;
        write_atomic(&dir.join(CREDS_FILE), &creds).await?;

        for (name, value) in &update.keys {
            let path = keys_dir.join(format!("{}.json", key_file_name(name)));
            match value {
                Some(value) => {
                    let file = KeyFile {
                        name: name.clone(),
                        value: value.clone(),
                    };
                    let bytes = serde_json::to_vec(&file).map_err(|e| corrupt(key, &path, e))?;
                    write_atomic(&path, &bytes).await?;
                }
                None => match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(storage(&path)(e)),
                },
            }
        }

        tracing::debug!(owner = %key, keys = update.keys.len(), "auth state saved");
        Ok(())
    }

    /// Delete the owner's auth-state directory. Returns whether anything was
    /// removed; a missing directory is not an error.
    pub async fn purge(&self, key: &OwnerKey) -> Result<bool, SessionError> {
        let dir = self.session_dir(key);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::info!(owner = %key, path = %dir.display(), "auth state purged");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage(&dir)(e)),
        }
    }

    /// Every owner with persisted credentials.
    pub async fn owners(&self) -> Result<Vec<OwnerKey>, SessionError> {
        let mut entries = fs::read_dir(&self.root).await.map_err(storage(&self.root))?;
        let mut owners = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(storage(&self.root))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match OwnerKey::from_dir_name(name) {
                Ok(key) if self.exists(&key).await => owners.push(key),
                Ok(_) => {}
                Err(e) => tracing::debug!(error = %e, "skipping foreign entry in auth dir"),
            }
        }
        owners.sort();
        Ok(owners)
    }
}

/// Map a library key name (`session-123@s.whatsapp.net.0`,
/// `app-state-sync-key-AAA/B=`) to a safe file stem.
fn key_file_name(name: &str) -> String {
    let mut out = name.replace(['/', '\\'], "__").replace(':', "-");
    if out.starts_with('.') {
        out.insert(0, '_');
    }
    out
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SessionError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await.map_err(storage(&tmp))?;
    fs::rename(&tmp, path).await.map_err(storage(path))?;
    Ok(())
}

fn storage(path: &Path) -> impl FnOnce(std::io::Error) -> SessionError {
    let path = path.to_path_buf();
    move |source| SessionError::Storage { path, source }
}

fn corrupt(key: &OwnerKey, path: &Path, err: serde_json::Error) -> SessionError {
    SessionError::AuthStateCorrupt {
        key: key.clone(),
        reason: format!("{}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wabridge_core::OwnerType;

    fn key(id: &str) -> OwnerKey {
        OwnerKey::new(id, OwnerType::Coach).unwrap()
    }

    fn update(creds: Value, keys: &[(&str, Option<Value>)]) -> CredsUpdate {
        CredsUpdate {
            creds,
            keys: keys
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStateStore::new(tmp.path()).unwrap();
        assert!(store.load(&key("a")).await.unwrap().is_none());
        assert!(!store.exists(&key("a")).await);
    }

    #[tokio::test]
    async fn save_then_load_applies_key_updates() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStateStore::new(tmp.path()).unwrap();
        let owner = key("a");

        store
            .save(
                &owner,
                &update(
                    json!({"registered": false}),
                    &[
                        ("pre-key-1", Some(json!({"pub": "x"}))),
                        ("session-1@s.whatsapp.net:2", Some(json!("s"))),
                    ],
                ),
            )
            .await
            .unwrap();
        store
            .save(
                &owner,
                &update(json!({"registered": true}), &[("pre-key-1", None)]),
            )
            .await
            .unwrap();

        let state = store.load(&owner).await.unwrap().expect("state");
        assert_eq!(state.creds, json!({"registered": true}));
        assert_eq!(state.keys.len(), 1);
        assert_eq!(state.keys["session-1@s.whatsapp.net:2"], json!("s"));
        assert!(store.exists(&owner).await);
    }

    #[tokio::test]
    async fn corrupt_creds_are_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStateStore::new(tmp.path()).unwrap();
        let owner = key("a");
        let dir = store.session_dir(&owner);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CREDS_FILE), b"{not json").unwrap();

        let err = store.load(&owner).await.unwrap_err();
        assert!(matches!(err, SessionError::AuthStateCorrupt { .. }), "{err}");
    }

    #[tokio::test]
    async fn purge_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStateStore::new(tmp.path()).unwrap();
        let owner = key("a");
        store.save(&owner, &update(json!({}), &[])).await.unwrap();

        assert!(store.purge(&owner).await.unwrap());
        assert!(!store.purge(&owner).await.unwrap());
        assert!(!store.session_dir(&owner).exists());
    }

    #[tokio::test]
    async fn owners_lists_paired_directories_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = AuthStateStore::new(tmp.path()).unwrap();
        let staff = OwnerKey::new("s1", OwnerType::Staff).unwrap();
        store.save(&key("c1"), &update(json!({}), &[])).await.unwrap();
        store.save(&staff, &update(json!({}), &[])).await.unwrap();
        std::fs::create_dir_all(tmp.path().join("coach-empty")).unwrap();
        std::fs::create_dir_all(tmp.path().join("lost+found")).unwrap();

        let owners = store.owners().await.unwrap();
        assert_eq!(owners, vec![key("c1"), staff]);
    }

    #[test]
    fn key_file_names_are_flat() {
        assert_eq!(key_file_name("app-state/sync:1"), "app-state__sync-1");
        assert_eq!(key_file_name(".hidden"), "_.hidden");
    }
}
