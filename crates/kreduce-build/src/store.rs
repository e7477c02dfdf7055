//! Durable artifact store.
//!
//! Artifacts survive process restarts and are shared between processes, so
//! every file is created by writing a temporary file in the destination
//! directory and renaming it into place. Readers never observe a partially
//! written library or manifest.
//!
//! Layout:
//! ```text
//! <root>/
//!   artifacts/
//!     <name>.so      shared library
//!     <name>.json    manifest (key, content hash, build id)
//!   build/
//!     <key digest>/  build root for one key
//! ```

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use kreduce_core::{CacheKey, ContentHash, DType, TargetKind};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::artifact::{check_library, library_file_name, Artifact};
use crate::error::{BuildError, Result};

/// Sidecar record describing a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Artifact name.
    pub name: String,
    /// Library file name inside the artifact directory.
    pub library: String,
    /// Digest of the full cache key.
    pub key_digest: ContentHash,
    /// Human-readable key description.
    pub description: String,
    pub target: TargetKind,
    pub dtype: DType,
    /// Formula and aliases, for generic reductions.
    #[serde(default)]
    pub formula: Option<String>,
    /// SHA-256 of the library bytes.
    pub content_hash: ContentHash,
    pub size_bytes: u64,
    /// Identifies the build that produced the library.
    pub build_id: Uuid,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

/// Filesystem-backed artifact store.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactStore { root: root.into() }
    }

    /// Get the root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding libraries and manifests.
    pub fn artifact_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    /// Directory holding per-key build roots.
    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    /// Build root for one key. Distinct keys never share a build root.
    pub fn build_root(&self, key: &CacheKey) -> PathBuf {
        self.build_dir().join(key.digest().prefix(32))
    }

    /// Where the library for `key` lives once installed.
    pub fn library_path(&self, key: &CacheKey) -> PathBuf {
        self.artifact_dir().join(library_file_name(&key.artifact_name()))
    }

    /// Where the manifest for `key` lives once recorded.
    pub fn manifest_path(&self, key: &CacheKey) -> PathBuf {
        self.artifact_dir()
            .join(format!("{}.json", key.artifact_name()))
    }

    /// Find a previously stored artifact for `key`.
    ///
    /// The artifact is adopted only if the library is structurally valid and
    /// matches the content hash in its manifest. Anything else (missing
    /// manifest, truncated or foreign file) is treated as absent.
    pub fn lookup(&self, key: &CacheKey) -> Option<Artifact> {
        let path = self.library_path(key);
        if !path.exists() {
            return None;
        }

        match self.check_stored(key, &path) {
            Ok(()) => Some(Artifact {
                name: key.artifact_name(),
                path,
                key_digest: key.digest(),
            }),
            Err(reason) => {
                warn!(
                    event = "artifact_rejected",
                    key = %key.describe(),
                    path = %path.display(),
                    reason = %reason,
                );
                None
            }
        }
    }

    fn check_stored(&self, key: &CacheKey, path: &Path) -> std::result::Result<(), String> {
        check_library(path)?;
        let manifest = read_manifest(&self.manifest_path(key))?;
        if manifest.key_digest != key.digest() {
            return Err("manifest belongs to a different key".to_string());
        }
        let bytes = std::fs::read(path).map_err(|e| format!("cannot read library: {e}"))?;
        if !manifest.content_hash.verify(&bytes) {
            return Err("library content does not match manifest hash".to_string());
        }
        Ok(())
    }

    /// Copy a freshly built library into the store under `key`'s name.
    pub fn install(&self, key: &CacheKey, produced: &Path) -> Result<Artifact> {
        let dir = self.artifact_dir();
        create_dir(&dir)?;
        let dest = self.library_path(key);

        let mut source = File::open(produced).map_err(|e| BuildError::Store {
            path: produced.to_path_buf(),
            detail: format!("opening build output: {e}"),
        })?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| store_err(&dir, "creating temp file", e))?;
        std::io::copy(&mut source, tmp.as_file_mut())
            .map_err(|e| store_err(tmp.path(), "copying build output", e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| store_err(tmp.path(), "syncing library", e))?;
        tmp.persist(&dest)
            .map_err(|e| store_err(&dest, "renaming library into place", e.error))?;

        debug!(event = "artifact_installed", path = %dest.display());
        Ok(Artifact {
            name: key.artifact_name(),
            path: dest,
            key_digest: key.digest(),
        })
    }

    /// Write the manifest for an installed artifact.
    pub fn record(&self, key: &CacheKey, artifact: &Artifact) -> Result<ArtifactManifest> {
        let bytes = std::fs::read(&artifact.path)
            .map_err(|e| store_err(&artifact.path, "reading library", e))?;
        let library = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| library_file_name(&artifact.name));

        let manifest = ArtifactManifest {
            name: artifact.name.clone(),
            library,
            key_digest: key.digest(),
            description: key.describe(),
            target: key.target(),
            dtype: key.dtype(),
            formula: key.formula().map(|f| f.to_string()),
            content_hash: ContentHash::of_bytes(&bytes),
            size_bytes: bytes.len() as u64,
            build_id: Uuid::new_v4(),
            created_at: unix_now(),
        };

        let json = serde_json::to_vec_pretty(&manifest).map_err(|e| BuildError::Store {
            path: self.manifest_path(key),
            detail: format!("serializing manifest: {e}"),
        })?;
        write_atomic(&self.manifest_path(key), &json)?;
        Ok(manifest)
    }

    /// Remove the library and manifest for `key`. Returns whether anything
    /// was removed.
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        let mut removed = false;
        for path in [self.library_path(key), self.manifest_path(key)] {
            match std::fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(store_err(&path, "removing artifact", e)),
            }
        }
        Ok(removed)
    }

    /// All recorded manifests, sorted by name. Unreadable manifests are
    /// skipped.
    pub fn list(&self) -> Result<Vec<ArtifactManifest>> {
        let dir = self.artifact_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut manifests = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| store_err(&dir, "listing artifacts", e))? {
            let entry = entry.map_err(|e| store_err(&dir, "reading entry", e))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match read_manifest(&path) {
                    Ok(manifest) => manifests.push(manifest),
                    Err(reason) => warn!(path = %path.display(), reason = %reason, "skipping manifest"),
                }
            }
        }
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(manifests)
    }

    /// Check a recorded artifact against its manifest.
    pub fn verify(&self, manifest: &ArtifactManifest) -> std::result::Result<(), String> {
        let path = self.artifact_dir().join(&manifest.library);
        check_library(&path)?;
        let bytes = std::fs::read(&path).map_err(|e| format!("cannot read library: {e}"))?;
        if manifest.content_hash.verify(&bytes) {
            Ok(())
        } else {
            Err("content hash mismatch".to_string())
        }
    }

    /// Delete every artifact and build root. Returns the number of
    /// directories removed.
    pub fn clean(&self) -> Result<usize> {
        let mut removed = 0;
        for dir in [self.artifact_dir(), self.build_dir()] {
            if dir.is_dir() {
                std::fs::remove_dir_all(&dir).map_err(|e| store_err(&dir, "removing", e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn read_manifest(path: &Path) -> std::result::Result<ArtifactManifest, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("cannot read manifest: {e}"))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid manifest: {e}"))
}

/// Write `data` to `path` via a temporary file in the same directory.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    create_dir(dir)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| store_err(dir, "creating temp file", e))?;
    tmp.write_all(data)
        .map_err(|e| store_err(tmp.path(), "writing", e))?;
    tmp.persist(path)
        .map_err(|e| store_err(path, "renaming into place", e.error))?;
    Ok(())
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| store_err(dir, "creating directory", e))
}

fn store_err(path: &Path, action: &str, e: std::io::Error) -> BuildError {
    BuildError::Store {
        path: path.to_path_buf(),
        detail: format!("{action}: {e}"),
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::tests::FAKE_ELF;
    use kreduce_core::{normalize, RadialKernel};

    fn key() -> CacheKey {
        CacheKey::reduction(
            normalize("gaussian(x,y)", &["x=Vi(0,3)", "y=Vj(1,3)"]).unwrap(),
            DType::Float32,
        )
    }

    fn install_fake(store: &ArtifactStore, key: &CacheKey, bytes: &[u8]) -> Artifact {
        let build = tempfile::tempdir().unwrap();
        let produced = build.path().join("out.so");
        std::fs::write(&produced, bytes).unwrap();
        store.install(key, &produced).unwrap()
    }

    #[test]
    fn install_record_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = key();

        assert!(store.lookup(&key).is_none());

        let artifact = install_fake(&store, &key, FAKE_ELF);
        assert_eq!(artifact.path, store.library_path(&key));
        // Installed but not recorded: not adoptable yet.
        assert!(store.lookup(&key).is_none());

        let manifest = store.record(&key, &artifact).unwrap();
        assert_eq!(manifest.size_bytes, FAKE_ELF.len() as u64);
        assert_eq!(manifest.key_digest, key.digest());

        let found = store.lookup(&key).unwrap();
        assert_eq!(found, artifact);
    }

    #[test]
    fn tampered_library_is_not_adopted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = key();
        let artifact = install_fake(&store, &key, FAKE_ELF);
        store.record(&key, &artifact).unwrap();

        std::fs::write(&artifact.path, b"\x7fELF truncated").unwrap();
        assert!(store.lookup(&key).is_none());

        std::fs::write(&artifact.path, b"").unwrap();
        assert!(store.lookup(&key).is_none());
    }

    #[test]
    fn corrupt_manifest_is_not_adopted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = key();
        let artifact = install_fake(&store, &key, FAKE_ELF);
        store.record(&key, &artifact).unwrap();

        std::fs::write(store.manifest_path(&key), b"{ not json").unwrap();
        assert!(store.lookup(&key).is_none());
    }

    #[test]
    fn list_verify_remove_clean() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = key();
        let b = CacheKey::builtin(
            TargetKind::SpecializedConvolution {
                kernel: RadialKernel::Gaussian,
            },
            DType::Float64,
        )
        .unwrap();

        for k in [&a, &b] {
            let artifact = install_fake(&store, k, FAKE_ELF);
            store.record(k, &artifact).unwrap();
        }

        let manifests = store.list().unwrap();
        assert_eq!(manifests.len(), 2);
        for m in &manifests {
            assert!(store.verify(m).is_ok());
        }

        assert!(store.remove(&a).unwrap());
        assert!(!store.remove(&a).unwrap());
        assert_eq!(store.list().unwrap().len(), 1);

        std::fs::create_dir_all(store.build_root(&b)).unwrap();
        assert_eq!(store.clean().unwrap(), 2);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn build_roots_are_per_key() {
        let store = ArtifactStore::new("/tmp/kreduce");
        let other = CacheKey::reduction(key().formula().unwrap().clone(), DType::Float64);
        assert_ne!(store.build_root(&key()), store.build_root(&other));
    }

    #[test]
    fn install_missing_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let err = store
            .install(&key(), &dir.path().join("nope.so"))
            .unwrap_err();
        assert!(matches!(err, BuildError::Store { .. }));
    }
}
