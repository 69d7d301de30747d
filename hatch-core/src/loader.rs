//! Package Loader (C8): copies local packages into an environment, and
//! downloads+caches remote packages keyed by `(name, version)`.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::LoaderError;

/// Installs a package tree by copying it. Deletes `target_dir` first if it
/// already exists, so repeated installs of the same source are idempotent
///.
pub fn install_local(source: &Path, target_dir: &Path, _name: &str) -> Result<(), LoaderError> {
    if target_dir.exists() {
        std::fs::remove_dir_all(target_dir).map_err(LoaderError::Copy)?;
    }
    copy_tree(source, target_dir)?;
    Ok(())
}

/// Root directory under which downloaded archives are cached, keyed by
/// `<name>-<version>`.
pub struct PackageLoader {
    cache_root: PathBuf,
    http: reqwest::Client,
}

impl PackageLoader {
    pub fn new(cache_root: PathBuf) -> Self {
        Self { cache_root, http: reqwest::Client::new() }
    }

    fn cache_dir_for(&self, name: &str, version: &str) -> PathBuf {
        self.cache_root.join(format!("{name}-{version}"))
    }

    /// Downloads and caches `(name, version)` from `url` if not already
    /// cached, then copies the cached tree into `target_dir`. The fetched
    /// bytes are a zip archive, extracted member-by-member into a temporary
    /// directory before an atomic move into the cache.
    pub async fn install_remote(
        &self,
        url: &str,
        name: &str,
        version: &str,
        target_dir: &Path,
    ) -> Result<(), LoaderError> {
        let cache_dir = self.cache_dir_for(name, version);

        if !cache_dir.exists() {
            let bytes = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| LoaderError::Download(e.to_string()))?
                .error_for_status()
                .map_err(|e| LoaderError::Download(e.to_string()))?
                .bytes()
                .await
                .map_err(|e| LoaderError::Download(e.to_string()))?;

            let staging = tempfile::tempdir().map_err(LoaderError::Copy)?;
            extract_zip(&bytes, staging.path())?;

            if let Some(parent) = cache_dir.parent() {
                std::fs::create_dir_all(parent).map_err(LoaderError::Copy)?;
            }
            move_into_cache(staging.path(), &cache_dir)?;
        }

        install_local(&cache_dir, target_dir, name)
    }

    /// Scoped cache invalidation: `None` clears everything under the cache
    /// root; `Some(name)` clears every cached version of that package;
    /// `Some(name)` + `version` clears exactly one cached version.
    pub fn clear_cache(&self, name: Option<&str>, version: Option<&str>) -> Result<(), LoaderError> {
        match (name, version) {
            (None, _) => {
                if self.cache_root.exists() {
                    std::fs::remove_dir_all(&self.cache_root).map_err(LoaderError::Copy)?;
                }
            }
            (Some(name), Some(version)) => {
                let dir = self.cache_dir_for(name, version);
                if dir.exists() {
                    std::fs::remove_dir_all(dir).map_err(LoaderError::Copy)?;
                }
            }
            (Some(name), None) => {
                if !self.cache_root.exists() {
                    return Ok(());
                }
                let prefix = format!("{name}-");
                for entry in std::fs::read_dir(&self.cache_root).map_err(LoaderError::Copy)? {
                    let entry = entry.map_err(LoaderError::Copy)?;
                    if entry.file_name().to_string_lossy().starts_with(&prefix) {
                        std::fs::remove_dir_all(entry.path()).map_err(LoaderError::Copy)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Extracts every member of the zip archive in `bytes` into `dest`,
/// preserving relative paths. Directory entries are created as-is; file
/// entries create their parent directories first.
fn extract_zip(bytes: &[u8], dest: &Path) -> Result<(), LoaderError> {
    let reader = Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| LoaderError::Extract(e.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| LoaderError::Extract(e.to_string()))?;
        let Some(relative_path) = entry.enclosed_name() else {
            return Err(LoaderError::Extract(format!("unsafe path in archive entry {i}")));
        };
        let out_path = dest.join(relative_path);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(LoaderError::Copy)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(LoaderError::Copy)?;
        }
        let mut out_file = std::fs::File::create(&out_path).map_err(LoaderError::Copy)?;
        std::io::copy(&mut entry, &mut out_file).map_err(LoaderError::Copy)?;
    }

    Ok(())
}

/// Moves `staging` into `cache_dir` atomically when both live on the same
/// filesystem; falls back to copy-then-delete across filesystems (`rename`
/// returns `EXDEV` in that case).
fn move_into_cache(staging: &Path, cache_dir: &Path) -> Result<(), LoaderError> {
    match std::fs::rename(staging, cache_dir) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_tree(staging, cache_dir)?;
            let _ = std::fs::remove_dir_all(staging);
            Ok(())
        }
    }
}

/// Recursively copies `source` onto `target`, creating `target` fresh.
fn copy_tree(source: &Path, target: &Path) -> Result<(), LoaderError> {
    std::fs::create_dir_all(target).map_err(LoaderError::Copy)?;
    for entry in std::fs::read_dir(source).map_err(LoaderError::Copy)? {
        let entry = entry.map_err(LoaderError::Copy)?;
        let file_type = entry.file_type().map_err(LoaderError::Copy)?;
        let dest = target.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), dest).map_err(LoaderError::Copy)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn install_local_copies_tree_and_is_idempotent() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("hatch_metadata.json"), "{}").unwrap();
        std::fs::create_dir(source.path().join("nested")).unwrap();
        std::fs::write(source.path().join("nested/file.py"), "print(1)").unwrap();

        let target = tempfile::tempdir().unwrap();
        let target_dir = target.path().join("installed");

        install_local(source.path(), &target_dir, "widget").unwrap();
        assert!(target_dir.join("hatch_metadata.json").exists());
        assert!(target_dir.join("nested/file.py").exists());

        // Re-install with different content: old content must not survive.
        std::fs::remove_file(source.path().join("nested/file.py")).unwrap();
        std::fs::write(source.path().join("new_file.py"), "print(2)").unwrap();
        install_local(source.path(), &target_dir, "widget").unwrap();
        assert!(!target_dir.join("nested/file.py").exists());
        assert!(target_dir.join("new_file.py").exists());
    }

    fn make_test_zip() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("hatch_metadata.json", options).unwrap();
            writer.write_all(b"{\"name\":\"widget\"}").unwrap();
            writer.start_file("pkg/server.py", options).unwrap();
            writer.write_all(b"# entry point").unwrap();
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn extract_zip_recreates_directory_structure() {
        let bytes = make_test_zip();
        let dest = tempfile::tempdir().unwrap();
        extract_zip(&bytes, dest.path()).unwrap();
        assert!(dest.path().join("hatch_metadata.json").exists());
        assert!(dest.path().join("pkg/server.py").exists());
    }

    #[test]
    fn clear_cache_scoped_to_one_version_leaves_siblings() {
        let cache_root = tempfile::tempdir().unwrap();
        let loader = PackageLoader::new(cache_root.path().to_path_buf());
        std::fs::create_dir_all(cache_root.path().join("widget-1.0.0")).unwrap();
        std::fs::create_dir_all(cache_root.path().join("widget-2.0.0")).unwrap();

        loader.clear_cache(Some("widget"), Some("1.0.0")).unwrap();
        assert!(!cache_root.path().join("widget-1.0.0").exists());
        assert!(cache_root.path().join("widget-2.0.0").exists());
    }

    #[test]
    fn clear_cache_with_name_only_removes_every_version() {
        let cache_root = tempfile::tempdir().unwrap();
        let loader = PackageLoader::new(cache_root.path().to_path_buf());
        std::fs::create_dir_all(cache_root.path().join("widget-1.0.0")).unwrap();
        std::fs::create_dir_all(cache_root.path().join("widget-2.0.0")).unwrap();
        std::fs::create_dir_all(cache_root.path().join("other-1.0.0")).unwrap();

        loader.clear_cache(Some("widget"), None).unwrap();
        assert!(!cache_root.path().join("widget-1.0.0").exists());
        assert!(!cache_root.path().join("widget-2.0.0").exists());
        assert!(cache_root.path().join("other-1.0.0").exists());
    }
}
