//! Environment Manager (C7): named collections of installed packages, a
//! current-environment pointer, and the package add/remove/list surface that
//! sits on top of the Dependency Resolver (C9) and Package Loader (C8).
//!
//! File I/O policy matches the Registry Store: load once at construction
//! (creating defaults if missing), mutate in memory, rewrite the whole file
//! on every mutation. The current-environment pointer is a sibling
//! single-line text file rather than a field inside the environments
//! document, so switching environments never rewrites the (potentially
//! large) package document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EnvError;
use crate::loader::PackageLoader;
use crate::registry::{PackageMetadata, Registry};
use crate::resolver;

pub const DEFAULT_ENVIRONMENT: &str = "default";

/// Where an installed package's files came from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PackageSource {
    Local { path: String },
    Registry { uri: String },
}

/// One installed package, as recorded in an environment's package list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub added_date: DateTime<Utc>,
    pub path: PathBuf,
    pub source: PackageSource,
    pub hatch_compliant: bool,
}

/// A named collection of installed packages.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub packages: Vec<InstalledPackage>,
}

impl Environment {
    fn new(name: &str, description: &str, created_at: DateTime<Utc>) -> Self {
        Self { name: name.to_string(), description: description.to_string(), created_at, packages: Vec::new() }
    }

    fn find_package(&self, name: &str) -> Option<&InstalledPackage> {
        self.packages.iter().find(|p| p.name == name)
    }

    fn upsert_package(&mut self, record: InstalledPackage) {
        if let Some(existing) = self.packages.iter_mut().find(|p| p.name == record.name) {
            *existing = record;
        } else {
            self.packages.push(record);
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct EnvironmentsFile {
    #[serde(default)]
    environments: HashMap<String, Environment>,
}

fn validate_name(name: &str) -> Result<(), EnvError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(EnvError::InvalidName(name.to_string()))
    }
}

/// Holds every named environment plus which one is current, backed by a
/// package document file and a sibling single-line pointer file. Mutating
/// methods rewrite the in-memory state first, then persist; a persistence
/// failure leaves the in-memory state as it was before the call returned an
/// error.
pub struct EnvironmentManager {
    envs_path: PathBuf,
    current_path: PathBuf,
    envs_root: PathBuf,
    environments: HashMap<String, Environment>,
    current: String,
}

impl EnvironmentManager {
    /// Loads (or creates) the environments document and current-pointer file
    /// under `envs_dir`. Creates the `default` environment if the document
    /// is new or does not yet contain it.
    pub fn load(envs_dir: &Path) -> Result<Self, EnvError> {
        std::fs::create_dir_all(envs_dir).map_err(EnvError::Write)?;
        let envs_path = envs_dir.join("environments.json");
        let current_path = envs_dir.join("current_environment");

        let mut file: EnvironmentsFile = if envs_path.exists() {
            let text = std::fs::read_to_string(&envs_path).map_err(EnvError::Read)?;
            serde_json::from_str(&text)?
        } else {
            EnvironmentsFile::default()
        };

        if !file.environments.contains_key(DEFAULT_ENVIRONMENT) {
            file.environments.insert(
                DEFAULT_ENVIRONMENT.to_string(),
                Environment::new(DEFAULT_ENVIRONMENT, "default environment", Utc::now()),
            );
        }

        let current = if current_path.exists() {
            let text = std::fs::read_to_string(&current_path).map_err(EnvError::Read)?;
            let name = text.trim().to_string();
            if file.environments.contains_key(&name) { name } else { DEFAULT_ENVIRONMENT.to_string() }
        } else {
            DEFAULT_ENVIRONMENT.to_string()
        };

        let manager = Self {
            envs_path,
            current_path,
            envs_root: envs_dir.to_path_buf(),
            environments: file.environments,
            current,
        };
        manager.save()?;
        Ok(manager)
    }

    fn save(&self) -> Result<(), EnvError> {
        let file = EnvironmentsFile { environments: self.environments.clone() };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp_path = self.envs_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json).map_err(EnvError::Write)?;
        std::fs::rename(&tmp_path, &self.envs_path).map_err(EnvError::Write)?;

        let tmp_current = self.current_path.with_extension("tmp");
        std::fs::write(&tmp_current, &self.current).map_err(EnvError::Write)?;
        std::fs::rename(&tmp_current, &self.current_path).map_err(EnvError::Write)?;
        Ok(())
    }

    fn dir_for(&self, name: &str) -> PathBuf {
        self.envs_root.join(name)
    }

    pub fn current_name(&self) -> &str {
        &self.current
    }

    pub fn list(&self) -> Vec<&Environment> {
        let mut envs: Vec<&Environment> = self.environments.values().collect();
        envs.sort_by(|a, b| a.name.cmp(&b.name));
        envs
    }

    pub fn get(&self, name: &str) -> Option<&Environment> {
        self.environments.get(name)
    }

    /// Creates a new, empty environment. Fails on an invalid name or a
    /// name collision with an existing environment.
    pub fn create(&mut self, name: &str, description: &str) -> Result<(), EnvError> {
        validate_name(name)?;
        if self.environments.contains_key(name) {
            return Err(EnvError::AlreadyExists(name.to_string()));
        }
        self.environments.insert(name.to_string(), Environment::new(name, description, Utc::now()));
        self.save()?;
        Ok(())
    }

    /// Removes an environment and deletes its on-disk directory
    /// best-effort. Refuses to remove `default`; switches to `default`
    /// first if the target was current.
    pub fn remove(&mut self, name: &str) -> Result<(), EnvError> {
        if name == DEFAULT_ENVIRONMENT {
            return Err(EnvError::CannotRemoveDefault);
        }
        if !self.environments.contains_key(name) {
            return Err(EnvError::NotFound(name.to_string()));
        }
        if self.current == name {
            self.current = DEFAULT_ENVIRONMENT.to_string();
        }
        self.environments.remove(name);
        let _ = std::fs::remove_dir_all(self.dir_for(name));
        self.save()?;
        Ok(())
    }

    /// Switches the current environment. Fails if `name` is unknown.
    pub fn use_environment(&mut self, name: &str) -> Result<(), EnvError> {
        if !self.environments.contains_key(name) {
            return Err(EnvError::NotFound(name.to_string()));
        }
        self.current = name.to_string();
        self.save()?;
        Ok(())
    }

    /// Installs a package from a local directory containing
    /// `hatch_metadata.json` into `env_name`. Missing Hatch dependencies are
    /// resolved and installed first: local-path dependencies are read
    /// straight off the filesystem, remote ones are looked up in `registry`
    /// for their latest satisfying version and downloaded via `loader`.
    pub async fn add_package_local(
        &mut self,
        env_name: &str,
        source_dir: &Path,
        registry: &Registry,
        loader: &PackageLoader,
    ) -> Result<(), EnvError> {
        if !self.environments.contains_key(env_name) {
            return Err(EnvError::NotFound(env_name.to_string()));
        }

        let metadata_path = source_dir.join("hatch_metadata.json");
        let text = std::fs::read_to_string(&metadata_path).map_err(EnvError::Read)?;
        let metadata: PackageMetadata = serde_json::from_str(&text)?;

        self.install_missing_dependencies(env_name, &metadata, registry, loader).await?;

        let target_dir = self.dir_for(env_name).join(&metadata.name);
        crate::loader::install_local(source_dir, &target_dir, &metadata.name)?;

        let record = InstalledPackage {
            name: metadata.name.clone(),
            version: metadata.version.clone(),
            added_date: Utc::now(),
            path: target_dir,
            source: PackageSource::Local { path: source_dir.display().to_string() },
            hatch_compliant: true,
        };
        self.environments.get_mut(env_name).unwrap().upsert_package(record);
        self.save()?;
        Ok(())
    }

    /// Installs `(name, version)` from the registry into `env_name`: resolves
    /// the full transitive install list via the Dependency Resolver and
    /// installs it dependency-first (reverse DFS pre-order), then the
    /// requested package itself.
    pub async fn add_package_from_registry(
        &mut self,
        env_name: &str,
        name: &str,
        version: &str,
        registry: &Registry,
        loader: &PackageLoader,
    ) -> Result<(), EnvError> {
        if !self.environments.contains_key(env_name) {
            return Err(EnvError::NotFound(env_name.to_string()));
        }

        let resolved = resolver::resolve_dependencies(registry, name, version)?;
        let mut install_order = resolved.resolved_packages.clone();
        install_order.reverse();

        for (pkg_name, pkg_version) in &install_order {
            if self.environments[env_name].find_package(pkg_name).is_some() {
                continue;
            }
            let (repo, _pkg) = registry
                .find_package_any_repo(pkg_name)
                .ok_or_else(|| EnvError::NotFound(pkg_name.clone()))?;
            let target_dir = self.dir_for(env_name).join(pkg_name);
            loader.install_remote(&repo.url, pkg_name, pkg_version, &target_dir).await?;

            let record = InstalledPackage {
                name: pkg_name.clone(),
                version: pkg_version.clone(),
                added_date: Utc::now(),
                path: target_dir,
                source: PackageSource::Registry { uri: repo.url.clone() },
                hatch_compliant: true,
            };
            self.environments.get_mut(env_name).unwrap().upsert_package(record);
        }

        self.save()?;
        Ok(())
    }

    /// Resolves and installs every Hatch dependency of a locally-installed
    /// package that is not already present in `env_name`. Each direct
    /// dependency is checked for a cycle (C9) before it is resolved, then
    /// installed together with its own full transitive dependency set
    /// (also C9), dependency-first — the same reverse-DFS-pre-order
    /// installation [`EnvironmentManager::add_package_from_registry`] uses.
    async fn install_missing_dependencies(
        &mut self,
        env_name: &str,
        metadata: &PackageMetadata,
        registry: &Registry,
        loader: &PackageLoader,
    ) -> Result<(), EnvError> {
        for dep in &metadata.dependencies {
            if self.environments[env_name].find_package(&dep.name).is_some() {
                continue;
            }
            let constraint = resolver::parse_constraint(&dep.version_constraint)?;
            let Some((_repo_name, dep_version)) = resolver::latest_satisfying(registry, &dep.name, &constraint)
            else {
                tracing::warn!(dependency = %dep.name, "no registry version satisfies dependency, skipping");
                continue;
            };

            let cycle = resolver::check_cycle(registry, &dep.name, &dep_version);
            if cycle.has_cycle {
                return Err(EnvError::DependencyCycle { path: cycle.path });
            }

            let resolved = resolver::resolve_dependencies(registry, &dep.name, &dep_version)?;
            let mut install_order = resolved.resolved_packages.clone();
            install_order.reverse();

            for (pkg_name, pkg_version) in &install_order {
                if self.environments[env_name].find_package(pkg_name).is_some() {
                    continue;
                }
                let (repo, _pkg) = registry
                    .find_package_any_repo(pkg_name)
                    .ok_or_else(|| EnvError::NotFound(pkg_name.clone()))?;
                let target_dir = self.dir_for(env_name).join(pkg_name);
                loader.install_remote(&repo.url, pkg_name, pkg_version, &target_dir).await?;

                let record = InstalledPackage {
                    name: pkg_name.clone(),
                    version: pkg_version.clone(),
                    added_date: Utc::now(),
                    path: target_dir,
                    source: PackageSource::Registry { uri: repo.url.clone() },
                    hatch_compliant: true,
                };
                self.environments.get_mut(env_name).unwrap().upsert_package(record);
            }
        }
        Ok(())
    }

    /// Removes a package from an environment. The on-disk directory is
    /// deleted best-effort; the record is removed regardless of whether the
    /// directory deletion succeeded.
    pub fn remove_package(&mut self, env_name: &str, package_name: &str) -> Result<(), EnvError> {
        let env = self.environments.get_mut(env_name).ok_or_else(|| EnvError::NotFound(env_name.to_string()))?;
        let Some(pos) = env.packages.iter().position(|p| p.name == package_name) else {
            return Err(EnvError::NotFound(package_name.to_string()));
        };
        let removed = env.packages.remove(pos);
        let _ = std::fs::remove_dir_all(&removed.path);
        self.save()?;
        Ok(())
    }

    /// Lists the packages installed in `env_name`.
    pub fn list_packages(&self, env_name: &str) -> Result<&[InstalledPackage], EnvError> {
        Ok(&self.environments.get(env_name).ok_or_else(|| EnvError::NotFound(env_name.to_string()))?.packages)
    }

    /// Absolute paths to the entry-point scripts of every package in
    /// `env_name`, in installation order — exactly the input to the MCP
    /// Manager's fleet connect.
    pub fn server_entry_points(&self, env_name: &str) -> Result<Vec<PathBuf>, EnvError> {
        let env = self.environments.get(env_name).ok_or_else(|| EnvError::NotFound(env_name.to_string()))?;
        Ok(env
            .packages
            .iter()
            .map(|p| p.path.join(format!("{}.py", p.name)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_creates_default_environment_and_current_pointer() {
        let dir = tempdir().unwrap();
        let manager = EnvironmentManager::load(dir.path()).unwrap();
        assert_eq!(manager.current_name(), DEFAULT_ENVIRONMENT);
        assert!(manager.get(DEFAULT_ENVIRONMENT).is_some());
        assert!(dir.path().join("environments.json").exists());
        assert!(dir.path().join("current_environment").exists());
    }

    #[test]
    fn reload_picks_up_persisted_state() {
        let dir = tempdir().unwrap();
        {
            let mut manager = EnvironmentManager::load(dir.path()).unwrap();
            manager.create("scratch", "for testing").unwrap();
            manager.use_environment("scratch").unwrap();
        }
        let manager = EnvironmentManager::load(dir.path()).unwrap();
        assert_eq!(manager.current_name(), "scratch");
        assert!(manager.get("scratch").is_some());
    }

    #[test]
    fn create_rejects_invalid_names_and_duplicates() {
        let dir = tempdir().unwrap();
        let mut manager = EnvironmentManager::load(dir.path()).unwrap();
        assert!(matches!(manager.create("has space", "x"), Err(EnvError::InvalidName(_))));
        manager.create("scratch", "x").unwrap();
        assert!(matches!(manager.create("scratch", "x"), Err(EnvError::AlreadyExists(_))));
    }

    #[test]
    fn remove_refuses_default_and_falls_back_when_removing_current() {
        let dir = tempdir().unwrap();
        let mut manager = EnvironmentManager::load(dir.path()).unwrap();
        assert!(matches!(manager.remove(DEFAULT_ENVIRONMENT), Err(EnvError::CannotRemoveDefault)));

        manager.create("scratch", "x").unwrap();
        manager.use_environment("scratch").unwrap();
        manager.remove("scratch").unwrap();
        assert_eq!(manager.current_name(), DEFAULT_ENVIRONMENT);
        assert!(manager.get("scratch").is_none());
    }

    #[test]
    fn use_environment_rejects_unknown_name() {
        let dir = tempdir().unwrap();
        let mut manager = EnvironmentManager::load(dir.path()).unwrap();
        assert!(matches!(manager.use_environment("nope"), Err(EnvError::NotFound(_))));
    }

    #[test]
    fn remove_package_deletes_directory_and_record() {
        let dir = tempdir().unwrap();
        let mut manager = EnvironmentManager::load(dir.path()).unwrap();
        let pkg_dir = dir.path().join(DEFAULT_ENVIRONMENT).join("widget");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        manager.environments.get_mut(DEFAULT_ENVIRONMENT).unwrap().upsert_package(InstalledPackage {
            name: "widget".to_string(),
            version: "1.0.0".to_string(),
            added_date: Utc::now(),
            path: pkg_dir.clone(),
            source: PackageSource::Local { path: "/tmp/widget".to_string() },
            hatch_compliant: true,
        });

        manager.remove_package(DEFAULT_ENVIRONMENT, "widget").unwrap();
        assert!(!pkg_dir.exists());
        assert!(manager.list_packages(DEFAULT_ENVIRONMENT).unwrap().is_empty());
    }

    #[test]
    fn server_entry_points_joins_package_path_with_its_own_name() {
        let dir = tempdir().unwrap();
        let mut manager = EnvironmentManager::load(dir.path()).unwrap();
        let pkg_dir = dir.path().join(DEFAULT_ENVIRONMENT).join("widget");
        manager.environments.get_mut(DEFAULT_ENVIRONMENT).unwrap().upsert_package(InstalledPackage {
            name: "widget".to_string(),
            version: "1.0.0".to_string(),
            added_date: Utc::now(),
            path: pkg_dir.clone(),
            source: PackageSource::Local { path: "/tmp/widget".to_string() },
            hatch_compliant: true,
        });

        let entries = manager.server_entry_points(DEFAULT_ENVIRONMENT).unwrap();
        assert_eq!(entries, vec![pkg_dir.join("widget.py")]);
    }
}
