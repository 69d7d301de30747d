//! Registry Store (C10): the on-disk package registry — repositories,
//! packages, and differentially-stored versions — plus the diff/merge
//! machinery used when a new version is added.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::validator::PackageValidator;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HatchDependency {
    pub name: String,
    #[serde(default)]
    pub version_constraint: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PythonDependency {
    pub name: String,
    #[serde(default)]
    pub version_constraint: String,
    #[serde(default = "default_package_manager")]
    pub package_manager: String,
}

fn default_package_manager() -> String {
    "pip".to_string()
}

/// One package version, stored differentially against `base_version`
///. The root version of a package has `base_version: None`
/// and stores its complete dependency sets in the `*_added` fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Version {
    pub version: String,
    pub path: String,
    pub metadata_path: String,
    pub base_version: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    pub added_date: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies_added: Vec<HatchDependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies_removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies_modified: Vec<HatchDependency>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub python_dependencies_added: Vec<PythonDependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub python_dependencies_removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub python_dependencies_modified: Vec<PythonDependency>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub compatibility_changes: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub versions: Vec<Version>,
    pub latest_version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub packages: Vec<Package>,
    pub last_indexed: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_packages: u64,
    pub total_versions: u64,
    pub total_artifacts: u64,
}

/// Full dependency set for one package version, fully reconstructed from
/// the version chain's deltas.
#[derive(Clone, Debug, Default)]
pub struct ResolvedDependencies {
    pub dependencies: Vec<HatchDependency>,
    pub python_dependencies: Vec<PythonDependency>,
    pub compatibility: HashMap<String, String>,
}

/// Metadata read from a package's `hatch_metadata.json`, the shape both the
/// Environment Manager (C7) and the Registry Store (C10) consume.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<HatchDependency>,
    #[serde(default)]
    pub python_dependencies: Vec<PythonDependency>,
    #[serde(default)]
    pub compatibility: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Registry {
    pub registry_schema_version: String,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub stats: RegistryStats,
}

impl Registry {
    pub(crate) fn new_empty() -> Self {
        Self {
            registry_schema_version: "1.0.0".to_string(),
            last_updated: Utc::now(),
            repositories: Vec::new(),
            stats: RegistryStats::default(),
        }
    }

    /// Loads the registry from `path`, creating and persisting an empty one
    /// if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            let registry = Self::new_empty();
            registry.save(path)?;
            return Ok(registry);
        }
        let text = std::fs::read_to_string(path).map_err(RegistryError::Read)?;
        serde_json::from_str(&text).map_err(RegistryError::Parse)
    }

    /// Persists the registry atomically: write to a sibling temp file, then
    /// rename over the destination, so a crash mid-write never corrupts the
    /// existing registry.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let mut to_write = self.clone();
        to_write.last_updated = Utc::now();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(RegistryError::Write)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(&to_write).map_err(RegistryError::Parse)?;
        std::fs::write(&tmp_path, text).map_err(RegistryError::Write)?;
        std::fs::rename(&tmp_path, path).map_err(RegistryError::Write)?;
        Ok(())
    }

    pub fn find_repository(&self, repo_name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == repo_name)
    }

    fn find_repository_mut(&mut self, repo_name: &str) -> Option<&mut Repository> {
        self.repositories.iter_mut().find(|r| r.name == repo_name)
    }

    pub fn find_package(&self, repo_name: &str, package_name: &str) -> Option<&Package> {
        self.find_repository(repo_name)?.packages.iter().find(|p| p.name == package_name)
    }

    pub fn find_package_any_repo(&self, package_name: &str) -> Option<(&Repository, &Package)> {
        self.repositories.iter().find_map(|repo| {
            repo.packages.iter().find(|p| p.name == package_name).map(|pkg| (repo, pkg))
        })
    }

    pub fn find_version(&self, repo_name: &str, package_name: &str, version: &str) -> Option<&Version> {
        self.find_package(repo_name, package_name)?.versions.iter().find(|v| v.version == version)
    }

    /// Adds a new, empty repository. Returns `false` without modifying
    /// anything if one of this name already exists.
    pub fn add_repository(&mut self, name: &str, url: &str) -> bool {
        if self.find_repository(name).is_some() {
            return false;
        }
        self.repositories.push(Repository {
            name: name.to_string(),
            url: url.to_string(),
            packages: Vec::new(),
            last_indexed: Utc::now(),
        });
        true
    }

    /// Adds `metadata` as a package to `repo_name`, or as a new version of
    /// an existing package of the same name. Validates via `validator`
    /// before touching storage.
    pub fn add_package(
        &mut self,
        repo_name: &str,
        metadata: &PackageMetadata,
        package_path: &str,
        metadata_path: &str,
        validator: &dyn PackageValidator,
    ) -> Result<(), RegistryError> {
        validator.validate(metadata).map_err(RegistryError::Validation)?;

        if self.find_repository(repo_name).is_none() {
            return Err(RegistryError::RepositoryNotFound(repo_name.to_string()));
        }
        if self.find_package(repo_name, &metadata.name).is_some() {
            return self.add_package_version_unchecked(repo_name, metadata, package_path, metadata_path);
        }

        let repo = self.find_repository_mut(repo_name).expect("checked above");
        repo.packages.push(Package {
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            category: metadata.category.clone(),
            tags: metadata.tags.clone(),
            versions: Vec::new(),
            latest_version: metadata.version.clone(),
        });
        self.stats.total_packages += 1;
        self.add_package_version_unchecked(repo_name, metadata, package_path, metadata_path)
    }

    /// Adds a new version of an existing package, computing a diff against
    /// the current `latest_version` unless this is the package's first
    /// version. Skips validation — used when the caller (e.g.
    /// [`Registry::add_package`]) has already validated the metadata.
    pub fn add_package_version(
        &mut self,
        repo_name: &str,
        metadata: &PackageMetadata,
        package_path: &str,
        metadata_path: &str,
        validator: &dyn PackageValidator,
    ) -> Result<(), RegistryError> {
        validator.validate(metadata).map_err(RegistryError::Validation)?;
        self.add_package_version_unchecked(repo_name, metadata, package_path, metadata_path)
    }

    fn add_package_version_unchecked(&mut self, repo_name: &str, metadata: &PackageMetadata, package_path: &str, metadata_path: &str) -> Result<(), RegistryError> {
        if self.find_version(repo_name, &metadata.name, &metadata.version).is_some() {
            return Err(RegistryError::Validation(format!(
                "version {} of package {} already exists",
                metadata.version, metadata.name
            )));
        }

        let is_first_version = self
            .find_package(repo_name, &metadata.name)
            .map(|p| p.versions.is_empty())
            .unwrap_or(true);

        let version_data = if is_first_version {
            Version {
                version: metadata.version.clone(),
                path: package_path.to_string(),
                metadata_path: metadata_path.to_string(),
                base_version: None,
                artifacts: Vec::new(),
                added_date: Utc::now(),
                dependencies_added: metadata.dependencies.clone(),
                dependencies_removed: Vec::new(),
                dependencies_modified: Vec::new(),
                python_dependencies_added: metadata.python_dependencies.clone(),
                python_dependencies_removed: Vec::new(),
                python_dependencies_modified: Vec::new(),
                compatibility_changes: metadata.compatibility.clone(),
            }
        } else {
            let base_version = self
                .find_package(repo_name, &metadata.name)
                .map(|p| p.latest_version.clone())
                .unwrap_or_default();
            let base_resolved = self.get_full_package_dependencies(repo_name, &metadata.name, &base_version)?;

            let (deps_added, deps_removed, deps_modified) =
                diff_hatch_dependencies(&base_resolved.dependencies, &metadata.dependencies);
            let (py_added, py_removed, py_modified) =
                diff_python_dependencies(&base_resolved.python_dependencies, &metadata.python_dependencies);
            let compat_changes = diff_compatibility(&base_resolved.compatibility, &metadata.compatibility);

            Version {
                version: metadata.version.clone(),
                path: package_path.to_string(),
                metadata_path: metadata_path.to_string(),
                base_version: Some(base_version),
                artifacts: Vec::new(),
                added_date: Utc::now(),
                dependencies_added: deps_added,
                dependencies_removed: deps_removed,
                dependencies_modified: deps_modified,
                python_dependencies_added: py_added,
                python_dependencies_removed: py_removed,
                python_dependencies_modified: py_modified,
                compatibility_changes: compat_changes,
            }
        };

        let repo = self.find_repository_mut(repo_name).ok_or_else(|| RegistryError::RepositoryNotFound(repo_name.to_string()))?;
        let pkg = repo
            .packages
            .iter_mut()
            .find(|p| p.name == metadata.name)
            .ok_or_else(|| RegistryError::PackageNotFound(metadata.name.clone()))?;
        pkg.versions.push(version_data);
        pkg.latest_version = metadata.version.clone();

        self.stats.total_versions += 1;

        // Cycle detection never gates storage (consistent with check_cycle's
        // own "logs and continues" contract,) — it only surfaces
        // the problem to operators, who can then remove the offending
        // version or its dependency.
        let report = crate::resolver::check_cycle(self, &metadata.name, &metadata.version);
        if report.has_cycle {
            tracing::warn!(
                package = %metadata.name,
                version = %metadata.version,
                path = ?report.path,
                "adding this version introduces a dependency cycle"
            );
        }

        Ok(())
    }

    /// Reconstructs the full dependency set for `(package_name, version)` by
    /// walking the `base_version` chain oldest-to-newest and applying every
    /// delta in order. A broken chain link is `RegistryCorruption`,
    /// not a silent partial reconstruction.
    pub fn get_full_package_dependencies(&self, repo_name: &str, package_name: &str, version: &str) -> Result<ResolvedDependencies, RegistryError> {
        let pkg = self
            .find_package(repo_name, package_name)
            .ok_or_else(|| RegistryError::PackageNotFound(package_name.to_string()))?;
        let target = pkg
            .versions
            .iter()
            .find(|v| v.version == version)
            .ok_or_else(|| RegistryError::VersionNotFound(package_name.to_string(), version.to_string()))?;

        let chain = version_chain(pkg, target)?;

        let mut dependencies: HashMap<String, String> = HashMap::new();
        let mut python_dependencies: HashMap<String, PythonDependency> = HashMap::new();
        let mut compatibility: HashMap<String, String> = HashMap::new();

        for ver in chain {
            for dep in &ver.dependencies_added {
                dependencies.insert(dep.name.clone(), dep.version_constraint.clone());
            }
            for name in &ver.dependencies_removed {
                dependencies.remove(name);
            }
            for dep in &ver.dependencies_modified {
                if dependencies.contains_key(&dep.name) {
                    dependencies.insert(dep.name.clone(), dep.version_constraint.clone());
                }
            }

            for dep in &ver.python_dependencies_added {
                python_dependencies.insert(dep.name.clone(), dep.clone());
            }
            for name in &ver.python_dependencies_removed {
                python_dependencies.remove(name);
            }
            for dep in &ver.python_dependencies_modified {
                if python_dependencies.contains_key(&dep.name) {
                    python_dependencies.insert(dep.name.clone(), dep.clone());
                }
            }

            for (key, value) in &ver.compatibility_changes {
                compatibility.insert(key.clone(), value.clone());
            }
        }

        Ok(ResolvedDependencies {
            dependencies: dependencies
                .into_iter()
                .map(|(name, version_constraint)| HatchDependency { name, version_constraint })
                .collect(),
            python_dependencies: python_dependencies.into_values().collect(),
            compatibility,
        })
    }
}

fn version_chain<'a>(pkg: &'a Package, target: &'a Version) -> Result<Vec<&'a Version>, RegistryError> {
    let mut chain = vec![target];
    let mut current = target;
    while let Some(base) = &current.base_version {
        let found = pkg
            .versions
            .iter()
            .find(|v| &v.version == base)
            .ok_or_else(|| RegistryError::Resolver(crate::error::ResolverError::RegistryCorruption {
                version: current.version.clone(),
                missing: base.clone(),
            }))?;
        chain.push(found);
        current = found;
    }
    chain.reverse();
    Ok(chain)
}

fn diff_hatch_dependencies(old: &[HatchDependency], new: &[HatchDependency]) -> (Vec<HatchDependency>, Vec<String>, Vec<HatchDependency>) {
    let old_map: HashMap<&str, &str> = old.iter().map(|d| (d.name.as_str(), d.version_constraint.as_str())).collect();
    let new_map: HashMap<&str, &str> = new.iter().map(|d| (d.name.as_str(), d.version_constraint.as_str())).collect();

    let added = new
        .iter()
        .filter(|d| !old_map.contains_key(d.name.as_str()))
        .cloned()
        .collect();
    let removed = old
        .iter()
        .filter(|d| !new_map.contains_key(d.name.as_str()))
        .map(|d| d.name.clone())
        .collect();
    let modified = new
        .iter()
        .filter(|d| old_map.get(d.name.as_str()).is_some_and(|&c| c != d.version_constraint))
        .cloned()
        .collect();

    (added, removed, modified)
}

fn diff_python_dependencies(old: &[PythonDependency], new: &[PythonDependency]) -> (Vec<PythonDependency>, Vec<String>, Vec<PythonDependency>) {
    let old_map: HashMap<&str, &PythonDependency> = old.iter().map(|d| (d.name.as_str(), d)).collect();
    let new_names: std::collections::HashSet<&str> = new.iter().map(|d| d.name.as_str()).collect();

    let added = new
        .iter()
        .filter(|d| !old_map.contains_key(d.name.as_str()))
        .cloned()
        .collect();
    let removed = old
        .iter()
        .filter(|d| !new_names.contains(d.name.as_str()))
        .map(|d| d.name.clone())
        .collect();
    let modified = new
        .iter()
        .filter(|d| {
            old_map
                .get(d.name.as_str())
                .is_some_and(|old_dep| old_dep.version_constraint != d.version_constraint || old_dep.package_manager != d.package_manager)
        })
        .cloned()
        .collect();

    (added, removed, modified)
}

fn diff_compatibility(old: &HashMap<String, String>, new: &HashMap<String, String>) -> HashMap<String, String> {
    let mut changes = HashMap::new();
    for key in ["hatchling", "python"] {
        let old_val = old.get(key).cloned().unwrap_or_default();
        let new_val = new.get(key).cloned().unwrap_or_default();
        if old_val != new_val {
            changes.insert(key.to_string(), new_val);
        }
    }
    changes
}
