//! Dependency Resolver (C9): version constraint parsing, latest-satisfying
//! version selection, transitive resolution, and cycle detection over the
//! Registry Store's differential version chains.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::error::{RegistryError, ResolverError};
use crate::registry::{PythonDependency, Registry};

/// Comparison operator of a version constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    /// `~=`: compatible release — same prefix, last component may advance.
    Compatible,
}

/// A parsed version constraint. Structured as `Any | Op` rather than a bare
/// string so a future `All(Vec<Constraint>)` variant needs no call-site
/// changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Constraint {
    Any,
    Op { op: ConstraintOp, version: Version },
}

/// A dotted-integer version of arbitrary length, e.g. `1.2.0`. Shorter
/// versions are treated as zero-padded when compared, so `1.2` == `1.2.0`.
#[derive(Clone, Debug, Eq)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let parts: Option<Vec<u64>> = s.split('.').map(|p| p.parse::<u64>().ok()).collect();
        parts.map(Version)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text: Vec<String> = self.0.iter().map(u64::to_string).collect();
        write!(f, "{}", text.join("."))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                std::cmp::Ordering::Equal => continue,
                other => return other,
            }
        }
        std::cmp::Ordering::Equal
    }
}

/// Parses a constraint in the classic `<op><version>` shape. An empty (or
/// whitespace-only) string means "any".
pub fn parse_constraint(text: &str) -> Result<Constraint, ResolverError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Constraint::Any);
    }

    let re = Regex::new(r"^(==|!=|>=|<=|~=|>|<)?\s*([0-9]+(?:\.[0-9]+)*)$").unwrap();
    let captures = re
        .captures(trimmed)
        .ok_or_else(|| ResolverError::DependencyConstraint(trimmed.to_string()))?;

    let op = match captures.get(1).map(|m| m.as_str()) {
        None | Some("") => return Ok(Constraint::Any),
        Some("==") => ConstraintOp::Eq,
        Some("!=") => ConstraintOp::Ne,
        Some(">=") => ConstraintOp::Ge,
        Some("<=") => ConstraintOp::Le,
        Some(">") => ConstraintOp::Gt,
        Some("<") => ConstraintOp::Lt,
        Some("~=") => ConstraintOp::Compatible,
        Some(other) => return Err(ResolverError::DependencyConstraint(other.to_string())),
    };
    let version_text = captures.get(2).unwrap().as_str();
    let version = Version::parse(version_text)
        .ok_or_else(|| ResolverError::DependencyConstraint(trimmed.to_string()))?;

    Ok(Constraint::Op { op, version })
}

/// Whether `candidate` satisfies `constraint`. A `~=V` constraint is a
/// compatible release: `candidate >= V` and `candidate` shares every
/// component of `V` except the last.
pub fn satisfies(constraint: &Constraint, candidate: &Version) -> bool {
    match constraint {
        Constraint::Any => true,
        Constraint::Op { op: ConstraintOp::Eq, version } => candidate == version,
        Constraint::Op { op: ConstraintOp::Ne, version } => candidate != version,
        Constraint::Op { op: ConstraintOp::Ge, version } => candidate >= version,
        Constraint::Op { op: ConstraintOp::Le, version } => candidate <= version,
        Constraint::Op { op: ConstraintOp::Gt, version } => candidate > version,
        Constraint::Op { op: ConstraintOp::Lt, version } => candidate < version,
        Constraint::Op { op: ConstraintOp::Compatible, version } => {
            if candidate < version {
                return false;
            }
            let prefix_len = version.0.len().saturating_sub(1);
            candidate.0.get(..prefix_len) == version.0.get(..prefix_len)
        }
    }
}

/// Finds the repository name hosting `(name, version)`, if any.
fn repo_for_version<'r>(registry: &'r Registry, name: &str, version: &str) -> Option<&'r str> {
    registry
        .repositories
        .iter()
        .find(|repo| {
            repo.packages
                .iter()
                .any(|pkg| pkg.name == name && pkg.versions.iter().any(|v| v.version == version))
        })
        .map(|repo| repo.name.as_str())
}

/// Across every repository, the highest version of `name` satisfying
/// `constraint`, paired with the repository that hosts it. Versions that
/// fail to parse as dotted integers are skipped rather than erroring — a
/// malformed version string in the registry should not abort resolution
///.
pub fn latest_satisfying<'r>(
    registry: &'r Registry,
    name: &str,
    constraint: &Constraint,
) -> Option<(&'r str, String)> {
    let mut best: Option<(&str, Version)> = None;

    for repo in &registry.repositories {
        let Some(pkg) = repo.packages.iter().find(|p| p.name == name) else { continue };
        for v in &pkg.versions {
            let Some(parsed) = Version::parse(&v.version) else { continue };
            if !satisfies(constraint, &parsed) {
                continue;
            }
            if best.as_ref().map(|(_, b)| &parsed > b).unwrap_or(true) {
                best = Some((repo.name.as_str(), parsed));
            }
        }
    }

    best.map(|(repo, version)| (repo, version.to_string()))
}

/// Everything a transitive resolve produced: packages in DFS pre-order
/// (root first), plus the flattened Python dependency set.
#[derive(Clone, Debug, Default)]
pub struct Resolved {
    pub resolved_packages: Vec<(String, String)>,
    pub python_dependencies: Vec<PythonDependency>,
}

/// Merges one Python dependency into the accumulated map. The source this
/// system is modeled on overwrites with the last-seen constraint on a name
/// collision rather than erroring or unioning constraints; whether that is
/// intended policy or an unfinished `TODO` is ambiguous, so the behaviour is preserved but named so the policy is
/// visible at the call site rather than inlined.
pub fn merge_python_constraints_last_writer_wins(
    map: &mut HashMap<String, PythonDependency>,
    dep: PythonDependency,
) {
    map.insert(dep.name.clone(), dep);
}

/// Transitively resolves `(root_name, root_version)`: DFS pre-order over
/// direct Hatch dependencies, each resolved to its latest satisfying
/// version; Python dependencies are collected without recursion (spec
/// §4.9). A broken `base_version` chain anywhere in the walk surfaces as
/// [`RegistryError::Resolver`]; an unsatisfiable dependency is logged and
/// skipped rather than aborting the whole resolve.
pub fn resolve_dependencies(
    registry: &Registry,
    root_name: &str,
    root_version: &str,
) -> Result<Resolved, RegistryError> {
    let mut visited = HashSet::new();
    let mut resolved_packages = Vec::new();
    let mut python_dependencies = HashMap::new();

    resolve_inner(
        registry,
        root_name,
        root_version,
        &mut visited,
        &mut resolved_packages,
        &mut python_dependencies,
    )?;

    Ok(Resolved {
        resolved_packages,
        python_dependencies: python_dependencies.into_values().collect(),
    })
}

fn resolve_inner(
    registry: &Registry,
    name: &str,
    version: &str,
    visited: &mut HashSet<String>,
    resolved_packages: &mut Vec<(String, String)>,
    python_dependencies: &mut HashMap<String, PythonDependency>,
) -> Result<(), RegistryError> {
    let key = format!("{name}@{version}");
    if visited.contains(&key) {
        return Ok(());
    }
    visited.insert(key);
    resolved_packages.push((name.to_string(), version.to_string()));

    let Some(repo_name) = repo_for_version(registry, name, version) else {
        return Err(RegistryError::VersionNotFound(name.to_string(), version.to_string()));
    };
    let deps = registry.get_full_package_dependencies(repo_name, name, version)?;

    for py_dep in &deps.python_dependencies {
        merge_python_constraints_last_writer_wins(python_dependencies, py_dep.clone());
    }

    for dep in &deps.dependencies {
        let constraint = match parse_constraint(&dep.version_constraint) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(dependency = %dep.name, error = %e, "skipping dependency with unparseable constraint");
                continue;
            }
        };
        match latest_satisfying(registry, &dep.name, &constraint) {
            Some((_, dep_version)) => {
                resolve_inner(registry, &dep.name, &dep_version, visited, resolved_packages, python_dependencies)?;
            }
            None => {
                tracing::warn!(dependency = %dep.name, constraint = %dep.version_constraint, "no version satisfies dependency, skipping");
            }
        }
    }

    Ok(())
}

/// Outcome of [`check_cycle`]: whether the dependency graph reachable from
/// the target contains a cycle, and if so the path that closes it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub has_cycle: bool,
    pub path: Vec<String>,
}

/// Detects whether any DFS from `(root_name, root_version)` can revisit a
/// node already on its current path. Non-destructive: does not consume or
/// mutate the registry. Never throws on a missing dependency — logs and
/// continues the walk.
pub fn check_cycle(registry: &Registry, root_name: &str, root_version: &str) -> CycleReport {
    let mut path: Vec<String> = Vec::new();
    let mut report = CycleReport::default();
    check_cycle_inner(registry, root_name, root_version, &mut path, &mut report);
    report
}

fn check_cycle_inner(
    registry: &Registry,
    name: &str,
    version: &str,
    path: &mut Vec<String>,
    report: &mut CycleReport,
) {
    if report.has_cycle {
        return;
    }

    let key = format!("{name}@{version}");
    if let Some(pos) = path.iter().position(|k| k == &key) {
        let mut cycle_path: Vec<String> = path[pos..]
            .iter()
            .map(|k| k.split('@').next().unwrap_or(k).to_string())
            .collect();
        cycle_path.push(name.to_string());
        report.has_cycle = true;
        report.path = cycle_path;
        return;
    }

    path.push(key);

    let Some(repo_name) = repo_for_version(registry, name, version) else {
        path.pop();
        return;
    };
    let deps = match registry.get_full_package_dependencies(repo_name, name, version) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(package = %name, version = %version, error = %e, "cycle check could not reconstruct dependencies, skipping branch");
            path.pop();
            return;
        }
    };

    for dep in &deps.dependencies {
        let Ok(constraint) = parse_constraint(&dep.version_constraint) else { continue };
        if let Some((_, dep_version)) = latest_satisfying(registry, &dep.name, &constraint) {
            check_cycle_inner(registry, &dep.name, &dep_version, path, report);
            if report.has_cycle {
                break;
            }
        }
    }

    path.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HatchDependency, PackageMetadata};
    use std::collections::HashMap as StdHashMap;

    fn empty_metadata(name: &str, version: &str, deps: Vec<HatchDependency>) -> PackageMetadata {
        PackageMetadata {
            name: name.to_string(),
            version: version.to_string(),
            description: String::new(),
            category: String::new(),
            tags: Vec::new(),
            dependencies: deps,
            python_dependencies: Vec::new(),
            compatibility: StdHashMap::new(),
        }
    }

    fn dep(name: &str, constraint: &str) -> HatchDependency {
        HatchDependency { name: name.to_string(), version_constraint: constraint.to_string() }
    }

    #[test]
    fn parse_constraint_handles_empty_as_any() {
        assert_eq!(parse_constraint("").unwrap(), Constraint::Any);
        assert_eq!(parse_constraint("   ").unwrap(), Constraint::Any);
    }

    #[test]
    fn parse_constraint_parses_every_operator() {
        for op_text in ["==", "!=", ">=", "<=", ">", "<", "~="] {
            let text = format!("{op_text}1.2.3");
            assert!(parse_constraint(&text).is_ok(), "failed to parse {text}");
        }
    }

    #[test]
    fn parse_constraint_rejects_garbage() {
        assert!(parse_constraint("banana").is_err());
        assert!(parse_constraint(">=not-a-version").is_err());
    }

    #[test]
    fn version_ordering_zero_pads_shorter_versions() {
        assert_eq!(Version::parse("1.2").unwrap(), Version::parse("1.2.0").unwrap());
        assert!(Version::parse("1.3").unwrap() > Version::parse("1.2.9").unwrap());
    }

    #[test]
    fn satisfies_compatible_release_allows_patch_bumps_only() {
        let constraint = parse_constraint("~=2.2.0").unwrap();
        assert!(satisfies(&constraint, &Version::parse("2.2.5").unwrap()));
        assert!(!satisfies(&constraint, &Version::parse("2.3.0").unwrap()));
        assert!(!satisfies(&constraint, &Version::parse("2.1.9").unwrap()));
    }

    fn registry_with_cycle() -> Registry {
        let mut registry = Registry::new_empty();
        registry.add_repository("core", "https://example.test");
        registry
            .add_package("core", &empty_metadata("A", "1.0.0", vec![dep("B", ">=1.0.0")]), "/pkgs/a", "m.json", &crate::validator::PermissiveValidator)
            .unwrap();
        registry
            .add_package("core", &empty_metadata("B", "1.0.0", vec![dep("A", ">=1.0.0")]), "/pkgs/b", "m.json", &crate::validator::PermissiveValidator)
            .unwrap();
        registry
    }

    #[test]
    fn check_cycle_detects_mutual_dependency() {
        let registry = registry_with_cycle();
        let report = check_cycle(&registry, "A", "1.0.0");
        assert!(report.has_cycle);
        assert_eq!(report.path, vec!["A".to_string(), "B".to_string(), "A".to_string()]);
    }

    #[test]
    fn check_cycle_reports_none_for_acyclic_graph() {
        let mut registry = Registry::new_empty();
        registry.add_repository("core", "https://example.test");
        registry
            .add_package("core", &empty_metadata("base_pkg_1", "1.0.0", vec![]), "/pkgs/b1", "m.json", &crate::validator::PermissiveValidator)
            .unwrap();
        registry
            .add_package(
                "core",
                &empty_metadata("complex", "1.0.0", vec![dep("base_pkg_1", ">=1.0.0")]),
                "/pkgs/complex",
                "m.json",
                &crate::validator::PermissiveValidator,
            )
            .unwrap();

        let report = check_cycle(&registry, "complex", "1.0.0");
        assert!(!report.has_cycle);
    }

    fn registry_with_transitive_deps() -> Registry {
        let mut registry = Registry::new_empty();
        registry.add_repository("core", "https://example.test");
        registry
            .add_package("core", &empty_metadata("base_pkg_1", "1.0.0", vec![]), "/pkgs/b1", "m.json", &crate::validator::PermissiveValidator)
            .unwrap();
        registry
            .add_package("core", &empty_metadata("base_pkg_2", "1.0.0", vec![]), "/pkgs/b2", "m.json", &crate::validator::PermissiveValidator)
            .unwrap();
        registry
            .add_package(
                "core",
                &empty_metadata(
                    "complex",
                    "1.0.0",
                    vec![dep("base_pkg_1", ">=1.0.0"), dep("base_pkg_2", ">=1.0.0")],
                ),
                "/pkgs/complex",
                "m.json",
                &crate::validator::PermissiveValidator,
            )
            .unwrap();
        registry
    }

    #[test]
    fn resolve_dependencies_includes_transitive_packages_in_pre_order() {
        let registry = registry_with_transitive_deps();
        let resolved = resolve_dependencies(&registry, "complex", "1.0.0").unwrap();
        let names: std::collections::HashSet<&str> =
            resolved.resolved_packages.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, std::collections::HashSet::from(["complex", "base_pkg_1", "base_pkg_2"]));
        assert_eq!(resolved.resolved_packages[0].0, "complex");
    }

    #[test]
    fn latest_satisfying_picks_highest_matching_version() {
        let mut registry = Registry::new_empty();
        registry.add_repository("core", "https://example.test");
        registry.add_package("core", &empty_metadata("widget", "1.0.0", vec![]), "/pkgs/widget", "m.json", &crate::validator::PermissiveValidator).unwrap();
        registry.add_package("core", &empty_metadata("widget", "2.0.0", vec![]), "/pkgs/widget", "m.json", &crate::validator::PermissiveValidator).unwrap();

        let constraint = parse_constraint(">=1.0.0").unwrap();
        let (_, version) = latest_satisfying(&registry, "widget", &constraint).unwrap();
        assert_eq!(version, "2.0.0");
    }

    #[test]
    fn merge_python_constraints_last_writer_wins_overwrites_on_collision() {
        let mut map = StdHashMap::new();
        merge_python_constraints_last_writer_wins(
            &mut map,
            PythonDependency { name: "requests".into(), version_constraint: ">=2.0".into(), package_manager: "pip".into() },
        );
        merge_python_constraints_last_writer_wins(
            &mut map,
            PythonDependency { name: "requests".into(), version_constraint: ">=3.0".into(), package_manager: "pip".into() },
        );
        assert_eq!(map["requests"].version_constraint, ">=3.0");
    }
}
