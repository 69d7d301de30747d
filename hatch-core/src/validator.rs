//! Hatch package validator contract (A5): the external collaborator C10
//! consults before accepting a package's metadata into the registry
//!.

use crate::registry::PackageMetadata;

/// Validates package metadata before it is admitted to the registry.
/// Separated from [`crate::registry::Registry`] itself so the validation
/// policy can be swapped (e.g. a stricter policy enforcing naming
/// conventions or required fields) without touching storage logic.
pub trait PackageValidator: Send + Sync {
    fn validate(&self, metadata: &PackageMetadata) -> Result<(), String>;
}

/// Accepts anything with a non-empty name and version; the default policy
/// when no stricter validator is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveValidator;

impl PackageValidator for PermissiveValidator {
    fn validate(&self, metadata: &PackageMetadata) -> Result<(), String> {
        if metadata.name.trim().is_empty() {
            return Err("package name must not be empty".to_string());
        }
        if metadata.version.trim().is_empty() {
            return Err("package version must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn metadata(name: &str, version: &str) -> PackageMetadata {
        PackageMetadata {
            name: name.to_string(),
            version: version.to_string(),
            description: String::new(),
            category: String::new(),
            tags: Vec::new(),
            dependencies: Vec::new(),
            python_dependencies: Vec::new(),
            compatibility: HashMap::new(),
        }
    }

    #[test]
    fn permissive_validator_rejects_empty_name_or_version() {
        let validator = PermissiveValidator;
        assert!(validator.validate(&metadata("", "1.0.0")).is_err());
        assert!(validator.validate(&metadata("widget", "")).is_err());
        assert!(validator.validate(&metadata("widget", "1.0.0")).is_ok());
    }
}
