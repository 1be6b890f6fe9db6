//! Resource naming rules.
//!
//! Kubernetes object names (RFC 1123 labels) only allow lowercase
//! alphanumerics and `-`, must start and end with an alphanumeric and are
//! limited to 63 characters.

use crate::error::{MegalosError, Result};

/// Maximum length of a DNS label.
pub const MAX_NAME_LEN: usize = 63;

/// Suffix of the ConfigMap carrying the lab archive.
pub const LAB_FILES_SUFFIX: &str = "-lab-files";

/// Convert an arbitrary identifier into a valid resource name.
pub fn to_resource_name(raw: &str) -> Result<String> {
    let mapped: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();

    let mut name = mapped.trim_matches('-').to_string();
    if name.len() > MAX_NAME_LEN {
        name.truncate(MAX_NAME_LEN);
        name = name.trim_end_matches('-').to_string();
    }

    if name.is_empty() {
        return Err(MegalosError::InvalidName(format!(
            "'{}' has no characters usable in a resource name",
            raw
        )));
    }

    Ok(name)
}

/// `true` if `name` already satisfies the naming grammar.
pub fn is_valid_resource_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// Namespace for a lab: the lowercase lab hash.
pub fn namespace_for(lab_hash: &str) -> Result<String> {
    to_resource_name(&lab_hash.to_lowercase())
}

/// Name of the ConfigMap holding the lab files of `namespace`.
pub fn lab_files_name(namespace: &str) -> String {
    format!("{}{}", namespace, LAB_FILES_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_resource_name() {
        assert_eq!(to_resource_name("PC_1").unwrap(), "pc-1");
        assert_eq!(to_resource_name("router.a").unwrap(), "router-a");
        assert_eq!(to_resource_name("--r1--").unwrap(), "r1");
        assert!(to_resource_name("___").is_err());
    }

    #[test]
    fn test_long_names_are_truncated() {
        let raw = "a".repeat(70);
        let name = to_resource_name(&raw).unwrap();
        assert_eq!(name.len(), MAX_NAME_LEN);
        assert!(is_valid_resource_name(&name));
    }

    #[test]
    fn test_namespace_is_lowercase() {
        assert_eq!(namespace_for("AbC123").unwrap(), "abc123");
        assert_eq!(lab_files_name("abc123"), "abc123-lab-files");
    }

    #[test]
    fn test_is_valid_resource_name() {
        assert!(is_valid_resource_name("kathara-r1"));
        assert!(!is_valid_resource_name("Kathara"));
        assert!(!is_valid_resource_name("-r1"));
        assert!(!is_valid_resource_name(""));
    }
}
