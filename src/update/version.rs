/// Strip a single leading 'v' from a version tag
pub fn strip_prefix(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Ensure a version tag carries the 'v' prefix used by release tags
pub fn normalize_tag(version: &str) -> String {
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{}", version)
    }
}

/// Returns true if `candidate` sorts after `current`.
///
/// This is a plain string comparison after prefix stripping, not semver
/// ordering: it is only right while every component has the same width, so
/// "2" is considered newer than "10".
pub fn is_newer(candidate: &str, current: &str) -> bool {
    strip_prefix(candidate) > strip_prefix(current)
}
