//! Minimal URI helpers for activity file lists.
//!
//! Only the scheme matters to the core: it decides whether a file is already
//! local to the agent and whether moving it needs out-of-band credentials.

/// Schemes whose transfers need an externally-authenticated token set.
pub const CREDENTIALED_SCHEMES: &[&str] = &["globus", "s3", "gs"];

/// Scheme of `uri`, lower-cased. Plain paths have no scheme.
#[must_use]
pub fn scheme(uri: &str) -> Option<String> {
    let (scheme, _) = uri.split_once("://")?;
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return None;
    }
    Some(scheme.to_ascii_lowercase())
}

/// Whether `uri` refers to a file already on the local filesystem.
#[must_use]
pub fn is_local(uri: &str) -> bool {
    match scheme(uri) {
        None => true,
        Some(s) => s == "file",
    }
}

/// Whether moving `uri` requires externally-authenticated credentials.
#[must_use]
pub fn requires_credentials(uri: &str) -> bool {
    scheme(uri).is_some_and(|s| CREDENTIALED_SCHEMES.contains(&s.as_str()))
}

/// Filesystem path of a local URI (`file:///tmp/x` -> `/tmp/x`).
#[must_use]
pub fn local_path(uri: &str) -> Option<&str> {
    if !is_local(uri) {
        return None;
    }
    Some(uri.strip_prefix("file://").unwrap_or(uri))
}

/// Last non-empty path segment of `uri`.
#[must_use]
pub fn file_name(uri: &str) -> Option<&str> {
    let rest = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    let path = rest.split(['?', '#']).next().unwrap_or(rest);
    path.rsplit('/').find(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_detection() {
        assert_eq!(scheme("globus://ep/data.h5"), Some("globus".to_string()));
        assert_eq!(scheme("S3://bucket/key"), Some("s3".to_string()));
        assert_eq!(scheme("/tmp/plain"), None);
        assert_eq!(scheme("://missing"), None);
    }

    #[test]
    fn test_locality() {
        assert!(is_local("/tmp/input.txt"));
        assert!(is_local("file:///tmp/input.txt"));
        assert!(!is_local("gs://bucket/input.txt"));
        assert!(!is_local("rsync://host/input.txt"));
    }

    #[test]
    fn test_credentials() {
        assert!(requires_credentials("globus://endpoint/path"));
        assert!(!requires_credentials("rsync://host/path"));
        assert!(!requires_credentials("/local/path"));
    }

    #[test]
    fn test_paths_and_names() {
        assert_eq!(local_path("file:///tmp/a.txt"), Some("/tmp/a.txt"));
        assert_eq!(local_path("gs://b/a.txt"), None);
        assert_eq!(file_name("gs://bucket/dir/data.csv"), Some("data.csv"));
        assert_eq!(file_name("gs://bucket/dir/"), Some("dir"));
        assert_eq!(file_name("s3://bucket/obj?versionId=3"), Some("obj"));
    }
}
