//! Name normalization for cluster objects.
//!
//! Org, repository and branch names come from source control and may
//! contain characters the cluster rejects. Each helper lowercases its
//! inputs, rewrites disallowed characters, and joins the parts.

use std::sync::LazyLock;

use regex::Regex;

/// Longest `generate_name` prefix accepted by the cluster (63 minus a 5-char suffix).
pub const GENERATE_NAME_MAX: usize = 58;

static SERVICE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9]").expect("static pattern"));
static NAMESPACE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9-]").expect("static pattern"));
static BRANCH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9_-]").expect("static pattern"));

fn normalize_with(pattern: &Regex, delim: &str, repl: &str, parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| pattern.replace_all(&part.to_lowercase(), repl).into_owned())
        .collect::<Vec<_>>()
        .join(delim)
}

/// Strip everything outside `[a-z0-9]` from each part.
pub fn normalize(delim: &str, parts: &[&str]) -> String {
    normalize_with(&SERVICE_PATTERN, delim, "", parts)
}

/// Replace everything outside `[a-z0-9-]` with `-`.
pub fn normalize_by_hyphen(delim: &str, parts: &[&str]) -> String {
    normalize_with(&NAMESPACE_PATTERN, delim, "-", parts)
}

/// Replace everything outside `[a-z0-9_-]` with `.`.
pub fn normalize_git_branch(delim: &str, parts: &[&str]) -> String {
    normalize_with(&BRANCH_PATTERN, delim, ".", parts)
}

/// Namespace that holds every Service of a source-control org.
pub fn namespace_for_org(org: &str) -> String {
    normalize_by_hyphen("", &[org])
}

/// ReplicaGroup name prefix for a revision, truncated to [`GENERATE_NAME_MAX`].
pub fn replica_group_generate_name(repo: &str, branch: &str, sha: &str) -> String {
    let mut name = normalize("-", &[repo, branch, sha]);
    // Output is pure ASCII, so byte truncation is safe.
    name.truncate(GENERATE_NAME_MAX);
    name
}
