//! JSON path canonicalization.
//!
//! Paths arrive in dotted (`user.email`) or `$.`-prefixed (`$.user.email`)
//! form and are canonicalized to the latter. Single quotes inside segments
//! are doubled so the canonical path can be embedded in a SQL string
//! literal; everything else about a query is bound as a parameter.

/// Canonicalize a single path to `$.`-prefixed form with quotes doubled.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let dotted = trimmed
        .strip_prefix("$.")
        .or_else(|| trimmed.strip_prefix('$'))
        .unwrap_or(trimmed);
    let dotted = dotted.strip_prefix('.').unwrap_or(dotted);
    let quoted: Vec<String> = dotted.split('.').map(|s| s.replace('\'', "''")).collect();
    format!("$.{}", quoted.join("."))
}

/// Canonicalize a path list: trim, drop empties, normalize, sort.
///
/// The sorted order makes the list a stable identity for index naming.
pub fn normalize_paths<I, S>(paths: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = paths
        .into_iter()
        .filter(|p| !p.as_ref().trim().is_empty())
        .map(|p| normalize_path(p.as_ref()))
        .collect();
    out.sort();
    out.dedup();
    out
}
