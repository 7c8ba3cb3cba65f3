//! Scope canonicalization, containment, and overlap (§4.4).

use crate::model::SubTask;

/// Replace backslashes with forward slashes, strip leading/trailing slashes,
/// truncate at the first wildcard metacharacter, and strip an optional
/// configured project-root prefix. Idempotent (§8 property 9).
#[must_use]
pub fn canonical_scope(raw: &str, default_root: &str) -> String {
    let mut s = raw.replace('\\', "/");
    s = s.trim_matches('/').to_owned();

    if let Some(pos) = s.find(['*', '?', '[']) {
        s.truncate(pos);
        s = s.trim_end_matches('/').to_owned();
    }

    if !default_root.is_empty() {
        let prefix = format!("{default_root}/");
        if let Some(rest) = s.strip_prefix(&prefix) {
            s = rest.to_owned();
        } else if s == default_root {
            s = String::new();
        }
    }

    s.trim_matches('/').to_owned()
}

/// True iff `scope` is empty (whole repository) or `path` equals `scope` or
/// is nested under it.
#[must_use]
pub fn in_scope(path: &str, scope: &str, default_root: &str) -> bool {
    let canon_scope = canonical_scope(scope, default_root);
    if canon_scope.is_empty() {
        return true;
    }
    let canon_path = canonical_scope(path, default_root);
    canon_path == canon_scope || canon_path.starts_with(&format!("{canon_scope}/"))
}

/// True iff `a` and `b` overlap: either is empty, they're equal, or one is a
/// path-prefix of the other.
#[must_use]
pub fn scopes_overlap(a: &str, b: &str, default_root: &str) -> bool {
    let ca = canonical_scope(a, default_root);
    let cb = canonical_scope(b, default_root);
    if ca.is_empty() || cb.is_empty() {
        return true;
    }
    ca == cb || ca.starts_with(&format!("{cb}/")) || cb.starts_with(&format!("{ca}/"))
}

/// Normalize a name to `[a-z][a-z0-9_-]{0,47}`, slugifying arbitrary input.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::new();
    for ch in raw.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    let mut result = if trimmed.is_empty() {
        "agent".to_owned()
    } else {
        trimmed.to_owned()
    };
    if !result.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
        result = format!("a-{result}");
    }
    result.truncate(48);
    result.trim_end_matches('-').to_owned()
}

/// Walk plan items in order, rewriting any scope that overlaps an
/// already-accepted scope to `{default_root}/{name}` (then `-{k}` on
/// further collision). Returns the rewritten scopes in input order.
#[must_use]
pub fn normalize_disjoint_scopes(items: &[SubTask], default_root: &str) -> Vec<String> {
    let mut accepted: Vec<String> = Vec::new();
    let mut result = Vec::with_capacity(items.len());

    for item in items {
        let mut candidate = canonical_scope(&item.scope, default_root);
        if accepted.iter().any(|a| scopes_overlap(a, &candidate, default_root)) {
            let base = if default_root.is_empty() {
                item.name.clone()
            } else {
                format!("{default_root}/{}", item.name)
            };
            candidate = base.clone();
            let mut k = 1;
            while accepted.iter().any(|a| scopes_overlap(a, &candidate, default_root)) {
                candidate = format!("{base}-{k}");
                k += 1;
            }
        }
        accepted.push(candidate.clone());
        result.push(candidate);
    }
    result
}

/// Re-validate a fully normalized plan: collect human-readable messages for
/// any remaining pairwise overlap.
#[must_use]
pub fn validate_scope_rules(items: &[SubTask], default_root: &str) -> (bool, Vec<String>) {
    let mut issues = Vec::new();
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if scopes_overlap(&items[i].scope, &items[j].scope, default_root) {
                issues.push(format!(
                    "scope overlap: '{}' ({}) and '{}' ({})",
                    items[i].name, items[i].scope, items[j].name, items[j].scope
                ));
            }
        }
    }
    (issues.is_empty(), issues)
}

/// Detect a "create/add/write/update/edit/modify [exactly] one|single file
/// `<path>`" directive in raw task text (case-insensitive). `one`/`single` is
/// mandatory — only `exactly` is optional filler — so ordinary phrasing like
/// "update the file src/lib.rs" does not short-circuit the planner. Returns
/// the referenced path when found.
#[must_use]
pub fn detect_single_file_scope(task: &str) -> Option<String> {
    let lower = task.to_lowercase();
    let verbs = ["create", "add", "write", "update", "edit", "modify"];
    let verb_pos = verbs.iter().find_map(|v| lower.find(&format!("{v} ")));
    let verb_pos = verb_pos?;
    let rest = &lower[verb_pos..];

    // Skip past the verb, an optional "exactly", then require the mandatory
    // "one"/"single" quantifier and the literal word "file" before lifting
    // the corresponding slice of the *original* (non-lowercased) string so
    // path casing is preserved.
    let mut words: Vec<&str> = rest.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    words.remove(0); // the verb itself
    if words.first().copied() == Some("exactly") {
        words.remove(0);
    }
    if !matches!(words.first().copied(), Some("one") | Some("single")) {
        return None;
    }
    words.remove(0);
    if words.first().copied() != Some("file") {
        return None;
    }
    words.remove(0);
    let candidate = words.first()?;
    let candidate = candidate.trim_matches(|c: char| "`'\".,;:".contains(c));
    if candidate.is_empty() || !candidate.contains('.') && !candidate.contains('/') {
        return None;
    }

    // Re-locate this token in the original-cased string to preserve case.
    let idx = task.to_lowercase().find(candidate)?;
    Some(task[idx..idx + candidate.len()].to_owned())
}
