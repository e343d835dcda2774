//! Correlation-key extraction.
//!
//! Inputs are named by a disciplined process; generated artifacts are named
//! by the generator, which appends effect names, generic suffixes, and
//! generation indices in inconsistent spellings. These functions reduce both
//! naming schemes to a shared join key.

/// Generic suffixes generators append to artifact stems. Checked after
/// normalization, so underscore spelling is enough.
const GENERATED_SUFFIXES: &[&str] = &["_generated", "_output", "_result", "_effect"];

/// Normalize a filename stem into a correlation key: lowercase, spaces to
/// underscores, anything outside `[a-z0-9_-]` dropped, leading/trailing
/// underscores trimmed.
///
/// Total (never fails) and idempotent: `normalize(normalize(s)) == normalize(s)`.
pub fn normalize(stem: &str) -> String {
    let mapped: String = stem
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '-')
        .collect();
    mapped.trim_matches('_').to_string()
}

/// Key for an input file: plain normalization of its stem.
pub fn input_key(stem: &str) -> String {
    normalize(stem)
}

/// Key for a metadata record file. Metadata names follow the single fixed
/// convention `{input_stem}_metadata.json`, so this only strips that literal
/// suffix before normalizing.
pub fn metadata_key(stem: &str) -> String {
    let lower = stem.to_lowercase();
    let trimmed = lower.strip_suffix("_metadata").unwrap_or(&lower);
    normalize(trimmed)
}

/// Key for a generated artifact: strips every case-insensitive occurrence of
/// each known identifier (effect or reference name, in space, dash, and
/// underscore spellings), then normalizes and peels generic suffixes and a
/// trailing generation index off the end.
pub fn generated_key(stem: &str, identifiers: &[&str]) -> String {
    let mut lower = stem.to_lowercase();
    for id in identifiers {
        for variant in identifier_variants(id) {
            if !variant.is_empty() {
                lower = lower.replace(&variant, "");
            }
        }
    }

    let mut key = normalize(&lower);
    loop {
        let before = key.len();
        key = key.trim_matches('_').to_string();
        for suffix in GENERATED_SUFFIXES {
            if let Some(stripped) = key.strip_suffix(suffix) {
                key = stripped.to_string();
            }
        }
        key = strip_generation_index(&key);
        if key.len() == before {
            break;
        }
    }
    key
}

/// Prefix fallback: does this artifact key start with `{input_key}_`?
pub fn matches_prefix(artifact_key: &str, input_key: &str) -> bool {
    !input_key.is_empty()
        && artifact_key.len() > input_key.len()
        && artifact_key.starts_with(input_key)
        && artifact_key.as_bytes()[input_key.len()] == b'_'
}

/// Spellings of an identifier with spaces, dashes, and underscores used
/// interchangeably as the separator.
fn identifier_variants(identifier: &str) -> Vec<String> {
    let lower = identifier.to_lowercase();
    ["_", "-", " "]
        .iter()
        .map(|sep| {
            lower
                .chars()
                .map(|c| {
                    if c == ' ' || c == '-' || c == '_' {
                        sep.chars().next().unwrap_or('_')
                    } else {
                        c
                    }
                })
                .collect()
        })
        .collect()
}

/// Remove a trailing `_<digits>` generation index of one or two digits.
/// Longer digit groups stay: stems like `img_2024` are real names.
fn strip_generation_index(key: &str) -> String {
    if let Some(pos) = key.rfind('_') {
        let tail = &key[pos + 1..];
        if !tail.is_empty() && tail.len() <= 2 && tail.chars().all(|c| c.is_ascii_digit()) {
            return key[..pos].to_string();
        }
    }
    key.to_string()
}
