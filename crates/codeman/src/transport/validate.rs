// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request validation. Everything here rejects before the supervision layer
//! is reached.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

/// Environment override prefixes accepted on session creation.
pub const ALLOWED_ENV_PREFIXES: &[&str] = &["CODEMAN_", "ANTHROPIC_", "CLAUDE_"];

/// Shell metacharacters never allowed in a working directory.
const SHELL_METACHARACTERS: &[char] =
    &[';', '|', '&', '$', '`', '<', '>', '(', ')', '{', '}', '*', '?', '~', '"', '\'', '\\', '!'];

static WORKDIR_ALLOWLIST: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^/[A-Za-z0-9._/ @-]+$").ok());

/// Validate a working directory: absolute, shell-safe, allowlisted.
pub fn working_dir(raw: &str, override_pattern: Option<&Regex>) -> Result<PathBuf, String> {
    if raw.is_empty() {
        return Err("working directory is required".to_owned());
    }
    if !raw.starts_with('/') {
        return Err("working directory must be absolute".to_owned());
    }
    if raw.contains("..") {
        return Err("working directory must not contain '..'".to_owned());
    }
    if let Some(bad) = raw.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(format!("working directory contains forbidden character {bad:?}"));
    }
    let pattern = override_pattern.or(WORKDIR_ALLOWLIST.as_ref());
    if let Some(pattern) = pattern {
        if !pattern.is_match(raw) {
            return Err("working directory does not match the allowlist".to_owned());
        }
    }
    Ok(PathBuf::from(raw))
}

/// Programmatic input is single-line only; multi-line is rejected, never
/// split.
pub fn single_line(text: &str) -> Result<(), String> {
    if text.is_empty() {
        return Err("input is empty".to_owned());
    }
    if text.contains('\n') || text.contains('\r') {
        return Err("input must be a single line".to_owned());
    }
    Ok(())
}

/// Environment overrides are allowed only for a fixed prefix set.
pub fn env_overrides(env: &HashMap<String, String>) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::with_capacity(env.len());
    for (key, value) in env {
        if !ALLOWED_ENV_PREFIXES.iter().any(|p| key.starts_with(p)) {
            return Err(format!("environment override {key:?} is not in the allowed prefix set"));
        }
        if key.chars().any(|c| !(c.is_ascii_alphanumeric() || c == '_')) {
            return Err(format!("environment override {key:?} has an invalid name"));
        }
        if value.contains('\0') {
            return Err(format!("environment override {key:?} has an invalid value"));
        }
        out.push((key.clone(), value.clone()));
    }
    out.sort();
    Ok(out)
}

/// Range-check a numeric field.
pub fn in_range(name: &str, value: u64, min: u64, max: u64) -> Result<u64, String> {
    if value < min || value > max {
        return Err(format!("{name} must be between {min} and {max}"));
    }
    Ok(value)
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
