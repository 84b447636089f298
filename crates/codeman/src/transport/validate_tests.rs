// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    plain = { "/home/dev/project", true },
    with_dot = { "/srv/agents/repo.git", true },
    with_space = { "/home/dev/my project", true },
    relative = { "projects/repo", false },
    empty = { "", false },
    semicolon = { "/tmp/x;rm -rf", false },
    backtick = { "/tmp/`id`", false },
    dollar = { "/tmp/$HOME", false },
    traversal = { "/tmp/../etc", false },
)]
fn working_dir_validation(raw: &str, ok: bool) {
    assert_eq!(working_dir(raw, None).is_ok(), ok, "{raw}");
}

#[test]
fn working_dir_override_pattern_wins() -> anyhow::Result<()> {
    let narrow = regex::Regex::new(r"^/srv/agents/[a-z-]+$")?;
    assert!(working_dir("/srv/agents/alpha", Some(&narrow)).is_ok());
    assert!(working_dir("/home/dev/project", Some(&narrow)).is_err());
    Ok(())
}

#[test]
fn single_line_rejects_newlines() {
    assert!(single_line("continue").is_ok());
    assert!(single_line("line one\nline two").is_err());
    assert!(single_line("trailing\r").is_err());
    assert!(single_line("").is_err());
}

#[test]
fn env_overrides_enforce_prefix_allowlist() {
    let mut env = std::collections::HashMap::new();
    env.insert("CODEMAN_DEBUG".to_owned(), "1".to_owned());
    env.insert("ANTHROPIC_MODEL".to_owned(), "claude".to_owned());
    let Ok(pairs) = env_overrides(&env) else { unreachable!("allowed prefixes rejected") };
    assert_eq!(pairs.len(), 2);

    env.insert("PATH".to_owned(), "/evil".to_owned());
    assert!(env_overrides(&env).is_err());
}

#[test]
fn env_override_names_are_strict() {
    let mut env = std::collections::HashMap::new();
    env.insert("CODEMAN_BAD-NAME".to_owned(), "x".to_owned());
    assert!(env_overrides(&env).is_err());
}

#[test]
fn range_checks() {
    assert!(in_range("cols", 200, 10, 500).is_ok());
    assert!(in_range("cols", 9, 10, 500).is_err());
    assert!(in_range("cols", 501, 10, 500).is_err());
}
