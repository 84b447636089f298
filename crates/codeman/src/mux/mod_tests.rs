// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn session_name_uses_first_eight_chars() {
    assert_eq!(session_name("0123456789abcdef"), "codeman-01234567");
    assert_eq!(session_name("short"), "codeman-short");
}

#[yare::parameterized(
    owned = { "codeman-01234567", true },
    owned_short = { "codeman-x", true },
    bare_prefix = { "codeman-", false },
    foreign = { "workbench-1", false },
    empty = { "", false },
)]
fn ownership_matching(name: &str, expected: bool) {
    assert_eq!(is_owned_name(name), expected);
}

#[test]
fn screen_backend_is_recognized_but_unimplemented() {
    let result = detect("screen");
    assert!(matches!(result, Err(MuxError::Unimplemented("screen"))));
}

#[test]
fn session_gone_classification() {
    assert!(MuxError::SessionGone("codeman-x".into()).is_session_gone());
    assert!(!MuxError::Unavailable.is_session_gone());
}
