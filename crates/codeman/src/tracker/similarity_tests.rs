// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    identical = { "abc", "abc", 0 },
    empty_left = { "", "abc", 3 },
    empty_right = { "abc", "", 3 },
    substitution = { "kitten", "sitten", 1 },
    classic = { "kitten", "sitting", 3 },
    unicode = { "caf\u{e9}", "cafe", 1 },
)]
fn levenshtein_cases(a: &str, b: &str, expected: usize) {
    assert_eq!(levenshtein(a, b), expected);
}

#[test]
fn levenshtein_is_symmetric() {
    assert_eq!(levenshtein("abcdef", "azced"), levenshtein("azced", "abcdef"));
}

#[test]
fn dice_identical_is_one() {
    assert!((dice("night", "night") - 1.0).abs() < f64::EPSILON);
}

#[test]
fn dice_disjoint_is_zero() {
    assert!(dice("abc", "xyz") < f64::EPSILON);
}

#[test]
fn dice_partial_overlap() {
    // "night" vs "nacht": bigrams share only "ht" -> 2*1/(4+4) = 0.25
    assert!((dice("night", "nacht") - 0.25).abs() < 1e-9);
}

#[test]
fn composite_is_symmetric() {
    let ab = composite("implement the parser", "implement the parsers");
    let ba = composite("implement the parsers", "implement the parser");
    assert!((ab - ba).abs() < f64::EPSILON);
    assert!(ab > 0.9);
}

#[test]
fn composite_identical_is_one() {
    assert!((composite("x", "x") - 1.0).abs() < f64::EPSILON);
    assert!((composite("", "") - 1.0).abs() < f64::EPSILON);
}

#[yare::parameterized(
    short = { "fix the bug", "add the docs", 0.95 },
    medium = { "implement the streaming parser core", "implement the streaming parser", 0.90 },
    long = {
        "implement the streaming parser over raw terminal bytes with chunk tolerance",
        "implement a streaming parser over raw terminal bytes with chunk tolerances",
        0.85
    },
)]
fn thresholds_are_length_tiered(a: &str, b: &str, expected: f64) {
    assert!((merge_threshold(a, b) - expected).abs() < f64::EPSILON);
}
