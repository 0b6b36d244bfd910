// src/indicators/tokenize.rs

//! Identifier extraction from indicator expressions.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static STRING_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).expect("valid string literal regex")
});

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_.]+").expect("valid word regex"));

/// Language keywords and constants that are never identifiers.
pub const KEYWORDS: &[&str] = &[
    "TRUE",
    "FALSE",
    "T",
    "F",
    "NA",
    "NA_integer_",
    "NA_real_",
    "NA_character_",
    "NULL",
    "Inf",
    "NaN",
    "if",
    "else",
    "for",
    "while",
    "repeat",
    "break",
    "next",
    "function",
    "in",
];

/// Functions indicator expressions are allowed to call.
pub const ALLOWED_FUNCTIONS: &[&str] = &[
    "abs",
    "as.integer",
    "as.logical",
    "as.numeric",
    "c",
    "ceiling",
    "exp",
    "floor",
    "grepl",
    "ifelse",
    "is.na",
    "log",
    "max",
    "mean",
    "min",
    "nchar",
    "pmax",
    "pmin",
    "round",
    "sqrt",
    "substr",
    "sum",
    "tolower",
    "toupper",
];

/// Candidate identifiers referenced by `expr`, sorted and de-duplicated.
///
/// String literals are blanked first so quoted field values are never taken
/// for identifiers. Numbers, keywords and allowed function names are dropped.
pub fn identifiers(expr: &str) -> BTreeSet<String> {
    let stripped = STRING_LITERAL.replace_all(expr, " ");

    WORD.find_iter(&stripped)
        .map(|m| m.as_str())
        .filter(|tok| is_identifier(tok))
        .filter(|tok| !KEYWORDS.contains(tok) && !ALLOWED_FUNCTIONS.contains(tok))
        .map(str::to_string)
        .collect()
}

fn is_identifier(tok: &str) -> bool {
    let mut chars = tok.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => true,
        // `.5` is a number, `.x` is a name.
        Some('.') => matches!(chars.next(), Some(c) if !c.is_ascii_digit()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(expr: &str) -> Vec<String> {
        identifiers(expr).into_iter().collect()
    }

    #[test]
    fn extracts_plain_references() {
        assert_eq!(ids("B == 1 & raw_x > 0.5"), vec!["B", "raw_x"]);
    }

    #[test]
    fn ignores_string_literal_contents() {
        assert_eq!(ids(r#"region == "North Zone""#), vec!["region"]);
        assert_eq!(ids(r#"code %in% c('a b', "x\"y")"#), vec!["code"]);
    }

    #[test]
    fn drops_keywords_numbers_and_allowed_functions() {
        assert_eq!(ids("ifelse(is.na(x), NA, 1e5 + .5)"), vec!["x"]);
        assert_eq!(ids("TRUE | FALSE"), Vec::<String>::new());
    }

    #[test]
    fn keeps_unknown_function_names() {
        assert_eq!(ids("system(x)"), vec!["system", "x"]);
    }

    #[test]
    fn dotted_names_are_identifiers() {
        assert_eq!(ids(".hidden + my.var"), vec![".hidden", "my.var"]);
    }
}
