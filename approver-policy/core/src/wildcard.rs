//! `*`-wildcard matching as used by policy allow-lists and selectors.
//!
//! A `*` matches any run of characters, including an empty one; every other
//! character matches itself.

use regex::Regex;

pub fn matches(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }
    if pattern == "*" {
        return true;
    }

    let expr = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    match Regex::new(&format!("^{expr}$")) {
        Ok(re) => re.is_match(value),
        Err(error) => {
            tracing::warn!(%error, %pattern, "Invalid wildcard pattern");
            false
        }
    }
}

/// Returns true if any pattern matches the value.
pub fn matches_any<'p>(patterns: impl IntoIterator<Item = &'p String>, value: &str) -> bool {
    patterns.into_iter().any(|p| matches(p, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("example.com", "example.com", true)]
    #[case("example.com", "www.example.com", false)]
    #[case("*.example.com", "www.example.com", true)]
    #[case("*.example.com", "example.com", false)]
    #[case("*", "", true)]
    #[case("app-*-prod", "app-web-prod", true)]
    #[case("app-*-prod", "app-web-dev", false)]
    #[case("a.b*", "aXb", false)]
    #[case("spiffe://cluster.local/ns/*/sa/*", "spiffe://cluster.local/ns/a/sa/b", true)]
    fn wildcard(#[case] pattern: &str, #[case] value: &str, #[case] expected: bool) {
        assert_eq!(matches(pattern, value), expected, "{pattern} ~ {value}");
    }
}
