//! Glob-like URL pattern matching for page targeting rules.
//!
//! A pattern such as `https://*.example.com/projects/:id?tab=*#top` is split
//! into scheme, domain, path, query, and fragment. Each component compiles
//! independently:
//!
//! - `*` is a wildcard scoped to the component (e.g. it never crosses a `/`
//!   in the domain).
//! - `:name` matches exactly one non-empty segment.
//! - Every other character is matched literally.
//!
//! Query parameters declared by a pattern are requirements: each one must be
//! present in the candidate URL's query string, in any order and position.
//! A bare key (`?debug`) only requires presence, `key=*` requires a
//! non-empty value, and any other value is matched with the same wildcard
//! rules.
//!
//! A URL matches a rule when it satisfies at least one include pattern and
//! none of the exclude patterns. An empty include list never matches.

use std::sync::LazyLock;

use regex::Regex;

/// Splits a URL or pattern into `(scheme, domain, path, query, fragment)`.
static URL_PARTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(([a-z\d]+)://)?([^/?#]+)?(/[^?#]*)?(\?([^#]*))?(#.*)?$")
        .expect("valid regex")
});

/// Named segment marker inside a pattern component (`:id`, `:project-slug`).
fn is_param_char(c: char) -> bool {
    c.is_ascii_lowercase() || c == '-' || c == '_'
}

/// Regex fragments used for one URL component.
struct ComponentRules {
    wildcard: &'static str,
    param: Option<&'static str>,
}

const DOMAIN_RULES: ComponentRules = ComponentRules {
    wildcard: "[^/]*",
    param: Some("[^/.]+"),
};
const PATH_RULES: ComponentRules = ComponentRules {
    wildcard: "[^?#]*",
    param: Some("[^/?#]+"),
};
const FRAGMENT_RULES: ComponentRules = ComponentRules {
    wildcard: ".*",
    param: Some("[^/]+"),
};
const QUERY_KEY_RULES: ComponentRules = ComponentRules {
    wildcard: "[^=&#]*",
    param: None,
};
const QUERY_VALUE_RULES: ComponentRules = ComponentRules {
    wildcard: "[^&#]*",
    param: None,
};

/// Compile one component, escaping every literal character.
fn compile_component(input: &str, rules: &ComponentRules) -> String {
    let mut out = String::with_capacity(input.len() * 2);
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(rules.wildcard),
            ':' if rules.param.is_some() && chars.peek().copied().is_some_and(is_param_char) => {
                while chars.peek().copied().is_some_and(is_param_char) {
                    chars.next();
                }
                if let Some(param) = rules.param {
                    out.push_str(param);
                }
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Query requirements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum QueryValueRule {
    /// Bare key: presence is enough.
    Present,
    /// `key=*`: any non-empty value.
    NonEmpty,
    /// `key=value` with optional wildcards.
    Matches(Regex),
}

#[derive(Debug, Clone)]
struct QueryRequirement {
    key: Regex,
    value: QueryValueRule,
}

impl QueryRequirement {
    fn is_satisfied_by(&self, params: &[(&str, Option<&str>)]) -> bool {
        params.iter().any(|(key, value)| {
            if !self.key.is_match(key) {
                return false;
            }
            match &self.value {
                QueryValueRule::Present => true,
                QueryValueRule::NonEmpty => value.is_some_and(|v| !v.is_empty()),
                QueryValueRule::Matches(re) => re.is_match(value.unwrap_or("")),
            }
        })
    }
}

fn split_query(query: &str) -> Vec<(&str, Option<&str>)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (pair, None),
        })
        .collect()
}

fn anchored(fragment: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^{fragment}$"))
}

// ---------------------------------------------------------------------------
// UrlPattern
// ---------------------------------------------------------------------------

/// A compiled URL pattern.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    source: String,
    base: Regex,
    query: Vec<QueryRequirement>,
}

impl UrlPattern {
    /// Compile a pattern string.
    ///
    /// Blank patterns and patterns that cannot be decomposed or compiled
    /// return `None`; the invalid ones are logged.
    pub fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return None;
        }

        let Some(parts) = URL_PARTS_RE.captures(pattern) else {
            tracing::warn!(pattern, "Invalid URL pattern");
            return None;
        };
        let part = |idx: usize| parts.get(idx).map(|m| m.as_str()).filter(|s| !s.is_empty());

        let scheme = part(2).map_or_else(|| r"[a-z\d]+".to_string(), regex::escape);
        let domain = part(3).map_or_else(|| "[^/]*".to_string(), |d| compile_component(d, &DOMAIN_RULES));
        let path = part(4).map_or_else(|| "/[^?#]*".to_string(), |p| compile_component(p, &PATH_RULES));
        let fragment = part(7).map_or_else(
            || "(#.*)?".to_string(),
            |f| compile_component(f, &FRAGMENT_RULES),
        );

        let base_source = format!(r"{scheme}://{domain}(:\d+)?{path}(\?[^#]*)?{fragment}");
        let base = match anchored(&base_source) {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Failed to compile URL pattern");
                return None;
            }
        };

        let mut query = Vec::new();
        for (key, value) in split_query(part(6).unwrap_or("")) {
            let key_re = match anchored(&compile_component(key, &QUERY_KEY_RULES)) {
                Ok(re) => re,
                Err(e) => {
                    tracing::warn!(pattern, error = %e, "Failed to compile URL pattern query key");
                    return None;
                }
            };
            let value_rule = match value {
                None | Some("") => QueryValueRule::Present,
                Some("*") => QueryValueRule::NonEmpty,
                Some(v) => match anchored(&compile_component(v, &QUERY_VALUE_RULES)) {
                    Ok(re) => QueryValueRule::Matches(re),
                    Err(e) => {
                        tracing::warn!(pattern, error = %e, "Failed to compile URL pattern query value");
                        return None;
                    }
                },
            };
            query.push(QueryRequirement {
                key: key_re,
                value: value_rule,
            });
        }

        Some(Self {
            source: pattern.to_string(),
            base,
            query,
        })
    }

    /// The pattern string this was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Test a concrete URL against this pattern.
    pub fn is_match(&self, url: &str) -> bool {
        if !self.base.is_match(url) {
            return false;
        }
        if self.query.is_empty() {
            return true;
        }
        let query = URL_PARTS_RE
            .captures(url)
            .and_then(|caps| caps.get(6))
            .map(|m| m.as_str())
            .unwrap_or("");
        let params = split_query(query);
        self.query.iter().all(|req| req.is_satisfied_by(&params))
    }
}

/// Returns `true` when `url` matches at least one include pattern and none
/// of the exclude patterns. Invalid patterns never match.
pub fn is_match_url_pattern<I, E>(url: &str, includes: I, excludes: E) -> bool
where
    I: IntoIterator,
    I::Item: AsRef<str>,
    E: IntoIterator,
    E::Item: AsRef<str>,
{
    let matches = |pattern: &str| UrlPattern::parse(pattern).is_some_and(|p| p.is_match(url));

    let included = includes.into_iter().any(|p| matches(p.as_ref()));
    included && !excludes.into_iter().any(|p| matches(p.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn include_and_exclude_precedence() {
        let includes = ["https://*.example.com/*"];
        let excludes = ["https://admin.example.com/*"];
        assert!(!is_match_url_pattern("https://admin.example.com/x", includes, excludes));
        assert!(is_match_url_pattern("https://app.example.com/x", includes, excludes));
    }

    #[test]
    fn empty_includes_never_match() {
        assert!(!is_match_url_pattern("https://example.com/", NONE, NONE));
        assert!(!is_match_url_pattern(
            "https://example.com/",
            NONE,
            ["https://other.com/*"]
        ));
    }

    #[test]
    fn domain_wildcard_does_not_cross_path() {
        let p = UrlPattern::parse("https://*.example.com/").expect("valid");
        assert!(p.is_match("https://a.example.com/"));
        assert!(!p.is_match("https://evil.com/.example.com/"));
    }

    #[test]
    fn missing_scheme_matches_any_scheme() {
        let p = UrlPattern::parse("example.com/pricing").expect("valid");
        assert!(p.is_match("https://example.com/pricing"));
        assert!(p.is_match("http://example.com/pricing"));
        assert!(!p.is_match("https://example.com/pricing/extra"));
    }

    #[test]
    fn path_only_pattern_matches_any_domain_and_port() {
        let p = UrlPattern::parse("/dashboard/*").expect("valid");
        assert!(p.is_match("https://app.example.com/dashboard/home"));
        assert!(p.is_match("http://localhost:3000/dashboard/"));
        assert!(!p.is_match("https://app.example.com/settings"));
    }

    #[test]
    fn named_segment_matches_one_segment() {
        let p = UrlPattern::parse("https://example.com/projects/:id/settings").expect("valid");
        assert!(p.is_match("https://example.com/projects/42/settings"));
        assert!(!p.is_match("https://example.com/projects/42/x/settings"));
        assert!(!p.is_match("https://example.com/projects//settings"));
    }

    #[test]
    fn literal_metacharacters_are_escaped() {
        let p = UrlPattern::parse("https://example.com/a+b(c)").expect("valid");
        assert!(p.is_match("https://example.com/a+b(c)"));
        assert!(!p.is_match("https://example.com/aab(c)"));
    }

    #[test]
    fn query_requirements_any_order() {
        let p = UrlPattern::parse("https://example.com/*?tab=billing&mode=edit").expect("valid");
        assert!(p.is_match("https://example.com/settings?mode=edit&x=1&tab=billing"));
        assert!(!p.is_match("https://example.com/settings?tab=billing"));
        assert!(!p.is_match("https://example.com/settings"));
    }

    #[test]
    fn bare_query_key_requires_presence_only() {
        let p = UrlPattern::parse("https://example.com/*?debug").expect("valid");
        assert!(p.is_match("https://example.com/?debug"));
        assert!(p.is_match("https://example.com/?debug=1"));
        assert!(!p.is_match("https://example.com/?other=1"));
    }

    #[test]
    fn wildcard_query_value_requires_non_empty() {
        let p = UrlPattern::parse("https://example.com/*?ref=*").expect("valid");
        assert!(p.is_match("https://example.com/?ref=newsletter"));
        assert!(!p.is_match("https://example.com/?ref="));
        assert!(!p.is_match("https://example.com/?ref"));
    }

    #[test]
    fn fragment_patterns() {
        let p = UrlPattern::parse("https://example.com/app#/users/*").expect("valid");
        assert!(p.is_match("https://example.com/app#/users/7"));
        assert!(!p.is_match("https://example.com/app#/teams/7"));

        let any = UrlPattern::parse("https://example.com/app").expect("valid");
        assert!(any.is_match("https://example.com/app#anything"));
    }

    #[test]
    fn blank_patterns_are_skipped() {
        assert!(UrlPattern::parse("   ").is_none());
        assert!(!is_match_url_pattern("https://example.com/", [""], NONE));
    }
}
