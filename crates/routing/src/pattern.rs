//! Route patterns matched against routing keys.
//!
//! Three forms:
//! - exact: `communication.received`
//! - dotted glob: `*` matches exactly one segment, a trailing `**` matches
//!   whatever remains (including nothing): `chat.*`, `alerts.**`
//! - regex: `re:^jobs\.(nightly|hourly)$`

use conduit_core::RoutingError;
use regex_lite::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    One,
    Rest,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact,
    Glob(Vec<Segment>),
    Regex(Regex),
}

/// A compiled route pattern. Keeps its source text for display and for
/// duplicate detection.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    raw: String,
    matcher: Matcher,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self, RoutingError> {
        let invalid = |reason: &str| RoutingError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if pattern.trim().is_empty() {
            return Err(invalid("pattern is empty"));
        }

        if let Some(expr) = pattern.strip_prefix("re:") {
            let regex = Regex::new(expr).map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self {
                raw: pattern.to_string(),
                matcher: Matcher::Regex(regex),
            });
        }

        if !pattern.contains('*') {
            return Ok(Self {
                raw: pattern.to_string(),
                matcher: Matcher::Exact,
            });
        }

        let parts: Vec<&str> = pattern.split('.').collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "*" => Segment::One,
                "**" if i + 1 == parts.len() => Segment::Rest,
                "**" => return Err(invalid("'**' is only allowed as the last segment")),
                p if p.contains('*') => {
                    return Err(invalid("'*' must be a whole segment"));
                }
                "" => return Err(invalid("empty segment")),
                p => Segment::Literal(p.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            matcher: Matcher::Glob(segments),
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        match &self.matcher {
            Matcher::Exact => self.raw == key,
            Matcher::Regex(re) => re.is_match(key),
            Matcher::Glob(segments) => {
                let mut parts = key.split('.');
                for segment in segments {
                    match segment {
                        Segment::Rest => return true,
                        Segment::One => {
                            if parts.next().is_none_or(str::is_empty) {
                                return false;
                            }
                        }
                        Segment::Literal(lit) => {
                            if parts.next() != Some(lit.as_str()) {
                                return false;
                            }
                        }
                    }
                }
                parts.next().is_none()
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern() {
        let p = RoutePattern::parse("communication.received").unwrap();
        assert!(p.matches("communication.received"));
        assert!(!p.matches("communication.sent"));
        assert!(!p.matches("communication.received.extra"));
    }

    #[test]
    fn single_segment_wildcard() {
        let p = RoutePattern::parse("chat.*").unwrap();
        assert!(p.matches("chat.telegram"));
        assert!(!p.matches("chat"));
        assert!(!p.matches("chat.telegram.group"));
        assert!(!p.matches("mail.telegram"));

        let mid = RoutePattern::parse("chat.*.inbound").unwrap();
        assert!(mid.matches("chat.web.inbound"));
        assert!(!mid.matches("chat.web.outbound"));
    }

    #[test]
    fn trailing_rest_wildcard() {
        let p = RoutePattern::parse("alerts.**").unwrap();
        assert!(p.matches("alerts"));
        assert!(p.matches("alerts.disk"));
        assert!(p.matches("alerts.disk.full"));
        assert!(!p.matches("alert.disk"));

        let all = RoutePattern::parse("**").unwrap();
        assert!(all.matches("anything.at.all"));
    }

    #[test]
    fn regex_pattern() {
        let p = RoutePattern::parse(r"re:^jobs\.(nightly|hourly)$").unwrap();
        assert!(p.matches("jobs.nightly"));
        assert!(!p.matches("jobs.weekly"));
    }

    #[test]
    fn invalid_patterns_rejected() {
        for bad in ["", "a.**.b", "ch*t", "a..*", "re:("] {
            let err = RoutePattern::parse(bad).unwrap_err();
            assert!(
                matches!(err, RoutingError::InvalidPattern { .. }),
                "expected InvalidPattern for {bad:?}"
            );
        }
    }
}
