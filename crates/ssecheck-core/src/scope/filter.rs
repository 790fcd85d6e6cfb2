//! Name-based test selection.

use std::fmt;

use regex::Regex;

use super::TestId;

/// Run-wide predicate deciding whether a test runs.
pub type Filter = Box<dyn Fn(&TestId) -> bool + Send + Sync>;

/// A list of patterns, any of which may match.
#[derive(Debug, Clone, Default)]
pub struct RegexList {
    patterns: Vec<Regex>,
}

impl RegexList {
    pub fn add(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.patterns.push(Regex::new(pattern)?);
        Ok(())
    }

    pub fn is_defined(&self) -> bool {
        !self.patterns.is_empty()
    }

    pub fn any_match(&self, s: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(s))
    }
}

impl fmt::Display for RegexList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quoted: Vec<String> = self
            .patterns
            .iter()
            .map(|p| format!("\"{}\"", p.as_str()))
            .collect();
        f.write_str(&quoted.join(" or "))
    }
}

/// Include/exclude patterns matched against the slash-joined test id.
#[derive(Debug, Clone, Default)]
pub struct RegexFilters {
    pub must_match: RegexList,
    pub must_not_match: RegexList,
}

impl RegexFilters {
    pub fn new(run: &[String], skip: &[String]) -> Result<Self, regex::Error> {
        let mut filters = Self::default();
        for pattern in run {
            filters.must_match.add(pattern)?;
        }
        for pattern in skip {
            filters.must_not_match.add(pattern)?;
        }
        Ok(filters)
    }

    pub fn is_defined(&self) -> bool {
        self.must_match.is_defined() || self.must_not_match.is_defined()
    }

    pub fn matches(&self, id: &TestId) -> bool {
        let name = id.to_string();
        (!self.must_match.is_defined() || self.must_match.any_match(&name))
            && !self.must_not_match.any_match(&name)
    }

    /// Human-readable description of what will be skipped, if anything.
    pub fn describe(&self) -> Option<String> {
        if !self.is_defined() {
            return None;
        }
        let mut lines =
            vec!["Some tests will be skipped based on the filter criteria for this test run:".to_string()];
        if self.must_match.is_defined() {
            lines.push(format!("  skip any not matching {}", self.must_match));
        }
        if self.must_not_match.is_defined() {
            lines.push(format!("  skip any matching {}", self.must_not_match));
        }
        Some(lines.join("\n"))
    }

    pub fn into_filter(self) -> Filter {
        Box::new(move |id| self.matches(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> TestId {
        name.split('/').fold(TestId::root(), |id, part| id.plus(part))
    }

    #[test]
    fn test_no_patterns_matches_everything() {
        let filters = RegexFilters::default();
        assert!(filters.matches(&id("anything/at all")));
        assert!(filters.describe().is_none());
    }

    #[test]
    fn test_run_and_skip_patterns() {
        let filters = RegexFilters::new(
            &["^comments".to_string(), "linefeeds".to_string()],
            &["two comments".to_string()],
        )
        .unwrap();

        assert!(filters.matches(&id("comments/single comment")));
        assert!(filters.matches(&id("linefeeds/CR")));
        assert!(!filters.matches(&id("comments/two comments in a row")));
        assert!(!filters.matches(&id("reconnection/basic")));

        let description = filters.describe().unwrap();
        assert!(description.contains("skip any not matching \"^comments\" or \"linefeeds\""));
        assert!(description.contains("skip any matching \"two comments\""));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(RegexFilters::new(&["(".to_string()], &[]).is_err());
    }
}
