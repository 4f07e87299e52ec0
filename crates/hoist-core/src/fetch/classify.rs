//! Ordered pattern tables that classify source-control failures.

use crate::exec::CommandError;

/// How a failed fetch should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Worth retrying as-is (network hiccups, server errors)
    Transient,
    /// Retry after running the repository's recovery step
    NeedsRecovery,
    /// The requested branch does not exist upstream
    BranchNotFound,
    /// Anything unrecognized; surfaced immediately
    Permanent,
}

/// How a pattern's text is matched against command output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    /// Text appears anywhere in the output
    Contains,
    /// Text appears anywhere in the output, ignoring ASCII case
    ContainsIgnoreCase,
    /// Some output line starts with the text, ignoring ASCII case
    StartsWithIgnoreCase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePattern {
    pub rule: MatchRule,
    pub text: &'static str,
    pub kind: FailureKind,
}

impl FailurePattern {
    pub const fn contains(text: &'static str, kind: FailureKind) -> Self {
        Self {
            rule: MatchRule::Contains,
            text,
            kind,
        }
    }

    pub const fn contains_ignore_case(text: &'static str, kind: FailureKind) -> Self {
        Self {
            rule: MatchRule::ContainsIgnoreCase,
            text,
            kind,
        }
    }

    pub const fn starts_with(text: &'static str, kind: FailureKind) -> Self {
        Self {
            rule: MatchRule::StartsWithIgnoreCase,
            text,
            kind,
        }
    }

    pub fn matches(&self, output: &str) -> bool {
        match self.rule {
            MatchRule::Contains => output.contains(self.text),
            MatchRule::ContainsIgnoreCase => output
                .to_ascii_lowercase()
                .contains(&self.text.to_ascii_lowercase()),
            MatchRule::StartsWithIgnoreCase => output
                .lines()
                .any(|line| starts_with_ignore_case(line.trim_start(), self.text)),
        }
    }
}

fn starts_with_ignore_case(line: &str, prefix: &str) -> bool {
    line.as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

/// Failure table for git fetches. First match wins.
pub const GIT_PATTERNS: &[FailurePattern] = &[
    FailurePattern::starts_with("fatal: Couldn't find remote ref", FailureKind::BranchNotFound),
    FailurePattern::contains("Unknown SSL protocol error in connection", FailureKind::Transient),
    FailurePattern::contains(
        "The requested URL returned error: 403 while accessing",
        FailureKind::Transient,
    ),
    FailurePattern::contains("fatal: HTTP request failed", FailureKind::Transient),
    FailurePattern::contains("fatal: The remote end hung up unexpectedly", FailureKind::Transient),
    FailurePattern::contains("index.lock': File exists", FailureKind::NeedsRecovery),
];

/// Failure table for Mercurial pulls.
pub const HG_PATTERNS: &[FailurePattern] = &[
    FailurePattern::starts_with("abort: unknown branch", FailureKind::BranchNotFound),
    FailurePattern::contains_ignore_case(
        "abort: abandoned transaction found",
        FailureKind::NeedsRecovery,
    ),
];

/// Maps a failed command to a [`FailureKind`] using an ordered table.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    patterns: Vec<FailurePattern>,
}

impl FailureClassifier {
    pub fn new(patterns: impl Into<Vec<FailurePattern>>) -> Self {
        Self {
            patterns: patterns.into(),
        }
    }

    pub fn git() -> Self {
        Self::new(GIT_PATTERNS)
    }

    pub fn mercurial() -> Self {
        Self::new(HG_PATTERNS)
    }

    pub fn patterns(&self) -> &[FailurePattern] {
        &self.patterns
    }

    pub fn classify(&self, error: &CommandError) -> FailureKind {
        self.classify_output(error.message())
    }

    pub fn classify_output(&self, output: &str) -> FailureKind {
        self.patterns
            .iter()
            .find(|pattern| pattern.matches(output))
            .map(|pattern| pattern.kind)
            .unwrap_or(FailureKind::Permanent)
    }
}
