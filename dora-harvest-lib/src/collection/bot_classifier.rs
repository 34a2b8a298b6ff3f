/// Account name fragments that identify common automation accounts.
pub const DEFAULT_BOT_PATTERNS: &[&str] = &[
    "dependabot",
    "renovate",
    "github-actions",
    "greenkeeper",
    "snyk-bot",
    "mergify",
    "pre-commit-ci",
    "codecov",
    "allcontributors",
    "imgbot",
    "semantic-release-bot",
];

/// Decides whether a pull request author is an automation account.
#[derive(Debug, Clone)]
pub struct BotClassifier {
    patterns: Vec<String>,
}

impl BotClassifier {
    /// Create a classifier matching any of `patterns` (case-insensitive containment).
    #[must_use]
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn is_bot(&self, login: &str) -> bool {
        is_bot(login, &self.patterns)
    }
}

impl Default for BotClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_BOT_PATTERNS)
    }
}

/// A login ending in `[bot]` is always a bot; otherwise any pattern contained in the lower-cased
/// login marks it as one.
#[must_use]
pub fn is_bot<S: AsRef<str>>(login: &str, patterns: &[S]) -> bool {
    if login.ends_with("[bot]") {
        return true;
    }

    let login = login.to_lowercase();
    patterns
        .iter()
        .map(|p| p.as_ref().to_lowercase())
        .any(|p| !p.is_empty() && login.contains(&p))
}
