//! Flags derived from a deck summary.

use std::sync::OnceLock;

use regex::Regex;

/// Vocabulary marking a technology company. Matched as lowercase substrings,
/// so short terms like "ai" also hit inside longer words.
pub const TECH_KEYWORDS: [&str; 12] = [
    "saas",
    "software",
    "platform",
    "tech",
    "technology",
    "open source",
    "api",
    "cloud",
    "digital",
    "ai",
    "machine learning",
    "blockchain",
];

fn repository_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https?://(?:www\.)?github\.com/[\w-]+(?:/[\w-]+)?").expect("valid regex")
    })
}

/// Case-insensitive substring match against [`TECH_KEYWORDS`].
pub fn is_technology_company(summary_text: &str) -> bool {
    let lower = summary_text.to_lowercase();
    TECH_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// First repository-hosting URL in the text.
pub fn find_repository_url(summary_text: &str) -> Option<String> {
    repository_url_regex()
        .find(summary_text)
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_match_case_insensitively() {
        assert!(is_technology_company("A B2B SaaS for freight brokers"));
        assert!(is_technology_company("Built on the CLOUD"));
        assert!(!is_technology_company("Organic bakery in Lyon"));
    }

    #[test]
    fn first_repository_url_wins() {
        let text = r#"{"site": "https://github.com/acme/engine and http://www.github.com/acme/docs"}"#;
        assert_eq!(
            find_repository_url(text).as_deref(),
            Some("https://github.com/acme/engine")
        );
    }

    #[test]
    fn organization_url_without_repo() {
        assert_eq!(
            find_repository_url("see https://github.com/acme-labs.").as_deref(),
            Some("https://github.com/acme-labs")
        );
        assert_eq!(find_repository_url("https://gitlab.com/acme/engine"), None);
    }
}
