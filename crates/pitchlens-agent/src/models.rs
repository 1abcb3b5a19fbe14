//! Records produced and consumed by the analysis workflows.
//!
//! Every field the extractor fills is optional: a deck that never mentions a
//! valuation still yields a valid [`CompanyOverview`]. Title-case aliases let
//! records written in the deck-summary vocabulary ("Company Name", "TAM")
//! deserialize as well.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Summary aspect names, in fan-out order.
pub const COMPANY_OVERVIEW: &str = "Company Overview";
pub const FOUNDER_MARKET_FIT: &str = "Founder-Market Fit";
pub const MARKET_SIZING: &str = "Market Sizing & Growth";
pub const TRACTION: &str = "Traction";

/// Fixed scorecard categories, in output order.
pub const SCORE_CATEGORIES: [&str; 3] = ["team", "market", "traction"];

/// One page of a pitch deck.
///
/// `image` is the encoded payload (a `data:` URI or URL). The remaining fields
/// are absent until the extraction stage fills them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlideRecord {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub figures: Option<Vec<String>>,
}

impl SlideRecord {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn is_extracted(&self) -> bool {
        self.text.is_some()
    }
}

/// Extracted content of one slide, tagged with its deck position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlideContent {
    pub index: usize,
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default, alias = "image")]
    pub images: Vec<String>,
    #[serde(default, alias = "figure")]
    pub figures: Vec<String>,
}

/// Extractor response for one slide image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlideExtraction {
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default, alias = "image")]
    pub images: Vec<String>,
    #[serde(default, alias = "figure")]
    pub figures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyOverview {
    #[serde(default, alias = "Company Name")]
    pub company_name: Option<String>,
    #[serde(default, alias = "What the Company Does")]
    pub what_company_does: Option<String>,
    #[serde(default, alias = "Team Size")]
    pub team_size: Option<String>,
    #[serde(default, alias = "Industry")]
    pub industry: Option<String>,
    #[serde(default, alias = "Region")]
    pub region: Option<String>,
    #[serde(default, alias = "Funding Stage")]
    pub funding_stage: Option<String>,
    #[serde(default, alias = "Ask")]
    pub ask: Option<String>,
    #[serde(default, alias = "Valuation")]
    pub valuation: Option<String>,
    #[serde(default, alias = "Previous Rounds")]
    pub previous_rounds: Option<Vec<BTreeMap<String, String>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FounderExperience {
    #[serde(default, alias = "Work Experience")]
    pub work_experience: Option<String>,
    #[serde(default, alias = "Education")]
    pub education: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FounderMarketFit {
    /// Keyed by founder name.
    #[serde(default, alias = "Relevant Experience")]
    pub relevant_experience: Option<BTreeMap<String, FounderExperience>>,
    #[serde(default, alias = "Domain Expertise")]
    pub domain_expertise: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketMetric {
    #[serde(default, alias = "TAM", alias = "SAM", alias = "SOM", alias = "Growth Rate")]
    pub value: Option<String>,
    #[serde(default, alias = "Explanation")]
    pub explanation: Option<String>,
    #[serde(default, alias = "Source")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSizingGrowth {
    #[serde(default, alias = "TAM")]
    pub tam: Option<MarketMetric>,
    #[serde(default, alias = "SAM")]
    pub sam: Option<MarketMetric>,
    #[serde(default, alias = "SOM")]
    pub som: Option<MarketMetric>,
    #[serde(default, alias = "Growth Rate")]
    pub growth_rate: Option<MarketMetric>,
    #[serde(default, alias = "Target Geographies")]
    pub target_geographies: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreRevenue {
    #[serde(default, alias = "Number of Users")]
    pub number_of_users: Option<Vec<String>>,
    #[serde(default, alias = "POC Evaluation")]
    pub poc_evaluation: Option<Vec<String>>,
    #[serde(default, alias = "Press Articles")]
    pub press_articles: Option<Vec<String>>,
    #[serde(default, alias = "User Testimonials")]
    pub user_testimonials: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Revenue {
    #[serde(default, alias = "Revenue")]
    pub revenue: Option<Vec<String>>,
    #[serde(default, alias = "Growth Rate")]
    pub growth_rate: Option<Vec<String>>,
    #[serde(default, alias = "Unit Economics")]
    pub unit_economics: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Traction {
    #[serde(default, alias = "Pre-Revenue")]
    pub pre_revenue: Option<PreRevenue>,
    #[serde(default, alias = "Revenue")]
    pub revenue: Option<Revenue>,
}

/// Aggregated deck summary, one record per aspect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeckSummary {
    #[serde(rename = "Company Overview", default)]
    pub company_overview: CompanyOverview,
    #[serde(rename = "Founder-Market Fit", default)]
    pub founder_market_fit: FounderMarketFit,
    #[serde(rename = "Market Sizing & Growth", default)]
    pub market_sizing: MarketSizingGrowth,
    #[serde(rename = "Traction", default)]
    pub traction: Traction,
}

impl DeckSummary {
    /// JSON text of the summary, as stored in the content index.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Every string value in the summary, one per line. Field names are left
    /// out so that keyword scans only see what the deck says.
    pub fn values_text(&self) -> String {
        fn collect(value: &serde_json::Value, out: &mut Vec<String>) {
            match value {
                serde_json::Value::String(s) => out.push(s.clone()),
                serde_json::Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
                serde_json::Value::Object(map) => map.values().for_each(|v| collect(v, out)),
                _ => {}
            }
        }

        let mut lines = Vec::new();
        if let Ok(value) = serde_json::to_value(self) {
            collect(&value, &mut lines);
        }
        lines.join("\n")
    }

    pub fn company_name(&self) -> Option<&str> {
        self.company_overview.company_name.as_deref()
    }
}

/// One scorecard line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub category: String,
    /// 1 to 5, absent when the summary gives too little to judge.
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub justification: String,
}

/// Raw scoring response before normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoringResponse {
    #[serde(default)]
    pub scores: Vec<RawScore>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawScore {
    pub category: String,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub justification: String,
}

impl ScoringResponse {
    /// One entry per fixed category, in category order. Out-of-range scores
    /// become absent; unknown categories are dropped.
    pub fn normalize(self) -> Vec<ScoreEntry> {
        SCORE_CATEGORIES
            .iter()
            .map(|category| {
                let raw = self
                    .scores
                    .iter()
                    .find(|s| canonical_category(&s.category) == Some(*category));
                match raw {
                    Some(raw) => ScoreEntry {
                        category: category.to_string(),
                        score: raw
                            .score
                            .filter(|s| (1..=5).contains(s))
                            .map(|s| s as u8),
                        justification: raw.justification.trim().to_string(),
                    },
                    None => ScoreEntry {
                        category: category.to_string(),
                        score: None,
                        justification: "Not assessed".into(),
                    },
                }
            })
            .collect()
    }
}

fn canonical_category(raw: &str) -> Option<&'static str> {
    let lower = raw.trim().to_lowercase();
    SCORE_CATEGORIES
        .iter()
        .copied()
        .find(|c| lower == *c || lower.starts_with(c))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectorInfo {
    pub name: String,
    #[serde(default)]
    pub citation: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSizeInfo {
    pub tam: String,
    #[serde(default)]
    pub citation: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetitorInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub citation: Vec<String>,
}

/// Final market research record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketReport {
    #[serde(alias = "Sector")]
    pub sector: SectorInfo,
    #[serde(alias = "Market Size")]
    pub market_size: MarketSizeInfo,
    #[serde(default, alias = "Competitors")]
    pub competitors: Vec<CompetitorInfo>,
}

/// One repository listed on a code-hosting page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    #[serde(alias = "Repository Name")]
    pub repository: String,
    #[serde(default, alias = "Number of stars")]
    pub stars: Option<String>,
    #[serde(default, alias = "Number of forks")]
    pub forks: Option<String>,
    #[serde(default, alias = "Link of repository")]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryList {
    #[serde(default, alias = "repo")]
    pub repositories: Vec<RepositoryRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overview_accepts_title_case_keys() {
        let overview: CompanyOverview = serde_json::from_value(json!({
            "Company Name": "Acme",
            "Industry": "SaaS",
            "Previous Rounds": [{"amount": "$1M", "details": "pre-seed"}]
        }))
        .unwrap();
        assert_eq!(overview.company_name.as_deref(), Some("Acme"));
        assert_eq!(overview.previous_rounds.unwrap()[0]["amount"], "$1M");
        assert!(overview.valuation.is_none());
    }

    #[test]
    fn summary_serializes_aspect_names() {
        let summary = DeckSummary::default();
        let value = serde_json::to_value(&summary).unwrap();
        for aspect in [COMPANY_OVERVIEW, FOUNDER_MARKET_FIT, MARKET_SIZING, TRACTION] {
            assert!(value.get(aspect).is_some(), "missing {aspect}");
        }
    }

    #[test]
    fn values_text_skips_field_names() {
        let mut summary = DeckSummary::default();
        summary.company_overview.company_name = Some("Acme Bakery".into());
        summary.founder_market_fit.domain_expertise =
            Some(BTreeMap::from([("Jo".to_string(), "Pastry".to_string())]));

        let text = summary.values_text();
        assert!(text.contains("Acme Bakery"));
        assert!(text.contains("Pastry"));
        assert!(!text.contains("domain"));
        assert!(summary.to_text().contains("domain_expertise"));
    }

    #[test]
    fn scores_normalized_to_fixed_categories() {
        let raw: ScoringResponse = serde_json::from_value(json!({
            "scores": [
                {"category": "Market Size", "score": 4, "justification": "Large TAM"},
                {"category": "Team", "score": 9, "justification": "Out of range"},
                {"category": "Vibes", "score": 5, "justification": "Ignored"}
            ]
        }))
        .unwrap();
        let card = raw.normalize();
        let categories: Vec<_> = card.iter().map(|e| e.category.as_str()).collect();
        assert_eq!(categories, SCORE_CATEGORIES);
        assert_eq!(card[0].score, None);
        assert_eq!(card[0].justification, "Out of range");
        assert_eq!(card[1].score, Some(4));
        assert_eq!(card[2].justification, "Not assessed");
    }

    #[test]
    fn repository_list_accepts_legacy_key() {
        let list: RepositoryList = serde_json::from_value(json!({
            "repo": [{"repository": "engine", "stars": "1200", "forks": null, "link": null}]
        }))
        .unwrap();
        assert_eq!(list.repositories[0].repository, "engine");
        assert_eq!(list.repositories[0].stars.as_deref(), Some("1200"));
    }
}
