//! Instructions and output schemas for each extraction call.

use serde_json::{json, Value};

use pitchlens_core::types::OutputSchema;

use crate::models::{COMPANY_OVERVIEW, FOUNDER_MARKET_FIT, MARKET_SIZING, TRACTION};

pub const SLIDE_EXTRACTION: &str = "\
You parse presentation slides. From the slide image, return:
- text: every visible piece of text (titles, bullets, labels, captions), keeping list structure;
- figures: one description per chart or diagram, naming its type and what it shows;
- images: one short description per photo, logo or illustration.
Return an empty array for any element the slide does not contain.";

const SLIDE_FORMAT: &str = "\
The input is a JSON array of slides, each with `index`, `text`, `images` and `figures`.
Use only what the slides state or show explicitly. Leave anything not clearly present null or empty.";

pub const COMPANY_OVERVIEW_PROMPT: &str = "\
You are a startup analyst preparing a company overview for investors.
Report the company name, a one-sentence description of what it does, team size, industry,
region, funding stage, the ask, valuation and previous rounds (amount and details).
Do not infer values from tone, logos or implied language.";

pub const FOUNDER_MARKET_FIT_PROMPT: &str = "\
You evaluate founding teams. For each founder named in the deck, report work experience and
education under `relevant_experience`, and their domain under `domain_expertise`, keyed by name.
Do not invent titles, institutions or years.";

pub const MARKET_SIZING_PROMPT: &str = "\
You are a market research analyst. Report TAM, SAM, SOM and market growth rate, each with its
value, explanation and source, plus the target geographies as country names.
Only report explicit figures; ignore vague claims such as \"massive opportunity\".";

pub const TRACTION_PROMPT: &str = "\
You are a data-driven startup evaluator. Report pre-revenue traction (users, proofs of concept,
press, testimonials) and revenue traction (revenue, growth rate with time range, unit economics).
Only include metrics the slides show.";

pub const SCORING_PROMPT: &str = "\
You score startups strictly from the structured deck summary you are given. For each category
(team, market, traction) give a score from 1 to 5, or null when the summary is
insufficient, and a short justification citing summary details.
Rubric: 1 no evidence or unclear; 2 weak or minimal; 3 some relevant evidence;
4 strong evidence such as domain experience, a $500M+ market, or early revenue;
5 exceptional, such as prior exits, a $1B+ market, or rapid growth with strong retention.
Never rely on facts absent from the summary.";

pub const MARKET_RESEARCH_PROMPT: &str = "\
You are a startup analyst with a web_search tool. From the deck summary or company overview you are given, determine:
1. sector: the specific startup sector (e.g. SaaS, FinTech, ClimateTech, Health, Marketplace);
2. market_size: the total addressable market in USD, scoped as narrowly as the company's actual niche;
3. competitors: 3 to 5 similar companies, each with a one-line comparison.
Search before answering. Cite only links returned by the tool, one or two per item.";

pub const REPOSITORY_EXTRACTION_PROMPT: &str = "\
You extract repository facts from a code-hosting page converted to text. For each pinned or
listed repository return its name, full URL, star count and fork count. Expand abbreviated
counts (1.2k becomes 1200). Use null for any value the page does not show.";

pub const QA_ROUTE_PROMPT: &str = "\
You answer questions about analysed pitch decks. Decide how to handle the latest question:
- `answer` when the conversation already contains what is needed (put the reply in `answer`);
- `retrieve` when deck summaries must be searched (put search keywords in `query`);
- `clarify` when the question is too ambiguous to act on (put one short question in `clarification`).";

pub const QA_ANSWER_PROMPT: &str = "\
Answer the question using only the deck excerpts provided. If they do not contain the answer,
say so plainly.";

/// Instructions for one summary aspect.
pub fn aspect_instructions(aspect: &str) -> String {
    let body = match aspect {
        COMPANY_OVERVIEW => COMPANY_OVERVIEW_PROMPT,
        FOUNDER_MARKET_FIT => FOUNDER_MARKET_FIT_PROMPT,
        MARKET_SIZING => MARKET_SIZING_PROMPT,
        TRACTION => TRACTION_PROMPT,
        _ => "",
    };
    format!("{}\n{}", body, SLIDE_FORMAT)
}

fn nullable(kind: &str) -> Value {
    json!({ "type": [kind, "null"] })
}

fn string_list() -> Value {
    json!({ "type": ["array", "null"], "items": { "type": "string" } })
}

fn object(properties: Value) -> Value {
    let required: Vec<String> = properties
        .as_object()
        .map(|p| p.keys().cloned().collect())
        .unwrap_or_default();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

pub fn slide_extraction_schema() -> OutputSchema {
    let list = json!({ "type": "array", "items": { "type": "string" } });
    OutputSchema::new(
        "slide_extraction",
        object(json!({ "text": list, "images": list, "figures": list })),
    )
}

fn metric() -> Value {
    object(json!({
        "value": nullable("string"),
        "explanation": nullable("string"),
        "source": nullable("string"),
    }))
}

/// Output schema for one summary aspect.
pub fn aspect_schema(aspect: &str) -> OutputSchema {
    let (name, schema) = match aspect {
        COMPANY_OVERVIEW => (
            "company_overview",
            object(json!({
                "company_name": nullable("string"),
                "what_company_does": nullable("string"),
                "team_size": nullable("string"),
                "industry": nullable("string"),
                "region": nullable("string"),
                "funding_stage": nullable("string"),
                "ask": nullable("string"),
                "valuation": nullable("string"),
                "previous_rounds": {
                    "type": ["array", "null"],
                    "items": object(json!({
                        "amount": { "type": "string" },
                        "details": { "type": "string" },
                    })),
                },
            })),
        ),
        FOUNDER_MARKET_FIT => (
            "founder_market_fit",
            json!({
                "type": "object",
                "properties": {
                    "relevant_experience": {
                        "type": ["object", "null"],
                        "additionalProperties": object(json!({
                            "work_experience": nullable("string"),
                            "education": nullable("string"),
                        })),
                    },
                    "domain_expertise": {
                        "type": ["object", "null"],
                        "additionalProperties": { "type": "string" },
                    },
                },
            }),
        ),
        MARKET_SIZING => (
            "market_sizing",
            object(json!({
                "tam": metric(),
                "sam": metric(),
                "som": metric(),
                "growth_rate": metric(),
                "target_geographies": string_list(),
            })),
        ),
        _ => (
            "traction",
            object(json!({
                "pre_revenue": object(json!({
                    "number_of_users": string_list(),
                    "poc_evaluation": string_list(),
                    "press_articles": string_list(),
                    "user_testimonials": string_list(),
                })),
                "revenue": object(json!({
                    "revenue": string_list(),
                    "growth_rate": string_list(),
                    "unit_economics": string_list(),
                })),
            })),
        ),
    };
    OutputSchema::new(name, schema)
}

pub fn scorecard_schema() -> OutputSchema {
    OutputSchema::new(
        "scorecard",
        object(json!({
            "scores": {
                "type": "array",
                "items": object(json!({
                    "category": { "type": "string" },
                    "score": { "type": ["integer", "null"], "minimum": 1, "maximum": 5 },
                    "justification": { "type": "string" },
                })),
            },
        })),
    )
}

pub fn market_report_schema() -> OutputSchema {
    let citations = json!({ "type": "array", "items": { "type": "string" } });
    OutputSchema::new(
        "market_report",
        object(json!({
            "sector": object(json!({ "name": { "type": "string" }, "citation": citations })),
            "market_size": object(json!({ "tam": { "type": "string" }, "citation": citations })),
            "competitors": {
                "type": "array",
                "items": object(json!({
                    "name": { "type": "string" },
                    "description": { "type": "string" },
                    "citation": citations,
                })),
            },
        })),
    )
}

pub fn repositories_schema() -> OutputSchema {
    OutputSchema::new(
        "repositories",
        object(json!({
            "repositories": {
                "type": "array",
                "items": object(json!({
                    "repository": { "type": "string" },
                    "stars": nullable("string"),
                    "forks": nullable("string"),
                    "link": nullable("string"),
                })),
            },
        })),
    )
}

pub fn qa_route_schema() -> OutputSchema {
    OutputSchema::new(
        "qa_route",
        object(json!({
            "action": { "type": "string", "enum": ["answer", "retrieve", "clarify"] },
            "answer": nullable("string"),
            "query": nullable("string"),
            "clarification": nullable("string"),
        })),
    )
}

pub fn qa_answer_schema() -> OutputSchema {
    OutputSchema::new("qa_answer", object(json!({ "answer": { "type": "string" } })))
}
