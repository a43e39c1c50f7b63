use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::GapFinderError;
use crate::layers::discovery::current_year;
use crate::layers::providers::{extract_json_array, CompletionRequest, ProviderKind, ProviderManager};
use crate::layers::{ExpertiseLevel, GapCategory, GapFinding, Grade, Paper};

pub const MAX_GAPS: usize = 5;
const PROMPT_PAPERS: usize = 15;
const SNIPPET_CHARS: usize = 200;
const DEFAULT_CONFIDENCE: f64 = 0.85;
const TEMPORAL_CONFIDENCE: f64 = 0.7;
const VENUE_CONFIDENCE: f64 = 0.6;
/// A year with fewer papers than this counts as thin coverage.
const SPARSE_YEAR: usize = 2;
const MIN_VENUES: usize = 3;

const HIGH_NOVELTY: &[&str] = &["unprecedented", "first", "novel", "breakthrough", "cutting-edge", "unexplored"];
const MEDIUM_NOVELTY: &[&str] = &["limited", "understudied", "emerging", "recent"];
const HIGH_IMPACT: &[&str] = &["significant", "major", "critical", "transformative", "breakthrough", "paradigm"];
const EXPERT_SIGNALS: &[&str] = &["complex", "advanced", "sophisticated", "cutting-edge", "breakthrough"];

/// Why a report carries no gaps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisError {
    pub kind: &'static str,
    pub message: String,
}

impl From<&GapFinderError> for AnalysisError {
    fn from(err: &GapFinderError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GapReport {
    pub gaps: Vec<GapFinding>,
    pub error: Option<AnalysisError>,
    pub provider: Option<ProviderKind>,
    /// Publications per year over the analysed set.
    pub year_histogram: BTreeMap<i32, usize>,
}

impl GapReport {
    #[cfg(test)]
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Deserialize)]
struct RawGap {
    #[serde(alias = "gap_type")]
    category: String,
    description: String,
    confidence: Option<f64>,
    #[serde(default)]
    supporting_papers: Vec<Value>,
    #[serde(default)]
    supporting_evidence: Vec<String>,
    potential_impact: Option<String>,
    suggested_approach: Option<String>,
    #[serde(default)]
    key_questions: Vec<String>,
}

pub struct GapAnalyzer;

impl GapAnalyzer {
    /// One model call over the paper set. Failures come back as an empty report with `error` set.
    pub async fn analyze(manager: &ProviderManager, topic: &str, papers: &[Paper]) -> GapReport {
        let mut report = GapReport {
            year_histogram: Self::year_histogram(papers),
            ..GapReport::default()
        };

        if papers.is_empty() {
            let err = GapFinderError::NoResults { query: topic.to_string() };
            report.error = Some(AnalysisError::from(&err));
            return report;
        }

        tracing::info!("Analyzing {} papers for research gaps on '{}'", papers.len(), topic);
        let request = CompletionRequest::new(Self::build_prompt(topic, papers))
            .with_system("You are an expert research gap analyst.")
            .with_schema(Self::response_schema());

        let result = match manager.complete(&request).await {
            Ok(completion) => {
                report.provider = Some(completion.provider);
                Self::parse_response(&completion.text, papers)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(mut gaps) => {
                gaps.extend(Self::heuristic_gaps(papers, current_year()));
                Self::rank(&mut gaps);
                tracing::info!("Identified {} research gaps", gaps.len());
                report.gaps = gaps;
            }
            Err(e) => {
                tracing::error!("Gap analysis failed: {}", e);
                report.error = Some(AnalysisError::from(&e));
            }
        }
        report
    }

    fn build_prompt(topic: &str, papers: &[Paper]) -> String {
        let listing: Vec<String> = papers
            .iter()
            .take(PROMPT_PAPERS)
            .enumerate()
            .map(|(i, p)| {
                let snippet: String = p.abstract_text.chars().take(SNIPPET_CHARS).collect();
                format!(
                    "[{}] {} ({}, {}, {} citations)\nAbstract: {}",
                    i + 1,
                    p.title,
                    p.year,
                    p.venue,
                    p.citations,
                    if snippet.is_empty() { "No abstract available".to_string() } else { snippet }
                )
            })
            .collect();

        format!(
            "Analyze these {} papers on \"{}\" to identify significant research gaps.\n\n\
             Papers:\n{}\n\n\
             Identify 3-5 specific and actionable research gaps. For each gap give:\n\
             - category: one of temporal, methodological, theoretical, application, interdisciplinary\n\
             - description: a clear, specific description\n\
             - confidence: a number between 0 and 1\n\
             - supporting_papers: the bracketed numbers of the papers that show the gap\n\
             - supporting_evidence, potential_impact, suggested_approach, key_questions\n\n\
             Respond with a JSON array of gap objects. Avoid generic gaps.",
            papers.len(),
            topic,
            listing.join("\n\n")
        )
    }

    fn response_schema() -> Value {
        let categories: Vec<&str> = GapCategory::ALL.iter().map(|c| c.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "gaps": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "category": {"type": "string", "enum": categories},
                            "description": {"type": "string"},
                            "confidence": {"type": "number"},
                            "supporting_papers": {"type": "array", "items": {"type": "integer"}},
                            "supporting_evidence": {"type": "array", "items": {"type": "string"}},
                            "potential_impact": {"type": "string"},
                            "suggested_approach": {"type": "string"},
                            "key_questions": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["category", "description"]
                    }
                }
            },
            "required": ["gaps"]
        })
    }

    /// Turns a model answer into enriched findings, best first, at most [`MAX_GAPS`].
    pub fn parse_response(text: &str, papers: &[Paper]) -> Result<Vec<GapFinding>, GapFinderError> {
        let items = extract_json_array(text, "gaps", Value::is_object)
            .ok_or_else(|| GapFinderError::parse("gap analysis", "no JSON array in model response"))?;
        let offered = items.len();

        let mut gaps: Vec<GapFinding> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<RawGap>(item) {
                Ok(raw) => Self::build_finding(raw, papers),
                Err(e) => {
                    tracing::debug!("Skipping malformed gap entry: {}", e);
                    None
                }
            })
            .collect();

        if offered > 0 && gaps.is_empty() {
            return Err(GapFinderError::parse(
                "gap analysis",
                format!("none of {} gap entries matched the expected shape", offered),
            ));
        }

        Self::rank(&mut gaps);
        Ok(gaps)
    }

    /// Best first, at most [`MAX_GAPS`]. Ties keep their input order.
    fn rank(gaps: &mut Vec<GapFinding>) {
        gaps.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
        gaps.truncate(MAX_GAPS);
    }

    /// Coverage checks over the paper set itself: thin years in the recent
    /// window and a narrow spread of venues.
    pub fn heuristic_gaps(papers: &[Paper], current_year: i32) -> Vec<GapFinding> {
        let histogram = Self::year_histogram(papers);
        let per_year = papers.len() as f64 / 5.0;
        let mut gaps = Vec::new();

        for year in current_year - 5..=current_year {
            let count = histogram.get(&year).copied().unwrap_or(0);
            if count >= SPARSE_YEAR {
                continue;
            }
            let mut gap = GapFinding::new(
                GapCategory::Temporal,
                format!("Limited research activity in {} with only {} publications", year, count),
                TEMPORAL_CONFIDENCE,
            );
            gap.supporting_evidence = vec![
                format!("Only {} papers found from {}", count, year),
                format!("Average publications per year: {:.1}", per_year),
            ];
            gap.potential_impact = "Recent developments and current trends may be understudied".to_string();
            gap.suggested_approach =
                "Conduct updated research incorporating latest developments and technologies".to_string();
            Self::enrich(&mut gap);
            gaps.push(gap);
        }

        let mut venues: BTreeMap<&str, usize> = BTreeMap::new();
        for paper in papers.iter().filter(|p| !p.venue.trim().is_empty()) {
            *venues.entry(paper.venue.as_str()).or_insert(0) += 1;
        }
        if venues.len() < MIN_VENUES {
            let top = venues
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                .map(|(venue, _)| *venue)
                .unwrap_or("Unknown");
            let mut gap = GapFinding::new(
                GapCategory::Interdisciplinary,
                "Limited venue diversity suggests narrow research community engagement",
                VENUE_CONFIDENCE,
            );
            gap.supporting_evidence = vec![
                format!("Papers concentrated in only {} venues", venues.len()),
                format!("Top venue: {}", top),
            ];
            gap.potential_impact = "Potential echo chamber effect limiting diverse perspectives".to_string();
            gap.suggested_approach = "Target interdisciplinary venues and conferences for broader impact".to_string();
            Self::enrich(&mut gap);
            gaps.push(gap);
        }
        gaps
    }

    fn build_finding(raw: RawGap, papers: &[Paper]) -> Option<GapFinding> {
        let category = match raw.category.parse::<GapCategory>() {
            Ok(category) => category,
            Err(e) => {
                tracing::debug!("Skipping gap: {}", e);
                return None;
            }
        };
        let description = raw.description.trim().to_string();
        if description.is_empty() {
            return None;
        }

        let mut gap = GapFinding::new(category, description, raw.confidence.unwrap_or(DEFAULT_CONFIDENCE));
        gap.supporting_papers = raw
            .supporting_papers
            .iter()
            .filter_map(|reference| Self::resolve_reference(reference, papers))
            .collect();
        gap.supporting_evidence = raw.supporting_evidence.into_iter().take(3).collect();
        gap.potential_impact = raw
            .potential_impact
            .unwrap_or_else(|| "Significant research opportunity".to_string());
        gap.suggested_approach = raw
            .suggested_approach
            .unwrap_or_else(|| "Further investigation needed".to_string());
        gap.key_questions = raw.key_questions.into_iter().take(3).collect();

        Self::enrich(&mut gap);
        Some(gap)
    }

    /// Paper numbers are 1-based positions in the prompt; ids are accepted as-is.
    fn resolve_reference(reference: &Value, papers: &[Paper]) -> Option<String> {
        let index = match reference {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => match s.trim().trim_start_matches('[').trim_end_matches(']').parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => return papers.iter().find(|p| p.id == *s).map(|p| p.id.clone()),
            },
            _ => None,
        }?;
        let position = usize::try_from(index).ok()?.checked_sub(1)?;
        papers.iter().take(PROMPT_PAPERS).nth(position).map(|p| p.id.clone())
    }

    /// Fills the derived fields from the category and wording of a finding.
    pub fn enrich(gap: &mut GapFinding) {
        let description = gap.description.to_lowercase();
        let impact_text = gap.potential_impact.to_lowercase();
        let mentions = |keywords: &[&str], text: &str| keywords.iter().any(|k| text.contains(k));

        gap.novelty = if mentions(HIGH_NOVELTY, &description) || gap.category == GapCategory::Interdisciplinary {
            Grade::High
        } else if mentions(MEDIUM_NOVELTY, &description)
            || matches!(gap.category, GapCategory::Methodological | GapCategory::Application)
        {
            Grade::Medium
        } else {
            Grade::Low
        };

        gap.impact = if mentions(HIGH_IMPACT, &description)
            || mentions(HIGH_IMPACT, &impact_text)
            || matches!(gap.category, GapCategory::Application | GapCategory::Interdisciplinary)
        {
            Grade::High
        } else {
            Grade::Medium
        };

        let (research, methods, resources): (&[&str], &[&str], &[&str]) = match gap.category {
            GapCategory::Methodological => (
                &[
                    "Develop and validate new research methodologies",
                    "Conduct comparative studies of existing approaches",
                    "Create standardized evaluation frameworks",
                ],
                &["Mixed-methods research design", "Systematic review and meta-analysis", "Experimental validation studies"],
                &["Statistical software", "Research participants", "Data collection tools"],
            ),
            GapCategory::Theoretical => (
                &[
                    "Develop comprehensive theoretical frameworks",
                    "Conduct systematic literature reviews",
                    "Propose new conceptual models",
                ],
                &["Grounded theory approach", "Conceptual framework development", "Delphi study with experts"],
                &["Literature databases", "Expert consultations", "Analysis software"],
            ),
            GapCategory::Application => (
                &[
                    "Design and implement pilot studies",
                    "Develop proof-of-concept prototypes",
                    "Conduct real-world case studies",
                ],
                &["Action research methodology", "Case study research", "Design science research"],
                &["Development tools", "Testing environments", "User groups"],
            ),
            GapCategory::Interdisciplinary => (
                &[
                    "Establish cross-disciplinary research collaborations",
                    "Organize interdisciplinary workshops and conferences",
                    "Develop integrated research frameworks",
                ],
                &[
                    "Transdisciplinary research approach",
                    "Collaborative participatory research",
                    "Systems thinking methodology",
                ],
                &["Cross-domain experts", "Collaboration platforms", "Integration tools"],
            ),
            GapCategory::Temporal => (
                &[
                    "Conduct comprehensive literature review",
                    "Design empirical studies to address the gap",
                    "Develop new research methodologies",
                ],
                &["Exploratory research design", "Survey and interview methods", "Longitudinal study approach"],
                &["Research databases", "Analysis tools", "Expert guidance"],
            ),
        };
        gap.research_suggestions = research.iter().map(|s| s.to_string()).collect();
        gap.methodology_suggestions = methods.iter().map(|s| s.to_string()).collect();
        gap.required_resources = resources.iter().map(|s| s.to_string()).collect();

        gap.required_expertise = if mentions(EXPERT_SIGNALS, &description) {
            ExpertiseLevel::Expert
        } else if matches!(gap.category, GapCategory::Interdisciplinary | GapCategory::Theoretical) {
            ExpertiseLevel::Advanced
        } else {
            ExpertiseLevel::Intermediate
        };

        gap.estimated_timeline = match gap.category {
            GapCategory::Theoretical | GapCategory::Interdisciplinary => "12-24 months",
            _ if description.contains("comprehensive") => "12-24 months",
            GapCategory::Application | GapCategory::Temporal => "3-6 months",
            GapCategory::Methodological => "6-12 months",
        }
        .to_string();
    }

    /// Keeps gaps at most one level above the researcher and orders them by
    /// (novelty + impact) weighted by confidence.
    pub fn prioritize_by_expertise(gaps: &[GapFinding], level: ExpertiseLevel) -> Vec<GapFinding> {
        let score = |g: &GapFinding| (g.novelty.weight() + g.impact.weight()) * g.confidence();
        let mut suitable: Vec<GapFinding> = gaps
            .iter()
            .filter(|g| g.required_expertise.rank() <= level.rank() + 1)
            .cloned()
            .collect();
        suitable.sort_by(|a, b| score(b).total_cmp(&score(a)));
        suitable
    }

    pub fn year_histogram(papers: &[Paper]) -> BTreeMap<i32, usize> {
        let mut histogram = BTreeMap::new();
        for paper in papers {
            *histogram.entry(paper.year).or_insert(0) += 1;
        }
        histogram
    }
}
