// Heuristic quality assessment of a single paper
use std::fmt;

use serde::Serialize;

use crate::layers::Paper;

const METHODOLOGY_KEYWORDS: &[&str] = &[
    "experiment", "empirical", "statistical", "quantitative", "qualitative", "survey", "case study",
    "longitudinal", "cross-sectional", "randomized", "controlled", "systematic", "meta-analysis", "validation",
    "evaluation",
];
const TOP_VENUES: &[&str] = &["ieee", "acm", "nature", "science"];
const NOVELTY_KEYWORDS: &[&str] = &[
    "novel", "new", "innovative", "first", "breakthrough", "pioneering", "unprecedented", "original", "unique",
    "cutting-edge", "state-of-the-art",
];
const STRUCTURE_KEYWORDS: &[&str] = &[
    "background", "objective", "method", "result", "conclusion", "purpose", "approach", "finding", "implication",
];
const APPLICATION_KEYWORDS: &[&str] = &[
    "application", "practical", "implementation", "real-world", "industry", "deployment", "system", "tool",
    "framework", "platform", "solution", "case study", "evaluation", "performance", "efficiency",
];
const DOMAIN_KEYWORDS: &[&str] = &[
    "healthcare", "medical", "finance", "education", "transportation", "energy", "environment", "security",
    "manufacturing", "agriculture",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PaperGrade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B+")]
    BPlus,
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "C+")]
    CPlus,
    C,
    #[serde(rename = "C-")]
    CMinus,
    D,
    F,
}

impl PaperGrade {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 9.5 => PaperGrade::APlus,
            s if s >= 9.0 => PaperGrade::A,
            s if s >= 8.5 => PaperGrade::AMinus,
            s if s >= 8.0 => PaperGrade::BPlus,
            s if s >= 7.0 => PaperGrade::B,
            s if s >= 6.5 => PaperGrade::BMinus,
            s if s >= 6.0 => PaperGrade::CPlus,
            s if s >= 5.0 => PaperGrade::C,
            s if s >= 4.0 => PaperGrade::CMinus,
            s if s >= 3.0 => PaperGrade::D,
            _ => PaperGrade::F,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaperGrade::APlus => "A+",
            PaperGrade::A => "A",
            PaperGrade::AMinus => "A-",
            PaperGrade::BPlus => "B+",
            PaperGrade::B => "B",
            PaperGrade::BMinus => "B-",
            PaperGrade::CPlus => "C+",
            PaperGrade::C => "C",
            PaperGrade::CMinus => "C-",
            PaperGrade::D => "D",
            PaperGrade::F => "F",
        }
    }
}

impl fmt::Display for PaperGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All scores are on a 0-10 scale, rounded to one decimal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperQualityScore {
    pub overall_grade: PaperGrade,
    pub overall_score: f64,
    pub methodology_score: f64,
    pub citation_impact_score: f64,
    pub novelty_score: f64,
    pub clarity_score: f64,
    pub applicability_score: f64,
    pub explanation: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

pub struct PaperGrader;

impl PaperGrader {
    pub fn grade(paper: &Paper, current_year: i32) -> PaperQualityScore {
        let methodology = Self::methodology(paper);
        let citation = Self::citation_impact(paper, current_year);
        let novelty = Self::novelty(paper, current_year);
        let clarity = Self::clarity(paper);
        let applicability = Self::applicability(paper);

        let overall =
            methodology * 0.25 + citation * 0.20 + novelty * 0.25 + clarity * 0.15 + applicability * 0.15;

        let mut strengths = Vec::new();
        let mut weaknesses = Vec::new();
        for (score, high, strength, low, weakness) in [
            (methodology, 8.0, "Strong methodological approach", 5.0, "Limited methodological rigor"),
            (citation, 7.0, "High citation impact for its age", 4.0, "Low citation impact"),
            (novelty, 8.0, "Highly novel and innovative", 5.0, "Limited novelty or innovation"),
            (clarity, 8.0, "Clear and well-structured presentation", 5.0, "Unclear presentation or structure"),
            (applicability, 8.0, "Strong practical applicability", 5.0, "Limited practical applicability"),
        ] {
            if score >= high {
                strengths.push(strength.to_string());
            }
            if score < low {
                weaknesses.push(weakness.to_string());
            }
        }

        let mean = (methodology + citation + novelty + clarity + applicability) / 5.0;
        let explanation = match mean {
            m if m >= 8.5 => "Excellent paper with strong contributions across multiple dimensions.",
            m if m >= 7.5 => "High-quality paper with solid methodology and significant impact.",
            m if m >= 6.5 => "Good paper with notable contributions and clear presentation.",
            m if m >= 5.5 => "Adequate paper with some valuable insights but room for improvement.",
            _ => "Paper has limitations that affect its overall quality and impact.",
        };

        PaperQualityScore {
            overall_grade: PaperGrade::from_score(overall),
            overall_score: round1(overall),
            methodology_score: round1(methodology),
            citation_impact_score: round1(citation),
            novelty_score: round1(novelty),
            clarity_score: round1(clarity),
            applicability_score: round1(applicability),
            explanation: explanation.to_string(),
            strengths,
            weaknesses,
        }
    }

    fn methodology(paper: &Paper) -> f64 {
        let abstract_lower = paper.abstract_text.to_lowercase();
        let mut score = 5.0 + (count_hits(&abstract_lower, METHODOLOGY_KEYWORDS) as f64 * 0.5).min(3.0);

        let venue = paper.venue.to_lowercase();
        if venue.chars().count() > 3 {
            if TOP_VENUES.iter().any(|v| venue.contains(v)) {
                score += 1.5;
            } else if venue.contains("conference") || venue.contains("journal") {
                score += 0.5;
            }
        }
        score.min(10.0)
    }

    fn citation_impact(paper: &Paper, current_year: i32) -> f64 {
        let age = (current_year - paper.year).max(1);
        let per_year = f64::from(paper.citations) / f64::from(age);
        match per_year {
            c if c >= 50.0 => 10.0,
            c if c >= 20.0 => 8.5,
            c if c >= 10.0 => 7.0,
            c if c >= 5.0 => 6.0,
            c if c >= 2.0 => 5.0,
            c if c >= 1.0 => 4.0,
            _ => (3.0 - f64::from(age) * 0.2).max(2.0),
        }
    }

    fn novelty(paper: &Paper, current_year: i32) -> f64 {
        let title = paper.title.to_lowercase();
        let abstract_lower = paper.abstract_text.to_lowercase();
        let mut score = 5.0;
        score += (count_hits(&title, NOVELTY_KEYWORDS) as f64).min(2.0);
        score += (count_hits(&abstract_lower, NOVELTY_KEYWORDS) as f64 * 0.3).min(2.0);
        if paper.year >= current_year - 1 {
            score += 1.0;
        } else if paper.year >= current_year - 3 {
            score += 0.5;
        }
        score.min(10.0)
    }

    fn clarity(paper: &Paper) -> f64 {
        let mut score = 5.0;
        let title_len = paper.title.chars().count();
        if (30..=120).contains(&title_len) {
            score += 1.0;
        } else if !(20..=150).contains(&title_len) {
            score -= 1.0;
        }

        if !paper.abstract_text.is_empty() {
            if (100..=500).contains(&paper.abstract_text.chars().count()) {
                score += 1.0;
            }
            let abstract_lower = paper.abstract_text.to_lowercase();
            score += (count_hits(&abstract_lower, STRUCTURE_KEYWORDS) as f64 * 0.3).min(2.0);
        }

        match paper.authors.len() {
            n if n <= 6 => score += 0.5,
            n if n > 15 => score -= 0.5,
            _ => {}
        }
        score.min(10.0)
    }

    fn applicability(paper: &Paper) -> f64 {
        let title = paper.title.to_lowercase();
        let abstract_lower = paper.abstract_text.to_lowercase();
        let mut score = 5.0;
        score += (count_hits(&title, APPLICATION_KEYWORDS) as f64).min(2.0);
        score += (count_hits(&abstract_lower, APPLICATION_KEYWORDS) as f64 * 0.2).min(2.0);

        let domains = DOMAIN_KEYWORDS
            .iter()
            .filter(|k| title.contains(*k) || abstract_lower.contains(*k))
            .count();
        score += (domains as f64 * 0.5).min(1.0);
        score.min(10.0)
    }
}

fn count_hits(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
