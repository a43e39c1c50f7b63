use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceDatabase {
    #[serde(rename = "Semantic Scholar")]
    SemanticScholar,
    #[serde(rename = "Crossref")]
    Crossref,
}

impl fmt::Display for SourceDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceDatabase::SemanticScholar => write!(f, "Semantic Scholar"),
            SourceDatabase::Crossref => write!(f, "Crossref"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Paper {
    /// DOI, database id, or a title/year digest when neither exists.
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: i32,
    pub venue: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub citations: u32,
    pub doi: Option<String>,
    pub url: Option<String>,
    pub source: SourceDatabase,
}

impl Paper {
    /// Prefers the DOI, then the database's own id, then a digest of title and year.
    pub fn derive_id(doi: Option<&str>, database_id: Option<&str>, title: &str, year: i32) -> String {
        if let Some(doi) = doi.filter(|d| !d.trim().is_empty()) {
            return format!("doi:{}", doi.trim().to_lowercase());
        }
        if let Some(id) = database_id.filter(|d| !d.trim().is_empty()) {
            return id.trim().to_string();
        }
        let digest = Md5::digest(format!("{}{}", title, year).as_bytes());
        format!("md5:{:x}", digest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapCategory {
    Temporal,
    Methodological,
    Theoretical,
    Application,
    Interdisciplinary,
}

impl GapCategory {
    pub const ALL: [GapCategory; 5] = [
        GapCategory::Temporal,
        GapCategory::Methodological,
        GapCategory::Theoretical,
        GapCategory::Application,
        GapCategory::Interdisciplinary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GapCategory::Temporal => "temporal",
            GapCategory::Methodological => "methodological",
            GapCategory::Theoretical => "theoretical",
            GapCategory::Application => "application",
            GapCategory::Interdisciplinary => "interdisciplinary",
        }
    }
}

impl fmt::Display for GapCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GapCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        GapCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| format!("unknown gap category '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    High,
    Medium,
    Low,
}

impl Grade {
    pub fn weight(&self) -> f64 {
        match self {
            Grade::High => 3.0,
            Grade::Medium => 2.0,
            Grade::Low => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExpertiseLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl ExpertiseLevel {
    pub fn rank(&self) -> u8 {
        match self {
            ExpertiseLevel::Beginner => 1,
            ExpertiseLevel::Intermediate => 2,
            ExpertiseLevel::Advanced => 3,
            ExpertiseLevel::Expert => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExpertiseLevel::Beginner => "beginner",
            ExpertiseLevel::Intermediate => "intermediate",
            ExpertiseLevel::Advanced => "advanced",
            ExpertiseLevel::Expert => "expert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapFinding {
    pub category: GapCategory,
    pub description: String,
    #[serde(rename = "confidence_score")]
    confidence: f64,
    /// Ids of the papers the finding cites.
    pub supporting_papers: BTreeSet<String>,
    pub supporting_evidence: Vec<String>,
    pub potential_impact: String,
    pub suggested_approach: String,
    pub key_questions: Vec<String>,
    pub novelty: Grade,
    pub impact: Grade,
    pub research_suggestions: Vec<String>,
    pub methodology_suggestions: Vec<String>,
    pub required_expertise: ExpertiseLevel,
    pub estimated_timeline: String,
    pub required_resources: Vec<String>,
}

impl GapFinding {
    pub fn new(category: GapCategory, description: impl Into<String>, confidence: f64) -> Self {
        Self {
            category,
            description: description.into(),
            confidence: clamp_confidence(confidence),
            supporting_papers: BTreeSet::new(),
            supporting_evidence: Vec::new(),
            potential_impact: String::new(),
            suggested_approach: String::new(),
            key_questions: Vec::new(),
            novelty: Grade::Medium,
            impact: Grade::Medium,
            research_suggestions: Vec::new(),
            methodology_suggestions: Vec::new(),
            required_expertise: ExpertiseLevel::Intermediate,
            estimated_timeline: "6-12 months".to_string(),
            required_resources: Vec::new(),
        }
    }

    /// Always within [0, 1].
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    #[cfg(test)]
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = clamp_confidence(confidence);
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub mod analysis;
pub mod cache;
pub mod discovery;
pub mod export;
pub mod grading;
pub mod providers;
pub mod queries;
pub mod resolution;
pub mod session;
pub mod validation;

#[cfg(test)]
pub(crate) fn sample_paper(title: &str, year: i32, citations: u32) -> Paper {
    Paper {
        id: Paper::derive_id(None, None, title, year),
        title: title.to_string(),
        authors: vec!["Ada Lovelace".to_string()],
        year,
        venue: "Journal of Testing".to_string(),
        abstract_text: String::new(),
        citations,
        doi: None,
        url: None,
        source: SourceDatabase::SemanticScholar,
    }
}
