use std::cmp::Ordering;

use strsim::normalized_levenshtein;
use crate::layers::Paper;

/// Titles at least this similar (after normalization) are the same work.
const NEAR_DUPLICATE_SIMILARITY: f64 = 0.95;
/// Containment and fuzzy matching only apply above this many characters.
const LONG_TITLE_CHARS: usize = 20;

pub struct Resolver;

impl Resolver {
    /// Lowercases, drops punctuation and collapses whitespace.
    pub fn normalize_title(title: &str) -> String {
        let stripped: String = title
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
            .collect();
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn is_duplicate(a: &Paper, b: &Paper) -> bool {
        if a.id == b.id {
            return true;
        }
        if let (Some(da), Some(db)) = (&a.doi, &b.doi) {
            if da.eq_ignore_ascii_case(db) {
                return true;
            }
        }
        Self::titles_match(&Self::normalize_title(&a.title), &Self::normalize_title(&b.title))
    }

    fn titles_match(a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        if a.chars().count() > LONG_TITLE_CHARS && b.chars().count() > LONG_TITLE_CHARS {
            // Subtitled and unsubtitled versions of the same paper.
            if a.contains(b) || b.contains(a) {
                return true;
            }
            let similarity = normalized_levenshtein(a, b);
            if similarity >= NEAR_DUPLICATE_SIMILARITY {
                tracing::debug!("Near-duplicate titles ({:.3}): '{}' / '{}'", similarity, a, b);
                return true;
            }
        }
        false
    }

    /// Keeps the first occurrence of every work, preserving input order.
    pub fn deduplicate(papers: Vec<Paper>) -> Vec<Paper> {
        let mut unique: Vec<Paper> = Vec::with_capacity(papers.len());
        for paper in papers {
            if unique.iter().any(|kept| Self::is_duplicate(kept, &paper)) {
                tracing::debug!("Dropping duplicate: {}", paper.title);
                continue;
            }
            unique.push(paper);
        }
        unique
    }

    /// Appends the papers from `incoming` that are not already present; returns how many were added.
    pub fn merge_into(existing: &mut Vec<Paper>, incoming: Vec<Paper>) -> usize {
        let before = existing.len();
        let combined: Vec<Paper> = existing.drain(..).chain(incoming).collect();
        *existing = Self::deduplicate(combined);
        existing.len() - before
    }

    /// 0.4 * recency + 0.6 * citation impact, both in [0, 1].
    pub fn relevance_score(paper: &Paper, current_year: i32) -> f64 {
        let age = f64::from(current_year - paper.year);
        let recency = (1.0 - age / 10.0).clamp(0.0, 1.0);
        let citation = ((f64::from(paper.citations) + 1.0).powf(0.25) / 10.0).min(1.0);
        recency * 0.4 + citation * 0.6
    }

    pub fn rank_by_relevance(mut papers: Vec<Paper>, current_year: i32) -> Vec<Paper> {
        papers.sort_by(|a, b| {
            Self::relevance_score(b, current_year)
                .partial_cmp(&Self::relevance_score(a, current_year))
                .unwrap_or(Ordering::Equal)
        });
        papers
    }

    /// Keeps papers from the last `recent_years` years, newest and most cited first.
    pub fn select_recent(mut papers: Vec<Paper>, current_year: i32, recent_years: i32, max: usize) -> Vec<Paper> {
        papers.retain(|p| p.year >= current_year - recent_years);
        papers.sort_by(|a, b| (b.year, b.citations).cmp(&(a.year, a.citations)));
        papers.truncate(max);
        papers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{sample_paper, SourceDatabase};

    #[test]
    fn test_normalize_title() {
        assert_eq!(
            Resolver::normalize_title("  Attention Is  All You Need! "),
            "attention is all you need"
        );
        assert_eq!(Resolver::normalize_title("BERT: Pre-training"), "bert pretraining");
    }

    #[test]
    fn test_deduplicates_case_and_punctuation_variants() {
        let papers = vec![
            sample_paper("Deep Learning for Protein Folding", 2022, 10),
            sample_paper("deep learning for protein folding.", 2021, 3),
            sample_paper("Graph Neural Networks in Chemistry", 2023, 4),
        ];
        let unique = Resolver::deduplicate(papers);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].year, 2022);
    }

    #[test]
    fn test_subtitle_containment_counts_as_duplicate() {
        let papers = vec![
            sample_paper("Federated Learning in Healthcare Systems", 2022, 10),
            sample_paper("Federated Learning in Healthcare Systems: A Survey", 2022, 10),
        ];
        assert_eq!(Resolver::deduplicate(papers).len(), 1);
    }

    #[test]
    fn test_short_titles_need_exact_match() {
        let papers = vec![sample_paper("Graph Models", 2022, 1), sample_paper("Graph Models II", 2022, 1)];
        assert_eq!(Resolver::deduplicate(papers).len(), 2);
    }

    #[test]
    fn test_shared_doi_is_duplicate() {
        let mut a = sample_paper("Completely Different Title One", 2022, 1);
        let mut b = sample_paper("Another Unrelated Heading Here", 2022, 1);
        a.doi = Some("10.1/X".to_string());
        b.doi = Some("10.1/x".to_string());
        b.source = SourceDatabase::Crossref;
        assert!(Resolver::is_duplicate(&a, &b));
        assert_eq!(Resolver::deduplicate(vec![a, b]).len(), 1);
    }

    #[test]
    fn test_deduplicate_is_idempotent() {
        let papers = vec![
            sample_paper("Quantum Error Correction with Surface Codes", 2021, 50),
            sample_paper("Quantum Error Correction With Surface Codes", 2022, 5),
            sample_paper("Quantum Error Correction with Surface Code", 2020, 9),
            sample_paper("Topological Qubits and Their Discontents", 2023, 1),
            sample_paper("Surface Codes", 2019, 2),
            sample_paper("Surface codes!", 2019, 2),
        ];
        let once = Resolver::deduplicate(papers);
        let twice = Resolver::deduplicate(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_ids_unique_after_dedup() {
        let mut a = sample_paper("First Paper About Something", 2022, 1);
        let mut b = sample_paper("Second Paper On Other Things", 2022, 1);
        a.id = "same".into();
        b.id = "same".into();
        let unique = Resolver::deduplicate(vec![a, b]);
        assert_eq!(unique.len(), 1);
    }

    #[test]
    fn test_merge_into_reports_new_papers() {
        let mut existing = vec![sample_paper("Reinforcement Learning for Robotics", 2022, 3)];
        let added = Resolver::merge_into(
            &mut existing,
            vec![
                sample_paper("reinforcement learning for robotics", 2022, 3),
                sample_paper("Sim-to-Real Transfer in Manipulation", 2023, 8),
            ],
        );
        assert_eq!(added, 1);
        assert_eq!(existing.len(), 2);
    }

    #[test]
    fn test_relevance_prefers_recent_and_cited() {
        let old = sample_paper("An Older Paper With Few Citations", 2010, 1);
        let new = sample_paper("A Newer Paper With More Citations", 2024, 500);
        let ranked = Resolver::rank_by_relevance(vec![old, new], 2025);
        assert_eq!(ranked[0].year, 2024);
        let score = Resolver::relevance_score(&ranked[0], 2025);
        assert!(score > 0.0 && score <= 1.0);
    }

    #[test]
    fn test_select_recent_filters_sorts_and_truncates() {
        let papers = vec![
            sample_paper("Paper From Long Ago Indeed", 2012, 900),
            sample_paper("Paper From Last Year Indeed", 2024, 2),
            sample_paper("Paper From This Year Indeed", 2025, 1),
            sample_paper("Paper From Last Year Cited", 2024, 20),
        ];
        let recent = Resolver::select_recent(papers, 2025, 5, 2);
        let titles: Vec<_> = recent.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Paper From This Year Indeed", "Paper From Last Year Cited"]);
    }
}
