// Plausibility checks applied to every record a database returns
use crate::layers::Paper;

pub struct PaperValidator;

impl PaperValidator {
    pub fn is_plausible(paper: &Paper, current_year: i32) -> bool {
        if !(1900..=current_year).contains(&paper.year) {
            tracing::warn!("Invalid year {} for paper: {}", paper.year, paper.title);
            return false;
        }

        let title_len = paper.title.chars().count();
        if !(10..=300).contains(&title_len) {
            tracing::warn!("Suspicious title length: {}", paper.title);
            return false;
        }

        if paper.authors.is_empty() || paper.authors.len() > 50 {
            tracing::warn!("Suspicious author count: {}", paper.title);
            return false;
        }

        // Papers from the current year still get one year of headroom.
        let age = (current_year - paper.year).max(1) as u64;
        if u64::from(paper.citations) > age * 1000 {
            tracing::warn!("Suspicious citation count: {} for {}", paper.citations, paper.title);
            return false;
        }

        true
    }
}
