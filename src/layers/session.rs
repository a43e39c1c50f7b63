use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::Result;
use crate::layers::analysis::{GapAnalyzer, GapReport};
use crate::layers::discovery::{current_year, SearchEngine, SearchWarning};
use crate::layers::export::{ExportArtifact, ExportFormat, ExportInput, Exporter};
use crate::layers::grading::{PaperGrader, PaperQualityScore};
use crate::layers::providers::ProviderManager;
use crate::layers::queries::QueryPlanner;
use crate::layers::resolution::Resolver;
use crate::layers::{ExpertiseLevel, GapFinding, Paper};

/// Queries searched per topic; the planner may suggest more.
const SEARCHED_QUERIES: usize = 3;

/// One researcher's run: topic, papers, grades and gaps, all in memory.
pub struct ResearchSession {
    config: Config,
    manager: ProviderManager,
    engine: SearchEngine,
    topic: Option<String>,
    expertise: Option<ExpertiseLevel>,
    papers: Vec<Paper>,
    grades: BTreeMap<String, PaperQualityScore>,
    report: GapReport,
    warnings: Vec<SearchWarning>,
}

impl ResearchSession {
    pub fn new(config: Config) -> Result<Self> {
        let manager = ProviderManager::from_config(&config)?;
        let engine = SearchEngine::new(&config.search)?;
        Ok(Self::with_parts(config, manager, engine))
    }

    pub fn with_parts(config: Config, manager: ProviderManager, engine: SearchEngine) -> Self {
        Self {
            config,
            manager,
            engine,
            topic: None,
            expertise: None,
            papers: Vec::new(),
            grades: BTreeMap::new(),
            report: GapReport::default(),
            warnings: Vec::new(),
        }
    }

    pub fn set_expertise(&mut self, level: Option<ExpertiseLevel>) {
        self.expertise = level;
    }

    pub async fn resolve_topic(&self, input: &str) -> Option<String> {
        QueryPlanner::resolve_topic(&self.manager, input).await
    }

    /// Plans queries for the topic, searches the first few, and keeps the recent papers.
    pub async fn find_papers(&mut self, topic: &str) -> &[Paper] {
        self.topic = Some(topic.to_string());
        self.grades.clear();
        self.report = GapReport::default();
        self.warnings.clear();

        let queries = QueryPlanner::generate_queries(&self.manager, topic).await;
        tracing::info!("Generated {} search queries for '{}'", queries.len(), topic);

        let mut found = Vec::new();
        let searched = queries.len().min(SEARCHED_QUERIES);
        for (i, query) in queries.iter().take(SEARCHED_QUERIES).enumerate() {
            tracing::info!("Searching with query {}/{}: '{}'", i + 1, searched, query);
            let outcome = self.engine.search_all(query).await;
            let added = Resolver::merge_into(&mut found, outcome.papers);
            tracing::info!("Query {} added {} new papers (total: {})", i + 1, added, found.len());
            self.warnings.extend(outcome.warnings);
        }

        self.papers = Resolver::select_recent(
            found,
            current_year(),
            self.config.search.recent_years,
            self.config.search.max_results,
        );
        if self.papers.is_empty() {
            tracing::warn!("No recent papers found for topic: {}", topic);
        } else {
            tracing::info!("Found {} recent papers for topic: {}", self.papers.len(), topic);
        }
        &self.papers
    }

    pub fn grade_papers(&mut self) -> &BTreeMap<String, PaperQualityScore> {
        let year = current_year();
        self.grades = self
            .papers
            .iter()
            .map(|p| (p.id.clone(), PaperGrader::grade(p, year)))
            .collect();
        &self.grades
    }

    pub async fn analyze_gaps(&mut self) -> &GapReport {
        let topic = self.topic.clone().unwrap_or_default();
        self.report = GapAnalyzer::analyze(&self.manager, &topic, &self.papers).await;
        &self.report
    }

    /// Gaps suited to the researcher's level, or all gaps when no level is set.
    pub fn prioritized_gaps(&self) -> Vec<GapFinding> {
        match self.expertise {
            Some(level) => GapAnalyzer::prioritize_by_expertise(&self.report.gaps, level),
            None => self.report.gaps.clone(),
        }
    }

    pub fn export(&self, format: ExportFormat, exported_at: DateTime<Utc>) -> Result<ExportArtifact> {
        let input = ExportInput {
            topic: self.topic.as_deref().unwrap_or(""),
            expertise: self.expertise,
            papers: &self.papers,
            grades: &self.grades,
            report: &self.report,
            exported_at,
            max_papers: self.config.max_export_papers,
        };
        Exporter::export(format, &input)
    }

    pub fn papers(&self) -> &[Paper] {
        &self.papers
    }

    pub fn grades(&self) -> &BTreeMap<String, PaperQualityScore> {
        &self.grades
    }

    pub fn warnings(&self) -> &[SearchWarning] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderFailure;
    use crate::layers::cache::SearchCache;
    use crate::layers::discovery::{CrossrefClient, RetryPolicy, SemanticScholarClient, Throttle};
    use crate::layers::providers::tests::ScriptedAdapter;
    use crate::layers::providers::{LlmAdapter, ProviderKind};
    use crate::layers::GapCategory;
    use mockito::{Matcher, Server};
    use reqwest::Client;
    use std::time::Duration;

    fn engine(server: &Server) -> SearchEngine {
        let retry = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
        };
        SearchEngine::with_clients(
            SemanticScholarClient::new(Client::new(), None, Throttle::new(Duration::ZERO), retry, Duration::from_secs(5))
                .with_base_url(server.url()),
            CrossrefClient::new(
                Client::new(),
                None,
                "test@example.com",
                Throttle::new(Duration::ZERO),
                retry,
                Duration::from_secs(5),
                5,
            )
            .with_base_url(server.url()),
            SearchCache::new(true, Duration::from_secs(60), 16),
            20,
            20,
        )
    }

    fn semantic_scholar_body() -> String {
        let year = current_year() - 1;
        serde_json::json!({
            "data": [
                {
                    "paperId": "p1",
                    "title": "Contrastive Pretraining for Dense Retrieval",
                    "year": year,
                    "venue": "ACM SIGIR",
                    "abstract": "A novel evaluation of dense retrieval in practical systems.",
                    "authors": [{"name": "Grace Hopper"}],
                    "citationCount": 30
                },
                {
                    "paperId": "p2",
                    "title": "Sparse Lexical Expansion Revisited",
                    "year": year - 1,
                    "venue": "Journal of Information Retrieval",
                    "authors": [{"name": "Alan Turing"}],
                    "citationCount": 8
                },
                {
                    "paperId": "p3",
                    "title": "A Retrieval Study From Long Ago",
                    "year": current_year() - 15,
                    "authors": [{"name": "Old Author"}],
                    "citationCount": 3
                }
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_full_pipeline_with_failed_crossref_and_model() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/graph/v1/paper/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(semantic_scholar_body())
            .create_async()
            .await;
        server
            .mock("GET", "/works")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let adapter: Box<dyn LlmAdapter> = Box::new(ScriptedAdapter::new(
            ProviderKind::Gemini,
            vec![Err(ProviderFailure::RateLimited)],
        ));
        let manager = ProviderManager::with_adapters(vec![adapter], 0, Duration::ZERO);
        let config = Config::from_lookup(|_| None);
        let mut session = ResearchSession::with_parts(config, manager, engine(&server));
        session.set_expertise(Some(ExpertiseLevel::Beginner));

        let papers = session.find_papers("dense retrieval").await;
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].title, "Contrastive Pretraining for Dense Retrieval");
        assert!(session.warnings().iter().all(|w| w.kind == "http"));
        assert!(!session.warnings().is_empty());

        assert_eq!(session.grade_papers().len(), 2);

        let report = session.analyze_gaps().await;
        assert!(report.gaps.is_empty());
        assert!(report.failed());
        assert!(session.prioritized_gaps().is_empty());

        let exported_at = Utc::now();
        let artifact = session.export(ExportFormat::Json, exported_at).unwrap();
        let (_, bytes) = artifact.files()[0];
        let doc: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(doc["papers"].as_array().map(|a| a.len()), Some(2));
        assert_eq!(doc["metadata"]["graded_papers"], 2);
        assert_eq!(doc["metadata"]["analysis_error"]["kind"], "provider_unavailable");
    }

    #[tokio::test]
    async fn test_gaps_are_found_and_prioritized() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/graph/v1/paper/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(semantic_scholar_body())
            .create_async()
            .await;
        server
            .mock("GET", "/works")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"message": {"items": []}}"#)
            .create_async()
            .await;

        let answer = serde_json::json!([
            {"category": "application", "description": "Dense retrieval is untested in legal search", "confidence": 0.7, "supporting_papers": [1]},
            {"category": "theoretical", "description": "No sophisticated account of why contrastive pretraining helps", "confidence": 0.9}
        ])
        .to_string();
        // Query generation consumes the first answer; the gap analysis gets the second.
        let adapter: Box<dyn LlmAdapter> = Box::new(ScriptedAdapter::new(
            ProviderKind::OpenAi,
            vec![Ok(r#"["dense passage retrieval", "neural ranking models"]"#.to_string()), Ok(answer)],
        ));
        let manager = ProviderManager::with_adapters(vec![adapter], 0, Duration::ZERO);
        let mut session = ResearchSession::with_parts(Config::from_lookup(|_| None), manager, engine(&server));
        session.set_expertise(Some(ExpertiseLevel::Intermediate));

        session.find_papers("dense retrieval").await;
        assert!(session.warnings().is_empty());
        let first_id = session.papers()[0].id.clone();

        // Sparse years and few venues add heuristic gaps behind the model's own.
        let report = session.analyze_gaps().await;
        assert_eq!(report.gaps.len(), crate::layers::analysis::MAX_GAPS);
        assert_eq!(report.gaps[0].confidence(), 0.9);
        assert_eq!(report.gaps[1].category, GapCategory::Application);
        assert!(report.gaps[1].supporting_papers.contains(&first_id));
        assert!(report.gaps[2..].iter().all(|g| g.category == GapCategory::Temporal));

        // The theoretical gap needs an expert and is filtered out for an intermediate researcher.
        let prioritized = session.prioritized_gaps();
        assert_eq!(prioritized.len(), 4);
        assert_eq!(prioritized[0].category, GapCategory::Application);
        assert!(prioritized.iter().all(|g| g.category != GapCategory::Theoretical));
    }
}
