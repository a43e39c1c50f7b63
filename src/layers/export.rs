// Pure serialization of a finished session: inputs in, byte buffers out
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook};
use serde::Serialize;

use crate::error::{GapFinderError, Result};
use crate::layers::analysis::{AnalysisError, GapReport};
use crate::layers::grading::PaperQualityScore;
use crate::layers::providers::ProviderKind;
use crate::layers::{ExpertiseLevel, GapFinding, Paper};

const EXCEL_ABSTRACT_CHARS: usize = 500;
const MAX_COLUMN_WIDTH: usize = 50;
const HEADER_FILL: u32 = 0x366092;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Json,
    #[value(alias = "yml")]
    Yaml,
    #[value(name = "csv", alias = "csv-bundle")]
    CsvBundle,
    #[value(alias = "xlsx")]
    Excel,
}

impl ExportFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Yaml => "yaml",
            ExportFormat::CsvBundle => "csv",
            ExportFormat::Excel => "excel",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            "csv" | "csv-bundle" => Ok(ExportFormat::CsvBundle),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

/// Everything an export needs. `grades` is keyed by paper id.
pub struct ExportInput<'a> {
    pub topic: &'a str,
    pub expertise: Option<ExpertiseLevel>,
    pub papers: &'a [Paper],
    pub grades: &'a BTreeMap<String, PaperQualityScore>,
    pub report: &'a GapReport,
    pub exported_at: DateTime<Utc>,
    pub max_papers: usize,
}

impl<'a> ExportInput<'a> {
    fn exported_papers(&self) -> &'a [Paper] {
        &self.papers[..self.papers.len().min(self.max_papers)]
    }

    fn exported_grades(&self) -> Vec<(&'a Paper, &'a PaperQualityScore)> {
        let grades = self.grades;
        self.exported_papers()
            .iter()
            .filter_map(|p| grades.get(&p.id).map(|g| (p, g)))
            .collect()
    }

    fn average_quality(&self) -> f64 {
        let grades = self.exported_grades();
        if grades.is_empty() {
            return 0.0;
        }
        let mean = grades.iter().map(|(_, g)| g.overall_score).sum::<f64>() / grades.len() as f64;
        (mean * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportArtifact {
    Single { file_name: String, bytes: Vec<u8> },
    Bundle(Vec<(String, Vec<u8>)>),
}

impl ExportArtifact {
    pub fn files(&self) -> Vec<(&str, &[u8])> {
        match self {
            ExportArtifact::Single { file_name, bytes } => vec![(file_name.as_str(), bytes.as_slice())],
            ExportArtifact::Bundle(files) => files.iter().map(|(n, b)| (n.as_str(), b.as_slice())).collect(),
        }
    }
}

#[derive(Serialize)]
struct ExportMetadata<'a> {
    export_date: String,
    topic: &'a str,
    user_expertise: Option<ExpertiseLevel>,
    total_papers: usize,
    papers_available: usize,
    truncated: bool,
    total_gaps: usize,
    graded_papers: usize,
    analysis_provider: Option<ProviderKind>,
    analysis_error: Option<&'a AnalysisError>,
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    metadata: ExportMetadata<'a>,
    papers: &'a [Paper],
    paper_grades: BTreeMap<&'a str, &'a PaperQualityScore>,
    research_gaps: &'a [GapFinding],
    year_histogram: &'a BTreeMap<i32, usize>,
}

impl<'a> ExportDocument<'a> {
    fn build(input: &ExportInput<'a>) -> Self {
        let papers = input.exported_papers();
        let grades = input.exported_grades();
        if papers.len() < input.papers.len() {
            tracing::info!("Export capped at {} of {} papers", papers.len(), input.papers.len());
        }

        Self {
            metadata: ExportMetadata {
                export_date: input.exported_at.to_rfc3339(),
                topic: input.topic,
                user_expertise: input.expertise,
                total_papers: papers.len(),
                papers_available: input.papers.len(),
                truncated: papers.len() < input.papers.len(),
                total_gaps: input.report.gaps.len(),
                graded_papers: grades.len(),
                analysis_provider: input.report.provider,
                analysis_error: input.report.error.as_ref(),
            },
            papers,
            paper_grades: grades.into_iter().map(|(p, g)| (p.title.as_str(), g)).collect(),
            research_gaps: &input.report.gaps,
            year_histogram: &input.report.year_histogram,
        }
    }
}

enum Cell {
    Text(String),
    Number(f64),
}

impl Cell {
    fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    fn optional(value: Option<&str>) -> Self {
        Cell::Text(value.unwrap_or_default().to_string())
    }

    fn render(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
        }
    }
}

struct Table {
    name: &'static str,
    headers: &'static [&'static str],
    rows: Vec<Vec<Cell>>,
}

const PAPER_HEADERS: &[&str] = &[
    "Id",
    "Title",
    "Authors",
    "Year",
    "Venue",
    "Abstract",
    "Citations",
    "DOI",
    "URL",
    "Source",
    "Overall_Grade",
    "Overall_Score",
    "Methodology_Score",
    "Citation_Impact_Score",
    "Novelty_Score",
    "Clarity_Score",
    "Applicability_Score",
    "Explanation",
    "Strengths",
    "Weaknesses",
];

const GAP_HEADERS: &[&str] = &[
    "Gap_Type",
    "Description",
    "Confidence_Score",
    "Supporting_Papers",
    "Supporting_Evidence",
    "Potential_Impact",
    "Suggested_Approach",
    "Key_Questions",
    "Novelty_Grade",
    "Impact_Grade",
    "Research_Suggestions",
    "Methodology_Suggestions",
    "Required_Expertise",
    "Estimated_Timeline",
    "Required_Resources",
];

const SUMMARY_HEADERS: &[&str] = &[
    "Export_Date",
    "Research_Topic",
    "User_Expertise",
    "Total_Papers",
    "Papers_Available",
    "Graded_Papers",
    "Research_Gaps_Identified",
    "Average_Paper_Quality",
    "Analysis_Error",
];

fn papers_table(input: &ExportInput<'_>, abstract_limit: Option<usize>) -> Table {
    let rows = input
        .exported_papers()
        .iter()
        .map(|paper| {
            let abstract_text = match abstract_limit {
                Some(limit) if paper.abstract_text.chars().count() > limit => {
                    format!("{}...", paper.abstract_text.chars().take(limit).collect::<String>())
                }
                _ => paper.abstract_text.clone(),
            };
            let mut row = vec![
                Cell::text(&paper.id),
                Cell::text(&paper.title),
                Cell::text(paper.authors.join("; ")),
                Cell::Number(f64::from(paper.year)),
                Cell::text(&paper.venue),
                Cell::Text(abstract_text),
                Cell::Number(f64::from(paper.citations)),
                Cell::optional(paper.doi.as_deref()),
                Cell::optional(paper.url.as_deref()),
                Cell::text(paper.source.to_string()),
            ];
            match input.grades.get(&paper.id) {
                Some(grade) => row.extend([
                    Cell::text(grade.overall_grade.as_str()),
                    Cell::Number(grade.overall_score),
                    Cell::Number(grade.methodology_score),
                    Cell::Number(grade.citation_impact_score),
                    Cell::Number(grade.novelty_score),
                    Cell::Number(grade.clarity_score),
                    Cell::Number(grade.applicability_score),
                    Cell::text(&grade.explanation),
                    Cell::text(grade.strengths.join("; ")),
                    Cell::text(grade.weaknesses.join("; ")),
                ]),
                None => row.extend((0..10).map(|_| Cell::text(""))),
            }
            row
        })
        .collect();

    Table {
        name: "Papers",
        headers: PAPER_HEADERS,
        rows,
    }
}

fn gaps_table(input: &ExportInput<'_>) -> Table {
    let rows = input
        .report
        .gaps
        .iter()
        .map(|gap| {
            vec![
                Cell::text(gap.category.as_str()),
                Cell::text(&gap.description),
                Cell::Number(gap.confidence()),
                Cell::text(gap.supporting_papers.iter().cloned().collect::<Vec<_>>().join("; ")),
                Cell::text(gap.supporting_evidence.join("; ")),
                Cell::text(&gap.potential_impact),
                Cell::text(&gap.suggested_approach),
                Cell::text(gap.key_questions.join("; ")),
                Cell::text(format!("{:?}", gap.novelty)),
                Cell::text(format!("{:?}", gap.impact)),
                Cell::text(gap.research_suggestions.join("; ")),
                Cell::text(gap.methodology_suggestions.join("; ")),
                Cell::text(gap.required_expertise.as_str()),
                Cell::text(&gap.estimated_timeline),
                Cell::text(gap.required_resources.join("; ")),
            ]
        })
        .collect();

    Table {
        name: "Research_Gaps",
        headers: GAP_HEADERS,
        rows,
    }
}

fn summary_table(input: &ExportInput<'_>, export_date: String) -> Table {
    let row = vec![
        Cell::Text(export_date),
        Cell::text(input.topic),
        Cell::text(input.expertise.map(|e| e.as_str()).unwrap_or("Not Set")),
        Cell::Number(input.exported_papers().len() as f64),
        Cell::Number(input.papers.len() as f64),
        Cell::Number(input.exported_grades().len() as f64),
        Cell::Number(input.report.gaps.len() as f64),
        Cell::Number(input.average_quality()),
        Cell::optional(input.report.error.as_ref().map(|e| e.message.as_str())),
    ];

    Table {
        name: "Summary",
        headers: SUMMARY_HEADERS,
        rows: vec![row],
    }
}

pub struct Exporter;

impl Exporter {
    pub fn export(format: ExportFormat, input: &ExportInput<'_>) -> Result<ExportArtifact> {
        tracing::info!("Exporting {} papers as {}", input.exported_papers().len(), format);
        let artifact = match format {
            ExportFormat::Json => ExportArtifact::Single {
                file_name: "research_gaps.json".to_string(),
                bytes: Self::to_json(input)?,
            },
            ExportFormat::Yaml => ExportArtifact::Single {
                file_name: "research_gaps.yaml".to_string(),
                bytes: Self::to_yaml(input)?,
            },
            ExportFormat::CsvBundle => ExportArtifact::Bundle(Self::to_csv_bundle(input)?),
            ExportFormat::Excel => ExportArtifact::Single {
                file_name: "research_gaps.xlsx".to_string(),
                bytes: Self::to_excel(input)?,
            },
        };
        Ok(artifact)
    }

    pub fn to_json(input: &ExportInput<'_>) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&ExportDocument::build(input))?)
    }

    pub fn to_yaml(input: &ExportInput<'_>) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(&ExportDocument::build(input))?.into_bytes())
    }

    /// `papers.csv`, `research_gaps.csv` and `summary.csv`; list cells are joined with "; ".
    pub fn to_csv_bundle(input: &ExportInput<'_>) -> Result<Vec<(String, Vec<u8>)>> {
        let tables = [
            ("papers.csv", papers_table(input, None)),
            ("research_gaps.csv", gaps_table(input)),
            ("summary.csv", summary_table(input, input.exported_at.to_rfc3339())),
        ];

        tables
            .into_iter()
            .map(|(file_name, table)| Ok((file_name.to_string(), Self::write_csv(&table)?)))
            .collect()
    }

    fn write_csv(table: &Table) -> Result<Vec<u8>> {
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        wtr.write_record(table.headers)?;
        for row in &table.rows {
            wtr.write_record(row.iter().map(Cell::render))?;
        }
        wtr.into_inner()
            .map_err(|e| GapFinderError::Io(std::io::Error::other(e.to_string())))
    }

    /// Sheets `Papers`, `Research_Gaps` (only when there are gaps) and `Summary`.
    pub fn to_excel(input: &ExportInput<'_>) -> Result<Vec<u8>> {
        let mut tables = vec![papers_table(input, Some(EXCEL_ABSTRACT_CHARS))];
        if !input.report.gaps.is_empty() {
            tables.push(gaps_table(input));
        }
        tables.push(summary_table(
            input,
            input.exported_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ));

        let header = Format::new()
            .set_bold()
            .set_font_color(Color::White)
            .set_background_color(Color::RGB(HEADER_FILL))
            .set_align(FormatAlign::Center);

        let mut workbook = Workbook::new();
        for table in &tables {
            let sheet = workbook.add_worksheet();
            sheet.set_name(table.name)?;

            for (col, title) in table.headers.iter().enumerate() {
                sheet.write_string_with_format(0, col as u16, *title, &header)?;
            }
            for (r, row) in table.rows.iter().enumerate() {
                let r = (r + 1) as u32;
                for (col, cell) in row.iter().enumerate() {
                    match cell {
                        Cell::Text(s) if s.is_empty() => {}
                        Cell::Text(s) => {
                            sheet.write_string(r, col as u16, s)?;
                        }
                        Cell::Number(n) => {
                            sheet.write_number(r, col as u16, *n)?;
                        }
                    }
                }
            }

            for (col, title) in table.headers.iter().enumerate() {
                let longest = table
                    .rows
                    .iter()
                    .filter_map(|row| row.get(col))
                    .map(|cell| cell.render().chars().count())
                    .chain(std::iter::once(title.chars().count()))
                    .max()
                    .unwrap_or(0);
                sheet.set_column_width(col as u16, ((longest + 2).min(MAX_COLUMN_WIDTH)) as f64)?;
            }
        }

        Ok(workbook.save_to_buffer()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::analysis::GapAnalyzer;
    use crate::layers::grading::PaperGrader;
    use crate::layers::{sample_paper, GapCategory};
    use chrono::TimeZone;

    struct Fixture {
        papers: Vec<Paper>,
        grades: BTreeMap<String, PaperQualityScore>,
        report: GapReport,
    }

    impl Fixture {
        fn new(paper_count: usize, with_gaps: bool) -> Self {
            let papers: Vec<Paper> = (0..paper_count)
                .map(|i| sample_paper(&format!("Study number {} on sparse retrieval", i), 2020 + (i % 5) as i32, i as u32))
                .collect();
            let grades = papers
                .iter()
                .take(2)
                .map(|p| (p.id.clone(), PaperGrader::grade(p, 2025)))
                .collect();
            let mut report = GapReport {
                year_histogram: GapAnalyzer::year_histogram(&papers),
                ..GapReport::default()
            };
            if with_gaps {
                let mut gap = GapFinding::new(GapCategory::Methodological, "Few ablations, limited baselines", 0.8);
                gap.supporting_papers.insert(papers[0].id.clone());
                gap.research_suggestions = vec!["a".into(), "b".into()];
                report.gaps.push(gap);
            }
            Self { papers, grades, report }
        }

        fn input(&self, max_papers: usize) -> ExportInput<'_> {
            ExportInput {
                topic: "sparse retrieval",
                expertise: Some(ExpertiseLevel::Advanced),
                papers: &self.papers,
                grades: &self.grades,
                report: &self.report,
                exported_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
                max_papers,
            }
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("YML".parse::<ExportFormat>(), Ok(ExportFormat::Yaml));
        assert_eq!("csv-bundle".parse::<ExportFormat>(), Ok(ExportFormat::CsvBundle));
        assert_eq!("xlsx".parse::<ExportFormat>(), Ok(ExportFormat::Excel));
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_json_paper_count_is_capped() {
        let fixture = Fixture::new(7, true);
        for (max, expected) in [(100, 7), (3, 3), (0, 0)] {
            let bytes = Exporter::to_json(&fixture.input(max)).unwrap();
            let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(doc["papers"].as_array().map(|a| a.len()), Some(expected));
            assert_eq!(doc["metadata"]["total_papers"], expected);
            assert_eq!(doc["metadata"]["papers_available"], 7);
            assert_eq!(doc["metadata"]["truncated"], expected < 7);
        }
    }

    #[test]
    fn test_json_layout() {
        let fixture = Fixture::new(3, true);
        let bytes = Exporter::to_json(&fixture.input(100)).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(doc["metadata"]["export_date"], "2025-03-01T12:00:00+00:00");
        assert_eq!(doc["metadata"]["user_expertise"], "advanced");
        assert_eq!(doc["metadata"]["graded_papers"], 2);
        assert!(doc["metadata"]["analysis_error"].is_null());
        assert_eq!(doc["research_gaps"][0]["category"], "methodological");
        assert_eq!(doc["research_gaps"][0]["confidence_score"], 0.8);
        assert!(doc["paper_grades"]["Study number 0 on sparse retrieval"]["overall_grade"].is_string());
        assert_eq!(doc["year_histogram"]["2020"], 1);
        assert_eq!(doc["papers"][0]["abstract"], "");
    }

    #[test]
    fn test_yaml_matches_json_content() {
        let fixture = Fixture::new(2, false);
        let yaml = Exporter::to_yaml(&fixture.input(100)).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_slice(&yaml).unwrap();
        assert_eq!(doc["metadata"]["topic"].as_str(), Some("sparse retrieval"));
        assert_eq!(doc["papers"].as_sequence().map(|s| s.len()), Some(2));
        assert_eq!(doc["research_gaps"].as_sequence().map(|s| s.len()), Some(0));
    }

    #[test]
    fn test_csv_bundle_files() {
        let fixture = Fixture::new(4, true);
        let files = Exporter::to_csv_bundle(&fixture.input(3)).unwrap();
        let names: Vec<_> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["papers.csv", "research_gaps.csv", "summary.csv"]);

        let mut papers = csv::Reader::from_reader(files[0].1.as_slice());
        assert_eq!(papers.headers().unwrap().len(), PAPER_HEADERS.len());
        let rows: Vec<csv::StringRecord> = papers.records().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][2], "Ada Lovelace");
        assert!(!rows[0][10].is_empty());
        assert!(rows[2][10].is_empty());

        let mut gaps = csv::Reader::from_reader(files[1].1.as_slice());
        let gap: csv::StringRecord = gaps.records().next().unwrap().unwrap();
        assert_eq!(&gap[10], "a; b");

        let mut summary = csv::Reader::from_reader(files[2].1.as_slice());
        let row: csv::StringRecord = summary.records().next().unwrap().unwrap();
        assert_eq!(&row[3], "3");
        assert_eq!(&row[4], "4");
    }

    #[test]
    fn test_excel_is_a_workbook() {
        let fixture = Fixture::new(3, false);
        let bytes = Exporter::to_excel(&fixture.input(100)).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[test]
    fn test_export_dispatch() {
        let fixture = Fixture::new(1, true);
        match Exporter::export(ExportFormat::CsvBundle, &fixture.input(10)).unwrap() {
            ExportArtifact::Bundle(files) => assert_eq!(files.len(), 3),
            other => panic!("expected bundle, got {:?}", other.files().len()),
        }
        let artifact = Exporter::export(ExportFormat::Json, &fixture.input(10)).unwrap();
        assert_eq!(artifact.files()[0].0, "research_gaps.json");
    }
}
