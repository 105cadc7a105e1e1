//! # 结果聚合
//!
//! Turns the settled cells of one job into an [`AggregatedReport`]:
//! deduplication, answer parsing, brand scoring, the job-level quality score,
//! and the warnings that explain a degraded run.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{
    AggregatedReport, BrandScore, Cell, CellErrorKind, CellState, CellSummary, Job,
    ModelBreakdown, ParseOutcome, ParsedFields, QualityLevel, QualityScore,
};
use crate::ports::AnswerParser;
use crate::services::scoring::{self, round1, round3};

const COMPLETION_WEIGHT: f64 = 0.4;
const COMPLETENESS_WEIGHT: f64 = 0.3;
const SOURCE_WEIGHT: f64 = 0.2;
const SENTIMENT_WEIGHT: f64 = 0.1;

pub struct ResultAggregator {
    parser: Arc<dyn AnswerParser>,
}

impl ResultAggregator {
    pub fn new(parser: Arc<dyn AnswerParser>) -> Self {
        Self { parser }
    }

    /// Builds the report. Aggregating the same cells twice yields an
    /// identical report.
    pub fn aggregate(&self, job: &Job, cells: &[Cell]) -> AggregatedReport {
        let (mut cells, duplicates_removed) = deduplicate(cells);
        for cell in cells.iter_mut() {
            self.ensure_parsed(cell);
        }
        sort_for_display(job, &mut cells);

        let mut summary = summarize(&cells);
        summary.duplicates_removed = duplicates_removed;

        let mut warnings = Vec::new();
        let brand_scores = brand_scores(job, &cells, &mut warnings);
        model_warnings(job, &cells, &mut warnings);
        question_warnings(job, &cells, &mut warnings);
        if summary.parse_failures > 0 {
            warnings.push(format!(
                "{} 个成功回答无法解析，已排除在评分之外",
                summary.parse_failures
            ));
        }
        let global_timeouts = cells
            .iter()
            .filter(|c| matches!(&c.error, Some(e) if e.kind == CellErrorKind::GlobalTimeout))
            .count();
        if global_timeouts > 0 {
            warnings.push(format!("{global_timeouts} 个单元因任务整体超时被终止"));
        }

        AggregatedReport {
            job_id: job.job_id.clone(),
            primary_brand: job.primary_brand().map(str::to_string),
            brand_scores,
            quality: quality_score(&cells),
            model_breakdown: model_breakdown(job, &cells),
            summary,
            deduplicated_cells: cells,
            warnings,
        }
    }

    fn ensure_parsed(&self, cell: &mut Cell) {
        if cell.state != CellState::Success || cell.parsed_fields.is_some() {
            return;
        }
        let outcome = match cell.raw_answer.as_deref() {
            Some(raw) if !raw.trim().is_empty() => self.parser.parse(&cell.id.brand, raw),
            _ => ParseOutcome::failed("回答内容为空"),
        };
        cell.parsed_fields = Some(outcome);
    }
}

/// Keeps, per cell id, the cell with the newest `updated_at`; ties keep the
/// first occurrence.
fn deduplicate(cells: &[Cell]) -> (Vec<Cell>, usize) {
    let mut kept: Vec<Cell> = Vec::with_capacity(cells.len());
    let mut index = HashMap::with_capacity(cells.len());
    let mut removed = 0;
    for cell in cells {
        match index.get(&cell.id) {
            Some(&pos) => {
                removed += 1;
                let existing: &Cell = &kept[pos];
                if cell.updated_at > existing.updated_at {
                    kept[pos] = cell.clone();
                }
            }
            None => {
                index.insert(cell.id.clone(), kept.len());
                kept.push(cell.clone());
            }
        }
    }
    (kept, removed)
}

fn position(list: &[String], value: &str) -> usize {
    list.iter().position(|v| v == value).unwrap_or(list.len())
}

fn sort_for_display(job: &Job, cells: &mut [Cell]) {
    cells.sort_by(|a, b| {
        let key_a = (position(&job.brands, &a.id.brand), position(&job.models, &a.id.model));
        let key_b = (position(&job.brands, &b.id.brand), position(&job.models, &b.id.model));
        key_a
            .cmp(&key_b)
            .then_with(|| a.id.brand.cmp(&b.id.brand))
            .then_with(|| a.id.model.cmp(&b.id.model))
            .then_with(|| a.id.question_index.cmp(&b.id.question_index))
    });
}

fn parsed_fields(cell: &Cell) -> Option<&ParsedFields> {
    match (&cell.state, &cell.parsed_fields) {
        (CellState::Success, Some(outcome)) if outcome.parsed => Some(&outcome.fields),
        _ => None,
    }
}

fn summarize(cells: &[Cell]) -> CellSummary {
    let mut summary = CellSummary {
        total: cells.len(),
        ..Default::default()
    };
    for cell in cells {
        match cell.state {
            CellState::Success => {
                summary.succeeded += 1;
                if parsed_fields(cell).is_none() {
                    summary.parse_failures += 1;
                }
            }
            CellState::Failed => summary.failed += 1,
            CellState::TimedOut => summary.timed_out += 1,
            // unsettled cells should not reach aggregation
            CellState::Pending | CellState::InFlight => summary.failed += 1,
        }
    }
    summary
}

/// Brands in job order, then any brand only present in the cells.
fn ordered_dimension<'a>(declared: &'a [String], seen: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut ordered: Vec<&str> = declared.iter().map(String::as_str).collect();
    for value in seen {
        if !ordered.contains(&value) {
            ordered.push(value);
        }
    }
    ordered
}

fn brand_scores(job: &Job, cells: &[Cell], warnings: &mut Vec<String>) -> Vec<BrandScore> {
    let brands = ordered_dimension(&job.brands, cells.iter().map(|c| c.id.brand.as_str()));
    let mut scores = Vec::with_capacity(brands.len());

    for brand in brands {
        let brand_cells: Vec<&Cell> = cells.iter().filter(|c| c.id.brand == brand).collect();
        let successes = brand_cells
            .iter()
            .filter(|c| c.state == CellState::Success)
            .count();
        if successes == 0 {
            warnings.push(format!("品牌 {brand} 没有任何成功的回答，未计算得分"));
            continue;
        }

        let samples: Vec<&ParsedFields> = brand_cells.iter().filter_map(|c| parsed_fields(c)).collect();
        let Some((score, grade)) = scoring::rate(samples.iter().copied()) else {
            warnings.push(format!("品牌 {brand} 的 {successes} 个回答均无法解析，未计算得分"));
            continue;
        };

        let n = samples.len() as f64;
        let mentioned = samples.iter().filter(|f| f.brand_mentioned).count();
        let ranks: Vec<f64> = samples
            .iter()
            .filter(|f| f.is_ranked())
            .map(|f| f64::from(f.rank))
            .collect();
        let average_rank = if ranks.is_empty() {
            None
        } else {
            Some(round1(ranks.iter().sum::<f64>() / ranks.len() as f64))
        };
        let sentiment_total: f64 = samples.iter().map(|f| f.sentiment.clamp(-1.0, 1.0)).sum();

        scores.push(BrandScore {
            brand: brand.to_string(),
            score,
            grade,
            sample_size: samples.len(),
            mention_rate: round3(mentioned as f64 / n),
            average_rank,
            average_sentiment: round3(sentiment_total / n),
            is_primary: job.primary_brand() == Some(brand),
        });
    }
    scores
}

fn model_warnings(job: &Job, cells: &[Cell], warnings: &mut Vec<String>) {
    let models = ordered_dimension(&job.models, cells.iter().map(|c| c.id.model.as_str()));
    for model in models {
        let model_cells: Vec<&Cell> = cells.iter().filter(|c| c.id.model == model).collect();
        if model_cells.is_empty() || model_cells.iter().any(|c| c.state == CellState::Success) {
            continue;
        }
        let mut kinds: Vec<&'static str> = Vec::new();
        for cell in &model_cells {
            if let Some(error) = &cell.error {
                let kind = error.kind.as_str();
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
        }
        if kinds.is_empty() {
            warnings.push(format!("模型 {model} 没有任何成功的回答"));
        } else {
            warnings.push(format!(
                "模型 {model} 没有任何成功的回答 ({})",
                kinds.join(", ")
            ));
        }
    }
}

fn question_warnings(job: &Job, cells: &[Cell], warnings: &mut Vec<String>) {
    for (index, question) in job.questions.iter().enumerate() {
        let has_cells = cells.iter().any(|c| c.id.question_index == index);
        let answered = cells
            .iter()
            .any(|c| c.id.question_index == index && c.state == CellState::Success);
        if has_cells && !answered {
            warnings.push(format!("问题 #{} 没有任何成功的回答: {question}", index + 1));
        }
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn quality_score(cells: &[Cell]) -> QualityScore {
    let successes: Vec<&Cell> = cells
        .iter()
        .filter(|c| c.state == CellState::Success)
        .collect();

    let complete = successes
        .iter()
        .filter(|c| parsed_fields(c).is_some_and(|f| !f.is_default()))
        .count();
    let with_sources = successes
        .iter()
        .filter(|c| parsed_fields(c).is_some_and(|f| !f.cited_sources.is_empty()))
        .count();
    let with_sentiment = successes
        .iter()
        .filter(|c| parsed_fields(c).is_some_and(|f| f.sentiment != 0.0))
        .count();

    let completion_rate = ratio(successes.len(), cells.len());
    let field_completeness = ratio(complete, successes.len());
    let source_presence = ratio(with_sources, successes.len());
    let sentiment_presence = ratio(with_sentiment, successes.len());

    let raw = 100.0
        * (COMPLETION_WEIGHT * completion_rate
            + COMPLETENESS_WEIGHT * field_completeness
            + SOURCE_WEIGHT * source_presence
            + SENTIMENT_WEIGHT * sentiment_presence);

    QualityScore {
        score: round1(raw),
        level: QualityLevel::from_score(raw),
        completion_rate: round3(completion_rate),
        field_completeness: round3(field_completeness),
        source_presence: round3(source_presence),
        sentiment_presence: round3(sentiment_presence),
    }
}

fn model_breakdown(job: &Job, cells: &[Cell]) -> Vec<ModelBreakdown> {
    ordered_dimension(&job.models, cells.iter().map(|c| c.id.model.as_str()))
        .into_iter()
        .map(|model| {
            let model_cells: Vec<&Cell> = cells.iter().filter(|c| c.id.model == model).collect();
            let count = |state: CellState| model_cells.iter().filter(|c| c.state == state).count();
            let succeeded = count(CellState::Success);
            ModelBreakdown {
                model: model.to_string(),
                total: model_cells.len(),
                succeeded,
                failed: model_cells.len() - succeeded - count(CellState::TimedOut),
                timed_out: count(CellState::TimedOut),
                success_rate: round3(ratio(succeeded, model_cells.len())),
            }
        })
        .collect()
}
