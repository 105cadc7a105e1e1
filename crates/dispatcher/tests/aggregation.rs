use std::sync::Arc;

use diagnosis_domain::{CellErrorKind, Grade, ParseOutcome, ParsedFields, ResultAggregator};
use diagnosis_testing_utils::{CellBuilder, JobBuilder, MockAnswerParser};

#[test]
fn test_degraded_grid_is_explained_by_warnings() {
    let job = JobBuilder::new()
        .with_brands(&["Acme", "Globex"])
        .with_models(&["deepseek", "qwen"])
        .with_questions(&["q1", "q2"])
        .build();
    let parser = MockAnswerParser::ranked(2, 0.5)
        .with_brand(
            "Globex",
            ParsedFields {
                brand_mentioned: false,
                rank: -1,
                sentiment: 0.0,
                cited_sources: Vec::new(),
            },
        )
        .with_unreadable("garbled");
    let cells = vec![
        CellBuilder::new("Acme", "deepseek", 0).succeeded("ok").build(),
        CellBuilder::new("Acme", "deepseek", 1).succeeded("garbled").build(),
        CellBuilder::new("Acme", "qwen", 0).failed(CellErrorKind::ConnectionError).build(),
        CellBuilder::new("Acme", "qwen", 1).failed(CellErrorKind::GlobalTimeout).build(),
        CellBuilder::new("Globex", "deepseek", 0).succeeded("ok").build(),
        CellBuilder::new("Globex", "deepseek", 1)
            .succeeded("ok")
            .with_parse(ParseOutcome::failed("no json"))
            .build(),
        CellBuilder::new("Globex", "qwen", 0).failed(CellErrorKind::CircuitOpen).build(),
        CellBuilder::new("Globex", "qwen", 1).failed(CellErrorKind::Timeout).build(),
    ];

    let report = ResultAggregator::new(Arc::new(parser.clone())).aggregate(&job, &cells);

    // the pre-parsed cell is not parsed again
    assert_eq!(parser.call_count(), 3);

    let acme = report.brand_score("Acme").unwrap();
    assert_eq!(acme.score, 98.0);
    assert_eq!(acme.sample_size, 1);
    assert!(acme.is_primary);

    // a parsed "not mentioned" answer is a real low score, not missing data
    let globex = report.brand_score("Globex").unwrap();
    assert_eq!(globex.score, 30.0);
    assert_eq!(globex.grade, Grade::D);
    assert_eq!(globex.average_rank, None);

    assert_eq!(report.summary.succeeded, 4);
    assert_eq!(report.summary.parse_failures, 2);
    assert_eq!(report.summary.failed, 2);
    assert_eq!(report.summary.timed_out, 2);

    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("qwen") && w.contains("circuit_open")));
    assert!(report.warnings.iter().any(|w| w.contains("2 个成功回答无法解析")));
    assert!(report.warnings.iter().any(|w| w.contains("1 个单元因任务整体超时")));
    assert!(!report.warnings.iter().any(|w| w.contains("品牌")));
}

#[test]
fn test_brand_with_only_unreadable_answers_gets_no_score() {
    let job = JobBuilder::new().with_id("job-unreadable").with_brands(&["Acme"]).build();
    let parser = MockAnswerParser::ranked(1, 0.0).with_unreadable("???");
    let cells = vec![CellBuilder::new("Acme", "deepseek", 0)
        .with_job_id("job-unreadable")
        .succeeded("???")
        .build()];

    let report = ResultAggregator::new(Arc::new(parser)).aggregate(&job, &cells);

    assert_eq!(report.job_id.as_str(), "job-unreadable");

    assert!(report.brand_score("Acme").is_none());
    assert!(report.warnings.iter().any(|w| w.contains("均无法解析")));
}

#[test]
fn test_newer_duplicate_wins_regardless_of_order() {
    let job = JobBuilder::new().build();
    let older = CellBuilder::new("Acme", "deepseek", 0)
        .with_question("Which brands lead in {brand}'s market?")
        .succeeded("first")
        .build();
    let newer = CellBuilder::new("Acme", "deepseek", 0)
        .with_question("Which brands lead in {brand}'s market?")
        .succeeded("second")
        .updated_at(older.updated_at + chrono::Duration::seconds(1))
        .build();
    let aggregator = ResultAggregator::new(Arc::new(MockAnswerParser::ranked(3, 0.0)));

    let forward = aggregator.aggregate(&job, &[older.clone(), newer.clone()]);
    let backward = aggregator.aggregate(&job, &[newer, older]);

    assert_eq!(forward.deduplicated_cells.len(), 1);
    assert_eq!(forward.deduplicated_cells[0].raw_answer.as_deref(), Some("second"));
    assert_eq!(forward, backward);
}
