/*!
 * Cross-page continuity tests: pair ids, carryover hand-off and the
 * two-page batch scenario
 */

use std::time::Duration;

use inkbridge::continuity::{
    edge_groups, pair_id, CarryoverJournal, CarryoverStore, ContinuityConfig, ContinuityEngine, Edge, JournalEvent,
};
use inkbridge::page::{ContinuityRole, PageContext, PageStatus};
use inkbridge::pipeline::{PagePipeline, PipelineConfig};
use inkbridge::providers::mock::MockProvider;
use inkbridge::translation::BatchingConfig;

use crate::common::{create_temp_dir, init_logging, page, region, translator};

fn carrier_page(shift_x: f32) -> PageContext {
    page(
        "p1",
        0,
        vec![
            region("p1-a", 200.0, 100.0, 400.0, 140.0, "こんにちは"),
            region("p1-b", 200.0 + shift_x, 920.0, 400.0 + shift_x, 950.0, "ずっと"),
            region("p1-c", 200.0 + shift_x, 955.0, 400.0 + shift_x, 985.0, "待っていた"),
        ],
    )
}

fn consumer_page(shift_x: f32) -> PageContext {
    page(
        "p2",
        1,
        vec![
            region("p2-a", 200.0 + shift_x, 10.0, 400.0 + shift_x, 40.0, "あなたを"),
            region("p2-b", 200.0, 600.0, 400.0, 640.0, "はい"),
        ],
    )
}

fn linked_pair_id(carrier_shift: f32, consumer_shift: f32) -> Option<String> {
    let mut prev = carrier_page(carrier_shift);
    let mut next = consumer_page(consumer_shift);
    let engine = ContinuityEngine::new(ContinuityConfig::default(), CarryoverStore::default());
    let report = engine.link_pages(&mut prev, &mut next);
    assert_eq!(report.pairs.len(), 1, "carrier shift {}, consumer shift {}", carrier_shift, consumer_shift);
    report.pairs.first().map(|p| p.pair_id.clone())
}

#[test]
fn test_pairId_shouldIgnoreJitterAndTopShift() {
    let baseline = linked_pair_id(0.0, 0.0);
    assert!(baseline.is_some());
    for carrier_shift in [-20.0, -5.0, 7.0, 20.0] {
        assert_eq!(linked_pair_id(carrier_shift, 0.0), baseline);
    }
    for consumer_shift in [-60.0, 30.0, 80.0] {
        assert_eq!(linked_pair_id(0.0, consumer_shift), baseline);
    }
}

#[test]
fn test_pairId_jitterAcrossColumnEdges_shouldKeepId() {
    let baseline = linked_pair_id(0.0, 0.0);
    // Carrier centre moves through 256 and 384
    for carrier_shift in [-46.0, -45.0, -44.0, -43.0, 83.0, 84.0, 85.0] {
        assert_eq!(linked_pair_id(carrier_shift, 0.0), baseline, "carrier shift {}", carrier_shift);
    }
}

#[test]
fn test_pairId_shouldMatchBottomGroupOfCarrier() {
    let context = carrier_page(0.0);
    let groups = edge_groups(&context, Edge::Bottom, &ContinuityConfig::default());
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].text, "ずっと待っていた");
    assert_eq!(Some(pair_id("p1", &groups[0])), linked_pair_id(0.0, 0.0));
    assert_ne!(pair_id("p9", &groups[0]), pair_id("p1", &groups[0]));
}

#[test]
fn test_carryover_shouldHandOffExactlyOnce() {
    let dir = create_temp_dir().unwrap();
    let journal = CarryoverJournal::open(dir.path().join("carryover.db")).unwrap();
    let store = CarryoverStore::new(Duration::from_secs(60), 8).with_journal(journal.clone());

    store.put("pair-1", "p1", "for you.");
    assert_eq!(store.get("pair-1").as_deref(), Some("for you."));
    assert_eq!(store.consume("pair-1", "p2").as_deref(), Some("for you."));
    assert_eq!(store.consume("pair-1", "p2"), None);
    assert_eq!(store.get("pair-1"), None);
    assert!(store.is_empty());

    let events: Vec<String> = journal.events_for("pair-1").unwrap().into_iter().map(|r| r.event).collect();
    assert_eq!(
        events,
        vec![
            JournalEvent::Put.as_str().to_string(),
            JournalEvent::Consume.as_str().to_string(),
            JournalEvent::Miss.as_str().to_string(),
        ]
    );
}

#[tokio::test]
async fn test_processBatch_shouldRenderBothHalvesAcrossPageBreak() {
    init_logging();
    let dir = create_temp_dir().unwrap();
    let journal_path = dir.path().join("carryover.db");
    let config = PipelineConfig {
        report_dir: Some(dir.path().join("reports")),
        journal_path: Some(journal_path.clone()),
        ..PipelineConfig::default()
    };
    let pipeline = PagePipeline::new(config)
        .with_translator(translator(vec![MockProvider::working()], BatchingConfig::default()));

    let outcomes = pipeline
        .process_batch(vec![consumer_page(0.0), carrier_page(0.0)], None, None, None)
        .await;

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].context.id, "p1");
    assert!(outcomes.iter().all(|o| o.result.status == PageStatus::Completed));

    let first = &outcomes[0].context;
    let carrier = first.region("p1-b").unwrap();
    assert_eq!(carrier.continuity.role, Some(ContinuityRole::Carrier));
    assert_eq!(carrier.target_text.as_deref(), Some("[tr] ずっと待っていた"));
    assert_eq!(first.region("p1-c").unwrap().target_text.as_deref(), Some(""));
    assert_eq!(first.region("p1-a").unwrap().target_text.as_deref(), Some("[tr] こんにちは"));

    let second = &outcomes[1].context;
    let consumer = second.region("p2-a").unwrap();
    assert_eq!(consumer.continuity.role, Some(ContinuityRole::Consumer));
    assert_eq!(consumer.target_text.as_deref(), Some("[tr] あなたを"));
    assert_eq!(second.metrics.carryover_consumed, 1);
    assert!(pipeline.continuity().store().is_empty());

    let pair = consumer.continuity.pair_id.clone().unwrap();
    let journal = CarryoverJournal::open(&journal_path).unwrap();
    let put = journal
        .events_for(&pair)
        .unwrap()
        .into_iter()
        .find(|r| r.event == JournalEvent::Put.as_str())
        .unwrap();
    assert_eq!(put.text, consumer.target_text);

    for outcome in &outcomes {
        assert!(outcome.result.report_path.as_ref().is_some_and(|p| p.exists()));
    }
}

#[tokio::test]
async fn test_processBatch_continuityDisabled_shouldTranslatePagesIndependently() {
    let pipeline = PagePipeline::new(PipelineConfig::default())
        .with_translator(translator(vec![MockProvider::working()], BatchingConfig::default()))
        .with_continuity(ContinuityConfig {
            enabled: false,
            ..ContinuityConfig::default()
        });

    let outcomes = pipeline
        .process_batch(vec![carrier_page(0.0), consumer_page(0.0)], Some(1), None, None)
        .await;

    let first = &outcomes[0].context;
    assert_eq!(first.region("p1-b").unwrap().target_text.as_deref(), Some("[tr] ずっと"));
    assert_eq!(first.region("p1-c").unwrap().target_text.as_deref(), Some("[tr] 待っていた"));
    assert_eq!(outcomes[1].context.region("p2-a").unwrap().target_text.as_deref(), Some("[tr] あなたを"));
    assert_eq!(outcomes[1].context.metrics.carryover_consumed, 0);
}
