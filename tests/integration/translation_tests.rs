/*!
 * Translation tests: chunking, strict retry, rejection of echoed output,
 * fallback and the quality gate, driven through page contexts
 */

use inkbridge::errors::ProviderError;
use inkbridge::page::{LanguagePair, PageContext, Region, FAILED_TRANSLATION};
use inkbridge::pipeline::{PagePipeline, PipelineConfig};
use inkbridge::providers::mock::MockProvider;
use inkbridge::translation::{BatchingConfig, QualityConfig, QualityGate, ResponseFormat};
use tokio_test::assert_ok;

use crate::common::{init_logging, page, region, texts, translator};

const LINES: [&str; 9] = [
    "おはよう", "今日は晴れ", "どこへ行くの", "学校だよ", "遅刻するぞ", "走れ", "待って", "置いていかないで", "ごめん",
];

fn dialogue_page(id: &str) -> PageContext {
    let regions: Vec<Region> = LINES
        .iter()
        .enumerate()
        .map(|(n, text)| {
            let y = 60.0 + n as f32 * 90.0;
            region(&format!("{}-{}", id, n), 100.0, y, 500.0, y + 40.0, text)
        })
        .collect();
    page(id, 0, regions)
}

fn reversing() -> MockProvider {
    MockProvider::working().with_translator(|text| format!("<{}>", text.chars().rev().collect::<String>()))
}

fn targets(context: &PageContext) -> Vec<Option<String>> {
    context.regions.iter().map(|r| r.target_text.clone()).collect()
}

fn without_quality_gate() -> QualityGate {
    QualityGate::new(QualityConfig {
        enabled: false,
        ..QualityConfig::default()
    })
}

#[tokio::test]
async fn test_translateRegions_chunked_shouldMatchUnsplitIndexForIndex() {
    init_logging();
    let single = reversing();
    let mut unsplit = dialogue_page("a");
    translator(vec![single.clone()], BatchingConfig::default())
        .translate_regions(&mut unsplit)
        .await;
    assert_eq!(single.request_count(), 1);

    for (max_chars, max_items) in [(12, 40), (10_000, 2), (20, 3)] {
        let chunked_provider = reversing();
        let config = BatchingConfig {
            max_chars_per_request: max_chars,
            max_items_per_request: max_items,
            max_parallel_slices: 3,
            ..BatchingConfig::default()
        };
        let mut chunked = dialogue_page("a");
        translator(vec![chunked_provider.clone()], config)
            .translate_regions(&mut chunked)
            .await;

        assert_eq!(targets(&chunked), targets(&unsplit), "chars {}, items {}", max_chars, max_items);
        assert!(chunked_provider.request_count() > 1);
    }
    assert_eq!(unsplit.regions[0].target_text.as_deref(), Some("<うよはお>"));
}

#[tokio::test]
async fn test_pipeline_missingLines_shouldStrictRetryOnceThenFail() {
    let provider = MockProvider::missing_lines(2);
    let pipeline = PagePipeline::new(PipelineConfig::default())
        .with_translator(translator(vec![provider.clone()], BatchingConfig::default()))
        .with_quality_gate(without_quality_gate());

    let mut context = page(
        "p",
        0,
        vec![
            region("r0", 10.0, 10.0, 300.0, 50.0, "一つ目"),
            region("r1", 10.0, 100.0, 300.0, 140.0, "二つ目"),
            region("r2", 10.0, 200.0, 300.0, 240.0, "三つ目"),
            region("r3", 10.0, 300.0, 300.0, 340.0, "四つ目"),
        ],
    );
    let result = pipeline.process(&mut context, None).await;

    assert!(result.is_success());
    assert!(result.partial_success);
    assert_eq!((result.succeeded_regions, result.failed_regions), (2, 2));
    assert_eq!(provider.request_count(), 2);
    assert_eq!(context.metrics.translation.strict_retries, 1);
    assert_eq!(context.regions[2].target_text.as_deref(), Some(FAILED_TRANSLATION));
}

#[tokio::test]
async fn test_pipeline_qualityGate_shouldRecoverFailedRegions() {
    let provider = MockProvider::missing_lines(2);
    let pipeline = PagePipeline::new(PipelineConfig::default())
        .with_translator(translator(vec![provider], BatchingConfig::default()));

    let mut context = page(
        "p",
        0,
        vec![
            region("r0", 10.0, 10.0, 300.0, 50.0, "一つ目です"),
            region("r1", 10.0, 100.0, 300.0, 140.0, "二つ目です"),
            region("r2", 10.0, 200.0, 300.0, 240.0, "三つ目です"),
            region("r3", 10.0, 300.0, 300.0, 340.0, "四つ目です"),
        ],
    );
    let result = pipeline.process(&mut context, None).await;

    assert_eq!(result.failed_regions, 0);
    assert!(!result.partial_success);
    assert!(context.metrics.quality_retries >= 2);
    assert!(context.regions.iter().all(|r| r.quality_score.is_some_and(|s| s > 0.0)));
}

#[tokio::test]
async fn test_translateBatch_echo_shouldFailEveryItemForNonLatinPairs() {
    for (source, lines) in [("ko", ["안녕하세요", "감사합니다", "잘 가"]), ("zh", ["你好", "谢谢你", "再见了朋友"])] {
        let languages = LanguagePair::new(source, "en");
        let out = translator(vec![MockProvider::echo()], BatchingConfig::default())
            .translate_batch(&texts(&lines), None, ResponseFormat::Numbered, &languages)
            .await;
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|t| t == FAILED_TRANSLATION), "{}: {:?}", source, out);
    }
}

#[tokio::test]
async fn test_pipeline_transientFailure_shouldFallBackToNextSlot() {
    let primary = MockProvider::failing(ProviderError::RateLimitExceeded("slow down".into())).named("ollama", "big");
    let backup = MockProvider::working().named("ollama", "small");
    let pipeline = PagePipeline::new(PipelineConfig::default())
        .with_translator(translator(vec![primary.clone(), backup.clone()], BatchingConfig::default()));

    let mut context = dialogue_page("f");
    let result = pipeline.process(&mut context, None).await;

    assert!(result.is_success());
    assert_eq!(result.failed_regions, 0);
    assert!(primary.request_count() >= 1);
    assert!(backup.request_count() >= 1);
    assert!(context.metrics.translation.fallback_calls >= 1);
    assert_eq!(context.regions[0].target_text.as_deref(), Some("[tr] おはよう"));
}

#[tokio::test]
async fn test_translatePair_shouldSplitStructuredAnswer() {
    let pair = translator(vec![MockProvider::working()], BatchingConfig::default())
        .translate_pair("ずっと待っていた", "あなたを", &LanguagePair::new("ja", "en"))
        .await;
    let pair = assert_ok!(pair.ok_or("no pair"));
    assert!(pair.structured);
    assert_eq!(pair.top, "[tr] ずっと待っていた");
    assert_eq!(pair.bottom, "[tr] あなたを");
}
