/*!
 * Configuration file tests
 */

use std::path::PathBuf;

use inkbridge::app_config::{Config, FallbackSlot, TranslationProvider};
use inkbridge::app_controller::Controller;
use tokio_test::{assert_err, assert_ok};

use crate::common::create_temp_dir;

#[test]
fn test_config_saveThenLoad_shouldKeepEverySection() {
    let dir = create_temp_dir().unwrap();
    let path = dir.path().join("conf.json");

    let mut config = Config::default();
    config.target_language = "fr".into();
    config.batching.max_items_per_request = 12;
    config.tiling.tile_height = 1200;
    config.continuity.enabled = false;
    config.quality.retry_chain = vec!["ollama/qwen2.5:32b".into()];
    config.pipeline.journal_path = Some(PathBuf::from("/tmp/carryover.db"));
    config.translation.common.fallback_chain = vec![FallbackSlot::new(TranslationProvider::Ollama, "llama3.2:3b")];
    assert_ok!(config.save(&path));

    let loaded = assert_ok!(Config::load_or_create(&path));
    assert_eq!(loaded.target_language, "fr");
    assert_eq!(loaded.batching, config.batching);
    assert_eq!(loaded.tiling, config.tiling);
    assert!(!loaded.continuity.enabled);
    assert_eq!(loaded.quality.retry_chain, config.quality.retry_chain);
    assert_eq!(loaded.pipeline, config.pipeline);
    assert_ok!(loaded.validate());
}

#[test]
fn test_config_invalidValues_shouldFailValidation() {
    let mut config = Config::default();
    config.pipeline.max_concurrency = 0;
    assert_err!(config.validate());

    let mut config = Config::default();
    config.translation.provider = TranslationProvider::Anthropic;
    assert_err!(config.validate());

    let mut config = Config::default();
    config.translation.common.temperature = 3.5;
    assert_err!(config.validate());
}

#[test]
fn test_controller_fallbackChain_shouldOrderActiveThenConfiguredSlots() {
    let mut config = Config::default();
    config.translation.common.fallback_chain = vec![
        FallbackSlot::new(TranslationProvider::Ollama, "llama3.2:3b"),
        FallbackSlot::new(TranslationProvider::LMStudio, ""),
    ];
    let controller = assert_ok!(Controller::with_config(config));
    let translator = assert_ok!(controller.build_translator());
    assert_eq!(
        translator.chain().describe(),
        vec![
            "ollama/qwen2.5:7b".to_string(),
            "ollama/llama3.2:3b".to_string(),
            "lmstudio/local-model".to_string(),
        ]
    );
}
