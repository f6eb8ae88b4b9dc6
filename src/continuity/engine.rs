/*!
 * Cross-page linking and carryover hand-off.
 *
 * Linking pairs the bottom edge of one page with the top edge of the next.
 * The bottom group leader (carrier) translates the joint sentence and keeps
 * the first half; the second half waits in the carryover store until the
 * top group leader (consumer) on the next page picks it up. A consumer
 * that finds nothing is restored and translated on its own.
 */

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::detection::consolidate::join_fragments;
use crate::page::{ContinuityRole, EdgeRole, InpaintMode, PageContext, FAILED_TRANSLATION};
use crate::translation::{BatchTranslator, TranslationStats};

use super::carryover::CarryoverStore;
use super::edges::{edge_groups, Edge, EdgeGroup};
use super::matcher::{match_groups, pair_id};
use super::split::split_translation;
use super::ContinuityConfig;

/// One linked bottom/top pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedPair {
    pub pair_id: String,
    pub carrier_page: String,
    pub consumer_page: String,
    pub carrier_id: String,
    pub consumer_id: String,
    pub overlap: f32,
    pub bottom_text: String,
    pub top_text: String,
}

/// What linking two neighbouring pages found
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkReport {
    pub bottom_groups: usize,
    pub top_groups: usize,
    pub pairs: Vec<LinkedPair>,
}

impl LinkReport {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Links neighbouring pages and moves carried text between them
#[derive(Debug, Clone)]
pub struct ContinuityEngine {
    config: ContinuityConfig,
    store: CarryoverStore,
}

impl ContinuityEngine {
    pub fn new(config: ContinuityConfig, store: CarryoverStore) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &ContinuityConfig {
        &self.config
    }

    pub fn store(&self) -> &CarryoverStore {
        &self.store
    }

    /// Pair the bottom edge of `prev` with the top edge of `next`
    pub fn link_pages(&self, prev: &mut PageContext, next: &mut PageContext) -> LinkReport {
        if !self.config.enabled {
            return LinkReport::default();
        }

        let bottom = edge_groups(prev, Edge::Bottom, &self.config);
        let top = edge_groups(next, Edge::Top, &self.config);
        mark_edge_roles(prev, &bottom, EdgeRole::CurrentBottom);
        mark_edge_roles(next, &top, EdgeRole::CurrentTop);

        let mut report = LinkReport {
            bottom_groups: bottom.len(),
            top_groups: top.len(),
            pairs: Vec::new(),
        };

        for pair in match_groups(&bottom, &top, &self.config) {
            let carrier_group = &bottom[pair.bottom_index];
            let consumer_group = &top[pair.top_index];
            let id = pair_id(&prev.id, carrier_group);
            let fragments = vec![carrier_group.text.clone(), consumer_group.text.clone()];

            lead_group(prev, carrier_group, &id, ContinuityRole::Carrier, &fragments);
            lead_group(next, consumer_group, &id, ContinuityRole::Consumer, &fragments);

            debug!(
                "Linked {}:{} -> {}:{} as {} (overlap {:.2})",
                prev.id,
                carrier_group.leader_id(),
                next.id,
                consumer_group.leader_id(),
                id,
                pair.overlap
            );
            report.pairs.push(LinkedPair {
                pair_id: id,
                carrier_page: prev.id.clone(),
                consumer_page: next.id.clone(),
                carrier_id: carrier_group.leader_id().to_string(),
                consumer_id: consumer_group.leader_id().to_string(),
                overlap: pair.overlap,
                bottom_text: carrier_group.text.clone(),
                top_text: consumer_group.text.clone(),
            });
        }

        let payload = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);
        prev.record_continuity("next_page", payload.clone());
        next.record_continuity("previous_page", payload);
        if !report.is_empty() {
            info!("Linked {} pair(s) between {} and {}", report.pairs.len(), prev.id, next.id);
        }
        report
    }

    /// Translate every untranslated carrier on a page and store the carried halves
    ///
    /// Returns the number of halves put into the store.
    pub async fn translate_carriers(&self, context: &mut PageContext, translator: &BatchTranslator) -> usize {
        let carriers: Vec<usize> = context
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.continuity.role == Some(ContinuityRole::Carrier) && r.target_text.is_none())
            .map(|(i, _)| i)
            .collect();
        if carriers.is_empty() {
            return 0;
        }

        let languages = context.languages.clone();
        let mut stats = TranslationStats::default();
        let mut stored = 0;
        let mut log = Vec::new();

        for index in carriers {
            let region = &context.regions[index];
            let Some(id) = region.continuity.pair_id.clone() else {
                continue;
            };
            let (head, tail) = match region.continuity.carried_fragments.as_slice() {
                [head, tail] => (head.clone(), tail.clone()),
                _ => (region.translation_input().to_string(), String::new()),
            };

            let structured = if tail.is_empty() {
                None
            } else {
                translator
                    .translate_pair_with_stats(&head, &tail, &languages, &mut stats)
                    .await
            };
            let halves = match structured {
                Some(pair) => Some((pair.top, pair.bottom, true)),
                None => {
                    let joint = vec![join_fragments([head.as_str(), tail.as_str()])];
                    let output = translator
                        .translate_batch_with_stats(&joint, None, translator.config().response_format, &languages, &mut stats)
                        .await
                        .into_iter()
                        .next()
                        .unwrap_or_else(|| FAILED_TRANSLATION.to_string());
                    if output == FAILED_TRANSLATION {
                        None
                    } else {
                        let (first, second) = split_translation(&output);
                        Some((first, second, false))
                    }
                }
            };

            let region = &mut context.regions[index];
            match halves {
                Some((first, second, structured)) => {
                    region.target_text = Some(first);
                    self.store.put(&id, &context.id, &second);
                    stored += 1;
                    log.push(json!({ "pair_id": id, "structured": structured, "carried": second }));
                }
                None => {
                    warn!("Carrier {} on page {} could not be translated", region.id, context.id);
                    region.mark_failed();
                    log.push(json!({ "pair_id": id, "failed": true }));
                }
            }
        }

        context.metrics.carryover_put += stored;
        context.metrics.translation.absorb(stats);
        context.record_continuity("carriers", json!(log));
        stored
    }

    /// Fill consumers from the carryover store, restoring those with no entry
    ///
    /// Returns the number of consumed entries.
    pub fn apply_carryover(&self, context: &mut PageContext) -> usize {
        let consumers: Vec<(usize, String)> = context
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.continuity.role == Some(ContinuityRole::Consumer) && r.target_text.is_none())
            .filter_map(|(i, r)| r.continuity.pair_id.clone().map(|id| (i, id)))
            .collect();

        let mut consumed = Vec::new();
        let mut missed = Vec::new();
        for (index, id) in consumers {
            match self.store.consume(&id, &context.id) {
                Some(text) => {
                    context.regions[index].target_text = Some(text);
                    consumed.push(id);
                }
                None => {
                    let leader = context.regions[index].id.clone();
                    warn!("No carryover for {} on page {}, translating {} on its own", id, context.id, leader);
                    restore_group(context, &leader);
                    missed.push(id);
                }
            }
        }

        context.metrics.carryover_consumed += consumed.len();
        context.metrics.carryover_missed += missed.len();
        if !consumed.is_empty() || !missed.is_empty() {
            context.record_continuity("carryover", json!({ "consumed": consumed, "missed": missed }));
        }
        consumed.len()
    }
}

fn mark_edge_roles(context: &mut PageContext, groups: &[EdgeGroup], role: EdgeRole) {
    for group in groups {
        for id in &group.region_ids {
            if let Some(region) = context.region_mut(id) {
                if region.continuity.edge_role == EdgeRole::None {
                    region.continuity.edge_role = role;
                }
            }
        }
    }
}

fn lead_group(context: &mut PageContext, group: &EdgeGroup, id: &str, role: ContinuityRole, fragments: &[String]) {
    let leader = group.leader_id().to_string();
    for member in &group.region_ids {
        let Some(region) = context.region_mut(member) else {
            continue;
        };
        region.continuity.pair_id = Some(id.to_string());
        if *member != leader {
            region.silence();
            region.continuity.grouped_under = Some(leader.clone());
            continue;
        }
        region.continuity.role = Some(role);
        region.continuity.carried_fragments = fragments.to_vec();
        region.render_box = Some(group.bbox);
        match role {
            ContinuityRole::Carrier => {
                region.continuity.joint_source = Some(join_fragments(fragments.iter().map(String::as_str)));
            }
            ContinuityRole::Consumer => {
                region.continuity.edge_role = EdgeRole::NextTop;
                region.skip_translation = true;
            }
        }
    }
}

/// Undo linking for a consumer group so its members translate independently
fn restore_group(context: &mut PageContext, leader: &str) {
    for region in context.regions.iter_mut() {
        let is_leader = region.id == leader;
        let is_member = region.continuity.grouped_under.as_deref() == Some(leader);
        if !is_leader && !is_member {
            continue;
        }
        region.continuity.pair_id = None;
        region.continuity.role = None;
        region.continuity.grouped_under = None;
        region.continuity.carried_fragments.clear();
        region.render_box = None;
        region.skip_translation = false;
        region.inpaint_mode = InpaintMode::Replace;
        region.target_text = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::page::{BBox, LanguagePair, Region};
    use crate::providers::mock::MockProvider;
    use crate::providers::Provider;
    use crate::translation::{BatchingConfig, FallbackChain};

    fn page(id: &str, index: usize, regions: Vec<Region>) -> PageContext {
        PageContext::new(id, index, LanguagePair::new("ja", "en"))
            .with_dimensions(800, 1000)
            .with_regions(regions)
    }

    fn region(id: &str, y1: f32, y2: f32, text: &str) -> Region {
        Region::new(id, BBox::new(200.0, y1, 400.0, y2), text, 0.9)
    }

    fn linked_pages() -> (PageContext, PageContext) {
        let prev = page(
            "p1",
            0,
            vec![
                region("p1-a", 100.0, 140.0, "こんにちは"),
                region("p1-b", 920.0, 950.0, "ずっと"),
                region("p1-c", 955.0, 985.0, "待っていた"),
            ],
        );
        let next = page("p2", 1, vec![region("p2-a", 10.0, 40.0, "あなたを"), region("p2-b", 600.0, 640.0, "はい")]);
        (prev, next)
    }

    fn translator(provider: MockProvider) -> BatchTranslator {
        let slots: Vec<Arc<dyn Provider>> = vec![Arc::new(provider)];
        BatchTranslator::new(Arc::new(FallbackChain::new(slots)), BatchingConfig::default())
    }

    #[test]
    fn test_linkPages_shouldAssignCarrierAndConsumer() {
        let (mut prev, mut next) = linked_pages();
        let engine = ContinuityEngine::new(ContinuityConfig::default(), CarryoverStore::default());
        let report = engine.link_pages(&mut prev, &mut next);

        assert_eq!(report.pairs.len(), 1);
        let carrier = prev.region("p1-b").unwrap();
        assert_eq!(carrier.continuity.role, Some(ContinuityRole::Carrier));
        assert_eq!(carrier.translation_input(), "ずっと待っていたあなたを");
        assert_eq!(carrier.render_box, Some(BBox::new(200.0, 920.0, 400.0, 985.0)));

        let member = prev.region("p1-c").unwrap();
        assert!(member.skip_translation);
        assert_eq!(member.inpaint_mode, InpaintMode::EraseOnly);
        assert_eq!(member.continuity.grouped_under.as_deref(), Some("p1-b"));

        let consumer = next.region("p2-a").unwrap();
        assert_eq!(consumer.continuity.role, Some(ContinuityRole::Consumer));
        assert_eq!(consumer.continuity.edge_role, EdgeRole::NextTop);
        assert!(consumer.skip_translation);
        assert_eq!(consumer.continuity.pair_id, carrier.continuity.pair_id);

        assert!(prev.continuity_debug["next_page"].is_object());
        assert!(next.continuity_debug["previous_page"].is_object());
    }

    #[test]
    fn test_linkPages_disabled_shouldLeavePagesAlone() {
        let (mut prev, mut next) = linked_pages();
        let config = ContinuityConfig {
            enabled: false,
            ..ContinuityConfig::default()
        };
        let engine = ContinuityEngine::new(config, CarryoverStore::default());
        assert!(engine.link_pages(&mut prev, &mut next).is_empty());
        assert!(prev.regions.iter().all(|r| r.continuity.role.is_none()));
    }

    #[tokio::test]
    async fn test_translateCarriers_thenApply_shouldHandOffBottomHalf() {
        let (mut prev, mut next) = linked_pages();
        let engine = ContinuityEngine::new(ContinuityConfig::default(), CarryoverStore::default());
        engine.link_pages(&mut prev, &mut next);

        let stored = engine
            .translate_carriers(&mut prev, &translator(MockProvider::working()))
            .await;
        assert_eq!(stored, 1);
        assert_eq!(prev.region("p1-b").unwrap().target_text.as_deref(), Some("[tr] ずっと待っていた"));
        assert_eq!(prev.metrics.carryover_put, 1);

        assert_eq!(engine.apply_carryover(&mut next), 1);
        assert_eq!(next.region("p2-a").unwrap().target_text.as_deref(), Some("[tr] あなたを"));
        assert_eq!(next.metrics.carryover_consumed, 1);
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_translateCarriers_unstructured_shouldSplitJointText() {
        let (mut prev, mut next) = linked_pages();
        let engine = ContinuityEngine::new(ContinuityConfig::default(), CarryoverStore::default());
        engine.link_pages(&mut prev, &mut next);

        let provider = MockProvider::scripted(vec![Ok("not json".into())])
            .with_translator(|_| "I waited. For you!".to_string());
        engine.translate_carriers(&mut prev, &translator(provider)).await;

        assert_eq!(prev.region("p1-b").unwrap().target_text.as_deref(), Some("I waited."));
        engine.apply_carryover(&mut next);
        assert_eq!(next.region("p2-a").unwrap().target_text.as_deref(), Some("For you!"));
    }

    #[test]
    fn test_applyCarryover_missing_shouldRestoreConsumer() {
        let (mut prev, mut next) = linked_pages();
        let engine = ContinuityEngine::new(ContinuityConfig::default(), CarryoverStore::default());
        engine.link_pages(&mut prev, &mut next);

        assert_eq!(engine.apply_carryover(&mut next), 0);
        let consumer = next.region("p2-a").unwrap();
        assert!(consumer.needs_translation());
        assert_eq!(consumer.continuity.role, None);
        assert_eq!(consumer.continuity.edge_role, EdgeRole::NextTop);
        assert_eq!(next.metrics.carryover_missed, 1);
    }
}
