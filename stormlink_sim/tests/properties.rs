//! Property tests over seeded outbreaks.

use proptest::prelude::*;
use std::collections::HashSet;
use stormlink_core::events::{EventAttributes, EventLinkage};
use stormlink_core::reconciliation::remove_redundant_tornado_linkages;
use stormlink_core::{link_storms_to_winds, EventRecord, LinkageConfig, StormGraph};
use stormlink_env::NullObserver;
use stormlink_sim::scenarios::ScenarioId;
use stormlink_sim::{check_lineage, RecordingObserver, ScenarioRunner, StormOracle, BASE_TIME_UNIX_SEC};

fn outbreak(seed: u64, num_roots: usize, generations: usize) -> StormOracle {
    let mut oracle = StormOracle::new(seed);
    oracle.random_lineage(BASE_TIME_UNIX_SEC, num_roots, generations).unwrap();
    oracle
}

/// Three one-minute segments of a tornado; `None` leaves them unlinked.
fn tornado_rows(id: &str, start: i64, distance: Option<f64>) -> Vec<EventRecord> {
    (0..3)
        .map(|k| {
            let mut event = EventRecord::new(
                start + 60 * k,
                35.0,
                265.0,
                EventAttributes::Tornado {
                    tornado_id: id.to_string(),
                    ef_rating: "EF1".to_string(),
                },
            );
            event.linkage = distance.map(|d| EventLinkage {
                nearest_secondary_id: "A".to_string(),
                nearest_time: start,
                distance_metres: d,
            });
            event
        })
        .collect()
}

fn keys(events: &[EventRecord]) -> Vec<(String, i64)> {
    events
        .iter()
        .map(|e| (e.tornado_id().unwrap_or_default().to_string(), e.time))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn random_outbreaks_pass(seed in any::<u64>()) {
        let result = ScenarioRunner::new(seed).with_reports(10).run(ScenarioId::RandomOutbreak);
        prop_assert!(result.passed, "{:?}", result.failure_reason);
    }

    #[test]
    fn lineage_sets_are_consistent(seed in any::<u64>(), num_roots in 1usize..4, generations in 1usize..5) {
        let graph = StormGraph::new(outbreak(seed, num_roots, generations).storm_objects()).unwrap();
        prop_assert!(check_lineage(&graph).is_ok());
    }

    #[test]
    fn reports_inside_a_cell_link_at_zero_distance(seed in any::<u64>()) {
        let result = ScenarioRunner::new(seed).with_reports(8).run(ScenarioId::SingleCell);
        prop_assert!(result.passed, "{:?}", result.failure_reason);
        prop_assert_eq!(result.metrics.unlinked_events, 0);
    }

    #[test]
    fn far_reports_never_link(seed in any::<u64>()) {
        let result = ScenarioRunner::new(seed).with_reports(8).run(ScenarioId::FarEvents);
        prop_assert!(result.passed, "{:?}", result.failure_reason);
        prop_assert_eq!(result.metrics.linked_events, 0);
        prop_assert_eq!(result.metrics.unlinked_events, 8);
    }

    #[test]
    fn reversal_places_each_event_on_its_qualifying_predecessors(seed in any::<u64>()) {
        let mut oracle = outbreak(seed, 2, 3);
        let ids: Vec<String> = oracle.cells().map(|c| c.secondary_id.clone()).collect();
        let mut winds = Vec::new();
        for k in 0..12 {
            let id = ids[oracle.random_index(ids.len())].clone();
            let time = oracle.random_time_in(&id, 0).unwrap();
            winds.push(oracle.wind_in_cell(&format!("S{}", k), &id, time).unwrap());
        }

        let storms = oracle.storm_objects();
        let graph = StormGraph::new(storms.clone()).unwrap();
        let result = link_storms_to_winds(storms, &winds, &LinkageConfig::wind(), &RecordingObserver::new()).unwrap();

        let mut expected = 0;
        for event in &result.events {
            let Some(linkage) = &event.linkage else { continue };
            let main_row = graph.closest_object_in_cell(&linkage.nearest_secondary_id, linkage.nearest_time).unwrap();
            let sets = graph.classify_predecessors(main_row).unwrap();
            expected += sets.simple.iter().filter(|&&r| graph.node(r).valid_time() <= event.time).count();
        }
        let placed: usize = result.storm_to_events.iter().map(|s| s.events.len()).sum();
        prop_assert_eq!(placed, expected);
    }

    #[test]
    fn redundant_tornado_removal_is_idempotent(
        copies in proptest::collection::vec((any::<bool>(), any::<bool>(), proptest::option::of(0.0f64..5000.0), proptest::option::of(0.0f64..5000.0)), 1..5),
    ) {
        let (mut early, mut late) = (Vec::new(), Vec::new());
        for (k, (in_early, in_late, early_distance, late_distance)) in copies.iter().enumerate() {
            let id = format!("t{}", k);
            let start = 1000 * k as i64;
            if *in_early {
                early.extend(tornado_rows(&id, start, *early_distance));
            }
            if *in_late {
                late.extend(tornado_rows(&id, start, *late_distance));
            }
        }
        let before: HashSet<(String, i64)> = keys(&early).into_iter().chain(keys(&late)).collect();

        remove_redundant_tornado_linkages(&mut early, &mut late, &NullObserver).unwrap();
        let early_ids: HashSet<String> = keys(&early).into_iter().map(|(id, _)| id).collect();
        prop_assert!(keys(&late).iter().all(|(id, _)| !early_ids.contains(id)));

        // Every tornado survives in one period
        let after: HashSet<(String, i64)> = keys(&early).into_iter().chain(keys(&late)).collect();
        prop_assert_eq!(&after, &before);

        let (early_once, late_once) = (keys(&early), keys(&late));
        remove_redundant_tornado_linkages(&mut early, &mut late, &NullObserver).unwrap();
        prop_assert_eq!(keys(&early), early_once);
        prop_assert_eq!(keys(&late), late_once);
    }
}
