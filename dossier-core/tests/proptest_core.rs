//! Property-based tests for core components using proptest.

use proptest::prelude::*;

use dossier_core::cost::{ModelPrice, PriceTable};
use dossier_core::lifecycle::ResearchPatch;
use dossier_core::store::JobStore;
use dossier_core::types::{Research, ResearchStatus, title_from_goal};

// --- Cost calculator properties ---

proptest! {
    #[test]
    fn cost_is_zero_without_tokens(
        input_price in 0.0f64..100.0,
        output_price in 0.0f64..100.0,
    ) {
        let table = PriceTable::empty().with_price("m", ModelPrice::new(input_price, output_price));
        prop_assert_eq!(table.cost(0, 0, "m"), 0.0);
    }

    #[test]
    fn cost_scales_linearly(
        input in 0u64..5_000_000,
        output in 0u64..5_000_000,
        factor in 1u64..10,
    ) {
        let table = PriceTable::default();
        let single = table.cost(input, output, "o3-deep-research");
        let scaled = table.cost(input * factor, output * factor, "o3-deep-research");
        prop_assert!((scaled - single * factor as f64).abs() < 1e-6);
    }

    #[test]
    fn unknown_models_are_free(input in 0u64..u32::MAX as u64, output in 0u64..u32::MAX as u64) {
        prop_assert_eq!(PriceTable::default().cost(input, output, "no-such-model"), 0.0);
    }
}

// --- Title derivation ---

proptest! {
    #[test]
    fn titles_never_exceed_limit(goal in "\\PC{0,300}") {
        prop_assert!(title_from_goal(&goal).chars().count() <= 100);
    }
}

// --- Lifecycle transitions ---

fn patch_strategy() -> impl Strategy<Value = ResearchPatch> {
    prop_oneof![
        Just(ResearchPatch::Start),
        Just(ResearchPatch::Retry),
        Just(ResearchPatch::Cancel { completed_at: chrono::Utc::now() }),
        Just(ResearchPatch::Fail { message: "boom".into(), completed_at: chrono::Utc::now() }),
        Just(ResearchPatch::Submitted { response_id: "resp".into() }),
    ]
}

proptest! {
    #[test]
    fn any_patch_sequence_keeps_records_consistent(patches in prop::collection::vec(patch_strategy(), 0..20)) {
        let mut store = JobStore::in_memory();
        let research = Research::new("t", "Explain X", "o3-deep-research");
        let id = research.id.clone();
        store.add(research).unwrap();

        for patch in patches {
            let before = store.get(&id).cloned().unwrap();
            let target = patch.target_status();
            match store.update(&id, patch) {
                Ok(Some(after)) => prop_assert_eq!(after.status, target),
                Ok(None) => prop_assert!(false, "job vanished"),
                Err(_) => prop_assert_eq!(store.get(&id).cloned().unwrap(), before),
            }
            let current = store.get(&id).unwrap();
            prop_assert!(current.is_consistent());
            prop_assert!(current.status != ResearchStatus::Completed);
        }
    }
}
