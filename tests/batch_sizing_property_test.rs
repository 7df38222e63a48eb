//! Property coverage for the auto-scaling batch rule: every enabled device
//! lands in exactly one batch and batch sizes stay inside the clamp.

use branchwatch::dispatcher::{optimal_batch_size, plan_batches};
use branchwatch::domain_types::DeviceId;
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn batch_size_stays_inside_clamp(count in 0usize..20_000) {
        let size = optimal_batch_size(count);
        prop_assert!((50..=500).contains(&size));
        prop_assert_eq!(size % 50, 0, "sizes round to fifties");
    }

    #[test]
    fn every_device_is_dispatched_exactly_once(count in 0usize..3_000) {
        let ids: Vec<DeviceId> = (0..count).map(|_| DeviceId::generate()).collect();
        let batches = plan_batches(&ids);

        let mut seen = HashSet::new();
        for batch in &batches {
            prop_assert!(batch.len() <= optimal_batch_size(count));
            for id in batch {
                prop_assert!(seen.insert(*id), "device appeared in two batches");
            }
        }
        prop_assert_eq!(seen.len(), count, "every device covered");
    }

    #[test]
    fn batch_count_tracks_the_target(count in 1usize..20_000) {
        let size = optimal_batch_size(count);
        let batches = plan_batches(
            &(0..count).map(|_| DeviceId::generate()).collect::<Vec<_>>(),
        );
        prop_assert_eq!(batches.len(), count.div_ceil(size));
        // Until the 500-device clamp bites (fleets past 5,000), the rule
        // holds the cycle to roughly ten batches.
        if count <= 5_000 {
            prop_assert!(batches.len() <= 11, "got {} batches", batches.len());
        }
    }
}
