use std::collections::HashMap;

use super::CarState;

/// Latest known state per car for the currently displayed virtual time.
///
/// Entries are replaced whole on merge, never patched field by field, so every entry is one
/// coherent server tick. Entries are only removed by [`TelemetryStore::reset`].
#[derive(Debug, Default)]
pub struct TelemetryStore {
    cars: HashMap<u32, CarState>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.cars.clear();
    }

    /// Merge a batch in order; a car appearing twice keeps the later record.
    pub fn merge_batch(&mut self, updates: impl IntoIterator<Item = CarState>) {
        for update in updates {
            self.cars.insert(update.car_id, update);
        }
    }

    pub fn snapshot(&self) -> &HashMap<u32, CarState> {
        &self.cars
    }

    pub fn get(&self, car_id: u32) -> Option<&CarState> {
        self.cars.get(&car_id)
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn car(car_id: u32, position_x: f64) -> CarState {
        CarState {
            car_id,
            position_x,
            position_y: 0.,
            speed: 200.,
            standing: 0,
            timestamp: Utc.with_ymd_and_hms(2024, 7, 7, 14, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_last_write_wins_within_batch() {
        let mut store = TelemetryStore::new();
        let mut second = car(1, 20.);
        second.standing = 2;
        store.merge_batch(vec![car(1, 10.), second.clone()]);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1), Some(&second));
    }

    #[test]
    fn test_merge_replaces_whole_entry() {
        let mut store = TelemetryStore::new();
        let mut first = car(7, 1.);
        first.standing = 4;
        store.merge_batch(vec![first]);

        // the newer tick has no standing; the old one must not leak through
        store.merge_batch(vec![car(7, 2.)]);
        assert_eq!(store.get(7).unwrap().standing, 0);
        assert_eq!(store.get(7).unwrap().position_x, 2.);
    }

    #[test]
    fn test_reset_empties_store() {
        let mut store = TelemetryStore::new();
        store.merge_batch(vec![car(1, 0.), car(2, 0.)]);
        store.reset();
        assert!(store.snapshot().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_one_entry_per_car_holding_latest(
            batches in prop::collection::vec(
                prop::collection::vec((0u32..25, -5000f64..5000.), 0..20),
                0..10,
            ),
            reset_at in prop::option::of(0usize..10),
        ) {
            let mut store = TelemetryStore::new();
            let mut expected: HashMap<u32, f64> = HashMap::new();

            for (i, batch) in batches.iter().enumerate() {
                if reset_at == Some(i) {
                    store.reset();
                    expected.clear();
                }
                store.merge_batch(batch.iter().map(|(id, x)| car(*id, *x)));
                for (id, x) in batch {
                    expected.insert(*id, *x);
                }
            }

            prop_assert_eq!(store.len(), expected.len());
            for (id, x) in expected {
                prop_assert_eq!(store.get(id).map(|c| c.position_x), Some(x));
            }
        }
    }
}
