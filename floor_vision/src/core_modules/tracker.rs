// THEORY:
// The `tracker` module gives the engine object permanence. The detector knows
// nothing about previous frames; the `Tracker` takes each frame's unidentified
// blobs and decides which of them are the players it already knows.
//
// Per update:
// 1.  **Matching**: previously tracked blobs are visited in ascending identity
//     order. Each one claims the nearest still-unclaimed detection whose centre is
//     closer than `max_matching_distance` and whose shape is similar (mass ratio
//     and fill ratio within tolerance). A claimed detection inherits the identity
//     and is stamped with the current time.
// 2.  **Birth**: detections nobody claimed get fresh identities, in detection
//     order. Identities only ever increase and are never handed out twice.
// 3.  **Death**: a tracked blob that claimed nothing is carried forward unchanged
//     until it has gone unconfirmed for longer than the staleness window, then it
//     is dropped.
//
// The matching is greedy, not a globally optimal assignment: when two tracked
// blobs want the same detection, the lower identity gets it. The candidate pool is
// an index-addressed list so that this tie-break, and the order of births, are
// fully deterministic.

use crate::config::TrackingConfig;
use crate::core_modules::blob::Blob;
use crate::error::Result;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, trace};

/// Maintains stable identities for blobs across frames.
pub struct Tracker {
    config: TrackingConfig,
    /// Most recent blob for every live identity, iterated in identity order.
    tracked: BTreeMap<u64, Blob>,
    /// The identity the next unmatched detection will receive.
    next_id: u64,
    /// Identities created by the most recent update.
    born: Vec<u64>,
    /// Identities dropped by the most recent update.
    evicted: Vec<u64>,
}

impl Tracker {
    pub fn new(config: TrackingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            tracked: BTreeMap::new(),
            next_id: 0,
            born: Vec::new(),
            evicted: Vec::new(),
        })
    }

    /// Matches this frame's detections against the tracked set and returns every
    /// blob still tracked afterwards, ordered by identity.
    ///
    /// An empty `detected` list is how a missing frame is fed in: nothing matches,
    /// nothing is born, and only identities past the staleness window go away.
    pub fn update(&mut self, detected: Vec<Blob>, now: Instant) -> Vec<Blob> {
        self.born.clear();
        self.evicted.clear();

        let staleness = self.config.staleness_timeout();
        let mut pool: Vec<Option<Blob>> = detected.into_iter().map(Some).collect();
        let previous = std::mem::take(&mut self.tracked);

        for (id, old) in previous {
            let claimed = self.best_match(&old, &pool).and_then(|index| pool[index].take());
            match claimed {
                Some(mut blob) => {
                    trace!(
                        "Identity {} matched at ({:.1}, {:.1}), moved {:.1}px",
                        id,
                        blob.center.0,
                        blob.center.1,
                        old.distance_to(&blob)
                    );
                    blob.identity = Some(id);
                    blob.last_seen = Some(now);
                    self.tracked.insert(id, blob);
                }
                None => {
                    let unseen_for = old
                        .last_seen
                        .map(|seen| now.saturating_duration_since(seen))
                        .unwrap_or_default();
                    if unseen_for > staleness {
                        debug!("Identity {} evicted after {:?} unseen", id, unseen_for);
                        self.evicted.push(id);
                    } else {
                        self.tracked.insert(id, old);
                    }
                }
            }
        }

        for mut blob in pool.into_iter().flatten() {
            let id = self.next_id;
            self.next_id += 1;
            blob.identity = Some(id);
            blob.last_seen = Some(now);
            debug!(
                "Identity {} born at ({:.1}, {:.1}), mass {}",
                id, blob.center.0, blob.center.1, blob.mass
            );
            self.tracked.insert(id, blob);
            self.born.push(id);
        }

        self.tracked.values().copied().collect()
    }

    /// The nearest unclaimed, similar candidate within the distance cap.
    /// Ties keep the earliest candidate.
    fn best_match(&self, tracked: &Blob, pool: &[Option<Blob>]) -> Option<usize> {
        let mut best_distance = self.config.max_matching_distance;
        let mut best = None;
        for (index, candidate) in pool.iter().enumerate() {
            let Some(candidate) = candidate else {
                continue;
            };
            let distance = tracked.distance_to(candidate);
            if distance < best_distance && self.is_similar(tracked, candidate) {
                best_distance = distance;
                best = Some(index);
            }
        }
        best
    }

    fn is_similar(&self, a: &Blob, b: &Blob) -> bool {
        let (larger, smaller) = if a.mass >= b.mass { (a.mass, b.mass) } else { (b.mass, a.mass) };
        if smaller == 0 {
            return false;
        }
        // larger / smaller is at least 1, so only the upper bound can reject.
        let mass_ratio = larger as f64 / smaller as f64;
        if mass_ratio > 1.0 + self.config.mass_ratio_tolerance {
            return false;
        }
        (a.area_ratio() - b.area_ratio()).abs() <= self.config.area_ratio_tolerance
    }

    pub fn tracked(&self) -> impl Iterator<Item = &Blob> {
        self.tracked.values()
    }

    pub fn get(&self, identity: u64) -> Option<&Blob> {
        self.tracked.get(&identity)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn born_last_update(&self) -> &[u64] {
        &self.born
    }

    pub fn evicted_last_update(&self) -> &[u64] {
        &self.evicted
    }

    /// Forgets every tracked blob. The identity counter keeps counting so that
    /// identities issued before the reset are never reissued.
    pub fn reset(&mut self) {
        self.tracked.clear();
        self.born.clear();
        self.evicted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tracker() -> Tracker {
        Tracker::new(TrackingConfig::default()).expect("default config is valid")
    }

    fn square_at(cx: u32, cy: u32) -> Blob {
        Blob::filled_rect(cx - 5, cy - 5, cx + 5, cy + 5)
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn same_position_keeps_identity() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        for tick in 0..5 {
            let tracked = tracker.update(vec![square_at(30, 30)], t0 + ms(33 * tick));
            assert_eq!(tracked.len(), 1);
            assert_eq!(tracked[0].identity, Some(0));
        }
    }

    #[test]
    fn small_move_inherits_identity() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        let first = tracker.update(vec![square_at(10, 10)], t0);
        let moved = Blob::filled_rect(7, 6, 17, 16);
        assert_eq!(moved.center, (12.0, 11.0));
        let second = tracker.update(vec![moved], t0 + ms(33));
        assert_eq!(first[0].identity, second[0].identity);
        assert_eq!(second[0].last_seen, Some(t0 + ms(33)));
        assert!(tracker.born_last_update().is_empty());
    }

    #[test]
    fn eviction_happens_only_after_window() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(vec![square_at(50, 50)], t0);

        assert_eq!(tracker.update(Vec::new(), t0 + ms(300)).len(), 1);
        assert_eq!(tracker.update(Vec::new(), t0 + ms(500)).len(), 1);
        assert!(tracker.evicted_last_update().is_empty());

        assert!(tracker.update(Vec::new(), t0 + ms(501)).is_empty());
        assert_eq!(tracker.evicted_last_update(), &[0]);
    }

    #[test]
    fn carried_blob_keeps_old_confirmation() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(vec![square_at(50, 50)], t0);
        let carried = tracker.update(Vec::new(), t0 + ms(200));
        assert_eq!(carried[0].last_seen, Some(t0));
        // Reappearing inside the window restores the same identity.
        let back = tracker.update(vec![square_at(52, 50)], t0 + ms(400));
        assert_eq!(back[0].identity, Some(0));
    }

    #[test]
    fn identities_are_never_reused() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(vec![square_at(50, 50)], t0);
        tracker.update(Vec::new(), t0 + ms(600));
        assert!(tracker.is_empty());

        let reborn = tracker.update(vec![square_at(50, 50)], t0 + ms(700));
        assert_eq!(reborn[0].identity, Some(1));

        let more = tracker.update(
            vec![square_at(50, 50), square_at(150, 150), square_at(250, 250)],
            t0 + ms(733),
        );
        let ids: Vec<_> = more.iter().filter_map(|b| b.identity).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(tracker.born_last_update(), &[2, 3]);
    }

    #[test]
    fn distance_cap_spawns_new_identity() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(vec![square_at(20, 20)], t0);
        let tracked = tracker.update(vec![square_at(120, 20)], t0 + ms(33));
        let ids: Vec<_> = tracked.iter().filter_map(|b| b.identity).collect();
        // The old identity is carried, the far blob is new.
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn mass_gate_rejects_grown_blob() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(vec![Blob::filled_rect(20, 20, 29, 29)], t0); // 100 px
        let bigger = Blob::filled_rect(18, 18, 31, 31); // 196 px
        let tracked = tracker.update(vec![bigger], t0 + ms(33));
        assert_eq!(tracked.last().and_then(|b| b.identity), Some(1));
        assert_eq!(tracker.born_last_update(), &[1]);
    }

    #[test]
    fn mass_gate_is_symmetric_and_tolerant() {
        let t0 = Instant::now();
        let mut shrinking = tracker();
        shrinking.update(vec![Blob::filled_rect(20, 20, 29, 29)], t0); // 100 px
        shrinking.update(vec![Blob::filled_rect(21, 21, 27, 27)], t0 + ms(33)); // 49 px
        assert_eq!(shrinking.born_last_update(), &[1]);

        let mut growing = tracker();
        growing.update(vec![Blob::filled_rect(20, 20, 29, 29)], t0);
        let tracked = growing.update(vec![Blob::filled_rect(19, 19, 29, 29)], t0 + ms(33)); // 121 px
        assert!(growing.born_last_update().is_empty());
        assert_eq!(tracked[0].identity, Some(0));
        assert_eq!(tracked[0].mass, 121);
    }

    #[test]
    fn area_ratio_gate_rejects_different_shape() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(vec![Blob::filled_rect(20, 20, 29, 29)], t0); // dense square
        // A hollow outline of similar mass around the same centre.
        let mut ring = Blob::new();
        for x in 10..=39 {
            ring.add_pixel(x, 10);
            ring.add_pixel(x, 39);
        }
        for y in 11..=38 {
            ring.add_pixel(10, y);
            ring.add_pixel(39, y);
        }
        assert_eq!(ring.mass, 116);
        assert_eq!(ring.center, (24.5, 24.5));
        tracker.update(vec![ring], t0 + ms(33));
        assert_eq!(tracker.born_last_update(), &[1]);
    }

    #[test]
    fn greedy_tie_break_favours_lower_identity() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(vec![square_at(20, 20), square_at(40, 20)], t0);
        // One detection exactly between the two tracked blobs.
        let tracked = tracker.update(vec![square_at(30, 20)], t0 + ms(33));
        let zero = tracked.iter().find(|b| b.identity == Some(0)).expect("identity 0 tracked");
        let one = tracked.iter().find(|b| b.identity == Some(1)).expect("identity 1 carried");
        assert_eq!(zero.center, (30.0, 20.0));
        assert_eq!(one.last_seen, Some(t0));
        assert!(tracker.born_last_update().is_empty());
    }

    #[test]
    fn nearest_candidate_wins() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(vec![square_at(100, 100)], t0);
        let tracked = tracker.update(vec![square_at(130, 100), square_at(105, 100)], t0 + ms(33));
        let zero = tracked.iter().find(|b| b.identity == Some(0)).expect("identity 0 tracked");
        assert_eq!(zero.center, (105.0, 100.0));
        assert_eq!(tracker.born_last_update(), &[1]);
    }

    #[test]
    fn reset_clears_but_keeps_counting() {
        let mut tracker = tracker();
        let t0 = Instant::now();
        tracker.update(vec![square_at(20, 20), square_at(80, 80)], t0);
        tracker.reset();
        assert_eq!(tracker.len(), 0);
        let tracked = tracker.update(vec![square_at(20, 20)], t0 + ms(33));
        assert_eq!(tracked[0].identity, Some(2));
        assert!(tracker.get(2).is_some());
        assert!(tracker.get(0).is_none());
    }
}
