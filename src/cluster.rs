//! Density-based clustering of type rows
//!
//! - each type with events becomes a presence bit vector over time slots
//! - DBSCAN over pairwise distances groups types with similar rhythms
//! - resulting clusters are applied as proxy assignments, collapsing rows

use std::collections::VecDeque;
use std::time::Instant;

use tracing::debug;

use crate::core::TypeId;
use crate::pool::TypePool;

/// Distance between two presence vectors.
pub type DistanceFn = Box<dyn Fn(&[u8], &[u8]) -> u64>;

/// Hamming distance; a length mismatch counts the overhang as differing.
pub fn hamming(a: &[u8], b: &[u8]) -> u64 {
    let common = a.len().min(b.len());
    let mut dist = (a.len().max(b.len()) - common) as u64;
    for ix in 0..common {
        if a[ix] != b[ix] {
            dist += 1;
        }
    }
    dist
}

struct Entry {
    tid: TypeId,
    neighbors: Vec<usize>,
    /// Index of the cluster representative; initially the entry itself.
    cluster: usize,
    visited: bool,
}

/// DBSCAN-style clusterer over the pool's type rows.
pub struct EventClusterer {
    distance: DistanceFn,
    threshold: u64,
    min_cluster: usize,
    entries: Vec<Entry>,
}

impl Default for EventClusterer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventClusterer {
    pub fn new() -> Self {
        Self {
            distance: Box::new(hamming),
            threshold: 5,
            min_cluster: 3,
            entries: Vec::new(),
        }
    }

    /// Replace the distance function. Drops previously computed clusters.
    pub fn set_distance(&mut self, distance: DistanceFn) -> &mut Self {
        self.distance = distance;
        self.entries.clear();
        self
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Neighbor cutoff: two rows are neighbors when their distance is
    /// strictly below this value. Drops previously computed clusters.
    pub fn set_threshold(&mut self, threshold: u64) -> &mut Self {
        self.threshold = threshold;
        self.entries.clear();
        self
    }

    pub fn min_cluster(&self) -> usize {
        self.min_cluster
    }

    /// Minimum neighbor count for a core row. Drops previously computed
    /// clusters.
    pub fn set_min_cluster(&mut self, min_cluster: usize) -> &mut Self {
        self.min_cluster = min_cluster;
        self.entries.clear();
        self
    }

    /// Compute clusters over all types that own events, in creation order.
    pub fn compute(&mut self, pool: &TypePool) -> &mut Self {
        let types = pool.types_with_events();
        debug!(types = types.len(), "clustering init");
        let vecs: Vec<Vec<u8>> = types.iter().map(|&t| pool.to_bit_vector(t)).collect();
        self.entries = types
            .iter()
            .enumerate()
            .map(|(ix, &tid)| Entry {
                tid,
                neighbors: Vec::new(),
                cluster: ix,
                visited: false,
            })
            .collect();

        let n = self.entries.len();
        let total = (n * n.saturating_sub(1)) / 2;
        let mut count = 0usize;
        let mut last_report = Instant::now();
        debug!("computing pairwise distances");
        for ix in 0..n {
            if last_report.elapsed().as_secs() >= 1 {
                debug!(
                    percent = (count as f64 / total.max(1) as f64) * 100.0,
                    "distance progress"
                );
                last_report = Instant::now();
            }
            for k in ix + 1..n {
                if (self.distance)(&vecs[ix], &vecs[k]) < self.threshold {
                    self.entries[ix].neighbors.push(k);
                    self.entries[k].neighbors.push(ix);
                }
                count += 1;
            }
        }

        debug!("expanding clusters");
        for ix in 0..n {
            if self.entries[ix].visited {
                continue;
            }
            self.entries[ix].visited = true;
            if self.entries[ix].neighbors.len() >= self.min_cluster {
                self.expand_cluster(ix);
            }
        }
        debug!(
            clusters = self
                .entries
                .iter()
                .enumerate()
                .filter(|(ix, e)| e.cluster == *ix)
                .count(),
            "clustering done"
        );
        self
    }

    /// Breadth-first expansion from a core entry. Rows already claimed by a
    /// different cluster keep their assignment.
    fn expand_cluster(&mut self, seed: usize) {
        let cluster = self.entries[seed].cluster;
        let mut queue: VecDeque<Vec<usize>> = VecDeque::new();
        queue.push_back(self.entries[seed].neighbors.clone());
        while let Some(batch) = queue.pop_front() {
            for p in batch {
                if !self.entries[p].visited {
                    self.entries[p].visited = true;
                    if self.entries[p].neighbors.len() >= self.min_cluster {
                        queue.push_back(self.entries[p].neighbors.clone());
                    }
                }
                if self.entries[p].cluster == p {
                    self.entries[p].cluster = cluster;
                }
            }
        }
    }

    /// Apply the computed clusters as proxy assignments, inside a single
    /// bulk validity block so layout runs once.
    pub fn assign_proxies(&self, pool: &mut TypePool) {
        debug!("assigning proxies");
        pool.start_bulk_validity();
        for e in &self.entries {
            pool.set_proxy(e.tid, self.entries[e.cluster].tid);
        }
        pool.end_bulk_validity();
    }

    /// The computed (type, cluster representative) pairs.
    pub fn cluster_types(&self) -> Vec<(TypeId, TypeId)> {
        self.entries
            .iter()
            .map(|e| (e.tid, self.entries[e.cluster].tid))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::pool_with_events;
    use crate::core::Tick;

    /// Four types with an identical rhythm plus one outlier.
    fn clustered_pool() -> crate::pool::TypePool {
        let mut events: Vec<(&str, &str, Tick)> = Vec::new();
        for id in ["a", "b", "c", "d"] {
            for t in [0, 10, 20, 30, 40] {
                events.push(("g", id, t));
            }
        }
        events.push(("g", "z", 90));
        pool_with_events(0, 100, &events)
    }

    #[test]
    fn test_hamming() {
        assert_eq!(hamming(&[1, 0, 1], &[1, 0, 1]), 0);
        assert_eq!(hamming(&[1, 0, 1], &[0, 0, 1]), 1);
        assert_eq!(hamming(&[1, 0], &[1, 0, 1, 1]), 2);
    }

    #[test]
    fn test_identical_rhythms_cluster() {
        let pool = clustered_pool();
        let mut clusterer = EventClusterer::new();
        clusterer.compute(&pool);

        let a = pool.type_for("g", "a").unwrap();
        let z = pool.type_for("g", "z").unwrap();
        let clusters = clusterer.cluster_types();
        // a, b, c, d share the first-scanned representative; z stays alone.
        for id in ["a", "b", "c", "d"] {
            let tid = pool.type_for("g", id).unwrap();
            let rep = clusters.iter().find(|(t, _)| *t == tid).unwrap().1;
            assert_eq!(rep, a);
        }
        let rep_z = clusters.iter().find(|(t, _)| *t == z).unwrap().1;
        assert_eq!(rep_z, z);
    }

    #[test]
    fn test_recompute_is_deterministic() {
        let pool = clustered_pool();
        let mut clusterer = EventClusterer::new();
        clusterer.compute(&pool);
        let first = clusterer.cluster_types();
        // Same pool, same config: a second pass reproduces the assignment
        // exactly, representatives included.
        clusterer.compute(&pool);
        assert_eq!(clusterer.cluster_types(), first);
    }

    #[test]
    fn test_threshold_is_strict() {
        // Two rows at distance exactly 2 with threshold 2: not neighbors.
        let pool = pool_with_events(0, 30, &[("g", "a", 0), ("g", "a", 10), ("g", "b", 10), ("g", "b", 20)]);
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        assert_eq!(hamming(&pool.to_bit_vector(a), &pool.to_bit_vector(b)), 2);

        let mut clusterer = EventClusterer::new();
        clusterer.set_threshold(2).set_min_cluster(1);
        clusterer.compute(&pool);
        assert!(clusterer.cluster_types().iter().all(|(t, c)| t == c));

        clusterer.set_threshold(3);
        clusterer.compute(&pool);
        let clusters = clusterer.cluster_types();
        let rep_b = clusters.iter().find(|(t, _)| *t == b).unwrap().1;
        assert_eq!(rep_b, a);
    }

    #[test]
    fn test_min_cluster_gates_expansion() {
        let pool = clustered_pool();
        let mut clusterer = EventClusterer::new();
        // With five required neighbors nothing is a core row.
        clusterer.set_min_cluster(5);
        clusterer.compute(&pool);
        assert!(clusterer.cluster_types().iter().all(|(t, c)| t == c));
    }

    #[test]
    fn test_assign_proxies_collapses_rows() {
        let mut pool = clustered_pool();
        pool.update_look();
        assert_eq!(pool.display_types().len(), 5);

        let mut clusterer = EventClusterer::new();
        clusterer.compute(&pool);
        clusterer.assign_proxies(&mut pool);

        let display = pool.display_types();
        assert_eq!(display.len(), 2);
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        assert_eq!(pool.resolve_proxy(b), a);
        // The layout pass ran inside the bulk block.
        assert!(!pool.needs_flush());
    }

    #[test]
    fn test_expansion_does_not_steal() {
        // Two dense groups far apart: members stay with their own seed.
        let mut events: Vec<(&str, &str, Tick)> = Vec::new();
        for id in ["a", "b", "c", "d"] {
            for t in [0, 10, 20] {
                events.push(("g", id, t));
            }
        }
        for id in ["x", "y", "w", "v"] {
            for t in [70, 80, 90] {
                events.push(("g", id, t));
            }
        }
        let pool = pool_with_events(0, 100, &events);
        let mut clusterer = EventClusterer::new();
        clusterer.set_threshold(1).set_min_cluster(3);
        clusterer.compute(&pool);

        let a = pool.type_for("g", "a").unwrap();
        let x = pool.type_for("g", "x").unwrap();
        let clusters = clusterer.cluster_types();
        for id in ["a", "b", "c", "d"] {
            let tid = pool.type_for("g", id).unwrap();
            assert_eq!(clusters.iter().find(|(t, _)| *t == tid).unwrap().1, a);
        }
        for id in ["x", "y", "w", "v"] {
            let tid = pool.type_for("g", id).unwrap();
            assert_eq!(clusters.iter().find(|(t, _)| *t == tid).unwrap().1, x);
        }
    }
}
