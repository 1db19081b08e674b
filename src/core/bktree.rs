// BK-tree over fingerprints under Hamming distance.
//
// Nodes live in a flat arena and refer to their children by index. The whole
// arena sits behind one reader/writer lock: inserts are exclusive, searches
// share the read side and may run in parallel with each other.

use crate::core::fingerprint::{Fingerprint, FingerprintError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Default search radius in bit positions.
pub const DEFAULT_RADIUS: u32 = 5;

#[derive(Debug)]
struct Node {
    fingerprint: Fingerprint,
    /// distance to this node -> arena index of the child
    children: BTreeMap<u32, usize>,
}

#[derive(Debug, Default)]
struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    const ROOT: usize = 0;

    fn insert(&mut self, fingerprint: Fingerprint) -> Result<bool, FingerprintError> {
        if self.nodes.is_empty() {
            self.nodes.push(Node {
                fingerprint,
                children: BTreeMap::new(),
            });
            return Ok(true);
        }

        let mut current = Self::ROOT;
        loop {
            let node = &self.nodes[current];
            let distance = node.fingerprint.distance(&fingerprint)?;
            if distance == 0 {
                return Ok(false);
            }
            match node.children.get(&distance) {
                Some(&child) => current = child,
                None => {
                    let index = self.nodes.len();
                    self.nodes.push(Node {
                        fingerprint,
                        children: BTreeMap::new(),
                    });
                    self.nodes[current].children.insert(distance, index);
                    return Ok(true);
                }
            }
        }
    }

    fn search(
        &self,
        query: &Fingerprint,
        radius: u32,
    ) -> Result<Vec<Fingerprint>, FingerprintError> {
        let mut hits = Vec::new();
        if self.nodes.is_empty() {
            return Ok(hits);
        }

        // Pre-order, children in ascending distance key.
        let mut stack = vec![Self::ROOT];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            let distance = node.fingerprint.distance(query)?;
            if distance <= radius {
                hits.push(node.fingerprint.clone());
            }

            // A match within `radius` of the query lies within `radius` of
            // `distance` from this node.
            let low = distance.saturating_sub(radius);
            let high = distance.saturating_add(radius);
            stack.extend(node.children.range(low..=high).rev().map(|(_, &child)| child));
        }
        Ok(hits)
    }
}

/// Concurrent BK-tree with a memoized query cache.
#[derive(Debug, Default)]
pub struct SimilarityIndex {
    tree: RwLock<Arena>,
    cache: RwLock<HashMap<(Fingerprint, u32), Arc<[Fingerprint]>>>,
}

impl SimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fingerprint. Returns `false` when an identical fingerprint is
    /// already present.
    pub fn insert(&self, fingerprint: Fingerprint) -> Result<bool, FingerprintError> {
        // Lock order is tree, then cache, here and in `search`.
        let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        let inserted = tree.insert(fingerprint)?;

        if inserted {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            if !cache.is_empty() {
                log::debug!("Index grew after {} cached queries; dropping cache", cache.len());
                cache.clear();
            }
        }
        Ok(inserted)
    }

    /// All indexed fingerprints within `radius` of `query`, in traversal order.
    ///
    /// Results are cached per `(query, radius)` until the next structural
    /// insert.
    pub fn search(
        &self,
        query: &Fingerprint,
        radius: u32,
    ) -> Result<Arc<[Fingerprint]>, FingerprintError> {
        let key = (query.clone(), radius);
        if let Some(hits) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(hits));
        }

        // The read guard stays alive until the result is cached, so no insert
        // can land between the traversal and the cache write.
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        let hits: Arc<[Fingerprint]> = tree.search(query, radius)?.into();

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(cache.entry(key).or_insert(hits)))
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> Result<bool, FingerprintError> {
        let tree = self.tree.read().unwrap_or_else(PoisonError::into_inner);
        Ok(!tree.search(fingerprint, 0)?.is_empty())
    }

    pub fn len(&self) -> usize {
        self.tree
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .nodes
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cached_queries(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn fp(value: u64) -> Fingerprint {
        Fingerprint::from_u64(value)
    }

    /// Deterministic xorshift stream for bulk data.
    fn pseudo_random(seed: u64, count: usize) -> Vec<u64> {
        let mut state = seed;
        (0..count)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state
            })
            .collect()
    }

    #[test]
    fn test_empty_index_finds_nothing() {
        let index = SimilarityIndex::new();
        assert!(index.is_empty());
        assert!(index.search(&fp(42), 5).unwrap().is_empty());
    }

    #[test]
    fn test_single_insert_is_found_at_radius_zero() {
        let index = SimilarityIndex::new();
        assert!(index.insert(fp(0xabcdef)).unwrap());
        assert_eq!(index.search(&fp(0xabcdef), 0).unwrap().as_ref(), &[fp(0xabcdef)]);
        assert!(index.contains(&fp(0xabcdef)).unwrap());
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let index = SimilarityIndex::new();
        assert!(index.insert(fp(7)).unwrap());
        assert!(index.insert(fp(1)).unwrap());
        assert!(!index.insert(fp(7)).unwrap());
        assert!(!index.insert(fp(1)).unwrap());
        assert_eq!(index.len(), 2);
        assert_eq!(index.search(&fp(7), 0).unwrap().len(), 1);
    }

    #[test]
    fn test_children_keep_exact_parent_distance() {
        let index = SimilarityIndex::new();
        for value in pseudo_random(0x5eed, 300) {
            index.insert(fp(value)).unwrap();
        }
        let tree = index.tree.read().unwrap();
        for node in &tree.nodes {
            for (&distance, &child) in &node.children {
                let child_fp = &tree.nodes[child].fingerprint;
                assert_eq!(node.fingerprint.distance(child_fp).unwrap(), distance);
            }
        }
    }

    #[test]
    fn test_search_is_symmetric_within_radius() {
        let a = fp(0b1111_0000);
        let b = fp(0b1111_0111);
        assert_eq!(a.distance(&b).unwrap(), 3);

        let index = SimilarityIndex::new();
        index.insert(a.clone()).unwrap();
        index.insert(b.clone()).unwrap();
        assert!(index.search(&a, DEFAULT_RADIUS).unwrap().contains(&b));
        assert!(index.search(&b, DEFAULT_RADIUS).unwrap().contains(&a));
    }

    #[test]
    fn test_search_matches_brute_force() {
        // Flip a few low bits of a handful of bases so that neighbourhoods are
        // non-trivial.
        let bases = pseudo_random(0xfeed, 40);
        let mut values = Vec::new();
        for (i, base) in bases.iter().enumerate() {
            values.push(*base);
            values.push(*base ^ (1u64 << (i % 64)));
            values.push(*base ^ 0b111);
            values.push(*base ^ 0b1_1111_1000);
        }

        let index = SimilarityIndex::new();
        for value in &values {
            index.insert(fp(*value)).unwrap();
        }

        for radius in [0, 2, DEFAULT_RADIUS, 9] {
            for query in values.iter().step_by(3) {
                let mut expected: Vec<u64> = values
                    .iter()
                    .copied()
                    .filter(|v| (v ^ query).count_ones() <= radius)
                    .collect();
                expected.sort_unstable();
                expected.dedup();

                let mut found: Vec<u64> = index
                    .search(&fp(*query), radius)
                    .unwrap()
                    .iter()
                    .filter_map(Fingerprint::as_u64)
                    .collect();
                found.sort_unstable();
                assert_eq!(found, expected, "query {query:#x} radius {radius}");
            }
        }
    }

    #[test]
    fn test_repeated_query_hits_cache() {
        let index = SimilarityIndex::new();
        index.insert(fp(1)).unwrap();
        index.insert(fp(3)).unwrap();

        let first = index.search(&fp(1), 5).unwrap();
        let second = index.search(&fp(1), 5).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(index.cached_queries(), 1);
    }

    #[test]
    fn test_insert_after_query_is_visible() {
        let index = SimilarityIndex::new();
        index.insert(fp(0)).unwrap();
        assert_eq!(index.search(&fp(0), 5).unwrap().len(), 1);

        index.insert(fp(0b11)).unwrap();
        assert_eq!(index.cached_queries(), 0);
        assert_eq!(index.search(&fp(0), 5).unwrap().len(), 2);
    }

    #[test]
    fn test_insert_racing_a_search_is_never_lost() {
        let base = pseudo_random(0xbeef, 2000);
        for round in 0..200 {
            let index = SimilarityIndex::new();
            index.insert(fp(u64::MAX)).unwrap();
            for value in &base {
                index.insert(fp(*value)).unwrap();
            }
            let late = fp(u64::MAX - 1);

            std::thread::scope(|s| {
                s.spawn(|| index.search(&fp(u64::MAX), 64).unwrap());
                s.spawn(|| {
                    std::thread::sleep(std::time::Duration::from_micros(20));
                    index.insert(late.clone()).unwrap();
                });
            });

            let hits = index.search(&fp(u64::MAX), 64).unwrap();
            assert!(hits.contains(&late), "round {round}: stale cached answer");
        }
    }

    #[test]
    fn test_length_mismatch_fails_fast() {
        let index = SimilarityIndex::new();
        index.insert(fp(0)).unwrap();
        let short: Fingerprint = "0101".parse().unwrap();
        assert!(matches!(
            index.insert(short.clone()),
            Err(FingerprintError::LengthMismatch { .. })
        ));
        assert!(index.search(&short, 5).is_err());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_concurrent_searches_agree() {
        let index = SimilarityIndex::new();
        let values = pseudo_random(0xc0ffee, 500);
        for value in &values {
            index.insert(fp(*value)).unwrap();
        }

        let counts: Vec<usize> = values
            .par_iter()
            .map(|v| index.search(&fp(*v), DEFAULT_RADIUS).unwrap().len())
            .collect();
        for (value, count) in values.iter().zip(counts) {
            assert_eq!(index.search(&fp(*value), DEFAULT_RADIUS).unwrap().len(), count);
            assert!(count >= 1);
        }
    }
}
