//! Approximate nearest-neighbour index (HNSW over cosine distance).
//!
//! Nodes are never physically removed: overwrites and deletions tombstone the
//! old node, which keeps serving as a routing hop but never appears in results.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::cosine_distance;

const MAX_LEVEL: usize = 16;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    dist: f32,
    idx: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.idx.cmp(&other.idx))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Node {
    key: String,
    vector: Vec<f32>,
    // neighbors[layer] -> adjacent node indices
    neighbors: Vec<Vec<usize>>,
    deleted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct IndexParams {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub seed: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 100,
            ef_search: 64,
            seed: 0x5eed,
        }
    }
}

pub struct VectorIndex {
    params: IndexParams,
    level_mult: f64,
    nodes: Vec<Node>,
    by_key: HashMap<String, usize>,
    entry_point: Option<usize>,
    max_layer: usize,
    rng: StdRng,
}

impl VectorIndex {
    pub fn new(params: IndexParams) -> Self {
        Self {
            level_mult: 1.0 / (params.m.max(2) as f64).ln(),
            rng: StdRng::seed_from_u64(params.seed),
            params,
            nodes: Vec::new(),
            by_key: HashMap::new(),
            entry_point: None,
            max_layer: 0,
        }
    }

    /// Number of live (non-tombstoned) vectors.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Insert `vector` under `key`, replacing any previous vector for it.
    pub fn upsert(&mut self, key: &str, vector: &[f32]) {
        if let Some(&existing) = self.by_key.get(key) {
            if self.nodes[existing].vector == vector {
                return;
            }
            self.nodes[existing].deleted = true;
        }

        let level = self.random_level();
        let idx = self.nodes.len();
        self.nodes.push(Node {
            key: key.to_string(),
            vector: vector.to_vec(),
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });
        self.by_key.insert(key.to_string(), idx);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(idx);
            self.max_layer = level;
            return;
        };

        let query = vector.to_vec();
        let mut current = entry;
        for layer in (level + 1..=self.max_layer).rev() {
            if let Some(closest) = self.search_layer(&query, &[current], 1, layer).into_iter().min() {
                current = closest.idx;
            }
        }

        let mut entry_points = vec![current];
        for layer in (0..=level.min(self.max_layer)).rev() {
            let candidates =
                self.search_layer(&query, &entry_points, self.params.ef_construction, layer);
            let selected = self.select_neighbors(candidates.clone(), self.params.m);

            let limit = self.max_connections(layer);
            for &neighbor in &selected {
                self.connect(idx, neighbor, layer);
                self.connect(neighbor, idx, layer);
                if self.nodes[neighbor].neighbors[layer].len() > limit {
                    self.prune(neighbor, layer, limit);
                }
            }

            entry_points = candidates.iter().map(|c| c.idx).collect();
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(idx);
        }
    }

    /// Tombstone `key`. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.by_key.remove(key) {
            Some(idx) => {
                self.nodes[idx].deleted = true;
                true
            }
            None => false,
        }
    }

    /// Up to `k` nearest live keys, ascending by distance.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        self.search_filtered(query, k, |_| true)
    }

    /// Up to `k` nearest live keys accepted by `accept`, ascending by distance.
    ///
    /// The candidate pool widens until `k` accepted hits are found or the
    /// whole graph has been considered.
    pub fn search_filtered<F>(&self, query: &[f32], k: usize, accept: F) -> Vec<(String, f32)>
    where
        F: Fn(&str) -> bool,
    {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let mut current = entry;
        for layer in (1..=self.max_layer).rev() {
            if let Some(closest) = self.search_layer(query, &[current], 1, layer).into_iter().min() {
                current = closest.idx;
            }
        }

        let mut ef = self.params.ef_search.max(k);
        loop {
            let mut found = self.search_layer(query, &[current], ef, 0);
            found.sort();
            let hits: Vec<(String, f32)> = found
                .into_iter()
                .filter(|c| !self.nodes[c.idx].deleted && accept(&self.nodes[c.idx].key))
                .take(k)
                .map(|c| (self.nodes[c.idx].key.clone(), c.dist))
                .collect();

            if hits.len() >= k || ef >= self.nodes.len() {
                return hits;
            }
            ef = (ef * 2).min(self.nodes.len());
        }
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    fn random_level(&mut self) -> usize {
        let r: f64 = 1.0 - self.rng.gen::<f64>();
        ((-r.ln() * self.level_mult) as usize).min(MAX_LEVEL)
    }

    fn distance(&self, query: &[f32], idx: usize) -> f32 {
        cosine_distance(query, &self.nodes[idx].vector)
    }

    fn search_layer(&self, query: &[f32], entry_points: &[usize], ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited = HashSet::new();
        let mut candidates = BinaryHeap::new();
        let mut nearest = BinaryHeap::new();

        for &ep in entry_points {
            if visited.insert(ep) {
                let c = Candidate {
                    dist: self.distance(query, ep),
                    idx: ep,
                };
                candidates.push(Reverse(c));
                nearest.push(c);
                if nearest.len() > ef {
                    nearest.pop();
                }
            }
        }

        while let Some(Reverse(c)) = candidates.pop() {
            if let Some(furthest) = nearest.peek() {
                if nearest.len() >= ef && c.dist > furthest.dist {
                    break;
                }
            }

            let Some(adjacent) = self.nodes[c.idx].neighbors.get(layer) else {
                continue;
            };
            for &neighbor in adjacent {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = self.distance(query, neighbor);
                let worse_than_all = nearest
                    .peek()
                    .map(|f: &Candidate| dist >= f.dist)
                    .unwrap_or(false);
                if nearest.len() < ef || !worse_than_all {
                    let n = Candidate { dist, idx: neighbor };
                    candidates.push(Reverse(n));
                    nearest.push(n);
                    if nearest.len() > ef {
                        nearest.pop();
                    }
                }
            }
        }

        nearest.into_vec()
    }

    /// Prefer candidates closer to the query than to any already selected one,
    /// then fill with the nearest remaining.
    fn select_neighbors(&self, mut candidates: Vec<Candidate>, m: usize) -> Vec<usize> {
        candidates.sort();
        let mut selected: Vec<usize> = Vec::with_capacity(m);

        for cand in &candidates {
            if selected.len() >= m {
                break;
            }
            let diverse = selected.iter().all(|&s| {
                cosine_distance(&self.nodes[cand.idx].vector, &self.nodes[s].vector) >= cand.dist
            });
            if diverse {
                selected.push(cand.idx);
            }
        }

        for cand in &candidates {
            if selected.len() >= m {
                break;
            }
            if !selected.contains(&cand.idx) {
                selected.push(cand.idx);
            }
        }

        selected
    }

    fn connect(&mut self, from: usize, to: usize, layer: usize) {
        if from == to {
            return;
        }
        let list = &mut self.nodes[from].neighbors[layer];
        if !list.contains(&to) {
            list.push(to);
        }
    }

    fn prune(&mut self, idx: usize, layer: usize, limit: usize) {
        let candidates: Vec<Candidate> = self.nodes[idx].neighbors[layer]
            .iter()
            .map(|&n| Candidate {
                dist: cosine_distance(&self.nodes[idx].vector, &self.nodes[n].vector),
                idx: n,
            })
            .collect();
        let selected = self.select_neighbors(candidates, limit);
        self.nodes[idx].neighbors[layer] = selected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_unit_vectors(n: usize, dims: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let v: Vec<f32> = (0..dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                v.into_iter().map(|x| x / norm).collect()
            })
            .collect()
    }

    fn brute_force(data: &[Vec<f32>], query: &[f32], k: usize) -> Vec<String> {
        let mut scored: Vec<(usize, f32)> = data
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_distance(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.into_iter().take(k).map(|(i, _)| format!("k{}", i)).collect()
    }

    #[test]
    fn test_recall_against_brute_force() {
        let data = random_unit_vectors(1500, 24, 7);
        let mut index = VectorIndex::new(IndexParams::default());
        for (i, v) in data.iter().enumerate() {
            index.upsert(&format!("k{}", i), v);
        }
        assert_eq!(index.len(), 1500);

        let queries = random_unit_vectors(50, 24, 99);
        let k = 10;
        let mut hits = 0;
        for q in &queries {
            let expected: HashSet<String> = brute_force(&data, q, k).into_iter().collect();
            let found = index.search(q, k);
            assert_eq!(found.len(), k);
            hits += found.iter().filter(|(key, _)| expected.contains(key)).count();
        }
        let recall = hits as f64 / (queries.len() * k) as f64;
        assert!(recall >= 0.9, "recall too low: {}", recall);
    }

    #[test]
    fn test_exact_match_is_top_result() {
        let data = random_unit_vectors(300, 16, 3);
        let mut index = VectorIndex::new(IndexParams::default());
        for (i, v) in data.iter().enumerate() {
            index.upsert(&format!("k{}", i), v);
        }
        let found = index.search(&data[42], 1);
        assert_eq!(found[0].0, "k42");
        assert!(found[0].1.abs() < 1e-5);
    }

    #[test]
    fn test_overwrite_and_remove() {
        let data = random_unit_vectors(3, 8, 1);
        let mut index = VectorIndex::new(IndexParams::default());
        index.upsert("a", &data[0]);
        index.upsert("b", &data[1]);
        index.upsert("a", &data[2]);
        assert_eq!(index.len(), 2);

        let found = index.search(&data[0], 5);
        assert_eq!(found.len(), 2);
        let a = found.iter().find(|(k, _)| k == "a").unwrap();
        assert!((a.1 - cosine_distance(&data[0], &data[2])).abs() < 1e-5);

        assert!(index.remove("b"));
        assert!(!index.remove("b"));
        let found = index.search(&data[1], 5);
        assert_eq!(found.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_filtered_search_widens() {
        let data = random_unit_vectors(400, 16, 11);
        let mut index = VectorIndex::new(IndexParams::default());
        for (i, v) in data.iter().enumerate() {
            index.upsert(&format!("k{}", i), v);
        }
        // Only one key in forty is acceptable.
        let found = index.search_filtered(&data[0], 5, |key| {
            key[1..].parse::<usize>().map(|i| i % 40 == 0).unwrap_or(false)
        });
        assert_eq!(found.len(), 5);
        assert_eq!(found[0].0, "k0");
        assert!(found.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_empty_index() {
        let index = VectorIndex::new(IndexParams::default());
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0], 3).is_empty());
    }
}
