//! Approximate nearest-neighbor indexes over encoded vocabulary
//!
//! An index stores vectors only. The position of a vector is the join key into
//! the shard vocabulary, so the index never needs to know which word it holds.
//!
//! Two backends share the [`NeighborIndex`] interface:
//! - [`AngularForest`]: a forest of random-projection trees, searched best-first
//! - [`FlatIndex`]: exact linear scan, used for small shards

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("vector has dimension {actual}, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("corrupt index artifact: {0}")]
    Corrupt(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("index codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

/// One query answer: position in the indexed sequence and its angular distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Angular distance `sqrt(2 - 2 cos(u, v))`, in `[0, 2]`.
///
/// A zero vector has no direction, so it sits at `sqrt(2)` from everything.
pub fn angular_distance(a: &[f32], b: &[f32]) -> f32 {
    let (mut pp, mut qq, mut pq) = (0f64, 0f64, 0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        pp += x * x;
        qq += y * y;
        pq += x * y;
    }
    let ppqq = pp * qq;
    if ppqq > 0.0 {
        (2.0 - 2.0 * pq / ppqq.sqrt()).max(0.0).sqrt() as f32
    } else {
        std::f32::consts::SQRT_2
    }
}

/// Read-only k-nearest-neighbor lookup.
pub trait NeighborIndex: Send + Sync {
    /// Length every stored and queried vector must have.
    fn dimension(&self) -> usize;

    /// Number of indexed vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// At most `k` neighbors of `vector`, closest first.
    fn nearest(&self, vector: &[f32], k: usize) -> IndexResult<Vec<Neighbor>>;
}

fn check_dimension(expected: usize, vector: &[f32]) -> IndexResult<()> {
    if vector.len() != expected {
        return Err(IndexError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Score candidate positions exactly and keep the best `k`. Ties break on position
/// so results do not depend on candidate discovery order.
fn rank_exact<I>(items: &[f32], dimension: usize, vector: &[f32], candidates: I, k: usize) -> Vec<Neighbor>
where
    I: IntoIterator<Item = usize>,
{
    let mut scored: Vec<Neighbor> = candidates
        .into_iter()
        .map(|position| Neighbor {
            position,
            distance: angular_distance(vector, item(items, dimension, position)),
        })
        .collect();
    scored.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.position.cmp(&b.position))
    });
    scored.truncate(k);
    scored
}

fn item(items: &[f32], dimension: usize, position: usize) -> &[f32] {
    &items[position * dimension..(position + 1) * dimension]
}

fn check_layout(items: &[f32], dimension: usize) -> IndexResult<()> {
    if dimension == 0 || items.len() % dimension != 0 {
        return Err(IndexError::Corrupt(format!(
            "{} values do not divide into vectors of dimension {}",
            items.len(),
            dimension
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Flat index
// ─────────────────────────────────────────────────────────────────────────────

/// Exact search by scanning every stored vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    items: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            items: Vec::new(),
        }
    }

    pub fn add_item(&mut self, vector: &[f32]) -> IndexResult<usize> {
        check_dimension(self.dimension, vector)?;
        self.items.extend_from_slice(vector);
        Ok(self.len() - 1)
    }
}

impl NeighborIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.items.len() / self.dimension
        }
    }

    fn nearest(&self, vector: &[f32], k: usize) -> IndexResult<Vec<Neighbor>> {
        check_dimension(self.dimension, vector)?;
        Ok(rank_exact(&self.items, self.dimension, vector, 0..self.len(), k))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Random-projection forest
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf(Vec<u32>),
    /// Items with a positive margin against `normal` go right.
    Split { normal: Vec<f32>, left: u32, right: u32 },
}

/// Collects vectors, then builds an [`AngularForest`].
#[derive(Debug, Clone)]
pub struct ForestBuilder {
    dimension: usize,
    leaf_size: usize,
    items: Vec<f32>,
}

impl ForestBuilder {
    pub fn new(dimension: usize, leaf_size: usize) -> Self {
        Self {
            dimension,
            leaf_size: leaf_size.max(1),
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.items.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a vector; its position is returned and is the id the forest reports.
    pub fn add_item(&mut self, vector: &[f32]) -> IndexResult<usize> {
        check_dimension(self.dimension, vector)?;
        self.items.extend_from_slice(vector);
        Ok(self.len() - 1)
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    /// Exact index over the collected vectors, for sets that fit in a single leaf.
    pub fn into_flat(self) -> FlatIndex {
        FlatIndex {
            dimension: self.dimension,
            items: self.items,
        }
    }

    /// Grow `n_trees` trees. The same seed and items always give the same forest.
    pub fn build(self, n_trees: usize, seed: u64) -> AngularForest {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut forest = AngularForest {
            dimension: self.dimension,
            items: self.items,
            nodes: Vec::new(),
            roots: Vec::with_capacity(n_trees),
        };
        let all: Vec<u32> = (0..forest.len() as u32).collect();
        if all.is_empty() {
            return forest;
        }
        for _ in 0..n_trees.max(1) {
            let root = forest.grow(all.clone(), self.leaf_size, &mut rng);
            forest.roots.push(root);
        }
        forest
    }
}

/// Forest of random hyperplane trees queried under the angular metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AngularForest {
    dimension: usize,
    items: Vec<f32>,
    nodes: Vec<Node>,
    roots: Vec<u32>,
}

/// Heap entry: larger priority is explored first.
struct Pending {
    priority: f32,
    node: u32,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl AngularForest {
    pub fn n_trees(&self) -> usize {
        self.roots.len()
    }

    fn vector(&self, position: u32) -> &[f32] {
        item(&self.items, self.dimension, position as usize)
    }

    /// Every reference must land inside the forest, and children always precede
    /// their parent, so a decoded artifact can be searched without cycles.
    fn check_references(&self) -> IndexResult<()> {
        let n_nodes = self.nodes.len();
        let n_items = self.len();
        if let Some(root) = self.roots.iter().find(|&&r| r as usize >= n_nodes) {
            return Err(IndexError::Corrupt(format!("root {root} outside {n_nodes} nodes")));
        }
        for (at, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf(members) => {
                    if let Some(m) = members.iter().find(|&&m| m as usize >= n_items) {
                        return Err(IndexError::Corrupt(format!(
                            "leaf {at} holds item {m} outside {n_items} items"
                        )));
                    }
                }
                Node::Split {
                    normal,
                    left,
                    right,
                } => {
                    if normal.len() != self.dimension {
                        return Err(IndexError::Corrupt(format!(
                            "split {at} has a normal of dimension {}",
                            normal.len()
                        )));
                    }
                    if *left as usize >= at || *right as usize >= at {
                        return Err(IndexError::Corrupt(format!(
                            "split {at} points to children {left} and {right}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, node: Node) -> u32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u32
    }

    fn grow(&mut self, members: Vec<u32>, leaf_size: usize, rng: &mut StdRng) -> u32 {
        if members.len() <= leaf_size {
            return self.push(Node::Leaf(members));
        }

        let (normal, left, right) = self.split(&members, rng);
        let left = self.grow(left, leaf_size, rng);
        let right = self.grow(right, leaf_size, rng);
        self.push(Node::Split {
            normal,
            left,
            right,
        })
    }

    /// Pick a hyperplane through the origin separating two sampled items.
    ///
    /// When the sample cannot separate the members (duplicates, zero vectors) the
    /// split degrades to a random side assignment with a zero normal, which sends
    /// queries down both children.
    fn split(&self, members: &[u32], rng: &mut StdRng) -> (Vec<f32>, Vec<u32>, Vec<u32>) {
        const ATTEMPTS: usize = 3;

        for _ in 0..ATTEMPTS {
            let a = members[rng.gen_range(0..members.len())];
            let b = members[rng.gen_range(0..members.len())];
            if a == b {
                continue;
            }
            let normal: Vec<f32> = unit(self.vector(a))
                .iter()
                .zip(unit(self.vector(b)).iter())
                .map(|(x, y)| x - y)
                .collect();
            if normal.iter().all(|&v| v == 0.0) {
                continue;
            }
            let (right, left): (Vec<u32>, Vec<u32>) = members
                .iter()
                .partition(|&&m| dot(&normal, self.vector(m)) > 0.0);
            if !left.is_empty() && !right.is_empty() {
                return (normal, left, right);
            }
        }

        let normal = vec![0.0; self.dimension];
        let (mut right, mut left): (Vec<u32>, Vec<u32>) =
            members.iter().partition(|_| rng.gen_bool(0.5));
        if left.is_empty() || right.is_empty() {
            let mut all = members.to_vec();
            right = all.split_off(all.len() / 2);
            left = all;
        }
        (normal, left, right)
    }
}

impl NeighborIndex for AngularForest {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.items.len() / self.dimension
        }
    }

    fn nearest(&self, vector: &[f32], k: usize) -> IndexResult<Vec<Neighbor>> {
        check_dimension(self.dimension, vector)?;
        if k == 0 || self.roots.is_empty() {
            return Ok(Vec::new());
        }

        let search_k = k * self.roots.len();
        let mut queue: BinaryHeap<Pending> = self
            .roots
            .iter()
            .map(|&node| Pending {
                priority: f32::INFINITY,
                node,
            })
            .collect();

        let mut candidates: Vec<usize> = Vec::with_capacity(search_k);
        while candidates.len() < search_k {
            let Some(Pending { priority, node }) = queue.pop() else {
                break;
            };
            match &self.nodes[node as usize] {
                Node::Leaf(members) => candidates.extend(members.iter().map(|&m| m as usize)),
                Node::Split {
                    normal,
                    left,
                    right,
                } => {
                    let margin = dot(normal, vector);
                    queue.push(Pending {
                        priority: priority.min(margin),
                        node: *right,
                    });
                    queue.push(Pending {
                        priority: priority.min(-margin),
                        node: *left,
                    });
                }
            }
        }

        candidates.sort_unstable();
        candidates.dedup();
        Ok(rank_exact(&self.items, self.dimension, vector, candidates, k))
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn unit(v: &[f32]) -> Vec<f32> {
    let norm = dot(v, v).sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Persisted artifact
// ─────────────────────────────────────────────────────────────────────────────

/// Index as written to a shard's `.ann` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoredIndex {
    Forest(AngularForest),
    Flat(FlatIndex),
}

impl StoredIndex {
    pub fn save(&self, path: &Path) -> IndexResult<()> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> IndexResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        let index: Self = bincode::deserialize_from(reader)?;
        match &index {
            StoredIndex::Forest(f) => {
                check_layout(&f.items, f.dimension)?;
                f.check_references()?;
            }
            StoredIndex::Flat(f) => check_layout(&f.items, f.dimension)?,
        }
        Ok(index)
    }

    fn inner(&self) -> &dyn NeighborIndex {
        match self {
            StoredIndex::Forest(f) => f,
            StoredIndex::Flat(f) => f,
        }
    }
}

impl NeighborIndex for StoredIndex {
    fn dimension(&self) -> usize {
        self.inner().dimension()
    }

    fn len(&self) -> usize {
        self.inner().len()
    }

    fn nearest(&self, vector: &[f32], k: usize) -> IndexResult<Vec<Neighbor>> {
        self.inner().nearest(vector, k)
    }
}
