//! Vantage-point tree for the k-nearest-neighbour queries behind the input affinities.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ndarray::ArrayView2;
use rayon::prelude::*;

struct VpNode {
    index: usize,
    /// Median distance from the vantage point; inner points lie at or below it.
    radius: f64,
    inner: Option<usize>,
    outer: Option<usize>,
}

pub(super) struct VpTree<'a> {
    data: ArrayView2<'a, f64>,
    nodes: Vec<VpNode>,
    root: Option<usize>,
}

#[derive(PartialEq)]
struct Candidate {
    distance: f64,
    index: usize,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> VpTree<'a> {
    pub(super) fn new(data: ArrayView2<'a, f64>) -> Self {
        let mut tree = Self {
            data,
            nodes: Vec::with_capacity(data.nrows()),
            root: None,
        };
        let mut items: Vec<usize> = (0..data.nrows()).collect();
        tree.root = tree.build(&mut items);
        tree
    }

    fn distance(&self, a: usize, b: usize) -> f64 {
        self.data
            .row(a)
            .iter()
            .zip(self.data.row(b).iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }

    fn build(&mut self, items: &mut [usize]) -> Option<usize> {
        let (&mut vantage, rest) = items.split_first_mut()?;
        let node = self.nodes.len();
        self.nodes.push(VpNode {
            index: vantage,
            radius: 0.0,
            inner: None,
            outer: None,
        });
        if rest.is_empty() {
            return Some(node);
        }

        let median = rest.len() / 2;
        rest.select_nth_unstable_by(median, |&a, &b| {
            self.distance(vantage, a)
                .total_cmp(&self.distance(vantage, b))
                .then(a.cmp(&b))
        });
        let radius = self.distance(vantage, rest[median]);
        let (inner, outer) = rest.split_at_mut(median);

        let inner = self.build(inner);
        let outer = self.build(outer);
        let entry = &mut self.nodes[node];
        entry.radius = radius;
        entry.inner = inner;
        entry.outer = outer;
        Some(node)
    }

    /// The `k` nearest rows to row `target` (itself excluded), closest first, as
    /// `(row, squared distance)`. Ties are broken by row index.
    pub(super) fn nearest(&self, target: usize, k: usize) -> Vec<(usize, f64)> {
        let mut heap = BinaryHeap::with_capacity(k + 1);
        let mut tau = f64::INFINITY;
        if let Some(root) = self.root {
            self.search(root, target, k, &mut heap, &mut tau);
        }
        heap.into_sorted_vec()
            .into_iter()
            .map(|c| (c.index, c.distance * c.distance))
            .collect()
    }

    fn search(
        &self,
        node: usize,
        target: usize,
        k: usize,
        heap: &mut BinaryHeap<Candidate>,
        tau: &mut f64,
    ) {
        let VpNode {
            index,
            radius,
            inner,
            outer,
        } = self.nodes[node];
        let d = self.distance(index, target);
        if index != target && k > 0 && d <= *tau {
            heap.push(Candidate { distance: d, index });
            if heap.len() > k {
                heap.pop();
            }
            if heap.len() == k {
                if let Some(worst) = heap.peek() {
                    *tau = worst.distance;
                }
            }
        }

        if d < radius {
            if let Some(inner) = inner {
                if d - *tau <= radius {
                    self.search(inner, target, k, heap, tau);
                }
            }
            if let Some(outer) = outer {
                if d + *tau >= radius {
                    self.search(outer, target, k, heap, tau);
                }
            }
        } else {
            if let Some(outer) = outer {
                if d + *tau >= radius {
                    self.search(outer, target, k, heap, tau);
                }
            }
            if let Some(inner) = inner {
                if d - *tau <= radius {
                    self.search(inner, target, k, heap, tau);
                }
            }
        }
    }

    /// [`VpTree::nearest`] for every row, in parallel.
    pub(super) fn all_nearest(&self, k: usize) -> Vec<Vec<(usize, f64)>> {
        (0..self.data.nrows())
            .into_par_iter()
            .map(|i| self.nearest(i, k))
            .collect()
    }
}
