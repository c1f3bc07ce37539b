//! Space-partitioning tree over the embedding (a quadtree in 2-D, an octree in 3-D)
//! used for the Barnes-Hut approximation of the repulsive forces.

use ndarray::{Array2, ArrayViewMut1};

/// Cells stop splitting below this depth; coincident points share a leaf.
const MAX_DEPTH: usize = 48;

struct Cell {
    center: Vec<f64>,
    half_width: Vec<f64>,
    center_of_mass: Vec<f64>,
    count: usize,
    /// Rows stored in a leaf. Empty for internal cells.
    points: Vec<usize>,
    /// Index of the first of `2^dims` consecutive children.
    children: Option<usize>,
}

impl Cell {
    fn new(center: Vec<f64>, half_width: Vec<f64>) -> Self {
        let dims = center.len();
        Self {
            center,
            half_width,
            center_of_mass: vec![0.0; dims],
            count: 0,
            points: Vec::new(),
            children: None,
        }
    }

    fn max_width(&self) -> f64 {
        2.0 * self.half_width.iter().cloned().fold(0.0, f64::max)
    }

    fn child_slot(&self, point: &[f64]) -> usize {
        self.center
            .iter()
            .zip(point)
            .enumerate()
            .map(|(d, (c, p))| if p > c { 1 << d } else { 0 })
            .sum()
    }
}

pub(super) struct SpTree<'a> {
    y: &'a Array2<f64>,
    cells: Vec<Cell>,
}

impl<'a> SpTree<'a> {
    pub(super) fn new(y: &'a Array2<f64>) -> Self {
        let dims = y.ncols();
        let mut min = vec![f64::INFINITY; dims];
        let mut max = vec![f64::NEG_INFINITY; dims];
        for row in y.rows() {
            for d in 0..dims {
                min[d] = min[d].min(row[d]);
                max[d] = max[d].max(row[d]);
            }
        }
        let center: Vec<f64> = min.iter().zip(&max).map(|(a, b)| 0.5 * (a + b)).collect();
        let half_width: Vec<f64> = min
            .iter()
            .zip(&max)
            .map(|(a, b)| (0.5 * (b - a)).max(1e-5) + 1e-5)
            .collect();

        let mut tree = Self {
            y,
            cells: vec![Cell::new(center, half_width)],
        };
        for i in 0..y.nrows() {
            tree.insert(0, i, 0);
        }
        tree
    }

    fn point(&self, i: usize) -> Vec<f64> {
        self.y.row(i).to_vec()
    }

    fn insert(&mut self, cell: usize, i: usize, depth: usize) {
        let point = self.point(i);
        {
            let c = &mut self.cells[cell];
            let count = c.count as f64;
            for (m, p) in c.center_of_mass.iter_mut().zip(&point) {
                *m = (*m * count + p) / (count + 1.0);
            }
            c.count += 1;
        }

        if let Some(first) = self.cells[cell].children {
            let slot = self.cells[cell].child_slot(&point);
            self.insert(first + slot, i, depth + 1);
            return;
        }

        let coincident = self.cells[cell]
            .points
            .iter()
            .all(|&j| self.y.row(j).iter().zip(&point).all(|(a, b)| a == b));
        if self.cells[cell].points.is_empty() || coincident || depth >= MAX_DEPTH {
            self.cells[cell].points.push(i);
            return;
        }

        let first = self.subdivide(cell);
        let existing = std::mem::take(&mut self.cells[cell].points);
        for j in existing.into_iter().chain(std::iter::once(i)) {
            let slot = self.cells[cell].child_slot(&self.point(j));
            self.insert(first + slot, j, depth + 1);
        }
    }

    fn subdivide(&mut self, cell: usize) -> usize {
        let dims = self.y.ncols();
        let first = self.cells.len();
        let parent_center = self.cells[cell].center.clone();
        let half: Vec<f64> = self.cells[cell].half_width.iter().map(|w| 0.5 * w).collect();
        for slot in 0..(1usize << dims) {
            let center: Vec<f64> = (0..dims)
                .map(|d| {
                    if slot & (1 << d) != 0 {
                        parent_center[d] + half[d]
                    } else {
                        parent_center[d] - half[d]
                    }
                })
                .collect();
            self.cells.push(Cell::new(center, half.clone()));
        }
        self.cells[cell].children = Some(first);
        first
    }

    /// Adds the unnormalised repulsive force on row `i` to `force` and returns its
    /// contribution to the normalisation `Z`. Cells whose width over distance falls
    /// below `theta` are summarised by their centre of mass.
    pub(super) fn repulsion(&self, i: usize, theta: f64, force: &mut ArrayViewMut1<f64>) -> f64 {
        self.visit(0, i, theta, force)
    }

    fn visit(&self, cell: usize, i: usize, theta: f64, force: &mut ArrayViewMut1<f64>) -> f64 {
        let c = &self.cells[cell];
        if c.count == 0 {
            return 0.0;
        }
        let yi = self.y.row(i);

        match c.children {
            None => {
                let mut z = 0.0;
                for &j in &c.points {
                    if j == i {
                        continue;
                    }
                    let yj = self.y.row(j);
                    let dist: f64 = yi.iter().zip(yj.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
                    let q = 1.0 / (1.0 + dist);
                    z += q;
                    for d in 0..yi.len() {
                        force[d] += q * q * (yi[d] - yj[d]);
                    }
                }
                z
            }
            Some(first) => {
                let dist: f64 = yi
                    .iter()
                    .zip(&c.center_of_mass)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                if c.max_width() < theta * dist.sqrt() {
                    let q = 1.0 / (1.0 + dist);
                    let mass = c.count as f64 * q;
                    for d in 0..yi.len() {
                        force[d] += mass * q * (yi[d] - c.center_of_mass[d]);
                    }
                    mass
                } else {
                    let children = 1usize << yi.len();
                    (first..first + children)
                        .map(|child| self.visit(child, i, theta, force))
                        .sum()
                }
            }
        }
    }
}
