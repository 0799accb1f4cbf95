// src/grid.rs
//
// Discretization of a bounded continuous state space into axis-aligned
// cells, with one label per cell.
//
// Layout:
// - The grid origin is the lower corner. Along axis i the cell with index k
//   covers [lower[i] + k*g[i], lower[i] + (k+1)*g[i]).
// - Labels are stored densely in row-major order: axis 0 varies slowest,
//   the last axis fastest. `cells()` iterates in the same order.
// - The domain is [lower, upper). Points outside it resolve to
//   `CellRef::Outside`.

use serde::{Deserialize, Serialize};

use crate::actions::ActionSet;
use crate::bounds::Bounds;
use crate::error::{Result, ShieldError};

/// Relative slack used when snapping the requested upper bound onto a
/// whole number of cells.
const SNAP_EPSILON: f64 = 1e-9;

/// Flat row-major index of a cell inside its grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(pub usize);

impl CellId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Result of locating a point: a cell of the grid, or the outside sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellRef {
    Inside(CellId),
    Outside,
}

/// Per-cell metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellLabel {
    /// Not yet visited by synthesis.
    Unclassified,
    /// Reported for lookups of `CellRef::Outside`; never stored in a cell.
    Outside,
    /// Actions currently believed safe. Empty means fully unsafe.
    Classified(ActionSet),
}

impl CellLabel {
    /// Allowed actions, treating anything but a classified cell as "none".
    pub fn allowed(self) -> ActionSet {
        match self {
            CellLabel::Classified(set) => set,
            CellLabel::Unclassified | CellLabel::Outside => ActionSet::EMPTY,
        }
    }

    /// True for the outside sentinel and for classified cells with no
    /// allowed action.
    pub fn is_fully_unsafe(self) -> bool {
        match self {
            CellLabel::Outside => true,
            CellLabel::Classified(set) => set.is_empty(),
            CellLabel::Unclassified => false,
        }
    }
}

/// Label tallies for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCounts {
    pub unclassified: usize,
    pub fully_unsafe: usize,
    pub with_actions: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    granularity: Vec<f64>,
    bounds: Bounds,
    size: Vec<usize>,
    strides: Vec<usize>,
    labels: Vec<CellLabel>,
}

impl Grid {
    /// Build a grid over `[lower, upper)` with the given cell widths. The
    /// upper bound is extended to the next whole cell when the range is not
    /// a multiple of the granularity. All cells start `Unclassified`.
    pub fn new(granularity: Vec<f64>, lower: Vec<f64>, upper: Vec<f64>) -> Result<Self> {
        let dims = granularity.len();
        if dims == 0 {
            return Err(ShieldError::InvalidGrid(
                "grid needs at least one dimension".to_string(),
            ));
        }
        if lower.len() != dims || upper.len() != dims {
            return Err(ShieldError::InvalidGrid(format!(
                "dimension mismatch: granularity {}, lower {}, upper {}",
                dims,
                lower.len(),
                upper.len()
            )));
        }

        let mut size = Vec::with_capacity(dims);
        let mut snapped_upper = Vec::with_capacity(dims);
        for axis in 0..dims {
            let (g, lo, hi) = (granularity[axis], lower[axis], upper[axis]);
            if !g.is_finite() || g <= 0.0 {
                return Err(ShieldError::InvalidGrid(format!(
                    "granularity on axis {axis} must be positive and finite, got {g}"
                )));
            }
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(ShieldError::InvalidGrid(format!(
                    "axis {axis} needs finite lower < upper, got [{lo}, {hi}]"
                )));
            }
            let span = (hi - lo) / g;
            let rounded = span.round();
            let cells = if (span - rounded).abs() <= SNAP_EPSILON * rounded.max(1.0) {
                rounded
            } else {
                span.ceil()
            };
            if cells < 1.0 || cells > usize::MAX as f64 {
                return Err(ShieldError::InvalidGrid(format!(
                    "axis {axis} resolves to an unusable cell count {cells}"
                )));
            }
            let cells = cells as usize;
            size.push(cells);
            snapped_upper.push(lo + cells as f64 * g);
        }

        let total = cell_count(&size)?;
        let bounds = Bounds::new(lower, snapped_upper)?;
        Ok(Self {
            strides: strides_for(&size),
            granularity,
            bounds,
            size,
            labels: vec![CellLabel::Unclassified; total],
        })
    }

    /// Rebuild a grid from persisted parts. `upper` is taken verbatim so a
    /// round trip is bit-exact.
    pub fn from_parts(
        granularity: Vec<f64>,
        lower: Vec<f64>,
        upper: Vec<f64>,
        size: Vec<usize>,
        labels: Vec<CellLabel>,
    ) -> Result<Self> {
        let dims = granularity.len();
        if dims == 0 || lower.len() != dims || upper.len() != dims || size.len() != dims {
            return Err(ShieldError::InvalidGrid(
                "inconsistent dimensionality in grid parts".to_string(),
            ));
        }
        for axis in 0..dims {
            let g = granularity[axis];
            if !g.is_finite() || g <= 0.0 || size[axis] == 0 {
                return Err(ShieldError::InvalidGrid(format!(
                    "axis {axis} has granularity {g} and {} cells",
                    size[axis]
                )));
            }
            let expected = lower[axis] + size[axis] as f64 * g;
            if (expected - upper[axis]).abs() > g * 1e-6 {
                return Err(ShieldError::InvalidGrid(format!(
                    "axis {axis} upper bound {} does not match {} cells of width {g}",
                    upper[axis], size[axis]
                )));
            }
        }
        let total = cell_count(&size)?;
        if labels.len() != total {
            return Err(ShieldError::InvalidGrid(format!(
                "expected {total} labels, got {}",
                labels.len()
            )));
        }
        if labels.iter().any(|l| matches!(l, CellLabel::Outside)) {
            return Err(ShieldError::InvalidGrid(
                "the outside sentinel cannot be stored in a cell".to_string(),
            ));
        }
        Ok(Self {
            strides: strides_for(&size),
            granularity,
            bounds: Bounds::new(lower, upper)?,
            size,
            labels,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.granularity.len()
    }

    pub fn granularity(&self) -> &[f64] {
        &self.granularity
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Number of cells along each axis.
    pub fn size(&self) -> &[usize] {
        &self.size
    }

    /// Row-major stride of each axis in the flat label array.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Locate the cell containing `point`.
    ///
    /// Returns `Outside` for points outside `[lower, upper)`, for
    /// non-finite coordinates and for vectors of the wrong length.
    pub fn cell_of(&self, point: &[f64]) -> CellRef {
        if point.len() != self.dimensions() {
            return CellRef::Outside;
        }
        let mut flat = 0usize;
        for axis in 0..point.len() {
            let x = point[axis];
            let lo = self.bounds.lower[axis];
            if !x.is_finite() || x < lo || x >= self.bounds.upper[axis] {
                return CellRef::Outside;
            }
            let k = (((x - lo) / self.granularity[axis]).floor() as usize).min(self.size[axis] - 1);
            flat += k * self.strides[axis];
        }
        CellRef::Inside(CellId(flat))
    }

    /// Locate the cell of `point` after pulling every coordinate into the
    /// domain. Coordinates at or beyond `upper` land in the last cell.
    pub fn clamped_cell_of(&self, point: &[f64]) -> Result<CellId> {
        if point.len() != self.dimensions() {
            return Err(ShieldError::InvalidState(format!(
                "expected {} coordinates, got {}",
                self.dimensions(),
                point.len()
            )));
        }
        let mut flat = 0usize;
        for axis in 0..point.len() {
            let x = point[axis];
            if !x.is_finite() {
                return Err(ShieldError::InvalidState(format!(
                    "coordinate {axis} is not finite ({x})"
                )));
            }
            let t = ((x - self.bounds.lower[axis]) / self.granularity[axis]).floor();
            let k = if t <= 0.0 {
                0
            } else {
                (t as usize).min(self.size[axis] - 1)
            };
            flat += k * self.strides[axis];
        }
        Ok(CellId(flat))
    }

    /// Per-axis integer indices of a cell.
    pub fn indices_of(&self, cell: CellId) -> Vec<usize> {
        let mut rest = cell.0;
        self.strides
            .iter()
            .map(|stride| {
                let k = rest / stride;
                rest %= stride;
                k
            })
            .collect()
    }

    /// Flat id of the cell at the given per-axis indices.
    pub fn cell_at(&self, indices: &[usize]) -> Option<CellId> {
        if indices.len() != self.dimensions() {
            return None;
        }
        let mut flat = 0;
        for (axis, k) in indices.iter().enumerate() {
            if *k >= self.size[axis] {
                return None;
            }
            flat += k * self.strides[axis];
        }
        Some(CellId(flat))
    }

    /// Lower and upper corner of a cell.
    pub fn bounds_of(&self, cell: CellId) -> Bounds {
        let indices = self.indices_of(cell);
        let mut lower = Vec::with_capacity(indices.len());
        let mut upper = Vec::with_capacity(indices.len());
        for (axis, k) in indices.into_iter().enumerate() {
            let g = self.granularity[axis];
            let lo = self.bounds.lower[axis];
            lower.push(lo + k as f64 * g);
            upper.push(lo + (k + 1) as f64 * g);
        }
        Bounds { lower, upper }
    }

    /// All cells in row-major order. The iterator is cheap to recreate and
    /// always yields the same sequence.
    pub fn cells(&self) -> impl Iterator<Item = CellId> + ExactSizeIterator + Clone {
        (0..self.labels.len()).map(CellId)
    }

    pub fn partitions(&self) -> impl Iterator<Item = Partition<'_>> + '_ {
        self.cells().map(move |id| Partition { grid: self, id })
    }

    pub fn partition(&self, cell: CellId) -> Partition<'_> {
        Partition { grid: self, id: cell }
    }

    pub fn label(&self, cell: CellId) -> CellLabel {
        self.labels[cell.0]
    }

    pub fn label_at(&self, cell: CellRef) -> CellLabel {
        match cell {
            CellRef::Inside(id) => self.labels[id.0],
            CellRef::Outside => CellLabel::Outside,
        }
    }

    /// Overwrite the allowed-action mask of one cell.
    pub fn set_actions(&mut self, cell: CellId, actions: ActionSet) {
        self.labels[cell.0] = CellLabel::Classified(actions);
    }

    pub fn labels(&self) -> &[CellLabel] {
        &self.labels
    }

    pub(crate) fn replace_labels(&mut self, labels: Vec<CellLabel>) -> Vec<CellLabel> {
        debug_assert_eq!(labels.len(), self.labels.len());
        std::mem::replace(&mut self.labels, labels)
    }

    pub fn count_labels(&self) -> LabelCounts {
        let mut counts = LabelCounts::default();
        for label in &self.labels {
            match label {
                CellLabel::Unclassified | CellLabel::Outside => counts.unclassified += 1,
                CellLabel::Classified(set) if set.is_empty() => counts.fully_unsafe += 1,
                CellLabel::Classified(_) => counts.with_actions += 1,
            }
        }
        counts
    }
}

/// View of one cell borrowed from its grid.
#[derive(Debug, Clone, Copy)]
pub struct Partition<'g> {
    grid: &'g Grid,
    id: CellId,
}

impl<'g> Partition<'g> {
    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn indices(&self) -> Vec<usize> {
        self.grid.indices_of(self.id)
    }

    pub fn bounds(&self) -> Bounds {
        self.grid.bounds_of(self.id)
    }

    pub fn label(&self) -> CellLabel {
        self.grid.label(self.id)
    }

    pub fn grid(&self) -> &'g Grid {
        self.grid
    }
}

fn strides_for(size: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; size.len()];
    for axis in (0..size.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * size[axis + 1];
    }
    strides
}

fn cell_count(size: &[usize]) -> Result<usize> {
    size.iter().try_fold(1usize, |acc, n| {
        acc.checked_mul(*n).ok_or_else(|| {
            ShieldError::InvalidGrid(format!("cell count overflows for size {size:?}"))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_2d() -> Grid {
        Grid::new(vec![0.5, 1.0], vec![0.0, -2.0], vec![2.0, 1.0]).unwrap()
    }

    #[test]
    fn size_and_strides_are_row_major() {
        let g = grid_2d();
        assert_eq!(g.size(), &[4, 3]);
        assert_eq!(g.strides(), &[3, 1]);
        assert_eq!(g.len(), 12);
        assert_eq!(g.indices_of(CellId(7)), vec![2, 1]);
        assert_eq!(g.cell_at(&[2, 1]), Some(CellId(7)));
        assert_eq!(g.cell_at(&[4, 0]), None);
    }

    #[test]
    fn upper_bound_snaps_to_whole_cells() {
        let g = Grid::new(vec![0.3], vec![0.0], vec![1.0]).unwrap();
        assert_eq!(g.size(), &[4]);
        assert!((g.bounds().upper[0] - 1.2).abs() < 1e-12);

        let exact = Grid::new(vec![0.1], vec![0.0], vec![1.0]).unwrap();
        assert_eq!(exact.size(), &[10]);
    }

    #[test]
    fn cell_of_and_bounds_of_agree() {
        let g = grid_2d();
        let p = [1.2, 0.3];
        let CellRef::Inside(id) = g.cell_of(&p) else {
            panic!("point should be inside");
        };
        assert_eq!(g.indices_of(id), vec![2, 2]);
        let b = g.bounds_of(id);
        assert_eq!(b.lower, vec![1.0, 0.0]);
        assert_eq!(b.upper, vec![1.5, 1.0]);
        assert!(b.contains(&p, 0.0));
    }

    #[test]
    fn outside_points_hit_the_sentinel() {
        let g = grid_2d();
        assert_eq!(g.cell_of(&[-0.1, 0.0]), CellRef::Outside);
        assert_eq!(g.cell_of(&[2.0, 0.0]), CellRef::Outside);
        assert_eq!(g.cell_of(&[1.0, f64::NAN]), CellRef::Outside);
        assert_eq!(g.cell_of(&[1.0]), CellRef::Outside);
        assert_eq!(g.label_at(CellRef::Outside), CellLabel::Outside);
    }

    #[test]
    fn clamped_lookup_pulls_points_in() {
        let g = grid_2d();
        assert_eq!(g.clamped_cell_of(&[-5.0, -9.0]).unwrap(), CellId(0));
        assert_eq!(g.clamped_cell_of(&[2.0, 1.0]).unwrap(), CellId(11));
        assert_eq!(g.clamped_cell_of(&[2.0000001, 0.5]).unwrap(), CellId(11));
        assert!(matches!(
            g.clamped_cell_of(&[f64::INFINITY, 0.0]),
            Err(ShieldError::InvalidState(_))
        ));
        assert!(g.clamped_cell_of(&[0.0]).is_err());
    }

    #[test]
    fn cells_iteration_is_stable() {
        let g = grid_2d();
        let a: Vec<_> = g.cells().collect();
        let b: Vec<_> = g.cells().collect();
        assert_eq!(a, b);
        assert_eq!(a.first(), Some(&CellId(0)));
        assert_eq!(a.last(), Some(&CellId(11)));
        assert_eq!(g.partitions().count(), 12);
    }

    #[test]
    fn set_actions_is_a_single_write() {
        let mut g = grid_2d();
        g.set_actions(CellId(3), ActionSet::single(1));
        assert_eq!(g.label(CellId(3)), CellLabel::Classified(ActionSet::single(1)));
        assert_eq!(g.partition(CellId(3)).label().allowed(), ActionSet::single(1));
        let counts = g.count_labels();
        assert_eq!(counts.with_actions, 1);
        assert_eq!(counts.unclassified, 11);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(Grid::new(vec![], vec![], vec![]).is_err());
        assert!(Grid::new(vec![0.0], vec![0.0], vec![1.0]).is_err());
        assert!(Grid::new(vec![1.0], vec![1.0], vec![1.0]).is_err());
        assert!(Grid::new(vec![1.0, 1.0], vec![0.0], vec![1.0]).is_err());
    }

    #[test]
    fn from_parts_checks_consistency() {
        let g = grid_2d();
        let rebuilt = Grid::from_parts(
            g.granularity().to_vec(),
            g.bounds().lower.clone(),
            g.bounds().upper.clone(),
            g.size().to_vec(),
            g.labels().to_vec(),
        )
        .unwrap();
        assert_eq!(rebuilt, g);

        let bad = Grid::from_parts(
            vec![1.0],
            vec![0.0],
            vec![3.0],
            vec![2],
            vec![CellLabel::Unclassified; 2],
        );
        assert!(bad.is_err());
    }
}
