use geo::{Coord, Point, Polygon, Rect};
use ndarray::Array1;

// California extent in EPSG:3310, 100 m spacing. Axis starts/stops match the
// historical grid so cells line up with previously published pixels.
const CA_X_ORIGIN: f64 = -381_105.0;
const CA_Y_ORIGIN: f64 = 456_105.0;
const CA_COLUMNS: f64 = 9_220.0;
const CA_ROWS: f64 = 10_630.0;

pub const DEFAULT_CELL_SIZE: f64 = 100.0;

/// Regular lattice of cell centres. Axes follow `arange(start, stop, step)`:
/// `stop` is exclusive.
#[derive(Debug, Clone)]
pub struct Lattice {
    pub xs: Array1<f64>,
    pub ys: Array1<f64>,
    pub spacing: f64,
}

impl Lattice {
    pub fn new(x_start: f64, x_stop: f64, y_start: f64, y_stop: f64, spacing: f64) -> Self {
        Self {
            xs: Array1::range(x_start, x_stop, spacing),
            ys: Array1::range(y_start, y_stop, spacing),
            spacing,
        }
    }

    /// The statewide 100 m lattice.
    pub fn california() -> Self {
        let step = DEFAULT_CELL_SIZE;
        Self::new(
            CA_X_ORIGIN + step / 2.0,
            CA_X_ORIGIN + step * CA_COLUMNS,
            CA_Y_ORIGIN - step * CA_ROWS - step / 2.0,
            CA_Y_ORIGIN,
            step,
        )
    }

    #[inline]
    pub fn n_points(&self) -> usize {
        self.xs.len() * self.ys.len()
    }

    #[inline]
    pub fn point(&self, i: u32, j: u32) -> Point<f64> {
        Point::new(self.xs[i as usize], self.ys[j as usize])
    }

    /// Index ranges of lattice points inside the closed rectangle, or `None`
    /// when it misses the lattice entirely.
    pub fn index_window(&self, min: Coord<f64>, max: Coord<f64>) -> Option<(IndexRange, IndexRange)> {
        let xr = axis_window(&self.xs, self.spacing, min.x, max.x)?;
        let yr = axis_window(&self.ys, self.spacing, min.y, max.y)?;
        Some((xr, yr))
    }
}

pub type IndexRange = std::ops::RangeInclusive<u32>;

fn axis_window(axis: &Array1<f64>, step: f64, lo: f64, hi: f64) -> Option<IndexRange> {
    let n = axis.len();
    if n == 0 || hi < lo {
        return None;
    }
    let first = axis[0];
    let lo_idx = ((lo - first) / step).ceil().max(0.0);
    let hi_idx = ((hi - first) / step).floor().min((n - 1) as f64);
    if lo_idx > hi_idx {
        return None;
    }
    Some(lo_idx as u32..=hi_idx as u32)
}

/// Axis-aligned square of edge `size` centred on `centre`.
pub fn square_around(centre: Point<f64>, size: f64) -> Polygon<f64> {
    let half = size / 2.0;
    Rect::new(
        Coord {
            x: centre.x() - half,
            y: centre.y() - half,
        },
        Coord {
            x: centre.x() + half,
            y: centre.y() + half,
        },
    )
    .to_polygon()
}
