//! Grid georeferencing and cell-centre math.
//!
//! Every grid is stored as an affine geo-transform over fractional cell
//! indices:
//!
//! ```text
//! x = c + a·u + b·v
//! y = f + d·u + e·v
//! ```
//!
//! where `u` counts columns and `v` counts rows from the upper-left corner of
//! the upper-left cell. The centre of cell `(row, col)` is at
//! `u = col + 0.5`, `v = row + 0.5`. Axis-aligned, rotated, lower-left
//! registered and world-file grids are all expressed in this one form.

use serde::Serialize;

/// Affine coefficients mapping fractional (column, row) to CRS coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoTransform {
    /// X of the upper-left corner
    pub c: f64,
    /// X change per column
    pub a: f64,
    /// X change per row
    pub b: f64,
    /// Y of the upper-left corner
    pub f: f64,
    /// Y change per column
    pub d: f64,
    /// Y change per row
    pub e: f64,
}

impl GeoTransform {
    pub fn apply(&self, u: f64, v: f64) -> (f64, f64) {
        (
            self.c + self.a * u + self.b * v,
            self.f + self.d * u + self.e * v,
        )
    }

    /// True when rows and columns are parallel to the CRS axes.
    pub fn is_axis_aligned(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    fn approx_eq(&self, other: &GeoTransform, tol: f64) -> bool {
        let pairs = [
            (self.c, other.c),
            (self.a, other.a),
            (self.b, other.b),
            (self.f, other.f),
            (self.d, other.d),
            (self.e, other.e),
        ];
        pairs
            .iter()
            .all(|(l, r)| (l - r).abs() <= tol * l.abs().max(r.abs()).max(1.0))
    }
}

/// Bounding box of a grid in its own CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

/// Shape and georeferencing of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridGeometry {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
}

impl GridGeometry {
    /// Axis-aligned grid whose origin is the upper-left corner.
    pub fn upper_left(
        origin_x: f64,
        origin_y: f64,
        cell_width: f64,
        cell_height: f64,
        rows: usize,
        cols: usize,
    ) -> Self {
        Self::rotated(origin_x, origin_y, cell_width, cell_height, 0.0, rows, cols)
    }

    /// Axis-aligned grid whose origin is the lower-left corner
    /// (ESRI `xllcorner`/`yllcorner`).
    pub fn lower_left(
        origin_x: f64,
        origin_y: f64,
        cell_width: f64,
        cell_height: f64,
        rows: usize,
        cols: usize,
    ) -> Self {
        Self::upper_left(
            origin_x,
            origin_y + rows as f64 * cell_height,
            cell_width,
            cell_height,
            rows,
            cols,
        )
    }

    /// Grid rotated clockwise by `theta` radians about its upper-left
    /// corner: a positive angle turns the column axis from east toward
    /// south.
    pub fn rotated(
        origin_x: f64,
        origin_y: f64,
        cell_width: f64,
        cell_height: f64,
        theta: f64,
        rows: usize,
        cols: usize,
    ) -> Self {
        let (sin, cos) = theta.sin_cos();
        Self {
            rows,
            cols,
            transform: GeoTransform {
                c: origin_x,
                a: cell_width * cos,
                b: -cell_height * sin,
                f: origin_y,
                d: -cell_width * sin,
                e: -cell_height * cos,
            },
        }
    }

    /// Grid described by ESRI world-file parameters `[A, D, B, E, C, F]`,
    /// where `(C, F)` is the centre of the upper-left cell.
    pub fn from_world_file(params: [f64; 6], rows: usize, cols: usize) -> Self {
        let [a, d, b, e, c, f] = params;
        Self {
            rows,
            cols,
            transform: GeoTransform {
                c: c - 0.5 * a - 0.5 * b,
                a,
                b,
                f: f - 0.5 * d - 0.5 * e,
                d,
                e,
            },
        }
    }

    /// Centre of cell `(row, col)`.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.transform.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Envelope of the four outer corners.
    pub fn bbox(&self) -> BoundingBox {
        let (w, h) = (self.cols as f64, self.rows as f64);
        let corners = [
            self.transform.apply(0.0, 0.0),
            self.transform.apply(w, 0.0),
            self.transform.apply(0.0, h),
            self.transform.apply(w, h),
        ];
        corners.iter().fold(
            BoundingBox {
                min_x: f64::INFINITY,
                min_y: f64::INFINITY,
                max_x: f64::NEG_INFINITY,
                max_y: f64::NEG_INFINITY,
            },
            |acc, (x, y)| BoundingBox {
                min_x: acc.min_x.min(*x),
                min_y: acc.min_y.min(*y),
                max_x: acc.max_x.max(*x),
                max_y: acc.max_y.max(*y),
            },
        )
    }

    /// Same shape and georeferencing, up to a relative tolerance.
    pub fn matches(&self, other: &GridGeometry) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && self.transform.approx_eq(&other.transform, 1e-9)
    }
}
