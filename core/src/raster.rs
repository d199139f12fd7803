//! Dense row-major grids holding per-cell simulation state.
//!
//! Two instantiations are used throughout: `HostRaster` counts hosts per
//! cell (susceptible, infected, dead), `CoeffRaster` holds dimensionless
//! weather or treatment coefficients.

use std::ops::{AddAssign, Index, IndexMut, SubAssign};

use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

pub type HostRaster = Raster<i32>;
pub type CoeffRaster = Raster<f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster<T> {
    rows: usize,
    cols: usize,
    cells: Vec<T>,
}

impl<T: Copy> Raster<T> {
    pub fn filled(rows: usize, cols: usize, value: T) -> Self {
        Self {
            rows,
            cols,
            cells: vec![value; rows * cols],
        }
    }

    /// Build a raster from row-major cell data. The length must match.
    pub fn from_cells(rows: usize, cols: usize, cells: Vec<T>) -> SimResult<Self> {
        if cells.len() != rows * cols {
            return Err(SimError::ShapeMismatch {
                expected_rows: rows,
                expected_cols: cols,
                rows: cells.len() / cols.max(1),
                cols,
            });
        }
        Ok(Self { rows, cols, cells })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [T] {
        &mut self.cells
    }

    pub fn same_shape<U>(&self, other: &Raster<U>) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    pub fn contains(&self, row: i64, col: i64) -> bool {
        row >= 0 && col >= 0 && (row as usize) < self.rows && (col as usize) < self.cols
    }
}

impl<T> Index<(usize, usize)> for Raster<T> {
    type Output = T;

    fn index(&self, (row, col): (usize, usize)) -> &T {
        &self.cells[row * self.cols + col]
    }
}

impl<T> IndexMut<(usize, usize)> for Raster<T> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut T {
        &mut self.cells[row * self.cols + col]
    }
}

impl Raster<i32> {
    /// Reset every cell to zero, keeping the allocation.
    pub fn zero(&mut self) {
        self.cells.fill(0);
    }

    pub fn sum(&self) -> i64 {
        self.cells.iter().map(|&v| i64::from(v)).sum()
    }

    pub fn is_all_zero(&self) -> bool {
        self.cells.iter().all(|&v| v == 0)
    }

    pub fn count_nonzero(&self) -> usize {
        self.cells.iter().filter(|&&v| v != 0).count()
    }

    /// Per-cell scaling with rounding to the nearest host.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            cells: self
                .cells
                .iter()
                .map(|&v| (f64::from(v) * factor).round() as i32)
                .collect(),
        }
    }

    /// Elementwise difference. Panics if shapes differ.
    pub fn difference(&self, other: &Self) -> Self {
        assert!(self.same_shape(other), "raster shape mismatch");
        Self {
            rows: self.rows,
            cols: self.cols,
            cells: self
                .cells
                .iter()
                .zip(&other.cells)
                .map(|(&a, &b)| a - b)
                .collect(),
        }
    }
}

impl Raster<f64> {
    /// Elementwise product, used to combine moisture and temperature
    /// coefficient rasters into one weather coefficient.
    pub fn product(&self, other: &Self) -> SimResult<Self> {
        if !self.same_shape(other) {
            return Err(SimError::ShapeMismatch {
                expected_rows: self.rows,
                expected_cols: self.cols,
                rows: other.rows,
                cols: other.cols,
            });
        }
        Ok(Self {
            rows: self.rows,
            cols: self.cols,
            cells: self
                .cells
                .iter()
                .zip(&other.cells)
                .map(|(&a, &b)| a * b)
                .collect(),
        })
    }
}

impl AddAssign<&Raster<i32>> for Raster<i32> {
    fn add_assign(&mut self, other: &Raster<i32>) {
        assert!(self.same_shape(other), "raster shape mismatch");
        for (a, &b) in self.cells.iter_mut().zip(&other.cells) {
            *a += b;
        }
    }
}

impl SubAssign<&Raster<i32>> for Raster<i32> {
    fn sub_assign(&mut self, other: &Raster<i32>) {
        assert!(self.same_shape(other), "raster shape mismatch");
        for (a, &b) in self.cells.iter_mut().zip(&other.cells) {
            *a -= b;
        }
    }
}
