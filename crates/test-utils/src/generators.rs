//! Test data generators for creating synthetic grid values.
//!
//! These generators create predictable, verifiable test data patterns
//! that can be used across the test suite.

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being read/written correctly
/// by checking that grid[row][col] == col * 1000 + row.
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0); // col=1, row=0
/// assert_eq!(grid[10], 1.0);   // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f64);
        }
    }
    data
}

/// Creates a temperature-like gradient in degrees Celsius.
///
/// Values run from -20 at the top-left to roughly 40 at the bottom-right.
pub fn create_temperature_grid(width: usize, height: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let x_factor = col as f64 / width.max(1) as f64;
            let y_factor = row as f64 / height.max(1) as f64;
            data.push(-20.0 + x_factor * 30.0 + y_factor * 30.0);
        }
    }
    data
}

/// Replaces every `stride`-th value with `nodata`, starting at index 0.
pub fn with_nodata_holes(mut data: Vec<f64>, stride: usize, nodata: f64) -> Vec<f64> {
    for v in data.iter_mut().step_by(stride.max(1)) {
        *v = nodata;
    }
    data
}

/// Counts values that are not `nodata`.
pub fn count_valid(data: &[f64], nodata: f64) -> usize {
    data.iter().filter(|v| **v != nodata).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_grid() {
        let grid = create_test_grid(3, 2);
        assert_eq!(grid, vec![0.0, 1000.0, 2000.0, 1.0, 1001.0, 2001.0]);
    }

    #[test]
    fn test_temperature_range() {
        let grid = create_temperature_grid(10, 10);
        assert!(grid.iter().all(|t| (-20.0..=40.0).contains(t)));
    }

    #[test]
    fn test_nodata_holes() {
        let grid = with_nodata_holes(vec![1.0; 10], 3, -9999.0);
        assert_eq!(count_valid(&grid, -9999.0), 6);
        assert_eq!(grid[0], -9999.0);
        assert_eq!(grid[9], -9999.0);
    }
}
