use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A closed coordinate interval covered by one histogram axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// Binning of one axis: `bins` equal-width bins spanning `range`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Axis {
    range: AxisRange,
    bins: usize,
}

impl Axis {
    /// Bins are half-open except the last, which also takes values equal to the upper edge.
    /// Anything outside the range (or NaN) has no bin.
    fn find_bin(&self, value: f64) -> Option<usize> {
        if !(value >= self.range.min && value <= self.range.max) {
            return None;
        }
        let bin = ((value - self.range.min) / self.range.width() * self.bins as f64) as usize;
        Some(bin.min(self.bins - 1))
    }

    fn edges(&self) -> Vec<f64> {
        let step = self.range.width() / self.bins as f64;
        (0..=self.bins)
            .map(|i| self.range.min + step * i as f64)
            .collect()
    }
}

/// Running 2D count histogram of detector positions.
///
/// Indexed as `[x_bin, y_bin]`. Counts only ever increase; there is no way to remove an
/// entry short of building a new histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram2D {
    x_axis: Axis,
    y_axis: Axis,
    counts: Array2<u64>,
    overflow: u64,
}

impl Histogram2D {
    /// Create an empty histogram. Callers are expected to have validated that both ranges
    /// have positive width and that both bin counts are nonzero.
    pub fn new(x_range: AxisRange, x_bins: usize, y_range: AxisRange, y_bins: usize) -> Self {
        Self {
            x_axis: Axis {
                range: x_range,
                bins: x_bins,
            },
            y_axis: Axis {
                range: y_range,
                bins: y_bins,
            },
            counts: Array2::<u64>::zeros([x_bins, y_bins]),
            overflow: 0,
        }
    }

    /// Add one entry. Returns false (and counts it as overflow) if the point is outside the
    /// histogram domain.
    pub fn fill(&mut self, x: f64, y: f64) -> bool {
        match (self.x_axis.find_bin(x), self.y_axis.find_bin(y)) {
            (Some(x_bin), Some(y_bin)) => {
                self.counts[[x_bin, y_bin]] += 1;
                true
            }
            _ => {
                self.overflow += 1;
                false
            }
        }
    }

    pub fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    /// Number of entries that landed inside the domain
    pub fn total(&self) -> u64 {
        self.counts.sum()
    }

    /// Number of entries dropped for being outside the domain
    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    /// Largest single bin count
    pub fn max_count(&self) -> u64 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    pub fn x_edges(&self) -> Vec<f64> {
        self.x_axis.edges()
    }

    pub fn y_edges(&self) -> Vec<f64> {
        self.y_axis.edges()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hist() -> Histogram2D {
        Histogram2D::new(AxisRange::new(0.0, 100.0), 10, AxisRange::new(0.0, 50.0), 5)
    }

    #[test]
    fn test_binning() {
        let mut hist = make_hist();
        assert!(hist.fill(0.0, 0.0));
        assert!(hist.fill(9.99, 9.99));
        assert!(hist.fill(10.0, 10.0));
        // Upper edge belongs to the last bin
        assert!(hist.fill(100.0, 50.0));
        assert_eq!(hist.counts()[[0, 0]], 2);
        assert_eq!(hist.counts()[[1, 1]], 1);
        assert_eq!(hist.counts()[[9, 4]], 1);
        assert_eq!(hist.total(), 4);
        assert_eq!(hist.max_count(), 2);
    }

    #[test]
    fn test_out_of_domain_dropped() {
        let mut hist = make_hist();
        assert!(!hist.fill(-1.0, 10.0));
        assert!(!hist.fill(10.0, 50.5));
        assert!(!hist.fill(f64::NAN, 10.0));
        assert_eq!(hist.total(), 0);
        assert_eq!(hist.overflow(), 3);
    }

    #[test]
    fn test_order_independent() {
        let first = [(1.0, 2.0), (55.0, 20.0), (99.0, 49.0)];
        let second = [(55.0, 21.0), (3.0, 3.0)];

        let mut forward = make_hist();
        let mut backward = make_hist();
        for (x, y) in first.iter().chain(second.iter()) {
            forward.fill(*x, *y);
        }
        for (x, y) in second.iter().chain(first.iter()) {
            backward.fill(*x, *y);
        }
        assert_eq!(forward.counts(), backward.counts());
    }

    #[test]
    fn test_edges() {
        let hist = make_hist();
        let edges = hist.y_edges();
        assert_eq!(edges.len(), 6);
        assert_eq!(edges[0], 0.0);
        assert_eq!(edges[5], 50.0);
        assert_eq!(hist.x_edges()[1], 10.0);
    }
}
