// src/metrics.rs
//
// Episode-level summary of a sample series (per-tick mean speeds, agent
// rewards): count, mean and spread, accumulated in one pass.

/// One-pass mean and population spread over the finite samples pushed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeriesStats {
    count: u64,
    mean: f64,
    /// Sum of squared deviations from the running mean.
    sq_dev: f64,
}

impl SeriesStats {
    pub fn push(&mut self, sample: f64) {
        if !sample.is_finite() {
            return;
        }
        self.count += 1;
        let before = sample - self.mean;
        self.mean += before / self.count as f64;
        self.sq_dev += before * (sample - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// 0.0 for an empty series.
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation, 0.0 for an empty series.
    pub fn std_dev(&self) -> f64 {
        match self.count {
            0 => 0.0,
            n => (self.sq_dev / n as f64).sqrt(),
        }
    }
}

impl FromIterator<f64> for SeriesStats {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), |mut stats, x| {
            stats.push(x);
            stats
        })
    }
}
