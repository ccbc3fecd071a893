//! Outlier-rejecting smoothing filter for noisy sensor readings.
//!
//! Keeps the 13 most recent samples and reports a trimmed mean: up to three
//! of the lowest and three of the highest readings are discarded before
//! averaging, so a single noisy reading cannot swing the result. Fan speed
//! decisions are sensitive to ±1°C near table boundaries, so the rounding
//! behavior here is part of the contract.

/// Maximum number of retained samples.
const BUFFER_CAPACITY: usize = 13;

/// Number of samples the trimming loop reduces to before averaging.
const KEPT_SIZE: usize = 7;

/// Fixed-capacity sample buffer with a trimmed-mean read-out.
#[derive(Debug, Clone, Default)]
pub struct ValueFilter {
    samples: Vec<i32>,
}

impl ValueFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a sample, evicting the oldest once the buffer holds 13.
    pub fn add_sample(&mut self, value: i32) {
        self.samples.push(value);
        while self.samples.len() > BUFFER_CAPACITY {
            self.samples.remove(0);
        }
    }

    /// Trimmed mean of the current buffer, rounded to the nearest integer.
    ///
    /// The sorted buffer is shortened one element from each end until at
    /// most [`KEPT_SIZE`] remain; buffers with fewer than `KEPT_SIZE + 2`
    /// samples are averaged as-is. Returns `None` on an empty buffer.
    pub fn filtered_value(&self) -> Option<i32> {
        if self.samples.is_empty() {
            return None;
        }

        let mut copy = self.samples.clone();
        copy.sort_unstable();

        let mut lo = 0usize;
        let mut hi = copy.len();
        while hi - lo >= KEPT_SIZE + 2 {
            lo += 1;
            hi -= 1;
        }

        let kept = &copy[lo..hi];
        let sum: i64 = kept.iter().map(|&v| i64::from(v)).sum();
        #[allow(clippy::cast_possible_truncation)]
        Some((sum as f64 / kept.len() as f64).round() as i32)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
