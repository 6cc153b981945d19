//! Fixed-depth delay line for trigger inputs.
//!
//! With depth `d` the evaluators see, on every tick, the value read `d`
//! ticks earlier. The line is primed with the first value it sees so there
//! is no start-up transient.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct DelayLine {
    depth: usize,
    fifo: VecDeque<f64>,
}

impl DelayLine {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            fifo: VecDeque::with_capacity(depth + 1),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Push the newest raw value and return the delayed one.
    pub fn push(&mut self, value: f64) -> f64 {
        if self.fifo.is_empty() {
            self.fifo.extend(std::iter::repeat(value).take(self.depth));
        }
        self.fifo.push_back(value);
        self.fifo.pop_front().unwrap_or(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_depth_is_pass_through() {
        let mut line = DelayLine::new(0);
        for v in [1.0, 5.0, -3.0] {
            assert_eq!(line.push(v), v);
        }
    }

    #[test]
    fn test_lags_by_depth() {
        let mut line = DelayLine::new(2);
        let out: Vec<f64> = [10.0, 11.0, 12.0, 13.0, 14.0]
            .into_iter()
            .map(|v| line.push(v))
            .collect();
        // Primed with the first value, then lagging by two ticks
        assert_eq!(out, vec![10.0, 10.0, 10.0, 11.0, 12.0]);
    }
}
