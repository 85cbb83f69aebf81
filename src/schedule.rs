// src/schedule.rs
//
// Linear epsilon-greedy exploration schedule.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpsilonSchedule {
    eps: f64,
    end: f64,
    decay: f64,
    /// Decay is applied on ticks that are multiples of this.
    cadence: u64,
}

impl EpsilonSchedule {
    /// `end` is clamped to `[0, start]` and `decay` to be non-negative so the
    /// rate can only move down towards the floor.
    pub fn new(start: f64, end: f64, decay: f64, cadence: u64) -> Self {
        let end = end.clamp(0.0, start.max(0.0));
        Self {
            eps: start.max(end),
            end,
            decay: decay.max(0.0),
            cadence: cadence.max(1),
        }
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Decay once if `time` falls on the cadence.
    pub fn on_tick(&mut self, time: u64) {
        if time % self.cadence == 0 {
            self.eps = (self.eps - self.decay).max(self.end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decays_only_on_cadence() {
        let mut s = EpsilonSchedule::new(1.0, 0.1, 0.05, 10);
        s.on_tick(0);
        assert!((s.eps() - 0.95).abs() < 1e-12);
        for t in 1..10 {
            s.on_tick(t);
        }
        assert!((s.eps() - 0.95).abs() < 1e-12);
        s.on_tick(10);
        assert!((s.eps() - 0.90).abs() < 1e-12);
    }

    #[test]
    fn test_monotone_and_floored() {
        let mut s = EpsilonSchedule::new(0.9, 0.2, 0.03, 3);
        let mut prev = s.eps();
        for t in 0..1000 {
            s.on_tick(t);
            assert!(s.eps() <= prev);
            assert!(s.eps() >= 0.2);
            prev = s.eps();
        }
        assert_eq!(s.eps(), 0.2);
    }

    #[test]
    fn test_bad_parameters_cannot_raise_eps() {
        let mut s = EpsilonSchedule::new(0.5, 0.8, -0.1, 0);
        let start = s.eps();
        for t in 0..50 {
            s.on_tick(t);
        }
        assert!(s.eps() <= start);
        // end clamps to the start rate
        assert_eq!(s.eps(), 0.5);
    }
}
