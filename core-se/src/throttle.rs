//! Adaptive run-ahead throttling (spec.md §4.3). Tracked per step-group
//! (all dynS sharing a step-root): a `late_fetch_count` that increments
//! whenever a released element's value became ready after its
//! `first_check_cycle`. At `late_fetch_threshold` (10), if aggregate
//! run-ahead across all active streams is below `throttle_run_ahead_ratio`
//! (90%) of FIFO capacity, every dynS in the group gets `max_size +=
//! throttle_increment` and the group's counter resets to zero.

use stream_engine_types::EngineConfig;

#[derive(Debug, Default, Clone, Copy)]
pub struct ThrottleGroupState {
    pub late_fetch_count: u32,
}

impl ThrottleGroupState {
    /// Records a late fetch and returns `true` if the group should bump
    /// `max_size` now (caller applies the bump and must call
    /// [`Self::reset`]).
    pub fn record_late_fetch(&mut self, config: &EngineConfig, total_run_ahead: usize, fifo_capacity: usize) -> bool {
        if matches!(config.throttling, stream_engine_types::ThrottlingMode::Static) {
            return false;
        }
        self.late_fetch_count += 1;
        if self.late_fetch_count >= config.late_fetch_threshold {
            let ceiling = (fifo_capacity as f64 * config.throttle_run_ahead_ratio) as usize;
            if total_run_ahead < ceiling {
                return true;
            }
        }
        false
    }

    pub fn reset(&mut self) {
        self.late_fetch_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_engine_types::ThrottlingMode;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn bumps_after_threshold_when_run_ahead_is_low() {
        let mut group = ThrottleGroupState::default();
        let cfg = config();
        let mut bumped = false;
        for _ in 0..10 {
            bumped = group.record_late_fetch(&cfg, 10, 256);
        }
        assert!(bumped);
    }

    #[test]
    fn does_not_bump_when_run_ahead_is_high() {
        let mut group = ThrottleGroupState::default();
        let cfg = config();
        let mut bumped = false;
        for _ in 0..12 {
            bumped = group.record_late_fetch(&cfg, 250, 256);
        }
        assert!(!bumped);
    }

    #[test]
    fn static_mode_never_bumps() {
        let mut cfg = config();
        cfg.throttling = ThrottlingMode::Static;
        let mut group = ThrottleGroupState::default();
        for _ in 0..20 {
            assert!(!group.record_late_fetch(&cfg, 0, 256));
        }
    }
}
