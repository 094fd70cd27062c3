//! Discrete PID controller with derivative filtering, clamped-integrator
//! anti-windup, output slew limiting and saturation.

use crate::dsp::{deadband, saturate, IirLowPass, SlewRateLimiter};

/// Bound on `|ITerm|`, independent of `saturation_limit`.
pub const WINDUP_GUARD: f64 = 4000.0;

#[derive(Debug, Clone)]
pub struct PidController {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub sample_time: f64,
    pub deadband_limit: Option<f64>,
    pub saturation_limit: Option<f64>,

    derivative_filter: IirLowPass,
    slew_rate_limiter: SlewRateLimiter,

    pub set_point: f64,
    pub p_term: f64,
    pub i_term: f64,
    pub d_term: f64,
    pub last_error: f64,
    pub last_output: f64,
    pub is_saturated: bool,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64, sample_time: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            sample_time,
            deadband_limit: None,
            saturation_limit: None,
            derivative_filter: IirLowPass::new(0.75),
            slew_rate_limiter: SlewRateLimiter::new(None),
            set_point: 0.0,
            p_term: 0.0,
            i_term: 0.0,
            d_term: 0.0,
            last_error: 0.0,
            last_output: 0.0,
            is_saturated: false,
        }
    }

    pub fn derivative_filter_alpha(&self) -> f64 {
        self.derivative_filter.alpha
    }

    pub fn set_derivative_filter_alpha(&mut self, alpha: f64) {
        self.derivative_filter.alpha = alpha;
    }

    pub fn max_slew_rate(&self) -> Option<f64> {
        self.slew_rate_limiter.rate
    }

    pub fn set_max_slew_rate(&mut self, rate: Option<f64>) {
        self.slew_rate_limiter.rate = rate;
    }

    /// Zeroes the integrator, derivative memory, last error/output and
    /// saturation flag. Gains, setpoint and the configured limits are
    /// untouched.
    pub fn clear(&mut self) {
        self.i_term = 0.0;
        self.d_term = 0.0;
        self.derivative_filter.clear();
        self.last_error = 0.0;
        self.last_output = 0.0;
        self.is_saturated = false;
    }

    /// Advances the controller by one sample and returns the commanded
    /// output.
    pub fn update(&mut self, feedback: f64) -> f64 {
        let error = deadband(self.set_point - feedback, self.deadband_limit, None);
        self.p_term = self.kp * error;

        if !self.is_saturated {
            self.i_term += error * self.sample_time;
        }
        self.i_term = saturate(self.i_term, Some(WINDUP_GUARD), None);

        self.d_term = self
            .derivative_filter
            .process((error - self.last_error) / self.sample_time);

        self.last_error = error;

        let u = self.p_term + self.ki * self.i_term + self.kd * self.d_term;
        let u = self.slew_rate_limiter.process(u);
        let u_limited = saturate(u, self.saturation_limit, None);

        self.is_saturated = u_limited != u;
        self.last_output = u_limited;
        u_limited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_pid() -> PidController {
        let mut pid = PidController::new(1.8, 1.0, 1.0, 0.05);
        pid.set_derivative_filter_alpha(0.75);
        pid
    }

    #[test]
    fn dead_band_zeroes_small_error() {
        let mut pid = default_pid();
        pid.deadband_limit = Some(10.0);
        pid.set_point = 50_000.0;
        let u = pid.update(50_000.0 + 5.0);
        assert_eq!(pid.last_error, 0.0);
        assert_eq!(u, 0.0);
    }

    #[test]
    fn anti_windup_bounds_integrator() {
        let mut pid = default_pid();
        pid.saturation_limit = Some(100.0);
        pid.set_point = 1_000_000.0;
        for _ in 0..10_000 {
            pid.update(0.0);
        }
        assert!(pid.i_term.abs() <= WINDUP_GUARD + 1e-9);
    }

    #[test]
    fn saturation_bound_holds() {
        let mut pid = default_pid();
        pid.saturation_limit = Some(500.0);
        pid.set_point = 1e9;
        for _ in 0..100 {
            let u = pid.update(0.0);
            assert!(u.abs() <= 500.0 + 1e-9);
        }
    }

    #[test]
    fn converges_to_zero_error_at_setpoint() {
        let mut pid = default_pid();
        pid.set_point = 50_000.0;
        let mut u = 0.0;
        for _ in 0..200 {
            u = pid.update(50_000.0);
        }
        assert!(u.abs() < 1e-6);
        assert_eq!(pid.last_error, 0.0);
    }

    #[test]
    fn clear_resets_internal_state_but_not_gains() {
        let mut pid = default_pid();
        pid.set_point = 1000.0;
        for _ in 0..20 {
            pid.update(0.0);
        }
        pid.clear();
        assert_eq!(pid.i_term, 0.0);
        assert_eq!(pid.d_term, 0.0);
        assert_eq!(pid.last_error, 0.0);
        assert_eq!(pid.last_output, 0.0);
        assert!(!pid.is_saturated);
        assert_eq!(pid.kp, 1.8);
    }
}
