//! Per-axis state machine: encoder-sample ingestion with wraparound unwrap,
//! mode flags, target representations and their mutual synchronization, and
//! the periodic `update` tick that produces a commanded step frequency.

use crate::config::{AxisConfig, COUNTS_PER_REVOLUTION};
use crate::dsp::MovingAverage;
use crate::pid::PidController;
use crate::units::{AnglePosition, AstronomicalPosition, RawCounts};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Either a decimal scalar or a sexagesimal angle; accepted by `run_speed`
/// so the boundary layer can pass through whichever shape the caller sent
/// without the controller reflecting on the input.
#[derive(Debug, Clone, Copy)]
pub enum SpeedInput {
    DegreesPerSecond(f64),
    Angle(AnglePosition),
}

impl SpeedInput {
    fn to_degrees_per_second(self) -> f64 {
        match self {
            SpeedInput::DegreesPerSecond(v) => v,
            SpeedInput::Angle(a) => a.to_decimal(),
        }
    }
}

/// JSON-serializable snapshot of one axis, shared by the HTTP surface, the
/// websocket event stream and the persisted-state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisState {
    pub name: String,
    pub position: RawCounts,
    pub offset: RawCounts,
    pub target_raw: RawCounts,
    pub target_angle: AnglePosition,
    pub target_astronomical: Option<AstronomicalPosition>,
    pub closed_loop: bool,
    pub tracking: bool,
    pub free_running: bool,
    pub run_speed_raw: f64,
    pub speed_cps: f64,
    pub speed_hz: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub derivative_filter_alpha: f64,
    pub max_slew_rate: f64,
    pub is_saturated: bool,
}

/// Owns one axis's configuration, PID controller, position filter and mode
/// flags. Consumed by a single cooperative tick task (§5); the control
/// plane mutates it between ticks through `&mut self` methods, so callers
/// are responsible for holding the axis behind whatever mutual exclusion
/// their runtime uses (e.g. a `tokio::sync::Mutex` per axis).
pub struct ServoController {
    config: AxisConfig,
    pid: PidController,
    position_filter: MovingAverage,

    position: RawCounts,
    old_value: Option<u32>,
    old_timestamp: Option<Instant>,
    offset: RawCounts,
    dt: f64,

    speed_cps: f64,
    speed_hz: f64,
    run_speed_raw: f64,

    closed_loop: bool,
    tracking: bool,
    free_running: bool,

    astronomical_target: Option<AstronomicalPosition>,
}

impl ServoController {
    pub fn new(config: AxisConfig) -> Self {
        let nominal_dt = config.nominal_dt();
        let mut pid = PidController::new(config.kp, config.ki, config.kd, nominal_dt);
        pid.deadband_limit = Some(config.deadband_limit());
        pid.saturation_limit = Some(config.saturation_limit());
        pid.set_derivative_filter_alpha(config.derivative_filter_alpha);
        pid.set_max_slew_rate(Some(config.slew_rate_limit()));

        Self {
            config,
            pid,
            position_filter: MovingAverage::new(3),
            position: 0,
            old_value: None,
            old_timestamp: None,
            offset: 0,
            dt: nominal_dt,
            speed_cps: 0.0,
            speed_hz: 0.0,
            run_speed_raw: 0.0,
            closed_loop: false,
            tracking: false,
            free_running: false,
            astronomical_target: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AxisConfig {
        &self.config
    }

    // --- sample ingestion -------------------------------------------------

    fn ingest(&mut self, raw: u32) -> RawCounts {
        let n = COUNTS_PER_REVOLUTION;
        let v = if self.config.invert {
            (n - raw as i64) as u32
        } else {
            raw
        };

        match self.old_value {
            None => {
                self.position = v as i64;
            }
            Some(old) => {
                let dv = v as i64 - old as i64;
                let dv_abs = dv.abs();
                let dv_wrapped = dv_abs.min(dv.rem_euclid(n)).min(n - dv_abs);
                let signed_delta = if dv_wrapped == dv_abs {
                    dv
                } else if dv == 0 {
                    0
                } else {
                    -dv.signum() * dv_wrapped
                };
                self.position += signed_delta;
            }
        }
        self.old_value = Some(v);
        self.position
    }

    /// Advances the controller by one encoder sample and returns the
    /// commanded step frequency (possibly zero). `now` is supplied by the
    /// caller so tests can drive deterministic timing.
    pub fn update(&mut self, raw: u32, now: Instant) -> f64 {
        self.ingest(raw);

        self.dt = match self.old_timestamp {
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev).as_secs_f64();
                if elapsed <= 0.0 {
                    self.config.nominal_dt()
                } else {
                    elapsed
                }
            }
            None => self.config.nominal_dt(),
        };
        self.old_timestamp = Some(now);
        self.pid.sample_time = self.dt;

        let filtered = self.position_filter.process(self.position as f64);

        if self.tracking && !self.free_running {
            if let Some(target) = self.astronomical_target {
                self.pid.set_point = target.to_degrees() * self.config.angle_to_raw() + self.offset as f64;
            }
        }

        if self.free_running {
            self.pid.set_point += self.run_speed_raw * self.dt;
        }

        if !self.closed_loop {
            self.pid.set_point = filtered;
        }

        let u = self.pid.update(filtered);

        if self.closed_loop {
            let u = if self.config.invert { -u } else { u };
            let f = u * self.config.steps_per_revolution as f64 / COUNTS_PER_REVOLUTION as f64;
            self.speed_cps = u;
            self.speed_hz = f;
        } else {
            self.speed_cps = 0.0;
            self.speed_hz = 0.0;
        }

        self.speed_hz
    }

    /// Position after the moving-average filter, i.e. the value the PID
    /// last saw as feedback. Used by mode transitions that seed the target
    /// to "current position".
    fn filtered_position(&self) -> f64 {
        self.position_filter.last_output()
    }

    pub fn position(&self) -> RawCounts {
        self.position
    }

    pub fn user_position(&self) -> RawCounts {
        self.position - self.offset
    }

    // --- targets ------------------------------------------------------

    pub fn target_raw(&self) -> RawCounts {
        (self.pid.set_point - self.offset as f64).round() as RawCounts
    }

    pub fn set_target_raw(&mut self, value: RawCounts) {
        self.astronomical_target = None;
        self.closed_loop = true;
        self.free_running = false;
        self.pid.set_point = value as f64 + self.offset as f64;
    }

    pub fn target_angle(&self) -> AnglePosition {
        AnglePosition::from_decimal(self.target_raw() as f64 * self.config.raw_to_angle())
    }

    pub fn set_target_angle(&mut self, angle: AnglePosition) {
        let raw = (angle.to_decimal() * self.config.angle_to_raw()).round() as RawCounts;
        self.set_target_raw(raw);
    }

    pub fn target_astronomical(&self) -> AstronomicalPosition {
        self.astronomical_target
            .unwrap_or_else(|| AstronomicalPosition::from_degrees(self.target_angle().to_degrees()))
    }

    pub fn set_target_astronomical(&mut self, target: AstronomicalPosition) {
        self.set_target_angle(AnglePosition::from_decimal(target.to_degrees()));
        self.astronomical_target = Some(target);
        self.tracking = true;
    }

    pub fn goto_relative_raw(&mut self, delta: RawCounts) {
        self.set_target_raw(self.target_raw() + delta);
    }

    pub fn goto_relative_angle(&mut self, delta: AnglePosition) {
        self.set_target_angle(self.target_angle().add(&delta));
    }

    pub fn goto_relative_astronomical(&mut self, delta: AstronomicalPosition) {
        self.set_target_astronomical(self.target_astronomical().add(&delta));
    }

    // --- modes ----------------------------------------------------------

    pub fn closed_loop(&self) -> bool {
        self.closed_loop
    }

    pub fn set_closed_loop(&mut self, engage: bool) {
        if engage && !self.closed_loop {
            self.pid.set_point = self.filtered_position();
        }
        self.closed_loop = engage;
        if !engage {
            self.free_running = false;
        }
    }

    pub fn tracking(&self) -> bool {
        self.tracking
    }

    pub fn set_tracking(&mut self, tracking: bool) {
        self.tracking = tracking;
    }

    pub fn free_running(&self) -> bool {
        self.free_running
    }

    pub fn run_speed_raw(&self) -> f64 {
        self.run_speed_raw
    }

    /// Sets the continuous-slew speed. A nonzero value engages free-running
    /// (and therefore closed-loop); zero clears free-running.
    pub fn set_run_speed(&mut self, speed: SpeedInput) {
        let degrees_per_second = speed.to_degrees_per_second();
        self.run_speed_raw = degrees_per_second * self.config.angle_to_raw();
        if self.run_speed_raw != 0.0 {
            self.closed_loop = true;
            self.free_running = true;
        } else {
            self.free_running = false;
        }
    }

    pub fn halt(&mut self) {
        self.set_closed_loop(false);
        self.tracking = false;
    }

    pub fn resume(&mut self) {
        self.set_closed_loop(true);
    }

    pub fn reset(&mut self) {
        self.set_closed_loop(false);
        self.free_running = false;
        self.pid.set_point = self.filtered_position();
    }

    // --- sync/offset ------------------------------------------------------

    pub fn sync_raw(&mut self, real_value: RawCounts) {
        self.offset = self.position - real_value;
    }

    pub fn sync_angle(&mut self, angle: AnglePosition) {
        self.sync_raw((angle.to_decimal() * self.config.angle_to_raw()).round() as RawCounts);
        self.set_target_angle(angle);
    }

    pub fn sync_astronomical(&mut self, target: AstronomicalPosition) {
        self.sync_raw((target.to_degrees() * self.config.angle_to_raw()).round() as RawCounts);
        self.set_target_astronomical(target);
    }

    // --- gains ------------------------------------------------------------

    pub fn set_gains(&mut self, kp: f64, ki: f64, kd: f64) {
        self.pid.kp = kp;
        self.pid.ki = ki;
        self.pid.kd = kd;
    }

    pub fn set_derivative_filter_alpha(&mut self, alpha: f64) {
        self.pid.set_derivative_filter_alpha(alpha);
    }

    pub fn set_max_slew_rate(&mut self, rate: Option<f64>) {
        self.pid.set_max_slew_rate(rate);
    }

    // --- snapshot / rehydration --------------------------------------------

    pub fn state(&self) -> AxisState {
        AxisState {
            name: self.config.name.clone(),
            position: self.user_position(),
            offset: self.offset,
            target_raw: self.target_raw(),
            target_angle: self.target_angle(),
            target_astronomical: self.astronomical_target,
            closed_loop: self.closed_loop,
            tracking: self.tracking,
            free_running: self.free_running,
            run_speed_raw: self.run_speed_raw,
            speed_cps: self.speed_cps,
            speed_hz: self.speed_hz,
            kp: self.pid.kp,
            ki: self.pid.ki,
            kd: self.pid.kd,
            derivative_filter_alpha: self.pid.derivative_filter_alpha(),
            max_slew_rate: self.pid.max_slew_rate().unwrap_or(0.0),
            is_saturated: self.pid.is_saturated,
        }
    }

    /// Replays a persisted snapshot: gains, filter alpha, slew rate, offset
    /// and last target are restored; mode flags are forced to false per the
    /// persisted-state contract (§4.6).
    pub fn rehydrate(&mut self, snapshot: &AxisState) {
        self.set_gains(snapshot.kp, snapshot.ki, snapshot.kd);
        self.set_derivative_filter_alpha(snapshot.derivative_filter_alpha);
        self.set_max_slew_rate(Some(snapshot.max_slew_rate));
        self.offset = snapshot.offset;
        self.closed_loop = false;
        self.tracking = false;
        self.free_running = false;
        self.pid.set_point = snapshot.target_raw as f64 + self.offset as f64;
        self.astronomical_target = snapshot.target_astronomical;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AxisConfig;
    use std::time::Duration;

    fn axis() -> ServoController {
        ServoController::new(AxisConfig {
            name: "ra".to_string(),
            ..Default::default()
        })
    }

    fn tick(axis: &mut ServoController, raw: u32, start: Instant, offset: Duration) -> f64 {
        axis.update(raw, start + offset)
    }

    #[test]
    fn s1_wrap_sweep() {
        let mut axis = axis();
        let start = Instant::now();
        axis.update(262_140, start);
        assert_eq!(axis.position(), 262_140);
        tick(&mut axis, 262_143, start, Duration::from_millis(50));
        assert_eq!(axis.position(), 262_143);
        tick(&mut axis, 2, start, Duration::from_millis(100));
        assert_eq!(axis.position(), 262_146);
        tick(&mut axis, 5, start, Duration::from_millis(150));
        assert_eq!(axis.position(), 262_149);
    }

    #[test]
    fn s2_first_sample_no_motion() {
        let mut axis = axis();
        let hz = axis.update(10_000, Instant::now());
        assert_eq!(hz, 0.0);
    }

    #[test]
    fn s3_goto_raw_converges() {
        let mut axis = axis();
        let start = Instant::now();
        axis.update(50_000, start);
        axis.set_target_raw(50_000);
        let mut hz = 1.0;
        for i in 1..=10 {
            hz = tick(&mut axis, 50_000, start, Duration::from_millis(50 * i));
        }
        assert!(hz.abs() < 1e-6);
    }

    #[test]
    fn s4_dead_band_zeroes_error() {
        let mut axis = axis();
        let start = Instant::now();
        axis.update(50_000, start);
        axis.set_target_raw(50_000);
        let deadband = axis.config().deadband_limit();
        let sample = 50_000 + (deadband / 2.0).floor() as i64;
        tick(&mut axis, sample as u32, start, Duration::from_millis(50));
        assert_eq!(axis.pid.last_error, 0.0);
    }

    #[test]
    fn s5_sync_rebases_without_motion() {
        let mut axis = axis();
        let start = Instant::now();
        axis.update(100_000, start);
        let target_before = axis.target_raw();
        axis.sync_raw(0);
        assert_eq!(axis.user_position(), 0);
        assert_eq!(axis.target_raw(), target_before);
    }

    #[test]
    fn s6_halt_resume_suppresses_and_reengages() {
        let mut axis = axis();
        let start = Instant::now();
        axis.update(10_000, start);
        axis.set_closed_loop(true);
        axis.halt();
        let mut last_hz = 1.0;
        for (i, raw) in [10_100u32, 10_200, 10_300, 10_400, 10_500].into_iter().enumerate() {
            last_hz = tick(&mut axis, raw, start, Duration::from_millis(50 * (i as u64 + 1)));
        }
        assert_eq!(last_hz, 0.0);
        let filtered_before_resume = axis.filtered_position();
        axis.resume();
        assert_eq!(axis.pid.set_point, filtered_before_resume);
    }

    #[test]
    fn invariant_saturation_bound_holds() {
        let mut axis = axis();
        let start = Instant::now();
        axis.update(0, start);
        axis.set_target_raw(10_000_000);
        let max_hz = axis.config().max_speed_hz;
        for i in 1..=50 {
            let hz = tick(&mut axis, 0, start, Duration::from_millis(50 * i));
            assert!(hz.abs() <= max_hz + 1e-6);
        }
    }

    #[test]
    fn invariant_anti_windup_bounded() {
        let mut axis = axis();
        let start = Instant::now();
        axis.update(0, start);
        axis.set_target_raw(10_000_000);
        for i in 1..=2000 {
            tick(&mut axis, 0, start, Duration::from_millis(50 * i));
        }
        assert!(axis.pid.i_term.abs() <= crate::pid::WINDUP_GUARD + 1e-6);
    }

    #[test]
    fn tracking_projection_uses_latest_target() {
        let mut axis = axis();
        let start = Instant::now();
        axis.update(0, start);
        axis.set_target_astronomical(AstronomicalPosition::new(1, 0, 0.0));
        tick(&mut axis, 0, start, Duration::from_millis(50));

        let new_target = AstronomicalPosition::new(2, 0, 0.0);
        axis.astronomical_target = Some(new_target);
        tick(&mut axis, 0, start, Duration::from_millis(100));

        let expected = new_target.to_degrees() * axis.config().angle_to_raw() + axis.offset as f64;
        assert_float_eq::assert_float_absolute_eq!(axis.pid.set_point, expected, 1e-6);
    }

    #[test]
    fn free_run_ramps_set_point_by_run_speed_times_dt() {
        let mut axis = axis();
        let start = Instant::now();
        axis.update(0, start);
        let before = axis.pid.set_point;
        axis.set_run_speed(SpeedInput::DegreesPerSecond(1.0));
        assert!(axis.free_running());
        assert!(axis.closed_loop());

        tick(&mut axis, 0, start, Duration::from_millis(50));
        let expected_delta = axis.run_speed_raw() * 0.05;
        assert_float_eq::assert_float_absolute_eq!(axis.pid.set_point - before, expected_delta, 1e-3);
    }

    #[test]
    fn open_loop_target_tracks_position_and_reengage_is_transient_free() {
        let mut axis = axis();
        let start = Instant::now();
        axis.update(0, start);
        axis.set_closed_loop(false);
        tick(&mut axis, 500, start, Duration::from_millis(50));
        assert_eq!(axis.speed_hz, 0.0);

        axis.set_closed_loop(true);
        let filtered = axis.filtered_position();
        assert_eq!(axis.pid.set_point, filtered);
        let hz = tick(&mut axis, 500, start, Duration::from_millis(100));
        assert!(hz.abs() < 1.0);
    }

    #[test]
    fn invert_reflects_measurement_and_negates_output() {
        let mut axis = ServoController::new(AxisConfig {
            name: "dec".to_string(),
            invert: true,
            ..Default::default()
        });
        let start = Instant::now();
        axis.update(0, start);
        assert_eq!(axis.position(), COUNTS_PER_REVOLUTION);
    }

    #[test]
    fn free_running_implies_closed_loop_and_closing_off_clears_free_run() {
        let mut axis = axis();
        axis.update(0, Instant::now());
        axis.set_run_speed(SpeedInput::DegreesPerSecond(2.0));
        assert!(axis.free_running());
        axis.set_closed_loop(false);
        assert!(!axis.free_running());
    }
}
