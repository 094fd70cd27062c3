//! Thin contracts the [`crate::servo::ServoController`] tick consumes: an
//! encoder source it polls and a stepper sink it writes to. Both are
//! timeout-bounded and their failures are non-fatal (§4.4 "Failure
//! semantics"). The CIP/EtherNet-IP wire protocol a real fieldbus client
//! would speak is out of scope (§1); only the trait and a simulation are
//! provided here.

use crate::errors::IoErrorKind;
use async_trait::async_trait;
use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Delivers raw, unsigned samples in `[0, counts_per_revolution)` at
/// approximately the configured interval. `None` signals a transient failure
/// that the caller should treat as a missed sample.
#[async_trait]
pub trait EncoderSource: Send {
    async fn poll(&mut self) -> Option<u32>;
}

/// Writes a commanded step frequency for one axis. Failures are logged and
/// swallowed; the next call may retry opening the port.
#[async_trait]
pub trait StepperSink: Send {
    async fn set_frequency(&mut self, axis_label: char, hz: f64);
}

/// Builds the wire frame `\n<LABEL><signed integer, right-aligned width 7>\n`.
pub fn frame_bytes(axis_label: char, hz: f64) -> Vec<u8> {
    format!("\n{axis_label}{:>7}\n", hz.round() as i64).into_bytes()
}

/// Writes [`frame_bytes`] to a real serial port at a fixed baud rate,
/// opening it lazily and re-opening after a disconnect. Blocking I/O is
/// off-loaded to [`tokio::task::spawn_blocking`] and bounded by
/// `write_timeout`.
pub struct SerialStepperSink {
    path: String,
    baud_rate: u32,
    write_timeout: Duration,
    port: Option<Box<dyn serialport::SerialPort>>,
    last_error: Option<IoErrorKind>,
}

impl SerialStepperSink {
    pub fn new(path: String, baud_rate: u32, write_timeout: Duration) -> Self {
        Self {
            path,
            baud_rate,
            write_timeout,
            port: None,
            last_error: None,
        }
    }

    fn try_open(&mut self) {
        match serialport::new(&self.path, self.baud_rate)
            .timeout(self.write_timeout)
            .open()
        {
            Ok(port) => {
                tracing::info!(path = %self.path, "stepper serial port connected");
                self.port = Some(port);
                self.last_error = None;
            }
            Err(e) => {
                self.log_once(IoErrorKind::StepperDisconnected, &e.to_string());
            }
        }
    }

    fn log_once(&mut self, kind: IoErrorKind, detail: &str) {
        if self.last_error != Some(kind) {
            warn!(%kind, detail, "stepper sink error");
            self.last_error = Some(kind);
        }
    }
}

#[async_trait]
impl StepperSink for SerialStepperSink {
    async fn set_frequency(&mut self, axis_label: char, hz: f64) {
        if self.port.is_none() {
            self.try_open();
        }
        let Some(mut port) = self.port.take() else {
            return;
        };

        let frame = frame_bytes(axis_label, hz);
        let timeout = self.write_timeout;
        let write = tokio::task::spawn_blocking(move || {
            let res = port.write_all(&frame).and_then(|_| port.flush());
            (res, port)
        });

        match tokio::time::timeout(timeout, write).await {
            Ok(Ok((Ok(()), port))) => {
                self.port = Some(port);
                self.last_error = None;
            }
            Ok(Ok((Err(e), _port))) => {
                self.log_once(IoErrorKind::StepperDisconnected, &e.to_string());
                // Port dropped; next tick reopens.
            }
            Ok(Err(join_err)) => {
                error!(%join_err, "stepper write task panicked");
            }
            Err(_elapsed) => {
                self.log_once(IoErrorKind::StepperWriteTimeout, "write did not complete in time");
                // Port dropped along with the blocking task; reopened lazily.
            }
        }
    }
}

/// A simulated plant shared between a [`SimulatedEncoderSource`] and a
/// [`SimulatedStepperSink`]: the sink integrates the commanded step
/// frequency into counts/second and the source reads the result back,
/// wrapped into `[0, counts_per_revolution)`. Used for dry-run mode and
/// integration tests so the tick path can be exercised end-to-end without
/// real hardware.
#[derive(Clone)]
pub struct SimulatedPlant {
    position_counts: Arc<AtomicI64>,
    counts_per_revolution: i64,
    counts_per_step: f64,
}

impl SimulatedPlant {
    pub fn new(counts_per_revolution: i64, counts_per_step: f64, initial_raw: u32) -> Self {
        Self {
            position_counts: Arc::new(AtomicI64::new(initial_raw as i64)),
            counts_per_revolution,
            counts_per_step,
        }
    }

    pub fn encoder_source(&self) -> SimulatedEncoderSource {
        SimulatedEncoderSource {
            plant: self.clone(),
        }
    }

    pub fn stepper_sink(&self, interval: Duration) -> SimulatedStepperSink {
        SimulatedStepperSink {
            plant: self.clone(),
            interval,
        }
    }
}

pub struct SimulatedEncoderSource {
    plant: SimulatedPlant,
}

#[async_trait]
impl EncoderSource for SimulatedEncoderSource {
    async fn poll(&mut self) -> Option<u32> {
        let raw = self.plant.position_counts.load(Ordering::Relaxed);
        let wrapped = raw.rem_euclid(self.plant.counts_per_revolution);
        Some(wrapped as u32)
    }
}

pub struct SimulatedStepperSink {
    plant: SimulatedPlant,
    interval: Duration,
}

#[async_trait]
impl StepperSink for SimulatedStepperSink {
    async fn set_frequency(&mut self, _axis_label: char, hz: f64) {
        let cps = hz * self.plant.counts_per_step;
        let delta = (cps * self.interval.as_secs_f64()).round() as i64;
        self.plant.position_counts.fetch_add(delta, Ordering::Relaxed);
    }
}

/// Feeds a fixed, preset sequence of raw samples; used by unit/integration
/// tests exercising exact scenarios from the specification (§8).
pub struct ScriptedEncoderSource {
    samples: std::collections::VecDeque<u32>,
}

impl ScriptedEncoderSource {
    pub fn new(samples: impl IntoIterator<Item = u32>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
        }
    }
}

#[async_trait]
impl EncoderSource for ScriptedEncoderSource {
    async fn poll(&mut self) -> Option<u32> {
        self.samples.pop_front()
    }
}

/// Records every frequency commanded, for assertions in tests.
#[derive(Default, Clone)]
pub struct RecordingStepperSink {
    pub commands: Arc<std::sync::Mutex<Vec<f64>>>,
}

#[async_trait]
impl StepperSink for RecordingStepperSink {
    async fn set_frequency(&mut self, _axis_label: char, hz: f64) {
        self.commands.lock().unwrap().push(hz);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_bytes_match_wire_format() {
        assert_eq!(frame_bytes('A', 12_000.0), b"\nA  12000\n".to_vec());
        assert_eq!(frame_bytes('B', -500.0), b"\nB   -500\n".to_vec());
    }

    #[tokio::test]
    async fn recording_sink_records_commands() {
        let sink = RecordingStepperSink::default();
        let mut s = sink.clone();
        s.set_frequency('A', 1.0).await;
        s.set_frequency('A', 2.0).await;
        assert_eq!(*sink.commands.lock().unwrap(), vec![1.0, 2.0]);
    }
}
