//! Per-axis cooperative tick task (§5): blocks on the encoder source for
//! the next sample, calls `update`, writes the commanded frequency to the
//! stepper sink, then broadcasts the resulting state. Runs until told to
//! shut down, at which point it sets `closed_loop = false`, lets one more
//! tick propagate the stop command, and returns.

use crate::actuator::{EncoderSource, StepperSink};
use crate::registry::SharedAxis;
use crate::servo::AxisState;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Drives one axis until `shutdown` fires. `states` broadcasts the axis
/// snapshot produced by each tick to any websocket subscribers; a lagging
/// or absent receiver never blocks the tick.
pub async fn run(
    axis: SharedAxis,
    mut encoder: Box<dyn EncoderSource>,
    mut stepper: Box<dyn StepperSink>,
    mut shutdown: watch::Receiver<bool>,
    states: broadcast::Sender<AxisState>,
) {
    let (name, axis_label) = {
        let guard = axis.lock().await;
        (guard.name().to_string(), guard.config().axis_label)
    };
    info!(axis = %name, "tick task started");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }

            sample = encoder.poll() => {
                let Some(raw) = sample else {
                    continue;
                };
                let hz = {
                    let mut guard = axis.lock().await;
                    let closed_loop_was_engaged = guard.closed_loop();
                    let hz = guard.update(raw, std::time::Instant::now());
                    if closed_loop_was_engaged {
                        Some(hz)
                    } else {
                        None
                    }
                };
                if let Some(hz) = hz {
                    stepper.set_frequency(axis_label, hz).await;
                }
                let state = axis.lock().await.state();
                let _ = states.send(state);
            }
        }
    }

    debug!(axis = %name, "shutdown requested, draining one tick");
    {
        let mut guard = axis.lock().await;
        guard.halt();
    }
    if let Some(raw) = encoder.poll().await {
        let mut guard = axis.lock().await;
        guard.update(raw, std::time::Instant::now());
    }
    stepper.set_frequency(axis_label, 0.0).await;
    info!(axis = %name, "tick task stopped");
}
