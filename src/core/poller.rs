//! Input poller
//! Called once per tick on the input thread. Enumerates devices (hot-plug is discovered here),
//! then reads every registered device's raw state into a `RawInputFrame`.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::core::device::{DeviceEvent, DeviceInfo, DeviceRegistry};
use crate::core::frame::RawInputFrame;
use crate::core::session::SessionHandle;
use crate::error::{DevicePollError, RuntimeError};
use crate::utils::LastError;

/// Result of one successful poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollOutput {
    pub tick: u64,
    pub frames: Vec<RawInputFrame>,
    pub events: Vec<DeviceEvent>,
}

pub struct InputPoller {
    registry: DeviceRegistry,
    timeout: Duration,
    tick: u64,
    poll_error_count: u64,
    /// Device events from a poll that failed after reconciling; delivered with the next success.
    pending_events: Vec<DeviceEvent>,
    last_error: LastError<DevicePollError>,
}

impl InputPoller {
    pub fn new(timeout: Duration) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            timeout,
            tick: 0,
            poll_error_count: 0,
            pending_events: Vec::new(),
            last_error: LastError::default(),
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.registry.devices()
    }

    /// Number of polls that failed since the poller was created.
    pub fn poll_error_count(&self) -> u64 {
        self.poll_error_count
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Polls every connected device once. A failure means "no input change this tick"; the
    /// caller keeps its previous state and polls again next tick.
    pub fn poll_frame(&mut self, session: &SessionHandle) -> Result<PollOutput, DevicePollError> {
        self.tick += 1;
        match self.poll_devices(session) {
            Ok(mut output) => {
                if self.last_error.clear() {
                    info!("Device polling recovered at tick {}", self.tick);
                }
                if !self.pending_events.is_empty() {
                    let mut events = std::mem::take(&mut self.pending_events);
                    events.append(&mut output.events);
                    output.events = events;
                }
                Ok(output)
            }
            Err(e) => {
                self.poll_error_count += 1;
                if self.last_error.report(&e) {
                    warn!("Skipping tick {}: {}", self.tick, e);
                }
                Err(e)
            }
        }
    }

    fn poll_devices(&mut self, session: &SessionHandle) -> Result<PollOutput, DevicePollError> {
        if !session.is_open() {
            return Err(DevicePollError::SessionClosed);
        }
        let started = Instant::now();
        let backend = session.backend();

        backend.begin_frame()?;
        let natives = backend.enumerate_devices()?;
        self.check_deadline(started)?;

        let events = self.registry.reconcile(&natives, backend.supports_skeleton());

        let mut frames = Vec::with_capacity(self.registry.len());
        for info in self.registry.devices() {
            let poll = match backend.poll_state(info.native_index, info.class) {
                Ok(poll) => poll,
                Err(RuntimeError::InvalidDevice(index)) => {
                    // Went away after enumeration; the next poll reports the disconnect.
                    debug!("{} vanished from slot {} mid-poll", info.handle, index);
                    continue;
                }
                Err(e) => {
                    self.pending_events.extend(events);
                    return Err(e.into());
                }
            };

            let mut frame = RawInputFrame::new(info.handle, info.role, self.tick);
            frame.inputs = poll.inputs;
            if info.capabilities.has_pose {
                frame.pose = poll.pose;
            }
            if info.capabilities.has_skeleton {
                frame.skeleton = poll.skeleton;
            }
            frames.push(frame);

            if let Err(e) = self.check_deadline(started) {
                self.pending_events.extend(events);
                return Err(e);
            }
        }

        Ok(PollOutput {
            tick: self.tick,
            frames,
            events,
        })
    }

    fn check_deadline(&self, started: Instant) -> Result<(), DevicePollError> {
        if started.elapsed() > self.timeout {
            return Err(DevicePollError::Timeout(self.timeout));
        }
        Ok(())
    }
}
