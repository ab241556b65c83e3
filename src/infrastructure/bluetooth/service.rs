//! Polling Service
//!
//! Drives every connected controller from one thread: receive, decode,
//! apply, run the caller's reaction, and keep the status snapshot fresh.
//! All protocol state lives in the devices; the service only holds the
//! status-poll clock and the command queue.

use crate::domain::models::PeerAddress;
use crate::infrastructure::bluetooth::device::{Device, DeviceError};
use crate::infrastructure::bluetooth::protocol::{Decoded, InputReport};
use crate::infrastructure::bluetooth::transport::Channel;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Configuration for the polling loop
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// How often every controller is asked for a status report;
    /// `None` never asks
    pub status_interval: Option<Duration>,
    /// Pause between ticks in [`PollingService::run`]; zero only yields
    pub poll_interval: Duration,
    /// Report kind requested by [`PollingService::initialize`]
    pub report_mode: InputReport,
    pub continuous_reporting: bool,
    /// Light LED `i % 4` on the i-th controller during initialisation
    pub assign_leds: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            status_interval: Some(Duration::from_secs(2)),
            poll_interval: Duration::ZERO,
            report_mode: InputReport::Status,
            continuous_reporting: true,
            assign_leds: true,
        }
    }
}

/// Commands that can be queued from anywhere for one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetRumble(bool),
    SetLeds(u8),
    SetReportMode {
        report: InputReport,
        continuous: bool,
    },
    RequestStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCommand {
    pub target: PeerAddress,
    pub command: Command,
}

impl Command {
    fn apply<C: Channel>(self, device: &mut Device<C>) {
        match self {
            Self::SetRumble(on) => device.set_rumble(on),
            Self::SetLeds(mask) => device.set_leds(mask),
            Self::SetReportMode { report, continuous } => device.set_report_mode(report, continuous),
            Self::RequestStatus => device.request_status(),
        }
    }
}

/// Counters for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Devices that produced a consumed report
    pub reports: usize,
    /// Devices whose receive failed or whose frame was malformed
    pub errors: usize,
    pub commands: usize,
    pub status_requested: bool,
}

/// Main polling coordinator for a set of independently owned devices
pub struct PollingService<C: Channel> {
    devices: Vec<Device<C>>,
    config: PollingConfig,
    last_status_poll: Option<Instant>,
    command_tx: mpsc::UnboundedSender<DeviceCommand>,
    command_rx: mpsc::UnboundedReceiver<DeviceCommand>,
}

impl<C: Channel> PollingService<C> {
    pub fn new(devices: Vec<Device<C>>, config: PollingConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            devices,
            config,
            last_status_poll: None,
            command_tx,
            command_rx,
        }
    }

    pub fn devices(&self) -> &[Device<C>] {
        &self.devices
    }

    pub fn device(&self, address: PeerAddress) -> Option<&Device<C>> {
        self.devices.iter().find(|d| d.address() == address)
    }

    pub fn into_devices(self) -> Vec<Device<C>> {
        self.devices
    }

    /// Queue for commands from other tasks or threads; drained each tick
    pub fn command_sender(&self) -> mpsc::UnboundedSender<DeviceCommand> {
        self.command_tx.clone()
    }

    /// Light the player LED and select the report mode on every controller
    pub fn initialize(&mut self) {
        let Self {
            devices, config, ..
        } = self;

        for (i, device) in devices.iter_mut().enumerate() {
            info!("Controller {}: {}", i, device.address());
            if config.assign_leds {
                device.set_leds(1 << (i % 4));
            }
            device.set_report_mode(config.report_mode, config.continuous_reporting);
        }
    }

    /// One pass over every device, using the current time
    pub fn tick<F>(&mut self, reaction: F) -> (ControlFlow<()>, TickSummary)
    where
        F: FnMut(usize, &mut Device<C>) -> ControlFlow<()>,
    {
        self.tick_at(Instant::now(), reaction)
    }

    /// One pass over every device
    ///
    /// Queued commands go out first. Then, for each device in order: one
    /// non-blocking receive, decode, apply, `reaction`, and a status request
    /// if the status interval ran out at `now`. An idle or failing device
    /// never stops the others; only `reaction` returning `Break` ends the
    /// tick early.
    pub fn tick_at<F>(&mut self, now: Instant, mut reaction: F) -> (ControlFlow<()>, TickSummary)
    where
        F: FnMut(usize, &mut Device<C>) -> ControlFlow<()>,
    {
        let mut summary = TickSummary {
            commands: self.drain_commands(),
            ..TickSummary::default()
        };
        summary.status_requested = self.status_due(now);

        for (i, device) in self.devices.iter_mut().enumerate() {
            match device.update() {
                Ok(Decoded::Ignored) => {}
                Ok(report) => {
                    trace!("[{}] {:?}", device.address(), report);
                    summary.reports += 1;
                }
                Err(e @ DeviceError::Protocol(_)) => {
                    warn!("[{}] dropped inbound frame: {}", device.address(), e);
                    summary.errors += 1;
                }
                Err(e) => {
                    warn!("[{}] {}", device.address(), e);
                    summary.errors += 1;
                }
            }

            if reaction(i, device).is_break() {
                debug!("Polling stopped by controller {}", i);
                return (ControlFlow::Break(()), summary);
            }

            if summary.status_requested {
                device.request_status();
            }
        }

        (ControlFlow::Continue(()), summary)
    }

    /// Tick until `reaction` breaks
    pub async fn run<F>(&mut self, mut reaction: F)
    where
        F: FnMut(usize, &mut Device<C>) -> ControlFlow<()>,
    {
        info!("Polling {} controller(s)", self.devices.len());
        loop {
            let (flow, _) = self.tick(&mut reaction);
            if flow.is_break() {
                break;
            }
            if self.config.poll_interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
        info!("Polling finished");
    }

    fn status_due(&mut self, now: Instant) -> bool {
        let Some(interval) = self.config.status_interval else {
            return false;
        };
        match self.last_status_poll {
            None => {
                self.last_status_poll = Some(now);
                false
            }
            Some(last) if now.saturating_duration_since(last) > interval => {
                self.last_status_poll = Some(now);
                true
            }
            Some(_) => false,
        }
    }

    fn drain_commands(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(DeviceCommand { target, command }) = self.command_rx.try_recv() {
            match self.devices.iter_mut().find(|d| d.address() == target) {
                Some(device) => {
                    debug!("[{}] queued {:?}", target, command);
                    command.apply(device);
                    applied += 1;
                }
                None => warn!("Dropping {:?} for unknown controller {}", command, target),
            }
        }
        applied
    }
}
