// Per-operator control link
//
// Connected -> (Driving | Stopped) -> Disconnected. Leaving the link, by
// disconnect, cancellation or watchdog, always passes through the emergency
// stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::messages::{ClientMessage, MoveCommand, StatusReply};
use crate::motor::{ActuatorDriver, DriveCommand};

/// Actuator driver shared by every session; the lock serializes commands
/// from concurrent operators.
pub type SharedDriver = Arc<Mutex<ActuatorDriver>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
    Driving,
    Stopped,
}

pub struct ControlSession {
    id: u64,
    driver: SharedDriver,
    state: LinkState,
    last_command_at: Instant,
    cmd_timeout: Option<Duration>,
}

impl ControlSession {
    /// Open a session; the reply is the connect acknowledgement
    pub fn connect(
        id: u64,
        driver: SharedDriver,
        cmd_timeout: Option<Duration>,
    ) -> (Self, StatusReply) {
        info!("Operator {} connected", id);
        let session = Self {
            id,
            driver,
            state: LinkState::Connected,
            last_command_at: Instant::now(),
            cmd_timeout,
        };
        (session, StatusReply::Connected)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Parse and handle one raw message
    pub async fn handle_text(&mut self, text: &str) -> StatusReply {
        match ClientMessage::parse(text) {
            Ok(msg) => self.handle(msg).await,
            Err(e) => {
                warn!("Operator {}: rejected message: {}", self.id, e);
                StatusReply::error(e)
            }
        }
    }

    pub async fn handle(&mut self, msg: ClientMessage) -> StatusReply {
        match msg {
            ClientMessage::Move(cmd) => self.on_move(cmd).await,
            ClientMessage::EmergencyStop => {
                info!("Operator {}: emergency stop requested", self.id);
                self.emergency_stop().await
            }
        }
    }

    async fn on_move(&mut self, cmd: MoveCommand) -> StatusReply {
        let (left, right) = match cmd.validate() {
            Ok(sticks) => sticks,
            Err(e) => {
                warn!("Operator {}: rejected move: {}", self.id, e);
                return StatusReply::error(e);
            }
        };

        info!(
            "Operator {}: forward/back {:.2}, turn {:.2}, steer {:.2}, adjust {:.2}",
            self.id, left.y, left.x, right.x, right.y
        );
        let drive = DriveCommand::from_sticks(left, right);
        info!(
            "Operator {}: speed {}% steering {:.1} deg",
            self.id, drive.speed, drive.steering_angle_deg
        );

        let result = self.driver.lock().await.apply_drive(&drive);
        match result {
            Ok(()) => {
                self.state = LinkState::Driving;
                self.last_command_at = Instant::now();
                StatusReply::Ok
            }
            Err(e) => {
                // The driver has already stopped the rover
                error!("Operator {}: movement error: {}", self.id, e);
                self.state = LinkState::Stopped;
                StatusReply::error(e)
            }
        }
    }

    pub async fn emergency_stop(&mut self) -> StatusReply {
        self.driver.lock().await.emergency_stop();
        self.state = LinkState::Stopped;
        StatusReply::Stopped
    }

    /// Stop a driving rover whose operator went quiet
    pub async fn check_watchdog(&mut self) -> Option<StatusReply> {
        self.check_watchdog_at(Instant::now()).await
    }

    pub async fn check_watchdog_at(&mut self, now: Instant) -> Option<StatusReply> {
        let timeout = self.cmd_timeout?;
        if self.state != LinkState::Driving {
            return None;
        }

        let age = now.saturating_duration_since(self.last_command_at);
        if age <= timeout {
            return None;
        }

        warn!(
            "Operator {}: command stale ({:?} old), stopping rover",
            self.id, age
        );
        Some(self.emergency_stop().await)
    }

    /// Transport closed: stop the rover, then drop the session
    pub async fn disconnect(mut self) {
        info!("Operator {} disconnected", self.id);
        self.driver.lock().await.emergency_stop();
        self.state = LinkState::Disconnected;
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        if self.state == LinkState::Disconnected {
            return;
        }

        // Session abandoned without a disconnect (task cancelled or panicked)
        warn!("Operator {} session dropped while {:?}", self.id, self.state);
        match self.driver.try_lock() {
            Ok(mut driver) => {
                driver.emergency_stop();
            }
            Err(_) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let driver = Arc::clone(&self.driver);
                    handle.spawn(async move {
                        driver.lock().await.emergency_stop();
                    });
                }
                Err(_) => error!("Operator {}: no runtime to stop the rover", self.id),
            },
        }
    }
}
