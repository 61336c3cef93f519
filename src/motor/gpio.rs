// GPIO / PWM access for the actuator driver
//
// The driver never touches hardware directly: it is handed a `GpioBus` at
// construction. `SimulatedGpio` is the development backend and records every
// pin so tests can inspect the resulting actuator state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

/// Digital output level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Low,
    High,
}

/// Error types for pin access
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GpioError {
    #[error("Pin {pin} was not configured as an output")]
    NotConfigured { pin: u8 },

    #[error("Pin {pin} has no PWM channel")]
    NoPwm { pin: u8 },

    #[error("Duty cycle {duty} out of range for pin {pin}")]
    InvalidDuty { pin: u8, duty: f32 },

    #[error("Write to pin {pin} failed: {reason}")]
    Fault { pin: u8, reason: String },
}

pub type Result<T> = std::result::Result<T, GpioError>;

/// Hardware capability injected into the actuator driver
pub trait GpioBus: Send {
    /// Configure a pin as a digital output, driven low
    fn setup_output(&mut self, pin: u8) -> Result<()>;

    /// Drive a direction pin
    fn set_level(&mut self, pin: u8, level: Level) -> Result<()>;

    /// Start PWM on a configured pin
    fn start_pwm(&mut self, pin: u8, frequency_hz: f32, duty: f32) -> Result<()>;

    /// Change the duty cycle (percent, 0..=100) of a running PWM channel
    fn set_duty_cycle(&mut self, pin: u8, duty: f32) -> Result<()>;

    fn stop_pwm(&mut self, pin: u8) -> Result<()>;

    /// Release every pin
    fn cleanup(&mut self);
}

/// Recorded state of one PWM channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmState {
    pub frequency_hz: f32,
    pub duty: f32,
    pub running: bool,
}

#[derive(Debug, Default)]
struct SimState {
    levels: HashMap<u8, Level>,
    pwm: HashMap<u8, PwmState>,
    writes: usize,
    fail_at: Option<usize>,
}

impl SimState {
    // Count a write and trip an injected fault if it is due
    fn write(&mut self, pin: u8) -> Result<()> {
        self.writes += 1;
        if self.fail_at == Some(self.writes) {
            self.fail_at = None;
            return Err(GpioError::Fault {
                pin,
                reason: "injected fault".to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory GPIO backend. Clones share state, so a test can keep one handle
/// while the driver owns another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGpio {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicked holder cannot leave the maps half-updated
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the `n`-th write from now (1-based), once
    pub fn inject_fault_after(&self, n: usize) {
        let mut state = self.lock();
        state.fail_at = Some(state.writes + n);
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        self.lock().levels.get(&pin).copied()
    }

    pub fn pwm(&self, pin: u8) -> Option<PwmState> {
        self.lock().pwm.get(&pin).copied()
    }

    pub fn duty(&self, pin: u8) -> Option<f32> {
        self.pwm(pin).map(|p| p.duty)
    }

    /// Writes performed so far (levels and duty cycles)
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn configured_pins(&self) -> usize {
        self.lock().levels.len()
    }
}

impl GpioBus for SimulatedGpio {
    fn setup_output(&mut self, pin: u8) -> Result<()> {
        self.lock().levels.insert(pin, Level::Low);
        Ok(())
    }

    fn set_level(&mut self, pin: u8, level: Level) -> Result<()> {
        let mut state = self.lock();
        if !state.levels.contains_key(&pin) {
            return Err(GpioError::NotConfigured { pin });
        }
        state.write(pin)?;
        debug!("sim gpio {} -> {:?}", pin, level);
        state.levels.insert(pin, level);
        Ok(())
    }

    fn start_pwm(&mut self, pin: u8, frequency_hz: f32, duty: f32) -> Result<()> {
        check_duty(pin, duty)?;
        let mut state = self.lock();
        if !state.levels.contains_key(&pin) {
            return Err(GpioError::NotConfigured { pin });
        }
        state.pwm.insert(
            pin,
            PwmState {
                frequency_hz,
                duty,
                running: true,
            },
        );
        Ok(())
    }

    fn set_duty_cycle(&mut self, pin: u8, duty: f32) -> Result<()> {
        check_duty(pin, duty)?;
        let mut state = self.lock();
        if !state.pwm.contains_key(&pin) {
            return Err(GpioError::NoPwm { pin });
        }
        state.write(pin)?;
        debug!("sim pwm {} -> {:.2}%", pin, duty);
        if let Some(pwm) = state.pwm.get_mut(&pin) {
            pwm.duty = duty;
        }
        Ok(())
    }

    fn stop_pwm(&mut self, pin: u8) -> Result<()> {
        match self.lock().pwm.get_mut(&pin) {
            Some(pwm) => {
                pwm.running = false;
                Ok(())
            }
            None => Err(GpioError::NoPwm { pin }),
        }
    }

    fn cleanup(&mut self) {
        let mut state = self.lock();
        state.levels.clear();
        state.pwm.clear();
    }
}

fn check_duty(pin: u8, duty: f32) -> Result<()> {
    if (0.0..=100.0).contains(&duty) {
        Ok(())
    } else {
        Err(GpioError::InvalidDuty { pin, duty })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_pin_rejected() {
        let mut gpio = SimulatedGpio::new();
        assert_eq!(
            gpio.set_level(4, Level::High),
            Err(GpioError::NotConfigured { pin: 4 })
        );
        assert_eq!(gpio.set_duty_cycle(4, 10.0), Err(GpioError::NoPwm { pin: 4 }));
    }

    #[test]
    fn test_pwm_lifecycle() {
        let mut gpio = SimulatedGpio::new();
        gpio.setup_output(18).unwrap();
        gpio.start_pwm(18, 50.0, 7.5).unwrap();
        gpio.set_duty_cycle(18, 10.0).unwrap();
        assert_eq!(gpio.duty(18), Some(10.0));

        gpio.stop_pwm(18).unwrap();
        assert!(!gpio.pwm(18).unwrap().running);

        gpio.cleanup();
        assert_eq!(gpio.pwm(18), None);
        assert_eq!(gpio.configured_pins(), 0);
    }

    #[test]
    fn test_duty_out_of_range() {
        let mut gpio = SimulatedGpio::new();
        gpio.setup_output(18).unwrap();
        gpio.start_pwm(18, 50.0, 0.0).unwrap();
        assert!(matches!(
            gpio.set_duty_cycle(18, 101.0),
            Err(GpioError::InvalidDuty { .. })
        ));
    }

    #[test]
    fn test_injected_fault_is_one_shot() {
        let mut gpio = SimulatedGpio::new();
        gpio.setup_output(5).unwrap();
        gpio.inject_fault_after(2);

        assert!(gpio.set_level(5, Level::High).is_ok());
        assert!(matches!(
            gpio.set_level(5, Level::Low),
            Err(GpioError::Fault { pin: 5, .. })
        ));
        // Failed write leaves the previous level in place
        assert_eq!(gpio.level(5), Some(Level::High));
        assert!(gpio.set_level(5, Level::Low).is_ok());
        assert_eq!(gpio.write_count(), 3);
    }

    #[test]
    fn test_clones_share_state() {
        let handle = SimulatedGpio::new();
        let mut owned = handle.clone();
        owned.setup_output(7).unwrap();
        owned.set_level(7, Level::High).unwrap();
        assert_eq!(handle.level(7), Some(Level::High));
    }
}
