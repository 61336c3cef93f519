// High-level actuator driver for the four-wheel base
//
// Fans one DriveCommand out to four H-bridge motors and four steering servos
// through an injected GpioBus, and owns the safe-stop procedure.

use tracing::{debug, error, info, warn};

use super::gpio::{GpioBus, GpioError, Level};
use super::kinematics::{DriveCommand, Direction};
use crate::config::{ActuatorConfig, MotorPins, WheelPosition};

/// Which actuator of a wheel a write was aimed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorKind {
    Motor,
    Servo,
}

impl std::fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActuatorKind::Motor => f.write_str("motor"),
            ActuatorKind::Servo => f.write_str("servo"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Failed to set up {kind} {wheel}: {source}")]
    Setup {
        wheel: WheelPosition,
        kind: ActuatorKind,
        source: GpioError,
    },

    #[error("Failed to drive {kind} {wheel}: {source}")]
    Write {
        wheel: WheelPosition,
        kind: ActuatorKind,
        source: GpioError,
    },
}

/// Drives the four motors and four steering servos
pub struct ActuatorDriver {
    gpio: Box<dyn GpioBus>,
    config: ActuatorConfig,
}

impl ActuatorDriver {
    /// Configure every pin and start PWM with the rover stopped and centered
    pub fn new(gpio: Box<dyn GpioBus>, config: ActuatorConfig) -> Result<Self, ActuatorError> {
        let mut driver = Self { gpio, config };
        driver.initialize()?;
        Ok(driver)
    }

    fn initialize(&mut self) -> Result<(), ActuatorError> {
        let motor_hz = self.config.motor_pwm_hz;
        let servo_hz = self.config.servo_pwm_hz;
        let rest = DriveCommand::stop();

        for motor in self.config.motors {
            let setup = |source| ActuatorError::Setup {
                wheel: motor.wheel,
                kind: ActuatorKind::Motor,
                source,
            };
            let MotorPins { enable, in1, in2 } = motor.pins;
            for pin in [enable, in1, in2] {
                self.gpio.setup_output(pin).map_err(setup)?;
            }
            self.gpio
                .start_pwm(enable, motor_hz, rest.motor_duty())
                .map_err(setup)?;
        }

        for servo in self.config.servos {
            let setup = |source| ActuatorError::Setup {
                wheel: servo.wheel,
                kind: ActuatorKind::Servo,
                source,
            };
            self.gpio.setup_output(servo.pwm).map_err(setup)?;
            self.gpio
                .start_pwm(servo.pwm, servo_hz, rest.servo_duty())
                .map_err(setup)?;
        }

        info!(
            "Actuators initialized: motors {:?} at {} Hz, servos {:?} at {} Hz",
            WheelPosition::ALL.map(WheelPosition::name),
            motor_hz,
            WheelPosition::ALL.map(WheelPosition::name),
            servo_hz
        );
        Ok(())
    }

    /// Apply a drive command to every wheel
    ///
    /// Writes go out motor by motor, then servo by servo. The first failure
    /// aborts the batch, the rover is brought to the safe state, and the
    /// error is returned.
    pub fn apply_drive(&mut self, cmd: &DriveCommand) -> Result<(), ActuatorError> {
        debug!(
            "Applying speed {}% steering {:.1} deg",
            cmd.speed, cmd.steering_angle_deg
        );

        if let Err(e) = self.write_all(cmd) {
            error!("Drive command failed: {}", e);
            self.emergency_stop();
            return Err(e);
        }
        Ok(())
    }

    fn write_all(&mut self, cmd: &DriveCommand) -> Result<(), ActuatorError> {
        let (in1, in2) = match cmd.direction() {
            Direction::Forward => (Level::High, Level::Low),
            Direction::Reverse => (Level::Low, Level::High),
            Direction::Coast => (Level::Low, Level::Low),
        };
        let motor_duty = cmd.motor_duty();

        for motor in self.config.motors {
            let write = |source| ActuatorError::Write {
                wheel: motor.wheel,
                kind: ActuatorKind::Motor,
                source,
            };
            self.gpio.set_level(motor.pins.in1, in1).map_err(write)?;
            self.gpio.set_level(motor.pins.in2, in2).map_err(write)?;
            self.gpio
                .set_duty_cycle(motor.pins.enable, motor_duty)
                .map_err(write)?;
            debug!("Motor {}: speed set to {}%", motor.wheel, cmd.speed);
        }

        let servo_duty = cmd.servo_duty();
        for servo in self.config.servos {
            self.gpio
                .set_duty_cycle(servo.pwm, servo_duty)
                .map_err(|source| ActuatorError::Write {
                    wheel: servo.wheel,
                    kind: ActuatorKind::Servo,
                    source,
                })?;
            debug!(
                "Servo {}: angle set to {:.1} deg",
                servo.wheel, cmd.steering_angle_deg
            );
        }
        Ok(())
    }

    /// Bring every actuator to the safe state: motors at 0% with both
    /// direction pins low, servos centered.
    ///
    /// Never fails. A failed write is logged and the remaining actuators are
    /// still stopped. Returns the number of writes that failed.
    pub fn emergency_stop(&mut self) -> usize {
        info!("Emergency stop triggered");
        let rest = DriveCommand::stop();
        let mut faults = 0;

        for motor in self.config.motors {
            let pins = motor.pins;
            let results = [
                self.gpio.set_duty_cycle(pins.enable, rest.motor_duty()),
                self.gpio.set_level(pins.in1, Level::Low),
                self.gpio.set_level(pins.in2, Level::Low),
            ];
            for e in results.into_iter().filter_map(Result::err) {
                error!("Error stopping motor {}: {}", motor.wheel, e);
                faults += 1;
            }
        }

        for servo in self.config.servos {
            if let Err(e) = self.gpio.set_duty_cycle(servo.pwm, rest.servo_duty()) {
                error!("Error centering servo {}: {}", servo.wheel, e);
                faults += 1;
            }
        }

        if faults > 0 {
            warn!("Emergency stop completed with {} failed writes", faults);
        }
        faults
    }

    pub fn config(&self) -> &ActuatorConfig {
        &self.config
    }
}

impl Drop for ActuatorDriver {
    fn drop(&mut self) {
        // Leave the rover stopped, then release the pins
        self.emergency_stop();
        for pin in self
            .config
            .motors
            .iter()
            .map(|m| m.pins.enable)
            .chain(self.config.servos.iter().map(|s| s.pwm))
        {
            if let Err(e) = self.gpio.stop_pwm(pin) {
                warn!("Failed to stop PWM on pin {}: {}", pin, e);
            }
        }
        self.gpio.cleanup();
        info!("Actuators released");
    }
}
