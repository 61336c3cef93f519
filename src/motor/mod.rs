// Motor and steering control for the four-wheel base
//
// Provides:
// - Joystick -> drive command mapping
// - Injected GPIO/PWM access with a simulated backend
// - Actuator driver with the emergency stop procedure

mod driver;
pub mod gpio;
pub mod kinematics;

pub use driver::{ActuatorDriver, ActuatorError, ActuatorKind};
pub use gpio::{GpioBus, GpioError, Level, SimulatedGpio};
pub use kinematics::{DriveCommand, compute_drive, servo_duty};
