// Joystick -> drive mapping for the four-wheel base
// One speed for every motor, one steering angle for every servo.

use crate::messages::JoystickVector;

/// Maximum motor duty cycle (percent)
pub const MAX_SPEED: i32 = 100;

/// Servo angle with the wheels pointing straight ahead
pub const CENTER_ANGLE_DEG: f32 = 90.0;

/// Steering deflection at full stick
pub const STEERING_RANGE_DEG: f32 = 45.0;

/// Direction an H-bridge is driven in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
    Coast,
}

/// Drive command shared by all four wheels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveCommand {
    pub speed: i32,              // [-100, 100], percent duty with sign
    pub steering_angle_deg: f32, // [45, 135]
}

impl DriveCommand {
    /// Wheels stopped and centered
    pub fn stop() -> Self {
        Self {
            speed: 0,
            steering_angle_deg: CENTER_ANGLE_DEG,
        }
    }

    /// Build from the validated sticks: left stick drives, right stick steers
    pub fn from_sticks(left: JoystickVector, right: JoystickVector) -> Self {
        compute_drive(left.y, right.x)
    }

    pub fn direction(&self) -> Direction {
        match self.speed {
            s if s > 0 => Direction::Forward,
            s if s < 0 => Direction::Reverse,
            _ => Direction::Coast,
        }
    }

    /// Motor duty cycle in percent
    pub fn motor_duty(&self) -> f32 {
        self.speed.unsigned_abs() as f32
    }

    pub fn servo_duty(&self) -> f32 {
        servo_duty(self.steering_angle_deg)
    }
}

/// Convert stick axes to a drive command
///
/// # Arguments
/// * `left_y` - Throttle in [-1, 1] (positive = forward)
/// * `right_x` - Steering in [-1, 1] (positive = right)
pub fn compute_drive(left_y: f32, right_x: f32) -> DriveCommand {
    let speed = ((left_y * 100.0).round() as i32).clamp(-MAX_SPEED, MAX_SPEED);
    let steering_angle_deg = CENTER_ANGLE_DEG + right_x * STEERING_RANGE_DEG;

    DriveCommand {
        speed,
        steering_angle_deg,
    }
}

/// Servo angle (0..180 degrees) to PWM duty cycle (2.5%..12.5% at 50 Hz)
pub fn servo_duty(angle_deg: f32) -> f32 {
    2.5 + angle_deg / 18.0
}
