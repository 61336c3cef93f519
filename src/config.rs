// Timeouts, topics, pin table, command-line arguments
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

// Zenoh bridge loop frequency
pub const LOOP_HZ: u64 = 50;

// Default command timeout for the watchdog (0 disables it)
pub const DEFAULT_CMD_TIMEOUT_MS: u64 = 500;

// Zenoh topics
pub const TOPIC_CMD: &str = "rover/cmd"; // move / emergency_stop
pub const TOPIC_STATUS: &str = "rover/state/status"; // status replies
pub const TOPIC_HEALTH: &str = "rover/state/health"; // health status

// PWM
pub const MOTOR_PWM_FREQUENCY_HZ: f32 = 1000.0;
pub const SERVO_PWM_FREQUENCY_HZ: f32 = 50.0;

// Servo duty at 90 degrees
pub const SERVO_CENTER_DUTY: f32 = 7.5;

// Camera
pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

// HTTP
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

/// Rover teleoperation server
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = DEFAULT_BIND)]
    pub bind: String,

    /// HTTP port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Stop a driving rover after this long without commands (0 = never)
    #[arg(long, default_value_t = DEFAULT_CMD_TIMEOUT_MS)]
    pub cmd_timeout_ms: u64,

    /// JSON file overriding the default pin table
    #[arg(long)]
    pub pins: Option<PathBuf>,

    /// Camera frame rate
    #[arg(long, default_value_t = DEFAULT_FPS)]
    pub fps: u32,

    #[arg(long, default_value_t = DEFAULT_FRAME_WIDTH)]
    pub width: u32,

    #[arg(long, default_value_t = DEFAULT_FRAME_HEIGHT)]
    pub height: u32,

    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    pub jpeg_quality: u8,

    /// Also accept commands over zenoh
    #[arg(long)]
    pub zenoh: bool,
}

impl Args {
    /// Watchdog timeout, `None` when disabled
    pub fn cmd_timeout(&self) -> Option<Duration> {
        (self.cmd_timeout_ms > 0).then(|| Duration::from_millis(self.cmd_timeout_ms))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read pin table {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid pin table {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Pin {pin} is assigned more than once")]
    DuplicatePin { pin: u8 },

    #[error("PWM frequency must be positive, got {hz}")]
    InvalidFrequency { hz: f32 },

    #[error("Wheel {wheel} appears {count} times in {table}, expected once")]
    WheelAssignment {
        table: &'static str,
        wheel: WheelPosition,
        count: usize,
    },
}

/// Wheel positions, in the order commands are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WheelPosition {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl WheelPosition {
    pub const ALL: [WheelPosition; 4] = [
        WheelPosition::FrontLeft,
        WheelPosition::FrontRight,
        WheelPosition::RearLeft,
        WheelPosition::RearRight,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WheelPosition::FrontLeft => "front_left",
            WheelPosition::FrontRight => "front_right",
            WheelPosition::RearLeft => "rear_left",
            WheelPosition::RearRight => "rear_right",
        }
    }
}

impl std::fmt::Display for WheelPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// H-bridge pins for one drive motor (BCM numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorPins {
    pub enable: u8, // PWM, sets speed
    pub in1: u8,
    pub in2: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorConfig {
    pub wheel: WheelPosition,
    #[serde(flatten)]
    pub pins: MotorPins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoConfig {
    pub wheel: WheelPosition,
    pub pwm: u8,
}

/// Static pin table and PWM frequencies for the four wheels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub motors: [MotorConfig; 4],
    pub servos: [ServoConfig; 4],
    pub motor_pwm_hz: f32,
    pub servo_pwm_hz: f32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        use WheelPosition::*;

        let motor = |wheel, enable, in1, in2| MotorConfig {
            wheel,
            pins: MotorPins { enable, in1, in2 },
        };
        let servo = |wheel, pwm| ServoConfig { wheel, pwm };

        Self {
            motors: [
                motor(FrontLeft, 17, 27, 22),
                motor(FrontRight, 23, 24, 25),
                motor(RearLeft, 5, 6, 13),
                motor(RearRight, 12, 16, 20),
            ],
            servos: [
                servo(FrontLeft, 18),
                servo(FrontRight, 19),
                servo(RearLeft, 21),
                servo(RearRight, 26),
            ],
            motor_pwm_hz: MOTOR_PWM_FREQUENCY_HZ,
            servo_pwm_hz: SERVO_PWM_FREQUENCY_HZ,
        }
    }
}

impl ActuatorConfig {
    /// Load a pin table from a JSON file and validate it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Every wheel once per table, every pin used once, frequencies positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        for hz in [self.motor_pwm_hz, self.servo_pwm_hz] {
            if !(hz > 0.0) {
                return Err(ConfigError::InvalidFrequency { hz });
            }
        }

        let motor_wheels = self.motors.map(|m| m.wheel);
        let servo_wheels = self.servos.map(|s| s.wheel);
        for (table, wheels) in [("motors", motor_wheels), ("servos", servo_wheels)] {
            for wheel in WheelPosition::ALL {
                let count = wheels.iter().filter(|&&w| w == wheel).count();
                if count != 1 {
                    return Err(ConfigError::WheelAssignment {
                        table,
                        wheel,
                        count,
                    });
                }
            }
        }

        let mut seen = HashSet::new();
        for pin in self.all_pins() {
            if !seen.insert(pin) {
                return Err(ConfigError::DuplicatePin { pin });
            }
        }
        Ok(())
    }

    /// All pins in the table, motors first
    pub fn all_pins(&self) -> impl Iterator<Item = u8> + '_ {
        self.motors
            .iter()
            .flat_map(|m| [m.pins.enable, m.pins.in1, m.pins.in2])
            .chain(self.servos.iter().map(|s| s.pwm))
    }
}
