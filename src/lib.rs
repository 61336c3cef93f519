// Teleoperation runtime for a four-wheel rover with linked steering

pub mod camera;
pub mod config;
pub mod logging;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod server;
pub mod session;
