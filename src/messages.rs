// Define message types for the control channel

use serde::{Deserialize, Serialize};

/// One joystick stick, both axes expected in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JoystickVector {
    pub x: f32,
    pub y: f32,
}

/// Payload of a `move` event: both sticks of the operator's gamepad
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveCommand {
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid message: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("axis {axis} is not a finite number ({value})")]
    InvalidAxis { axis: &'static str, value: f32 },
}

impl MoveCommand {
    /// Reject non-finite axes, clamp the rest into [-1, 1]
    pub fn validate(&self) -> Result<(JoystickVector, JoystickVector), CommandError> {
        let axis = |axis: &'static str, value: f32| {
            if value.is_finite() {
                Ok(value.clamp(-1.0, 1.0))
            } else {
                Err(CommandError::InvalidAxis { axis, value })
            }
        };

        let left = JoystickVector {
            x: axis("left_x", self.left_x)?,
            y: axis("left_y", self.left_y)?,
        };
        let right = JoystickVector {
            x: axis("right_x", self.right_x)?,
            y: axis("right_y", self.right_y)?,
        };
        Ok((left, right))
    }
}

// Operator -> runtime
// {"event": "move", "data": {...}} or {"event": "emergency_stop"}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Move(MoveCommand),
    EmergencyStop,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, CommandError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Acknowledgement sent back to the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusReply {
    Connected,
    Ok,
    Stopped,
    Error { message: String },
}

impl StatusReply {
    pub fn error(err: impl std::fmt::Display) -> Self {
        StatusReply::Error {
            message: err.to_string(),
        }
    }
}

// Runtime -> operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Status(StatusReply),
    Log { message: String },
}

/// Health status published by the zenoh bridge
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_move() {
        let msg = ClientMessage::parse(
            r#"{"event":"move","data":{"left_x":0,"left_y":1.0,"right_x":-0.5,"right_y":0}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Move(MoveCommand {
                left_x: 0.0,
                left_y: 1.0,
                right_x: -0.5,
                right_y: 0.0,
            })
        );
    }

    #[test]
    fn test_parse_emergency_stop() {
        let msg = ClientMessage::parse(r#"{"event":"emergency_stop"}"#).unwrap();
        assert_eq!(msg, ClientMessage::EmergencyStop);
    }

    #[test]
    fn test_missing_field_rejected() {
        let err = ClientMessage::parse(r#"{"event":"move","data":{"left_x":0,"left_y":1.0}}"#)
            .unwrap_err();
        assert!(matches!(err, CommandError::Parse(_)));
        assert!(err.to_string().contains("right_x"));
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(ClientMessage::parse(r#"{"event":"jump"}"#).is_err());
        assert!(ClientMessage::parse("not json").is_err());
    }

    #[test]
    fn test_validate_clamps_and_rejects() {
        let cmd = MoveCommand {
            left_x: 0.0,
            left_y: 1.7,
            right_x: -3.0,
            right_y: 0.2,
        };
        let (left, right) = cmd.validate().unwrap();
        assert_eq!(left.y, 1.0);
        assert_eq!(right.x, -1.0);
        assert_eq!(right.y, 0.2);

        let cmd = MoveCommand {
            right_x: f32::NAN,
            ..MoveCommand::default()
        };
        match cmd.validate() {
            Err(CommandError::InvalidAxis { axis, .. }) => assert_eq!(axis, "right_x"),
            other => panic!("expected invalid axis, got {:?}", other),
        }

        let cmd = MoveCommand {
            left_y: f32::INFINITY,
            ..MoveCommand::default()
        };
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn test_status_wire_format() {
        let ok = serde_json::to_value(ServerMessage::Status(StatusReply::Ok)).unwrap();
        assert_eq!(ok, json!({"event": "status", "data": {"status": "ok"}}));

        let err = serde_json::to_value(ServerMessage::Status(StatusReply::error("boom"))).unwrap();
        assert_eq!(
            err,
            json!({"event": "status", "data": {"status": "error", "message": "boom"}})
        );

        let log = serde_json::to_value(ServerMessage::Log {
            message: "INFO: hi".into(),
        })
        .unwrap();
        assert_eq!(log, json!({"event": "log", "data": {"message": "INFO: hi"}}));
    }
}
