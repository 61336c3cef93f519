// Keyboard teleop over zenoh: W/S throttle, A/D steer, R/F speed, space stop, Q quit
//
// Usage: cargo run --example keyboard_teleop
// (start the runtime with --zenoh)
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use rover_teleop_runtime::config::TOPIC_CMD;
use rover_teleop_runtime::messages::{ClientMessage, MoveCommand};
use std::time::{Duration, Instant};
use tracing::info;

const THROTTLE: [f32; 3] = [0.25, 0.5, 1.0]; // stick deflection
const STEER: f32 = 1.0;
const INPUT_TIMEOUT_MS: u64 = 100; // Release the sticks after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: W/S=throttle, A/D=steer, R/F=speed, space=stop, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    // Leave the rover stopped whatever happened
    publish(&publisher, &ClientMessage::EmergencyStop).await?;
    result
}

async fn publish(
    publisher: &zenoh::pubsub::Publisher<'_>,
    msg: &ClientMessage,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(msg)?).await?;
    Ok(())
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;

    // Persistent stick state
    let mut cmd = MoveCommand::default();
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Char('w') if pressed => {
                        cmd.left_y = THROTTLE[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        cmd.left_y = -THROTTLE[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        cmd.right_x = -STEER;
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        cmd.right_x = STEER;
                        last_movement_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    KeyCode::Char(' ') if pressed => {
                        cmd = MoveCommand::default();
                        publish(publisher, &ClientMessage::EmergencyStop).await?;
                        info!("Emergency stop sent");
                        continue;
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Center the sticks if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            cmd = MoveCommand::default();
        }

        // Always publish at ~50Hz, which also keeps the runtime watchdog fed
        publish(publisher, &ClientMessage::Move(cmd)).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
