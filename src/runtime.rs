// Process wiring: actuators, camera, HTTP server and the optional zenoh bridge
//
// The zenoh bridge keeps the 50 Hz loop with a watchdog: zenoh has no notion
// of a publisher going away, so a silent operator is the only disconnect it
// can see.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::time::interval;
use tracing::{info, warn};

use crate::camera::{self, FrameBuffer, TestPatternCamera};
use crate::config::{
    ActuatorConfig, Args, DEFAULT_CMD_TIMEOUT_MS, LOOP_HZ, TOPIC_CMD, TOPIC_HEALTH, TOPIC_STATUS,
};
use crate::messages::{ClientMessage, RuntimeHealth, StatusReply};
use crate::motor::{ActuatorDriver, SimulatedGpio};
use crate::server::{AppState, routes};
use crate::session::{ControlSession, LinkState, SharedDriver};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub async fn run(args: Args, logs: broadcast::Sender<String>) -> Result<(), BoxError> {
    let config = match &args.pins {
        Some(path) => {
            info!("Loading pin table from {}", path.display());
            ActuatorConfig::load(path)?
        }
        None => ActuatorConfig::default(),
    };

    info!("Starting actuators on the simulated GPIO backend...");
    let driver = ActuatorDriver::new(Box::new(SimulatedGpio::new()), config)?;
    let driver: SharedDriver = Arc::new(Mutex::new(driver));

    let frames = FrameBuffer::new();
    let source = TestPatternCamera::new(args.width, args.height, args.jpeg_quality)?;
    let mut capture = camera::spawn_capture(Box::new(source), frames.clone(), args.fps)?;
    info!(
        "Video feed initialized: {}x{} at {} fps",
        args.width, args.height, args.fps
    );

    let bridge = args.zenoh.then(|| {
        let timeout = args
            .cmd_timeout()
            .unwrap_or(Duration::from_millis(DEFAULT_CMD_TIMEOUT_MS));
        tokio::spawn(zenoh_bridge(Arc::clone(&driver), timeout))
    });

    let state = AppState::new(Arc::clone(&driver), frames, logs, args.cmd_timeout());
    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    let (bound, server) = warp::serve(routes(state)).try_bind_with_graceful_shutdown(addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    })?;

    info!("Runtime started on http://{}", bound);
    match args.cmd_timeout() {
        Some(timeout) => info!("Command watchdog: {}ms", timeout.as_millis()),
        None => warn!("Command watchdog disabled: a silent operator keeps the rover moving"),
    }
    server.await;

    if let Some(bridge) = bridge {
        bridge.abort();
    }
    capture.stop();
    driver.lock().await.emergency_stop();
    info!("Runtime stopped");
    Ok(())
}

/// Health reported over zenoh: ok only while commands keep the rover driving
pub fn health_of(state: LinkState) -> RuntimeHealth {
    match state {
        LinkState::Driving => RuntimeHealth::Ok,
        _ => RuntimeHealth::CmdStale,
    }
}

async fn zenoh_bridge(driver: SharedDriver, cmd_timeout: Duration) -> Result<(), BoxError> {
    let (mut link, reply) = ControlSession::connect(0, driver, Some(cmd_timeout));
    let result = zenoh_loop(&mut link, reply).await;
    if let Err(e) = &result {
        warn!("Zenoh bridge stopped: {}", e);
    }
    link.disconnect().await;
    result
}

async fn zenoh_loop(link: &mut ControlSession, connected: StatusReply) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_status = session.declare_publisher(TOPIC_STATUS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    pub_status.put(serde_json::to_string(&connected)?).await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let mut health = health_of(link.state());

    info!("Zenoh bridge started: {}Hz loop", LOOP_HZ);
    info!("Subscribed to: {}", TOPIC_CMD);
    info!("Publishing to: {}, {}", TOPIC_STATUS, TOPIC_HEALTH);

    loop {
        tick.tick().await;

        // 1. Handle every pending command in arrival order
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let parsed = serde_json::from_slice::<ClientMessage>(&sample.payload().to_bytes());
            drop(sample);
            let reply = match parsed {
                Ok(msg) => link.handle(msg).await,
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                    StatusReply::error(format!("invalid message: {}", e))
                }
            };
            pub_status.put(serde_json::to_string(&reply)?).await?;
        }

        // 2. Watchdog
        if let Some(reply) = link.check_watchdog().await {
            pub_status.put(serde_json::to_string(&reply)?).await?;
        }

        // 3. Publish health
        let now = health_of(link.state());
        if now != health {
            info!("Zenoh link health: {:?}", now);
            health = now;
        }
        pub_health.put(serde_json::to_string(&health)?).await?;
    }
}
