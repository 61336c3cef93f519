// HTTP front end: operator UI, MJPEG video feed, websocket control channel

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use warp::http::HeaderValue;
use warp::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use crate::camera::{FrameBuffer, FrameSubscriber};
use crate::messages::{ServerMessage, StatusReply};
use crate::session::{ControlSession, SharedDriver};

const INDEX_HTML: &str = include_str!("../static/index.html");

pub const VIDEO_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

// How often an idle session checks its watchdog
const WATCHDOG_PERIOD: Duration = Duration::from_millis(50);

/// Everything a request handler needs
#[derive(Clone)]
pub struct AppState {
    pub driver: SharedDriver,
    pub frames: FrameBuffer,
    pub logs: broadcast::Sender<String>,
    pub cmd_timeout: Option<Duration>,
    next_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(
        driver: SharedDriver,
        frames: FrameBuffer,
        logs: broadcast::Sender<String>,
        cmd_timeout: Option<Duration>,
    ) -> Self {
        Self {
            driver,
            frames,
            logs,
            cmd_timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::html(INDEX_HTML));

    let video = warp::path("video_feed")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|state: AppState| video_feed(state.frames.subscribe()));

    let control = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_state(state))
        .map(|ws: Ws, state: AppState| ws.on_upgrade(move |socket| operator_session(socket, state)));

    index.or(video).or(control).with(warp::trace::request())
}

/// One multipart part carrying a JPEG frame
pub fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    const HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";

    let mut part = Vec::with_capacity(HEADER.len() + jpeg.len() + 2);
    part.extend_from_slice(HEADER);
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// Endless multipart response, one part per new frame
pub fn video_feed(frames: FrameSubscriber) -> warp::reply::Response {
    let parts = futures::stream::unfold(frames, |mut frames| async move {
        let frame = frames.next().await?;
        Some((Ok::<_, Infallible>(multipart_part(&frame.data)), frames))
    });

    let mut response = warp::reply::Response::new(warp::hyper::Body::wrap_stream(parts));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(VIDEO_CONTENT_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

async fn send(tx: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> Result<(), warp::Error> {
    match serde_json::to_string(msg) {
        Ok(text) => tx.send(Message::text(text)).await,
        Err(e) => {
            error!("Failed to encode {:?}: {}", msg, e);
            Ok(())
        }
    }
}

/// Drive one operator's websocket until it closes, then stop the rover
async fn operator_session(socket: WebSocket, state: AppState) {
    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    let (mut tx, mut rx) = socket.split();
    let mut logs = state.logs.subscribe();
    let mut relay_open = true;

    let (mut session, reply) = ControlSession::connect(id, Arc::clone(&state.driver), state.cmd_timeout);
    if send(&mut tx, &ServerMessage::Status(reply)).await.is_err() {
        session.disconnect().await;
        return;
    }

    let mut watchdog = tokio::time::interval(WATCHDOG_PERIOD);
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            incoming = rx.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("Operator {}: websocket error: {}", id, e);
                        break;
                    }
                    None => break,
                };
                if msg.is_close() {
                    break;
                }

                let reply = if let Ok(text) = msg.to_str() {
                    session.handle_text(text).await
                } else if msg.is_binary() {
                    match std::str::from_utf8(msg.as_bytes()) {
                        Ok(text) => session.handle_text(text).await,
                        Err(e) => StatusReply::error(format!("invalid message: {}", e)),
                    }
                } else {
                    // ping / pong
                    continue;
                };

                if send(&mut tx, &ServerMessage::Status(reply)).await.is_err() {
                    break;
                }
            }
            _ = watchdog.tick() => {
                if let Some(reply) = session.check_watchdog().await {
                    if send(&mut tx, &ServerMessage::Status(reply)).await.is_err() {
                        break;
                    }
                }
            }
            line = logs.recv(), if relay_open => match line {
                Ok(message) => {
                    if send(&mut tx, &ServerMessage::Log { message }).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Operator {}: skipped {} log lines", id, skipped);
                }
                Err(RecvError::Closed) => relay_open = false,
            },
        }
    }

    session.disconnect().await;
    info!("Operator {}: connection closed", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActuatorConfig;
    use crate::motor::{ActuatorDriver, SimulatedGpio};
    use tokio::sync::Mutex;
    use warp::hyper::body::HttpBody;

    fn state() -> (AppState, SimulatedGpio) {
        let gpio = SimulatedGpio::new();
        let driver = ActuatorDriver::new(Box::new(gpio.clone()), ActuatorConfig::default())
            .expect("simulated driver");
        let (logs, _) = broadcast::channel(16);
        let state = AppState::new(
            Arc::new(Mutex::new(driver)),
            FrameBuffer::new(),
            logs,
            None,
        );
        (state, gpio)
    }

    fn front_left_duty(gpio: &SimulatedGpio) -> Option<f32> {
        gpio.duty(ActuatorConfig::default().motors[0].pins.enable)
    }

    async fn next_status(client: &mut warp::test::WsClient) -> serde_json::Value {
        loop {
            let msg = client.recv().await.expect("websocket message");
            let value: serde_json::Value = serde_json::from_str(msg.to_str().unwrap()).unwrap();
            if value["event"] == "status" {
                return value["data"].clone();
            }
        }
    }

    #[tokio::test]
    async fn test_index_page() {
        let (state, _gpio) = state();
        let resp = warp::test::request().path("/").reply(&routes(state)).await;
        assert_eq!(resp.status(), 200);
        let body = String::from_utf8_lossy(resp.body());
        assert!(body.contains("/video_feed"));
        assert!(body.contains("/ws"));

        // Sticks recenter on a cancelled pointer as well as on release
        assert!(body.contains("addEventListener('pointerup', release)"));
        assert!(body.contains("addEventListener('pointercancel', release)"));
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (state, _gpio) = state();
        let resp = warp::test::request()
            .path("/nope")
            .reply(&routes(state))
            .await;
        assert_eq!(resp.status(), 404);
    }

    #[test]
    fn test_multipart_part_framing() {
        let part = multipart_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let mut expected = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        expected.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xD9]);
        expected.extend_from_slice(b"\r\n");
        assert_eq!(part, expected);
    }

    #[tokio::test]
    async fn test_video_feed_streams_latest_frame() {
        let frames = FrameBuffer::new();
        frames.publish(vec![1, 2, 3]);

        let resp = video_feed(frames.subscribe());
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "multipart/x-mixed-replace; boundary=frame"
        );

        let mut body = resp.into_body();
        let first = body.data().await.unwrap().unwrap();
        assert_eq!(&first[..], &multipart_part(&[1, 2, 3])[..]);

        frames.publish(vec![4, 5]);
        let second = body.data().await.unwrap().unwrap();
        assert_eq!(&second[..], &multipart_part(&[4, 5])[..]);
    }

    #[tokio::test]
    async fn test_websocket_move_and_stop() {
        let (state, gpio) = state();
        let mut client = warp::test::ws()
            .path("/ws")
            .handshake(routes(state))
            .await
            .expect("handshake");

        assert_eq!(next_status(&mut client).await["status"], "connected");

        client
            .send_text(r#"{"event":"move","data":{"left_x":0,"left_y":1.0,"right_x":1.0,"right_y":0}}"#)
            .await;
        assert_eq!(next_status(&mut client).await["status"], "ok");
        assert_eq!(front_left_duty(&gpio), Some(100.0));

        client.send_text(r#"{"event":"move","data":{}}"#).await;
        let reply = next_status(&mut client).await;
        assert_eq!(reply["status"], "error");
        assert!(reply["message"].as_str().unwrap().contains("missing field"));

        client.send_text(r#"{"event":"emergency_stop"}"#).await;
        assert_eq!(next_status(&mut client).await["status"], "stopped");
        assert_eq!(front_left_duty(&gpio), Some(0.0));
    }

    #[tokio::test]
    async fn test_websocket_disconnect_stops_rover() {
        let (state, gpio) = state();
        let mut client = warp::test::ws()
            .path("/ws")
            .handshake(routes(state))
            .await
            .expect("handshake");
        next_status(&mut client).await;

        client
            .send_text(r#"{"event":"move","data":{"left_x":0,"left_y":-0.5,"right_x":-1.0,"right_y":0}}"#)
            .await;
        assert_eq!(next_status(&mut client).await["status"], "ok");
        assert_eq!(front_left_duty(&gpio), Some(50.0));

        drop(client);
        let stopped = tokio::time::timeout(Duration::from_secs(2), async {
            while front_left_duty(&gpio) != Some(0.0) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(stopped.is_ok(), "rover still moving after disconnect");
    }

    #[tokio::test]
    async fn test_websocket_relays_logs() {
        let (state, _gpio) = state();
        let logs = state.logs.clone();
        let mut client = warp::test::ws()
            .path("/ws")
            .handshake(routes(state))
            .await
            .expect("handshake");
        next_status(&mut client).await;

        logs.send("INFO: camera ready".to_string()).unwrap();
        let msg = client.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(msg.to_str().unwrap()).unwrap();
        assert_eq!(value["event"], "log");
        assert_eq!(value["data"]["message"], "INFO: camera ready");
    }
}
