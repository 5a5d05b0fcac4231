//! HTTP endpoint serving live camera previews.
//!
//! One route: `GET /camera/{id}/stream`.  A known, connected, streaming
//! camera gets a `multipart/x-mixed-replace` response fed from its
//! latest-frame cell at the profile frame rate; anything else gets a plain
//! 404 or 503.  Each client runs on its own task, and a slow or dead client
//! affects only itself.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use camgate_device::CameraShared;
use camgate_types::{CameraId, GatewayError, StreamProfile};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::encode::encode_jpeg;

/// Default TCP port for the preview server.
pub const DEFAULT_PORT: u16 = 8088;

/// Multipart boundary token, fixed by the MJPEG convention.
const BOUNDARY: &str = "frame";

/// MJPEG preview server over the gateway's cameras.
pub struct StreamServer {
    cameras: Arc<HashMap<CameraId, Arc<CameraShared>>>,
    profile: StreamProfile,
    port: u16,
}

impl StreamServer {
    pub fn new(cameras: HashMap<CameraId, Arc<CameraShared>>, profile: StreamProfile) -> Self {
        Self {
            cameras: Arc::new(cameras),
            profile,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept clients forever.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Io`] when the listener cannot bind.
    pub async fn run(self) -> Result<(), GatewayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        info!(port = self.port, "stream server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let cameras = Arc::clone(&self.cameras);
                    let profile = self.profile.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, cameras, profile).await {
                            debug!(%peer, error = %e, "stream client closed");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "stream accept failed");
                }
            }
        }
    }
}

/// Serve one HTTP client.  Generic over the socket so tests can drive it
/// through an in-memory duplex pipe.
async fn handle_client<S>(
    mut stream: S,
    cameras: Arc<HashMap<CameraId, Arc<CameraShared>>>,
    profile: StreamProfile,
) -> Result<(), GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = read_request_head(&mut stream).await?;
    let request = String::from_utf8_lossy(&head);
    let request_line = request.lines().next().unwrap_or("");

    let Some(id) = parse_stream_target(request_line) else {
        return respond(
            &mut stream,
            "404 Not Found",
            "unknown route; try /camera/{id}/stream",
        )
        .await;
    };
    let Some(shared) = cameras.get(&id) else {
        return respond(&mut stream, "404 Not Found", "no such camera").await;
    };
    if !shared.is_connected() || !shared.is_streaming() {
        return respond(&mut stream, "503 Service Unavailable", "camera not streaming").await;
    }

    serve_mjpeg(&mut stream, shared, &profile).await
}

/// Maximum accepted size of a request head.
const MAX_REQUEST_HEAD: usize = 4096;

/// Read until the blank line ending the request head, so a request line
/// split across TCP segments still parses.  Stops at EOF or the size cap.
async fn read_request_head<S>(stream: &mut S) -> Result<Vec<u8>, GatewayError>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= MAX_REQUEST_HEAD {
            break;
        }
    }
    Ok(head)
}

/// Push multipart JPEG parts until the camera stops or the client goes away.
async fn serve_mjpeg<S>(
    stream: &mut S,
    shared: &Arc<CameraShared>,
    profile: &StreamProfile,
) -> Result<(), GatewayError>
where
    S: AsyncWrite + Unpin,
{
    let header = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace; boundary={BOUNDARY}\r\n\
         Cache-Control: no-cache\r\n\
         Connection: close\r\n\
         \r\n"
    );
    stream.write_all(header.as_bytes()).await?;

    let interval = Duration::from_secs_f64(1.0 / profile.frame_rate.max(1.0));
    loop {
        if !shared.is_connected() || !shared.is_streaming() {
            break;
        }
        // A writer holding the cell right now just means we show this frame
        // one interval later.
        if let Some(frame) = shared.cell.try_snapshot() {
            match encode_jpeg(&frame, profile) {
                Ok(jpeg) => {
                    let part = format!(
                        "--{BOUNDARY}\r\n\
                         Content-Type: image/jpeg\r\n\
                         Content-Length: {}\r\n\
                         \r\n",
                        jpeg.len()
                    );
                    stream.write_all(part.as_bytes()).await?;
                    stream.write_all(&jpeg).await?;
                    stream.write_all(b"\r\n").await?;
                    stream.flush().await?;
                    shared.stats.streamed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(error = %e, "preview encode failed; skipping frame");
                }
            }
        }
        tokio::time::sleep(interval).await;
    }
    Ok(())
}

async fn respond<S>(stream: &mut S, status: &str, body: &str) -> Result<(), GatewayError>
where
    S: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Extract the camera id from a `GET /camera/{id}/stream` request line.
fn parse_stream_target(request_line: &str) -> Option<CameraId> {
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let path = parts.next()?;
    let rest = path.strip_prefix("/camera/")?;
    let (id, tail) = rest.split_once('/')?;
    if tail != "stream" {
        return None;
    }
    id.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use camgate_device::{CameraConfig, CameraDevice};
    use camgate_hal::{SyntheticBackend, SyntheticSinkBackend};
    use camgate_types::CameraIntent;
    use std::path::PathBuf;

    fn streaming_camera() -> (CameraDevice, Arc<CameraShared>) {
        let config = CameraConfig {
            capture: camgate_types::CaptureProfile {
                width: 32,
                height: 16,
                frame_rate: 30.0,
                pixel_format: "MJPG".to_string(),
            },
            ..CameraConfig::new(2, "/dev/video2", PathBuf::from("/tmp"))
        };
        let mut dev = CameraDevice::new(
            config,
            Arc::new(SyntheticBackend::new()),
            Arc::new(SyntheticSinkBackend::new()),
        );
        dev.handle().send(CameraIntent::Connect);
        dev.handle().send(CameraIntent::StartStream);
        dev.tick();
        let shared = dev.shared();
        (dev, shared)
    }

    fn camera_map(shared: Arc<CameraShared>) -> Arc<HashMap<CameraId, Arc<CameraShared>>> {
        let mut map = HashMap::new();
        map.insert(2u8, shared);
        Arc::new(map)
    }

    async fn request(
        cameras: Arc<HashMap<CameraId, Arc<CameraShared>>>,
        line: &str,
        read_limit: usize,
    ) -> Vec<u8> {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(handle_client(server, cameras, StreamProfile::default()));

        client
            .write_all(format!("{line}\r\nHost: test\r\n\r\n").as_bytes())
            .await
            .unwrap();

        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        while collected.len() < read_limit {
            let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
                .await
                .expect("response within deadline")
                .unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }
        drop(client);
        task.abort();
        collected
    }

    #[test]
    fn parse_stream_target_accepts_the_route() {
        assert_eq!(parse_stream_target("GET /camera/3/stream HTTP/1.1"), Some(3));
        assert_eq!(parse_stream_target("GET /camera/0/stream HTTP/1.1"), Some(0));
    }

    #[test]
    fn parse_stream_target_rejects_everything_else() {
        assert_eq!(parse_stream_target("POST /camera/3/stream HTTP/1.1"), None);
        assert_eq!(parse_stream_target("GET /camera/3/snapshot HTTP/1.1"), None);
        assert_eq!(parse_stream_target("GET /camera/x/stream HTTP/1.1"), None);
        assert_eq!(parse_stream_target("GET / HTTP/1.1"), None);
        assert_eq!(parse_stream_target(""), None);
    }

    #[tokio::test]
    async fn unknown_camera_gets_404() {
        let cameras = Arc::new(HashMap::new());
        let response = request(cameras, "GET /camera/9/stream HTTP/1.1", 256).await;
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn idle_camera_gets_503() {
        let config = CameraConfig::new(2, "/dev/video2", PathBuf::from("/tmp"));
        let dev = CameraDevice::new(
            config,
            Arc::new(SyntheticBackend::new()),
            Arc::new(SyntheticSinkBackend::new()),
        );
        let response = request(camera_map(dev.shared()), "GET /camera/2/stream HTTP/1.1", 256).await;
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 503"));
    }

    #[tokio::test]
    async fn request_split_across_segments_still_parses() {
        let (dev, shared) = streaming_camera();
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(handle_client(server, camera_map(shared), StreamProfile::default()));

        // The request line arrives in two pieces.
        client.write_all(b"GET /camera/2/st").await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        client
            .write_all(b"ream HTTP/1.1\r\nHost: test\r\n\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 256];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("response within deadline")
            .unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.starts_with("HTTP/1.1 200"), "got: {text}");
        task.abort();
        drop(dev);
    }

    #[tokio::test]
    async fn streaming_camera_gets_multipart_jpeg() {
        let (dev, shared) = streaming_camera();
        let response = request(camera_map(shared.clone()), "GET /camera/2/stream HTTP/1.1", 2048).await;

        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
        assert!(text.contains("--frame"));
        assert!(text.contains("Content-Type: image/jpeg"));
        // The JPEG SOI marker appears after the part header.
        assert!(response.windows(2).any(|w| w == [0xFF, 0xD8]));
        assert!(shared.stats.snapshot().streamed >= 1);
        drop(dev);
    }
}
