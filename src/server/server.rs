//! Unix socket server implementation

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::{StreamExt, stream};
use tokio::{
    fs,
    net::{UnixListener, UnixStream},
    sync::broadcast,
};
use tracing::{debug, error, info, warn};

use crate::{
    backend::Backends,
    core::{
        control::DeviceController, device_state::DeviceStateManager,
        provisioning::ProvisioningCoordinator,
    },
    protocol::{DeviceStatusChangedParams, JsonRpcNotification, Notification, parse_request},
    server::{
        handler::RequestHandler,
        session::{SessionReader, UnixSocketSession},
    },
    util::broadcast_stream,
};

const NOTIFICATION_CAPACITY: usize = 100;

/// Line-delimited JSON-RPC over a Unix socket, with view changes pushed to
/// every connected client
pub struct UnixSocketServer<B: Backends> {
    socket_path: PathBuf,
    socket_mode: u32,
    handler: Arc<RequestHandler<B>>,
    provisioning: Arc<ProvisioningCoordinator<B>>,
    control: Arc<DeviceController<B>>,
    states: Arc<DeviceStateManager>,
    notification_tx: broadcast::Sender<Arc<JsonRpcNotification>>,
}

impl<B: Backends> UnixSocketServer<B> {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        socket_mode: u32,
        provisioning: Arc<ProvisioningCoordinator<B>>,
        control: Arc<DeviceController<B>>,
        states: Arc<DeviceStateManager>,
    ) -> Self {
        let handler = Arc::new(RequestHandler::new(provisioning.clone(), control.clone()));
        let (notification_tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Self {
            socket_path: socket_path.into(),
            socket_mode,
            handler,
            provisioning,
            control,
            states,
            notification_tx,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket and serve clients until the future is dropped
    pub async fn start(&self) -> std::io::Result<()> {
        // A socket left behind by a previous run blocks the bind
        if fs::try_exists(&self.socket_path).await? {
            fs::remove_file(&self.socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        fs::set_permissions(
            &self.socket_path,
            std::fs::Permissions::from_mode(self.socket_mode),
        )
        .await?;
        info!(
            "Unix socket server listening on {} (mode {:o})",
            self.socket_path.display(),
            self.socket_mode
        );

        let (_, result) = tokio::join!(self.publish_notifications(), self.accept_loop(listener));
        result
    }

    async fn accept_loop(&self, listener: UnixListener) -> std::io::Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = self.handler.clone();
                    let notifications = self.notification_tx.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_client(stream, handler, notifications).await {
                            error!("Error handling client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                }
            }
        }
    }

    /// Turn every view change into a notification for the connected clients
    async fn publish_notifications(&self) {
        let provisioning = self
            .provisioning
            .subscribe()
            .map(Notification::ProvisioningChanged)
            .boxed();
        let control = self
            .control
            .subscribe()
            .map(Notification::ControlChanged)
            .boxed();
        let statuses = self
            .states
            .subscribe_all()
            .map(|statuses| {
                Notification::DeviceStatusChanged(DeviceStatusChangedParams { statuses })
            })
            .boxed();

        let mut all = stream::select_all([provisioning, control, statuses]);
        while let Some(notification) = all.next().await {
            // No receivers just means no client is connected
            let _ = self
                .notification_tx
                .send(Arc::new(JsonRpcNotification::new(notification)));
        }
    }

    async fn handle_client(
        stream: UnixStream,
        handler: Arc<RequestHandler<B>>,
        notifications: broadcast::Receiver<Arc<JsonRpcNotification>>,
    ) -> std::io::Result<()> {
        let (read_half, write_half) = stream.into_split();
        let session = UnixSocketSession::new(write_half);
        let mut reader = SessionReader::new(read_half);

        info!("New client connected: {}", session.id());

        let pusher = {
            let session = session.clone();
            let mut notifications = broadcast_stream(notifications).boxed();
            tokio::spawn(async move {
                while let Some(notification) = notifications.next().await {
                    if let Err(e) = session.send(notification.as_ref()).await {
                        debug!("Stopped pushing notifications to {}: {}", session.id(), e);
                        break;
                    }
                }
            })
        };

        let result = Self::serve_requests(&session, &mut reader, &handler).await;
        pusher.abort();
        info!("Client disconnected: {}", session.id());
        result
    }

    async fn serve_requests(
        session: &UnixSocketSession,
        reader: &mut SessionReader,
        handler: &RequestHandler<B>,
    ) -> std::io::Result<()> {
        while let Some(line) = reader.read_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let response = match parse_request(&line) {
                Ok(request) => {
                    debug!("{} -> {}", session.id(), line);
                    handler.handle_request(request).await
                }
                Err(response) => {
                    warn!("Rejected request from {}: {}", session.id(), line);
                    response
                }
            };

            session.send(&response).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{protocol::JsonRpcError, server::handler::tests::services};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tempfile::tempdir;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
        net::unix::{OwnedReadHalf, OwnedWriteHalf},
    };

    struct Client {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Client {
        async fn connect(path: &Path) -> Self {
            let (read, writer) = UnixStream::connect(path).await.unwrap().into_split();
            Self {
                lines: BufReader::new(read).lines(),
                writer,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
            self.writer.flush().await.unwrap();
        }

        /// Next message matching `pred`, skipping anything else
        async fn next_matching(&mut self, pred: impl Fn(&Value) -> bool) -> Value {
            tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    let line = self.lines.next_line().await.unwrap().unwrap();
                    let value: Value = serde_json::from_str(&line).unwrap();
                    if pred(&value) {
                        return value;
                    }
                }
            })
            .await
            .unwrap()
        }

        async fn response(&mut self) -> Value {
            self.next_matching(|v| v.get("id").is_some()).await
        }
    }

    async fn serve(path: PathBuf) -> crate::transport::testing::Rig {
        let (rig, services) = services().await;
        let server = UnixSocketServer::new(
            path,
            0o660,
            services.provisioning,
            services.control,
            services.states,
        );
        tokio::spawn(async move {
            server.start().await.ok();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        rig
    }

    #[tokio::test]
    async fn test_request_response() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let _rig = serve(path.clone()).await;

        let mut client = Client::connect(&path).await;
        client
            .send(r#"{"jsonrpc":"2.0","method":"provisioning.start","id":1}"#)
            .await;
        let response = client.response().await;

        assert_eq!(response["id"], 1);
        assert_eq!(
            response["result"]["session"]["state"]["type"],
            "selecting_method"
        );
    }

    #[tokio::test]
    async fn test_malformed_requests_get_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let _rig = serve(path.clone()).await;

        let mut client = Client::connect(&path).await;
        client.send("not json").await;
        let response = client.response().await;
        assert_eq!(response["id"], Value::Null);
        assert_eq!(response["error"]["code"], JsonRpcError::PARSE_ERROR);

        client
            .send(r#"{"jsonrpc":"2.0","method":"provisioning.launch","id":"a"}"#)
            .await;
        let response = client.response().await;
        assert_eq!(response["id"], "a");
        assert_eq!(response["error"]["code"], JsonRpcError::METHOD_NOT_FOUND);

        // The connection survives bad input
        client
            .send(r#"{"jsonrpc":"2.0","method":"control.state","id":2}"#)
            .await;
        let response = client.response().await;
        assert_eq!(response["result"]["control"]["is_connected"], false);
    }

    #[tokio::test]
    async fn test_changes_are_pushed_to_other_clients() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        let _rig = serve(path.clone()).await;

        let mut watcher = Client::connect(&path).await;
        let mut actor = Client::connect(&path).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        actor
            .send(r#"{"jsonrpc":"2.0","method":"provisioning.start","id":1}"#)
            .await;
        actor.response().await;

        let notification = watcher
            .next_matching(|v| {
                v["method"] == "provisioning.changed"
                    && v["params"]["state"]["type"] == "selecting_method"
            })
            .await;
        assert_eq!(notification["jsonrpc"], "2.0");
        assert!(notification.get("id").is_none());
    }

    #[tokio::test]
    async fn test_socket_mode_and_stale_socket() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sock");
        std::fs::write(&path, b"stale").unwrap();

        let _rig = serve(path.clone()).await;

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);

        let mut client = Client::connect(&path).await;
        client
            .send(r#"{"jsonrpc":"2.0","method":"provisioning.state","id":1}"#)
            .await;
        assert_eq!(client.response().await["result"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_socket_path() {
        let (_rig, services) = services().await;
        let server = UnixSocketServer::new(
            "/tmp/onboarding.sock",
            0o600,
            services.provisioning,
            services.control,
            services.states,
        );
        assert_eq!(server.socket_path(), Path::new("/tmp/onboarding.sock"));
    }
}
