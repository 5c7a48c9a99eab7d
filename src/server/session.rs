//! Per-client session over a Unix socket connection

use std::sync::Arc;

use serde::Serialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::unix::{OwnedReadHalf, OwnedWriteHalf},
    sync::Mutex,
};

use crate::core::types::SessionId;

/// Write side of one client connection, shared by the request loop and the
/// notification forwarder
#[derive(Debug, Clone)]
pub struct UnixSocketSession {
    id: SessionId,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl UnixSocketSession {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            id: SessionId::new(),
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Write `message` as one JSON line
    ///
    /// Lines from concurrent senders never interleave.
    pub async fn send<T: Serialize>(&self, message: &T) -> std::io::Result<()> {
        let mut json = serde_json::to_vec(message)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        json.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&json).await?;
        writer.flush().await
    }
}

/// Read side of one client connection
pub struct SessionReader {
    reader: BufReader<OwnedReadHalf>,
}

impl SessionReader {
    pub fn new(reader: OwnedReadHalf) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Next line without its terminator; `None` once the client hung up
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{JsonRpcError, JsonRpcResponse, RequestId};
    use tokio::net::UnixStream;

    #[tokio::test]
    async fn test_sessions_get_distinct_ids() {
        let (client, server) = UnixStream::pair().unwrap();
        let first = UnixSocketSession::new(server.into_split().1);
        let second = UnixSocketSession::new(client.into_split().1);

        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_send_writes_one_line() {
        let (client, server) = UnixStream::pair().unwrap();
        let session = UnixSocketSession::new(server.into_split().1);
        let mut reader = SessionReader::new(client.into_split().0);

        let response = JsonRpcResponse::error(JsonRpcError::method_not_found(), RequestId::Number(3));
        session.send(&response).await.unwrap();

        let line = reader.read_line().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["error"]["code"], JsonRpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reader_strips_crlf() {
        let (client, server) = UnixStream::pair().unwrap();
        let (_, mut client_write) = client.into_split();
        let mut reader = SessionReader::new(server.into_split().0);

        client_write.write_all(b"{\"a\":1}\r\n").await.unwrap();
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_reader_eof() {
        let (client, server) = UnixStream::pair().unwrap();
        let mut reader = SessionReader::new(server.into_split().0);
        drop(client);

        assert!(reader.read_line().await.unwrap().is_none());
    }
}
