use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::BUFFER_SIZE;
use crate::transport::{ServerLink, TransportError};

/// Stream link from the root to the backend server.
pub struct TcpServerLink {
    addr: String,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl TcpServerLink {
    pub fn new<T: Into<String>>(addr: T) -> Self {
        Self { addr: addr.into(), reader: Mutex::new(None), writer: Mutex::new(None) }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl ServerLink for TcpServerLink {
    async fn connect(&self) -> Result<(), TransportError> {
        let stream = TcpStream::connect(self.addr.as_str()).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);
        log::info!("tcp_link: connected to <{}>", self.addr);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(TransportError::NotConnected)?;
        if let Err(err) = stream.write_all(frame).await {
            *writer = None;
            return Err(err.into());
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut reader = self.reader.lock().await;
        let stream = reader.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buffer = [0u8; BUFFER_SIZE];
        match stream.read(&mut buffer).await {
            Ok(0) => {
                log::warn!("tcp_link: connection to <{}> closed", self.addr);
                *reader = None;
                Err(TransportError::Closed)
            }
            Ok(n) => Ok(buffer[..n].to_vec()),
            Err(err) => {
                *reader = None;
                Err(err.into())
            }
        }
    }
}
