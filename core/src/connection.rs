use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::{Dispatched, Dispatcher};
use crate::framing::JsonObjectCodec;
use crate::protocol::Frame;
use crate::{Result, ShuttleError};

/// Opens the TCP connection to the master container.
pub async fn open(host: &str, port: u16) -> Result<(OwnedReadHalf, FrameWriter)> {
    let addr = format!("{host}:{port}");
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| ShuttleError::Connect {
            addr: addr.clone(),
            source,
        })?;
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    info!(%peer, "Connected to master container");
    let (read, write) = stream.into_split();
    Ok((read, FrameWriter::new(write, peer)))
}

/// Serializes socket writes from the caller side and the reader task.
#[derive(Debug)]
pub struct FrameWriter {
    half: Mutex<OwnedWriteHalf>,
    peer: SocketAddr,
}

impl FrameWriter {
    fn new(half: OwnedWriteHalf, peer: SocketAddr) -> Self {
        Self {
            half: Mutex::new(half),
            peer,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one frame as a newline-terminated line.
    pub async fn write(&self, frame: &Frame) -> Result<()> {
        let line = frame.to_line()?;
        trace!(peer = %self.peer, frame = %String::from_utf8_lossy(&line).trim_end(), ">>>");
        let mut half = self.half.lock().await;
        half.write_all(&line).await?;
        half.flush().await?;
        Ok(())
    }

    /// Shuts down the write direction of the socket.
    pub async fn close(&self) -> Result<()> {
        let mut half = self.half.lock().await;
        half.shutdown().await?;
        Ok(())
    }
}

/// Spawns the task that reads frames, dispatches them in order and writes
/// replies. The task closes the session through the dispatcher on exit.
pub fn spawn_reader(
    read: OwnedReadHalf,
    max_frame_bytes: usize,
    dispatcher: Dispatcher,
    writer: Arc<FrameWriter>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let peer = writer.peer();
        let mut frames = FramedRead::new(read, JsonObjectCodec::new(max_frame_bytes));
        loop {
            let raw = match frames.next().await {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => {
                    warn!(%peer, error = %e, "Read error, closing connection");
                    break;
                }
                None => {
                    info!(%peer, "Connection closed by master container");
                    break;
                }
            };
            trace!(%peer, frame = %String::from_utf8_lossy(&raw), "<<<");

            match dispatcher.dispatch_bytes(&raw) {
                Dispatched::Reply(reply) => {
                    if let Err(e) = writer.write(&reply).await {
                        warn!(%peer, error = %e, "Failed to write reply, closing connection");
                        break;
                    }
                }
                Dispatched::Shutdown => {
                    info!(%peer, "Master container requested shutdown");
                    break;
                }
                Dispatched::Delivered | Dispatched::Resolved | Dispatched::Dropped => {}
            }
        }
        dispatcher.close();
        debug!(%peer, "Reader task finished");
    })
}
