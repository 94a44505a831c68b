//! Gateway integration tests against an in-process master container

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use shuttle_core::framing::JsonObjectCodec;
use shuttle_core::Gateway;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

mod e2e_directory;
mod e2e_messaging;

const FRAME_WAIT: Duration = Duration::from_secs(2);

/// Minimal master container: accepts gateway connections and answers their
/// duplicate name checks from a shared set of names.
pub struct FakeMaster {
    listener: TcpListener,
    addr: SocketAddr,
    names: Arc<Mutex<HashSet<String>>>,
    answer_handshake: bool,
}

impl FakeMaster {
    /// Bind to 127.0.0.1:0 for an ephemeral port
    pub async fn start() -> Self {
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().unwrap();
        Self {
            listener,
            addr,
            names: Arc::new(Mutex::new(HashSet::new())),
            answer_handshake: true,
        }
    }

    /// A master that never answers the duplicate name check.
    pub async fn silent() -> Self {
        Self {
            answer_handshake: false,
            ..Self::start().await
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Accepts one gateway and completes its handshake.
    pub async fn accept(&self) -> Peer {
        let (stream, _) = self.listener.accept().await.expect("accept gateway");
        let (read, write) = stream.into_split();
        let mut peer = Peer {
            frames: FramedRead::new(read, JsonObjectCodec::default()),
            write,
            name: String::new(),
        };
        let check = peer.expect_action("containsAgent").await;
        peer.name = check["agentID"].as_str().unwrap_or_default().to_string();
        if self.answer_handshake {
            let taken = !self.names.lock().unwrap().insert(peer.name.clone());
            peer.push(json!({"id": check["id"], "inResponseTo": "containsAgent", "answer": taken}))
                .await;
        }
        peer
    }
}

/// Master side of one gateway connection.
pub struct Peer {
    frames: FramedRead<OwnedReadHalf, JsonObjectCodec>,
    write: OwnedWriteHalf,
    pub name: String,
}

impl Peer {
    pub async fn push(&mut self, frame: Value) {
        self.push_raw(format!("{frame}\n").as_bytes()).await;
    }

    pub async fn push_raw(&mut self, bytes: &[u8]) {
        self.write.write_all(bytes).await.expect("write to gateway");
        self.write.flush().await.unwrap();
    }

    /// Delivers `message` to the gateway with a `send` action.
    pub async fn deliver(&mut self, message: Value) {
        self.push(json!({"action": "send", "message": message})).await;
    }

    pub async fn try_next_frame(&mut self, wait: Duration) -> Option<Value> {
        match tokio::time::timeout(wait, self.frames.next()).await {
            Ok(Some(Ok(raw))) => Some(serde_json::from_slice(&raw).expect("gateway wrote JSON")),
            _ => None,
        }
    }

    pub async fn next_frame(&mut self) -> Value {
        self.try_next_frame(FRAME_WAIT)
            .await
            .expect("frame from gateway")
    }

    pub async fn expect_action(&mut self, action: &str) -> Value {
        let frame = self.next_frame().await;
        assert_eq!(frame["action"], action, "unexpected frame {frame}");
        frame
    }

    /// Sends a server request and returns the gateway's reply.
    pub async fn ask(&mut self, mut request: Value) -> Value {
        request["id"] = json!(uuid::Uuid::new_v4().to_string());
        let id = request["id"].clone();
        self.push(request).await;
        let reply = self.next_frame().await;
        assert_eq!(reply["id"], id);
        reply
    }

    /// Answers the next query with `fields`, echoing its id.
    pub async fn answer_next(&mut self, action: &str, fields: Value) {
        let query = self.expect_action(action).await;
        let mut reply = json!({"id": query["id"], "inResponseTo": action});
        if let (Some(reply), Some(fields)) = (reply.as_object_mut(), fields.as_object()) {
            reply.extend(fields.clone());
        }
        self.push(reply).await;
    }

    pub async fn close(mut self) {
        let _ = self.write.shutdown().await;
    }
}

/// Connects a gateway named `name` and accepts it on the master.
pub async fn connect(master: &FakeMaster, name: &str) -> (Gateway, Peer) {
    let (gw, peer) = tokio::join!(
        Gateway::connect("127.0.0.1", master.port(), Some(name)),
        master.accept()
    );
    (gw.expect("gateway connects"), peer)
}
