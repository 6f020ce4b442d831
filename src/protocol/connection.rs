/// Network session abstraction shared by the command handler and the bridge
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 连接错误类型
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 命令行解码错误
    #[error("Command line error: {0}")]
    Line(#[from] tokio_util::codec::LinesCodecError),

    /// 消息序列化错误
    #[error("Message serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 连接结果类型
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// One-shot disconnect request on a network session.
///
/// Transitions false -> true only, so polling it without a lock cannot
/// observe a flicker. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct DisconnectFlag(CancellationToken);

impl DisconnectFlag {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    /// Ask the session to end
    pub fn request(&self) {
        self.0.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once a disconnect has been requested
    pub async fn requested(&self) {
        self.0.cancelled().await
    }
}

/// Outcome of one bounded network receive
#[derive(Debug)]
pub struct Received {
    /// Bytes received, or the transport error
    pub result: std::io::Result<usize>,
    /// How long the receive actually waited
    pub elapsed: Duration,
}

/// What the bridge makes of a `Received`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveVerdict {
    /// Payload to forward
    Data(usize),
    /// Nothing arrived within the wait, keep going
    Timeout,
    /// The transport is gone
    Dead,
}

/// Some transports report a dead peer as a zero-byte receive that returns
/// without waiting instead of an error. A zero-byte result that blocked at
/// least `threshold` is a genuine timeout; a faster one is a dead transport.
pub fn is_dead_transport(received: &Received, threshold: Duration) -> bool {
    match received.result {
        Err(_) => true,
        Ok(0) => received.elapsed < threshold,
        Ok(_) => false,
    }
}

/// Classify a receive outcome
pub fn classify_receive(received: &Received, threshold: Duration) -> ReceiveVerdict {
    if is_dead_transport(received, threshold) {
        return ReceiveVerdict::Dead;
    }
    match received.result {
        Ok(count) if count > 0 => ReceiveVerdict::Data(count),
        _ => ReceiveVerdict::Timeout,
    }
}

/// Receiving half of a network session
#[async_trait::async_trait]
pub trait NetReceiver: Send + Sync + Debug {
    /// Receive into `buffer`, waiting at most `wait`.
    /// A wait that expires is reported as `Ok(0)` with the full elapsed time.
    async fn receive(&mut self, buffer: &mut [u8], wait: Duration) -> Received;
}

/// Sending half of a network session
#[async_trait::async_trait]
pub trait NetSender: Send + Debug {
    /// Send a prefix of `data`, returning how many bytes went out.
    /// `Ok(0)` means no progress without a failure.
    async fn send(&mut self, data: &[u8]) -> std::io::Result<usize>;

    /// Shut the sending direction down
    async fn shutdown(&mut self) -> std::io::Result<()>;
}

/// Sender shared between the command handler and a reader task
pub type SharedSender = Arc<Mutex<Box<dyn NetSender>>>;

/// Non-owning view of a session held by a device slot
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    pub disconnect: DisconnectFlag,
}

/// A connected network session: transport halves, inbound buffer and the
/// disconnect flag the network layer watches.
#[derive(Debug)]
pub struct NetSession {
    pub id: String,
    pub receiver: Box<dyn NetReceiver>,
    pub sender: SharedSender,
    pub disconnect: DisconnectFlag,
    /// Received bytes not consumed yet
    pub inbound: BytesMut,
}

impl NetSession {
    /// Create a session with a fresh id
    pub fn new(receiver: Box<dyn NetReceiver>, sender: Box<dyn NetSender>) -> Self {
        Self::with_id(format!("conn-{}", Uuid::new_v4()), receiver, sender)
    }

    pub fn with_id(
        id: impl Into<String>,
        receiver: Box<dyn NetReceiver>,
        sender: Box<dyn NetSender>,
    ) -> Self {
        Self {
            id: id.into(),
            receiver,
            sender: Arc::new(Mutex::new(sender)),
            disconnect: DisconnectFlag::new(),
            inbound: BytesMut::new(),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
            disconnect: self.disconnect.clone(),
        }
    }
}

/// Send all of `data`, retrying partial sends. Zero-progress sends sleep for
/// `backoff` before the next attempt.
pub async fn send_all(
    sender: &SharedSender,
    data: &[u8],
    backoff: Duration,
) -> std::io::Result<()> {
    let mut sent = 0;
    while sent < data.len() {
        let count = sender.lock().await.send(&data[sent..]).await?;
        if count == 0 {
            tokio::time::sleep(backoff).await;
        } else {
            sent += count;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received(result: std::io::Result<usize>, elapsed_ms: u64) -> Received {
        Received {
            result,
            elapsed: Duration::from_millis(elapsed_ms),
        }
    }

    #[test]
    fn zero_bytes_after_a_real_wait_is_a_timeout() {
        let threshold = Duration::from_millis(1);
        assert_eq!(
            classify_receive(&received(Ok(0), 1000), threshold),
            ReceiveVerdict::Timeout
        );
    }

    #[test]
    fn immediate_zero_bytes_is_a_dead_transport() {
        let threshold = Duration::from_millis(1);
        assert_eq!(
            classify_receive(&received(Ok(0), 0), threshold),
            ReceiveVerdict::Dead
        );
    }

    #[test]
    fn errors_are_dead_and_data_is_data() {
        let threshold = Duration::from_millis(1);
        let err = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert_eq!(
            classify_receive(&received(Err(err), 500), threshold),
            ReceiveVerdict::Dead
        );
        assert_eq!(
            classify_receive(&received(Ok(12), 0), threshold),
            ReceiveVerdict::Data(12)
        );
    }

    #[test]
    fn threshold_is_tunable() {
        let zero = received(Ok(0), 3);
        assert!(is_dead_transport(&zero, Duration::from_millis(5)));
        assert!(!is_dead_transport(&zero, Duration::from_millis(2)));
    }

    #[tokio::test]
    async fn disconnect_flag_is_shared_and_one_way() {
        let flag = DisconnectFlag::new();
        let other = flag.clone();
        assert!(!other.is_requested());
        flag.request();
        flag.request();
        assert!(other.is_requested());
        other.requested().await;
    }
}
