/// Byte stream implementations of the session halves (TCP, duplex pipes)
use std::fmt::Debug;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::trace;

use crate::protocol::{NetReceiver, NetSender, Received};

/// Receiving half over any `AsyncRead`
pub struct StreamReceiver<R> {
    inner: R,
}

impl<R> StreamReceiver<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R> Debug for StreamReceiver<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReceiver").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<R> NetReceiver for StreamReceiver<R>
where
    R: AsyncRead + Unpin + Send + Sync,
{
    async fn receive(&mut self, buffer: &mut [u8], wait: Duration) -> Received {
        let start = Instant::now();
        let result = match tokio::time::timeout(wait, self.inner.read(buffer)).await {
            Ok(result) => result,
            // Expired wait reads as zero bytes
            Err(_) => Ok(0),
        };
        let elapsed = start.elapsed();
        trace!("StreamReceiver: {:?} after {:?}", result, elapsed);
        Received { result, elapsed }
    }
}

/// Sending half over any `AsyncWrite`
pub struct StreamSender<W> {
    inner: W,
}

impl<W> StreamSender<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W> Debug for StreamSender<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSender").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<W> NetSender for StreamSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let count = self.inner.write(data).await?;
        self.inner.flush().await?;
        Ok(count)
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ReceiveVerdict, classify_receive};

    #[tokio::test]
    async fn idle_peer_times_out() {
        let (_peer, local) = tokio::io::duplex(64);
        let mut receiver = StreamReceiver::new(local);
        let mut buffer = [0u8; 16];
        let received = receiver.receive(&mut buffer, Duration::from_millis(20)).await;
        assert_eq!(
            classify_receive(&received, Duration::from_millis(1)),
            ReceiveVerdict::Timeout
        );
    }

    #[tokio::test]
    async fn closed_peer_is_dead() {
        let (peer, local) = tokio::io::duplex(64);
        drop(peer);
        let mut receiver = StreamReceiver::new(local);
        let mut buffer = [0u8; 16];
        let received = receiver.receive(&mut buffer, Duration::from_secs(1)).await;
        assert_eq!(
            classify_receive(&received, Duration::from_millis(50)),
            ReceiveVerdict::Dead
        );
    }

    #[tokio::test]
    async fn data_is_received() {
        let (mut peer, local) = tokio::io::duplex(64);
        peer.write_all(b"abc").await.unwrap();
        let mut receiver = StreamReceiver::new(local);
        let mut buffer = [0u8; 16];
        let received = receiver.receive(&mut buffer, Duration::from_secs(1)).await;
        assert_eq!(received.result.unwrap(), 3);
        assert_eq!(&buffer[..3], b"abc");
    }
}
