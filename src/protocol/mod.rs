/// Network session abstraction for the UART bridge
mod connection;
mod stream_connection;

pub use connection::{
    ConnectionError, ConnectionResult, DisconnectFlag, NetReceiver, NetSender, NetSession,
    ReceiveVerdict, Received, SessionHandle, SharedSender, classify_receive, is_dead_transport,
    send_all,
};
pub use stream_connection::{StreamReceiver, StreamSender};
