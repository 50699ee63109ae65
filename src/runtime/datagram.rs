use std::{io, net::SocketAddr};

use async_stream::try_stream;
use bytes::Bytes;
use futures::Stream;
use tokio::net::UdpSocket;

/// A datagram as it came off the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    /// The payload, at most the configured buffer size.
    pub payload: Bytes,
    /// The address the datagram was sent from.
    pub source: SocketAddr,
}

/// Turns a socket into a stream of datagrams in arrival order.
///
/// A single buffer of `max_size` bytes is reused for every receive, so a datagram of exactly
/// `max_size` bytes arrives whole. The stream never ends on its own; it yields an error if
/// receiving fails.
pub fn receive(
    socket: &UdpSocket,
    max_size: usize,
) -> impl Stream<Item = io::Result<Datagram>> + '_ {
    try_stream! {
        let mut buffer = vec![0u8; max_size];
        loop {
            let (len, source) = socket.recv_from(&mut buffer).await?;
            yield Datagram {
                payload: Bytes::copy_from_slice(&buffer[..len]),
                source,
            };
        }
    }
}
