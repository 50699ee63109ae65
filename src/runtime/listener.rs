use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::{StreamExt, pin_mut};
use thiserror::Error;
use tokio::{net::UdpSocket, sync::Notify};
use tracing::{debug, info, warn};

use crate::{
    packet::line::{PacketError, PacketLine},
    runtime::{
        datagram::{Datagram, receive},
        sink::LineSink,
    },
    settings::{ListenerConfig, MalformedPolicy, SettingsError},
};

/// Represents the kind of error that stops a listener
#[derive(Error, Debug)]
pub enum ListenerError {
    /// The socket could not be bound to the configured address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that was requested.
        addr: SocketAddr,
        /// The underlying error.
        source: io::Error,
    },

    /// A datagram was not a valid packet line.
    #[error("malformed packet from {source_addr}: {error}")]
    MalformedPacket {
        /// The address the datagram came from.
        source_addr: SocketAddr,
        /// Why the payload was rejected.
        #[source]
        error: PacketError,
    },

    /// The settings could not be loaded.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    /// There was a generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Counters describing one run of a listener.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Datagrams taken off the socket.
    pub received: u64,
    /// Lines handed to the sink.
    pub emitted: u64,
    /// Malformed datagrams dropped under the skip policy.
    pub skipped: u64,
}

/// A bound UDP listener. The socket is released when the listener is dropped.
#[derive(Debug)]
pub struct Listener {
    socket: UdpSocket,
    config: ListenerConfig,
    shutdown: Arc<Shutdown>,
}

/// The closed state of a listener and the signal waking its loop.
#[derive(Debug, Default)]
struct Shutdown {
    closed: AtomicBool,
    notify: Notify,
}

/// A handle to close a listener from another task.
#[derive(Clone, Debug)]
pub struct CloseHandle {
    shutdown: Arc<Shutdown>,
}

impl CloseHandle {
    /// Sets the closed state of the listener it belongs to and wakes its loop.
    pub fn close(&self) {
        self.shutdown.closed.store(true, Ordering::SeqCst);
        self.shutdown.notify.notify_one();
    }

    /// Returns whether the listener has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.closed.load(Ordering::SeqCst)
    }
}

impl Listener {
    /// Binds a UDP socket according to the settings.
    ///
    /// # Errors
    ///
    /// Throws a `ListenerError::Bind` if the address cannot be bound, for example because the
    /// port is in use.
    pub async fn bind(config: ListenerConfig) -> Result<Self, ListenerError> {
        let requested = config.socket_addr();
        let socket = UdpSocket::bind(requested)
            .await
            .map_err(|source| ListenerError::Bind {
                addr: requested,
                source,
            })?;
        let addr = socket.local_addr()?;
        info!(%addr, max_datagram_size = config.max_datagram_size, "listening");
        Ok(Self {
            socket,
            config,
            shutdown: Arc::new(Shutdown::default()),
        })
    }

    /// Returns the address the socket is actually bound to.
    ///
    /// # Errors
    ///
    /// Throws an `io::Error` if the socket cannot report its address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Returns a handle that closes this listener.
    #[must_use]
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Receives datagrams until closed, emitting one cleaned line per valid datagram.
    ///
    /// Waits indefinitely while no datagram arrives. Closing the listener, before or during the
    /// run, ends it with the counters of the run.
    ///
    /// # Errors
    ///
    /// Throws a `ListenerError::MalformedPacket` for an invalid datagram under the abort policy,
    /// and a `ListenerError::Io` if receiving or emitting fails.
    pub async fn run<S: LineSink>(&self, sink: &mut S) -> Result<RunSummary, ListenerError> {
        let mut summary = RunSummary::default();
        let datagrams = receive(&self.socket, self.config.max_datagram_size);
        pin_mut!(datagrams);

        loop {
            if self.shutdown.closed.load(Ordering::SeqCst) {
                info!(
                    received = summary.received,
                    emitted = summary.emitted,
                    skipped = summary.skipped,
                    "listener closed"
                );
                return Ok(summary);
            }

            tokio::select! {
                () = self.shutdown.notify.notified() => {}
                next = datagrams.next() => {
                    let Some(datagram) = next else {
                        return Ok(summary);
                    };
                    self.process(datagram?, sink, &mut summary).await?;
                }
            }
        }
    }

    /// Decodes one datagram and emits its cleaned line.
    async fn process<S: LineSink>(
        &self,
        datagram: Datagram,
        sink: &mut S,
        summary: &mut RunSummary,
    ) -> Result<(), ListenerError> {
        summary.received += 1;
        debug!(source = %datagram.source, size = datagram.payload.len(), "received datagram");

        match PacketLine::from_payload(&datagram.payload) {
            Ok(line) => {
                debug!(patient_id = line.patient_id(), signal_g = line.signal_g(), "decoded packet");
                sink.emit(&line).await?;
                summary.emitted += 1;
                Ok(())
            }
            Err(error) => match self.config.on_malformed {
                MalformedPolicy::Abort => Err(ListenerError::MalformedPacket {
                    source_addr: datagram.source,
                    error,
                }),
                MalformedPolicy::Skip => {
                    warn!(source = %datagram.source, %error, "skipping malformed packet");
                    summary.skipped += 1;
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Write},
        net::{IpAddr, Ipv4Addr},
        sync::{Arc, Mutex},
        time::Duration,
    };

    use tokio::{net::UdpSocket, sync::mpsc, task::JoinHandle, time::timeout};
    use tokio_test::{assert_err, assert_ok};

    use crate::{
        packet::line::{PacketError, PacketLine},
        runtime::{
            listener::{CloseHandle, Listener, ListenerError, RunSummary},
            sink::LineSink,
        },
        settings::{ListenerConfig, MalformedPolicy, SettingsError},
    };

    struct ChannelSink(mpsc::UnboundedSender<String>);

    impl LineSink for ChannelSink {
        async fn emit(&mut self, line: &PacketLine) -> io::Result<()> {
            self.0
                .send(line.to_string())
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Running {
        task: JoinHandle<Result<RunSummary, ListenerError>>,
        lines: mpsc::UnboundedReceiver<String>,
        handle: CloseHandle,
        sender: UdpSocket,
    }

    fn loopback_config() -> ListenerConfig {
        ListenerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..ListenerConfig::default()
        }
    }

    async fn start(config: ListenerConfig) -> Running {
        let listener = Listener::bind(config).await.expect("Failed to bind listener");
        let addr = listener.local_addr().unwrap();
        let handle = listener.close_handle();
        let (tx, lines) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let mut sink = ChannelSink(tx);
            listener.run(&mut sink).await
        });

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.connect(addr).await.unwrap();
        Running {
            task,
            lines,
            handle,
            sender,
        }
    }

    async fn next_line(lines: &mut mpsc::UnboundedReceiver<String>) -> String {
        timeout(Duration::from_secs(5), lines.recv())
            .await
            .expect("Test timed out")
            .expect("Listener stopped emitting")
    }

    #[tokio::test]
    async fn sample_packet_is_printed_clean() {
        let mut running = start(loopback_config()).await;

        running.sender.send(b"2308,49l,-318").await.unwrap();

        assert_eq!(next_line(&mut running.lines).await, "2308,49,-318");
        running.handle.close();
        let summary = assert_ok!(running.task.await.unwrap());
        assert_eq!(
            summary,
            RunSummary {
                received: 1,
                emitted: 1,
                skipped: 0
            }
        );
    }

    #[tokio::test]
    async fn repeated_packet_prints_identical_lines_in_order() {
        let mut running = start(loopback_config()).await;

        running.sender.send(b"1,10l,100").await.unwrap();
        running.sender.send(b"1,10l,100").await.unwrap();
        running.sender.send(b"2,20l,-200").await.unwrap();

        assert_eq!(next_line(&mut running.lines).await, "1,10,100");
        assert_eq!(next_line(&mut running.lines).await, "1,10,100");
        assert_eq!(next_line(&mut running.lines).await, "2,20,-200");
        running.handle.close();
        assert_ok!(running.task.await.unwrap());
    }

    #[tokio::test]
    async fn no_traffic_prints_nothing_and_keeps_waiting() {
        let mut running = start(loopback_config()).await;

        let waited = timeout(Duration::from_millis(200), running.lines.recv()).await;

        assert!(waited.is_err());
        assert!(!running.task.is_finished());

        running.handle.close();
        assert!(running.handle.is_closed());
        let summary = assert_ok!(running.task.await.unwrap());
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn malformed_packet_stops_the_listener() {
        let running = start(loopback_config()).await;

        running.sender.send(b"hello").await.unwrap();

        let result = timeout(Duration::from_secs(5), running.task)
            .await
            .expect("Test timed out")
            .unwrap();
        let error = assert_err!(result);
        assert!(
            matches!(
                error,
                ListenerError::MalformedPacket {
                    error: PacketError::FieldCount(1),
                    ..
                }
            ),
            "Expected Err(ListenerError::MalformedPacket), got {error:?}"
        );
    }

    #[tokio::test]
    async fn malformed_packet_is_skipped_when_configured() {
        let config = ListenerConfig {
            on_malformed: MalformedPolicy::Skip,
            ..loopback_config()
        };
        let mut running = start(config).await;

        running.sender.send(b"hello").await.unwrap();
        running.sender.send(b"3,30l,-3").await.unwrap();

        assert_eq!(next_line(&mut running.lines).await, "3,30,-3");
        running.handle.close();
        let summary = assert_ok!(running.task.await.unwrap());
        assert_eq!(summary.received, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.emitted, 1);
    }

    #[tokio::test]
    async fn packet_at_buffer_size_keeps_trailing_field() {
        let payload = b"123,4567890l,-12";
        let config = ListenerConfig {
            max_datagram_size: payload.len(),
            ..loopback_config()
        };
        let mut running = start(config).await;

        running.sender.send(payload).await.unwrap();

        assert_eq!(next_line(&mut running.lines).await, "123,4567890,-12");
        running.handle.close();
        assert_ok!(running.task.await.unwrap());
    }

    #[tokio::test]
    async fn closing_before_run_returns_immediately() {
        let listener = Listener::bind(loopback_config()).await.unwrap();
        listener.close_handle().close();
        let (tx, _lines) = mpsc::unbounded_channel();
        let mut sink = ChannelSink(tx);

        let result = timeout(Duration::from_secs(5), listener.run(&mut sink))
            .await
            .expect("Test timed out");

        assert_eq!(assert_ok!(result), RunSummary::default());
    }

    #[tokio::test]
    async fn binding_a_used_port_should_throw_bind() {
        let first = Listener::bind(loopback_config()).await.unwrap();
        let taken = first.local_addr().unwrap();
        let config = ListenerConfig {
            port: taken.port(),
            ..loopback_config()
        };

        let result = Listener::bind(config).await;

        assert!(
            matches!(result, Err(ListenerError::Bind { addr, .. }) if addr == taken),
            "Expected Err(ListenerError::Bind), got {result:?}"
        );
    }

    #[tokio::test]
    async fn socket_is_released_when_listener_is_dropped() {
        let listener = Listener::bind(loopback_config()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ListenerConfig {
            port: addr.port(),
            ..loopback_config()
        };
        assert_ok!(Listener::bind(config).await);
    }

    #[tokio::test]
    async fn listening_event_reports_bound_port() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let listener = Listener::bind(loopback_config()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert_ne!(addr.port(), 0);
        assert!(
            output.contains(&format!("addr={addr}")),
            "Expected the bound address {addr} in {output:?}"
        );
        assert!(!output.contains("addr=127.0.0.1:0 "));
    }

    #[tokio::test]
    async fn non_canonical_integers_pass_through_unchanged() {
        let mut running = start(loopback_config()).await;

        running.sender.send(b"007,+49l,-0").await.unwrap();
        running
            .sender
            .send(b"123456789012345678901234,1l,99999999999999999999999")
            .await
            .unwrap();

        assert_eq!(next_line(&mut running.lines).await, "007,+49,-0");
        assert_eq!(
            next_line(&mut running.lines).await,
            "123456789012345678901234,1,99999999999999999999999"
        );
        running.handle.close();
        let summary = assert_ok!(running.task.await.unwrap());
        assert_eq!(summary.emitted, 2);
    }

    #[test]
    fn settings_errors_convert_into_listener_errors() {
        let error: ListenerError = SettingsError::Invalid("bad".to_string()).into();

        assert!(
            matches!(error, ListenerError::Settings(SettingsError::Invalid(_))),
            "Expected Err(ListenerError::Settings), got {error:?}"
        );
    }
}
