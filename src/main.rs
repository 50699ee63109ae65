//! # Packet Listener
//!
//! This binary binds the UDP listener built from the library in this crate and prints one cleaned
//! line per received packet on standard output, until interrupted with Ctrl-C.
//!
//! Diagnostics go to standard error and are filtered with `RUST_LOG` (default `info`).
use packet_listener::{
    runtime::{
        listener::{Listener, ListenerError},
        sink::WriterSink,
    },
    settings::ListenerConfig,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ListenerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = ListenerConfig::load()?;
    let listener = Listener::bind(config).await?;

    let handle = listener.close_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, closing");
                handle.close();
            }
            Err(e) => error!("Encountered error waiting for interrupt: {e}"),
        }
    });

    let mut sink = WriterSink::stdout();
    listener.run(&mut sink).await?;
    Ok(())
}
