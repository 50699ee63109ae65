use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};

use crate::packet::line::PacketLine;

/// A trait that determines where the cleaned lines of a listener go.
pub trait LineSink: Send {
    /// Emits one cleaned line.
    ///
    /// # Errors
    /// Throws an `io::Error` if the line could not be written.
    fn emit(&mut self, line: &PacketLine) -> impl Future<Output = io::Result<()>> + Send;
}

/// Writes each line followed by a newline to a writer, flushing after every line.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

impl WriterSink<Stdout> {
    /// Returns a sink printing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> WriterSink<W> {
    /// Wraps a writer.
    #[must_use]
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the wrapped writer.
    #[must_use]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin + Send> LineSink for WriterSink<W> {
    async fn emit(&mut self, line: &PacketLine) -> io::Result<()> {
        let mut text = line.to_string();
        text.push('\n');
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await
    }
}
