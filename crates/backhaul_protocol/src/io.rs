//! Line-oriented read/write streams that sessions are built on.
//!
//! A [`ReadStream`] either wraps a live handle (pipe, socket, child stdout)
//! which the scheduler may poll alongside others, or an in-memory buffer that
//! can only be read sequentially.

use std::io::Cursor;
use std::time::Duration;

use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, Lines};
use tokio::time::timeout;

use crate::error::{Error, Result};

pub type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Read timeout used when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1830);

pub struct ReadStream {
    name: String,
    lines: Lines<BufReader<BoxedRead>>,
    timeout: Duration,
    pollable: bool,
}

impl ReadStream {
    /// Stream over a live handle. Every read is bounded by `timeout`.
    pub fn handle<R>(name: impl Into<String>, reader: R, timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let reader: BoxedRead = Box::new(reader);
        Self {
            name: name.into(),
            lines: BufReader::new(reader).lines(),
            timeout,
            pollable: true,
        }
    }

    /// Stream over bytes already in memory. It has no handle to poll.
    pub fn buffer(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let reader: BoxedRead = Box::new(Cursor::new(data.into()));
        Self {
            name: name.into(),
            lines: BufReader::new(reader).lines(),
            timeout: DEFAULT_TIMEOUT,
            pollable: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_pollable(&self) -> bool {
        self.pollable
    }

    /// Reads one line, failing if nothing arrives within the timeout.
    pub async fn read_line(&mut self) -> Result<String> {
        match timeout(self.timeout, self.next_line()).await {
            Ok(line) => line,
            Err(_) => Err(Error::Timeout(format!(
                "unable to read line from '{}' after {}ms",
                self.name,
                self.timeout.as_millis()
            ))),
        }
    }

    /// Reads one line with no deadline. Cancel safe: dropping the future
    /// keeps any partial line buffered for the next call.
    pub async fn next_line(&mut self) -> Result<String> {
        match self.lines.next_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(Error::Read(format!("unexpected eof reading from '{}'", self.name))),
            Err(e) => Err(Error::Read(format!("unable to read from '{}': {e}", self.name))),
        }
    }

    /// Returns a line only if one can be produced without waiting.
    pub fn try_line(&mut self) -> Option<Result<String>> {
        self.next_line().now_or_never()
    }
}

pub struct WriteStream {
    name: String,
    writer: BufWriter<BoxedWrite>,
}

impl WriteStream {
    pub fn new<W>(name: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: BoxedWrite = Box::new(writer);
        Self { name: name.into(), writer: BufWriter::new(writer) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffers `line` plus a newline. Call [`WriteStream::flush`] to send.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await.map_err(|e| self.write_error(e))?;
        self.writer.write_all(b"\n").await.map_err(|e| self.write_error(e))
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await.map_err(|e| self.write_error(e))
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await.map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        Error::Write(format!("unable to write to '{}': {e}", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffer_stream_reads_lines_then_eof() {
        let mut read = ReadStream::buffer("buffer", "first\nsecond\n");
        assert!(!read.is_pollable());
        assert_eq!(read.read_line().await.unwrap(), "first");
        assert_eq!(read.read_line().await.unwrap(), "second");

        let err = read.read_line().await.unwrap_err();
        assert_eq!(err.to_string(), "unexpected eof reading from 'buffer'");
    }

    #[tokio::test]
    async fn handle_stream_times_out() {
        let (_keep, far) = tokio::io::duplex(64);
        let mut read = ReadStream::handle("pipe", far, Duration::from_millis(50));
        assert!(read.is_pollable());

        let err = read.read_line().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(err.to_string(), "unable to read line from 'pipe' after 50ms");
    }

    #[tokio::test]
    async fn try_line_does_not_wait() {
        let (near, far) = tokio::io::duplex(64);
        let mut read = ReadStream::handle("pipe", far, Duration::from_secs(1));
        let mut write = WriteStream::new("pipe", near);

        assert!(read.try_line().is_none());

        write.write_line("ready").await.unwrap();
        write.flush().await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(read.read_line().await.unwrap(), "ready");
    }
}
