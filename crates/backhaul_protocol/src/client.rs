//! Controller side of a protocol session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::command::{Command, COMMAND_EXIT, COMMAND_NOOP};
use crate::error::{Error, ErrorKind, Result};
use crate::io::{ReadStream, WriteStream};
use crate::wire::{
    decode_object, decode_response, encode, Message, Request, GREETING_NAME, GREETING_SERVICE,
    GREETING_VERSION, PROTOCOL_NAME, PROTOCOL_VERSION,
};

/// A client that several owners hand between each other. Only one of them may
/// hold the lock at a time.
pub type SharedClient = Arc<Mutex<Client>>;

pub struct Client {
    name: String,
    service: String,
    read: ReadStream,
    write: WriteStream,
    open: bool,
}

impl Client {
    /// Reads the server greeting and validates it before handing back a
    /// client that is ready for requests.
    pub async fn new(
        name: impl Into<String>,
        service: impl Into<String>,
        mut read: ReadStream,
        write: WriteStream,
    ) -> Result<Self> {
        let name = name.into();
        let service = service.into();

        let line = read.read_line().await?;
        let greeting = decode_object(&line)?;

        check_greeting(&greeting, GREETING_NAME, PROTOCOL_NAME)?;
        check_greeting(&greeting, GREETING_SERVICE, &service)?;
        check_greeting(&greeting, GREETING_VERSION, PROTOCOL_VERSION)?;

        debug!(client = %name, %service, "protocol greeting accepted");

        Ok(Self { name, service, read, write, open: true })
    }

    pub fn into_shared(self) -> SharedClient {
        Arc::new(Mutex::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// True when the read side is a live handle that can be polled.
    pub fn is_pollable(&self) -> bool {
        self.read.is_pollable()
    }

    pub fn timeout(&self) -> Duration {
        self.read.timeout()
    }

    /// Sends a command without waiting for the response.
    pub async fn write_command(&mut self, command: &Command) -> Result<()> {
        self.ensure_open()?;
        debug!(client = %self.name, command = %command.to_log(), "write command");

        let frame = encode(&Message::Request(command.to_request()))?;
        self.write.write_line(&frame).await?;
        self.write.flush().await
    }

    /// Reads and interprets the response to the last command.
    pub async fn read_output(&mut self, output_required: bool) -> Result<Option<Value>> {
        self.ensure_open()?;
        let line = self.read.read_line().await?;
        self.parse_output(&line, output_required)
    }

    /// Interprets one response line.
    ///
    /// A worker error becomes [`Error::Remote`]; an `out` key on a command that
    /// requires no output is an assertion failure.
    pub fn parse_output(&self, line: &str, output_required: bool) -> Result<Option<Value>> {
        let response = decode_response(line)?;

        if let Some(code) = response.err {
            let message = match &response.out {
                Some(Value::String(message)) => message.clone(),
                Some(Value::Null) | None => "no details available".to_owned(),
                Some(other) => other.to_string(),
            };
            let stack = match &response.err_stack {
                Some(Value::String(stack)) => stack.clone(),
                Some(Value::Null) | None => "no stack trace available".to_owned(),
                Some(other) => other.to_string(),
            };

            return Err(Error::Remote {
                kind: ErrorKind::from_code(code),
                code,
                message: format!("raised from {}: {message}\n{stack}", self.name),
            });
        }

        if !output_required && response.out.is_some() {
            return Err(Error::Assert("no output required by command".to_owned()));
        }

        Ok(response.out)
    }

    /// Runs one request/response cycle.
    pub async fn execute(
        &mut self,
        command: &Command,
        output_required: bool,
    ) -> Result<Option<Value>> {
        self.write_command(command).await?;
        self.read_output(output_required).await
    }

    pub async fn noop(&mut self) -> Result<()> {
        self.execute(&Command::new(COMMAND_NOOP), false).await.map(|_| ())
    }

    /// Raw line access for handlers that stream extra text after a response.
    pub async fn read_line(&mut self) -> Result<String> {
        self.ensure_open()?;
        self.read.read_line().await
    }

    pub(crate) async fn next_line(&mut self) -> Result<String> {
        self.read.next_line().await
    }

    pub(crate) fn try_line(&mut self) -> Option<Result<String>> {
        self.read.try_line()
    }

    /// Tells the server to exit and releases the streams. Closing twice is a
    /// no-op.
    pub async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let exit = Request { cmd: COMMAND_EXIT.to_owned(), param: Vec::new() };
        let sent = match encode(&Message::Request(exit)) {
            Ok(frame) => match self.write.write_line(&frame).await {
                Ok(()) => self.write.flush().await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = sent {
            warn!(client = %self.name, "unable to send exit: {e}");
        }
        if let Err(e) = self.write.shutdown().await {
            debug!(client = %self.name, "unable to shut down write stream: {e}");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::Assert(format!("client '{}' is closed", self.name)))
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("service", &self.service)
            .field("open", &self.open)
            .finish()
    }
}

/// Checks one greeting key: it must exist, be a string and hold `expected`.
fn check_greeting(greeting: &Map<String, Value>, key: &str, expected: &str) -> Result<()> {
    match greeting.get(key) {
        None | Some(Value::Null) => {
            Err(Error::Protocol(format!("unable to find greeting key '{key}'")))
        }
        Some(Value::String(actual)) if actual == expected => Ok(()),
        Some(Value::String(actual)) => Err(Error::Protocol(format!(
            "expected value '{expected}' for greeting key '{key}' but got '{actual}'"
        ))),
        Some(_) => Err(Error::Protocol(format!("greeting key '{key}' must be string type"))),
    }
}
