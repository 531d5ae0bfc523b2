//! Worker side of a protocol session.
//!
//! ```ignore
//! let mut server = Server::new("local-1 server", "local", read, write).await?;
//! server.handler_add(ConfigHandler::new(config));
//! server.process().await?;
//! ```

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, Level};

use crate::command::{COMMAND_EXIT, COMMAND_NOOP};
use crate::error::{Error, ErrorKind, Result};
use crate::io::{ReadStream, WriteStream};
use crate::wire::{decode_request, encode, Greeting, Message, Response};

/// Implement this to serve commands on a worker.
#[async_trait]
pub trait Handler: Send {
    /// Attempts to satisfy `command`. Returns `Ok(false)` when the command
    /// belongs to some other handler. When returning `Ok(true)` the handler
    /// must have written exactly one response through `responder`.
    async fn handle(
        &mut self,
        command: &str,
        params: &[Value],
        responder: &mut Responder<'_>,
    ) -> anyhow::Result<bool>;
}

/// The only way a handler talks back to the client.
pub struct Responder<'a> {
    write: &'a mut WriteStream,
    responded: bool,
}

impl<'a> Responder<'a> {
    fn new(write: &'a mut WriteStream) -> Self {
        Self { write, responded: false }
    }

    /// Writes the success frame, with `out` when given.
    pub async fn respond(&mut self, out: Option<Value>) -> Result<()> {
        if self.responded {
            return Err(Error::Assert("response has already been written".to_owned()));
        }
        let frame = encode(&Message::Response(Response::success(out)))?;
        self.write.write_line(&frame).await?;
        self.write.flush().await?;
        self.responded = true;
        Ok(())
    }

    /// Streams an extra raw line after the response. The client has to know
    /// how many of these follow.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        if !self.responded {
            return Err(Error::Assert("extra lines must follow the response".to_owned()));
        }
        self.write.write_line(line).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.write.flush().await
    }

    pub fn responded(&self) -> bool {
        self.responded
    }
}

pub struct Server {
    name: String,
    service: String,
    read: ReadStream,
    write: WriteStream,
    handlers: Vec<Box<dyn Handler>>,
}

impl Server {
    /// Creates the server and immediately sends the greeting.
    pub async fn new(
        name: impl Into<String>,
        service: impl Into<String>,
        read: ReadStream,
        mut write: WriteStream,
    ) -> Result<Self> {
        let name = name.into();
        let service = service.into();

        let greeting = encode(&Message::Greeting(Greeting::new(service.clone())))?;
        write.write_line(&greeting).await?;
        write.flush().await?;

        Ok(Self { name, service, read, write, handlers: Vec::new() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Handlers are tried in the order they were added.
    pub fn handler_add<H: Handler + 'static>(&mut self, handler: H) {
        self.handlers.push(Box::new(handler));
    }

    /// Serves requests until the client sends `exit`.
    pub async fn process(&mut self) -> Result<()> {
        loop {
            let line = self.read.read_line().await?;
            let request = decode_request(&line)?;
            debug!(server = %self.name, command = %request.cmd, "process command");

            match request.cmd.as_str() {
                COMMAND_EXIT => return Ok(()),
                COMMAND_NOOP => self.write_response(Response::success(None)).await?,
                _ => self.dispatch(&request.cmd, &request.param).await?,
            }
        }
    }

    async fn dispatch(&mut self, command: &str, params: &[Value]) -> Result<()> {
        let mut outcome: anyhow::Result<bool> = Ok(false);
        let mut responded = false;

        for handler in self.handlers.iter_mut() {
            let mut responder = Responder::new(&mut self.write);
            outcome = handler.handle(command, params, &mut responder).await;
            responded = responder.responded();

            if !matches!(outcome, Ok(false)) {
                break;
            }
        }

        match outcome {
            Ok(true) if responded => self.write.flush().await,
            Ok(true) => {
                let err = anyhow::Error::new(Error::Assert(format!(
                    "handler for '{command}' did not write a response"
                )));
                self.write_error(command, &err).await
            }
            Ok(false) => {
                let err = anyhow::Error::new(Error::UnknownCommand(command.to_owned()));
                self.write_error(command, &err).await
            }
            Err(err) if responded => {
                // The client already has its response, an error frame now
                // would break lockstep.
                error!(server = %self.name, %command, "handler failed after responding: {err:#}");
                Err(Error::Assert(format!(
                    "handler for '{command}' failed after responding: {err}"
                )))
            }
            Err(err) => self.write_error(command, &err).await,
        }
    }

    async fn write_error(&mut self, command: &str, err: &anyhow::Error) -> Result<()> {
        let (kind, code) = match err.downcast_ref::<Error>() {
            Some(protocol) => (protocol.kind(), protocol.code()),
            None => (ErrorKind::Unknown, ErrorKind::Unknown.code()),
        };

        let stack = if tracing::enabled!(Level::DEBUG) {
            format!("{err:?}")
        } else {
            format!("{kind} raised by {} while processing '{command}'", self.name)
        };

        debug!(server = %self.name, %command, code, "command failed: {err}");
        self.write_response(Response::error(code, err.to_string(), stack)).await
    }

    async fn write_response(&mut self, response: Response) -> Result<()> {
        let frame = encode(&Message::Response(response))?;
        self.write.write_line(&frame).await?;
        self.write.flush().await
    }
}
