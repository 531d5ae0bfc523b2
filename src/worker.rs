//! Worker entry point: serves protocol requests on stdin/stdout until the
//! controller sends `exit`.

use async_trait::async_trait;
use backhaul_protocol::{Error, Handler, ReadStream, Responder, Server, WriteStream};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::config::{CommandName, Config, OPT_PROCESS, OPT_TYPE};

/// Returns the values of the named options, `null` for unset ones.
pub const COMMAND_CONFIG_OPTION: &str = "configOption";

pub struct ConfigHandler {
    config: Config,
}

impl ConfigHandler {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Handler for ConfigHandler {
    async fn handle(
        &mut self,
        command: &str,
        params: &[Value],
        responder: &mut Responder<'_>,
    ) -> anyhow::Result<bool> {
        if command != COMMAND_CONFIG_OPTION {
            return Ok(false);
        }

        let mut values = Vec::with_capacity(params.len());
        for param in params {
            let name = param.as_str().ok_or_else(|| {
                Error::Assert(format!("option name must be a string but got {param}"))
            })?;
            values.push(self.config.option_value(name)?);
        }

        debug!(options = params.len(), "serving config options");
        responder.respond(Some(Value::Array(values))).await?;
        Ok(true)
    }
}

/// A remote worker has to run where the storage it serves lives.
fn verify_host(config: &Config) -> backhaul_protocol::Result<()> {
    if config.command() != CommandName::Remote {
        return Ok(());
    }

    match config.get_str(OPT_TYPE) {
        Some("backup") => config.repo_is_local_verify(),
        Some("db") if !config.pg_is_local(1) => Err(Error::HostInvalid(format!(
            "{} command must be run on the PostgreSQL host",
            config.command_label()
        ))),
        _ => Ok(()),
    }
}

/// Serves one session over `read`/`write` with the role the config was
/// started with.
pub async fn serve<R, W>(config: Config, read: R, write: W) -> anyhow::Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let role = config.command();
    if !role.is_worker() {
        anyhow::bail!("'{role}' is not a worker role");
    }
    verify_host(&config)?;

    let name = format!("{role}-{} server", config.get_int(OPT_PROCESS).unwrap_or(0));
    let timeout = config.protocol_timeout();

    let mut server = Server::new(
        name.clone(),
        role.to_string(),
        ReadStream::handle("stdin", read, timeout),
        WriteStream::new("stdout", write),
    )
    .await?;
    server.handler_add(ConfigHandler::new(config));

    info!(server = %name, "worker started");
    server.process().await?;
    info!(server = %name, "worker exiting");

    Ok(())
}

pub async fn run_worker(config: Config) -> anyhow::Result<()> {
    serve(config, tokio::io::stdin(), tokio::io::stdout()).await
}
