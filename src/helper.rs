//! Connections to local and remote workers, cached for the life of the
//! controller.
//!
//! ```ignore
//! let mut helper = ProtocolHelper::new(config)?;
//! let client = helper.get_local(1).await?;
//! client.lock().await.noop().await?;
//! helper.teardown().await;
//! ```

use std::collections::BTreeMap;
use std::iter;
use std::path::PathBuf;
use std::time::Duration;

use backhaul_protocol::{Client, Command, Error, ReadStream, Result, SharedClient, WriteStream};
use serde_json::{json, Value};
use strum_macros::Display;
use tracing::{debug, info};

use crate::config::{
    CIPHER_TYPE_NONE, Config, DEFAULT_HOST_CMD, OPT_CMD_SSH, OPT_COMMAND, OPT_CONFIG,
    OPT_CONFIG_INCLUDE_PATH, OPT_CONFIG_PATH, OPT_HOST_ID, OPT_LOCK_PATH, OPT_LOG_LEVEL_FILE,
    OPT_LOG_LEVEL_STDERR, OPT_LOG_PATH, OPT_LOG_SUBPROCESS, OPT_PROCESS, OPT_REPO_CIPHER_PASS,
    OPT_REPO_CIPHER_TYPE, OPT_TYPE, PG_INDEX_MAX, Replacements, Role, Source,
};
use crate::exec::Exec;
use crate::worker::COMMAND_CONFIG_OPTION;

/// How long a worker that broke the handshake gets to report its exit status.
const EXIT_GRACE: Duration = Duration::from_millis(500);

const SSH_OPTIONS: [&str; 6] = [
    "-o",
    "LogLevel=error",
    "-o",
    "Compression=no",
    "-o",
    "PasswordAuthentication=no",
];

/// What a remote worker gives access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StorageType {
    Repo,
    Pg,
}

impl StorageType {
    fn option_prefix(self, host_id: u32) -> String {
        match self {
            StorageType::Repo => "repo1".to_owned(),
            StorageType::Pg => format!("pg{host_id}"),
        }
    }

    fn host_max(self) -> u32 {
        match self {
            StorageType::Repo => 1,
            StorageType::Pg => PG_INDEX_MAX,
        }
    }

    fn type_tag(self) -> &'static str {
        match self {
            StorageType::Repo => "backup",
            StorageType::Pg => "db",
        }
    }
}

struct HelperClient {
    exec: Exec,
    client: SharedClient,
}

impl HelperClient {
    async fn free(self) {
        self.client.lock().await.close().await;
        self.exec.free().await;
    }
}

pub struct ProtocolHelper {
    config: Config,
    exe: PathBuf,
    local: Vec<Option<HelperClient>>,
    remote: BTreeMap<(StorageType, u32), HelperClient>,
    cipher_checked: bool,
}

impl ProtocolHelper {
    /// Local workers run this same binary.
    pub fn new(config: Config) -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| Error::Execute(format!("unable to find the current executable: {e}")))?;
        Ok(Self::with_exe(config, exe))
    }

    pub fn with_exe(config: Config, exe: impl Into<PathBuf>) -> Self {
        Self {
            config,
            exe: exe.into(),
            local: Vec::new(),
            remote: BTreeMap::new(),
            cipher_checked: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// File logging on a worker only when `log-subprocess` asks for it.
    fn log_level_file(&self) -> Option<Value> {
        if self.config.get_bool(OPT_LOG_SUBPROCESS) {
            self.config.get(OPT_LOG_LEVEL_FILE).cloned()
        } else {
            Some(json!("off"))
        }
    }

    /// Value of `name` only when it was set explicitly.
    fn explicit(&self, name: &str) -> Option<Value> {
        if self.config.source(name) == Source::Default {
            None
        } else {
            self.config.get(name).cloned()
        }
    }

    /// Command line for local worker `process_id`.
    pub fn local_params(&self, process_id: u32) -> Vec<String> {
        let replacements = Replacements::from([
            (OPT_COMMAND.to_owned(), Some(json!(self.config.command_label()))),
            (OPT_PROCESS.to_owned(), Some(json!(process_id))),
            (OPT_HOST_ID.to_owned(), Some(json!(1))),
            (OPT_TYPE.to_owned(), Some(json!(StorageType::Repo.type_tag()))),
            (OPT_LOG_LEVEL_FILE.to_owned(), self.log_level_file()),
            (OPT_LOG_LEVEL_STDERR.to_owned(), Some(json!("error"))),
        ]);

        self.config.exec_params(Role::Local, &replacements)
    }

    /// Arguments for the remote transport: its own options, `user@host`, then
    /// the worker command line as a single argument.
    pub fn remote_params(
        &self,
        kind: StorageType,
        process_id: u32,
        host_id: u32,
    ) -> Result<Vec<String>> {
        let prefix = kind.option_prefix(host_id);
        let host = self.remote_host(kind, host_id)?;

        let mut params: Vec<String> = SSH_OPTIONS.iter().map(|opt| (*opt).to_owned()).collect();
        if let Some(port) = self.config.get_int(&format!("{prefix}-host-port")) {
            params.push("-p".to_owned());
            params.push(port.to_string());
        }
        let user = self.config.get_str(&format!("{prefix}-host-user")).unwrap_or_default();
        params.push(format!("{user}@{host}"));

        let mut replacements = Replacements::new();

        // The host's own config locations replace ours.
        for (option, host_option) in [
            (OPT_CONFIG, "host-config"),
            (OPT_CONFIG_INCLUDE_PATH, "host-config-include-path"),
            (OPT_CONFIG_PATH, "host-config-path"),
        ] {
            let value = self.explicit(&format!("{prefix}-{host_option}"));
            replacements.insert(option.to_owned(), value);
        }

        // A pg remote always sees its cluster as pg1.
        if kind == StorageType::Pg && host_id != 1 {
            let path = self.config.get(&format!("pg{host_id}-path")).cloned();
            let socket_path = self.explicit(&format!("pg{host_id}-socket-path"));
            let port = self.explicit(&format!("pg{host_id}-port"));
            replacements.insert("pg1-path".to_owned(), path);
            replacements.insert("pg1-socket-path".to_owned(), socket_path);
            replacements.insert("pg1-port".to_owned(), port);
        }
        for idx in 2..=PG_INDEX_MAX {
            for suffix in ["path", "socket-path", "port"] {
                replacements.insert(format!("pg{idx}-{suffix}"), None);
            }
        }

        if !self.config.test(OPT_COMMAND) {
            replacements.insert(OPT_COMMAND.to_owned(), Some(json!(self.config.command_label())));
        }
        if !self.config.test(OPT_PROCESS) {
            replacements.insert(OPT_PROCESS.to_owned(), Some(json!(process_id)));
        }

        // host specific
        for option in [OPT_HOST_ID, OPT_LOG_PATH, OPT_LOCK_PATH] {
            replacements.insert(option.to_owned(), None);
        }

        replacements.insert(OPT_LOG_LEVEL_FILE.to_owned(), self.log_level_file());
        replacements.insert(OPT_LOG_LEVEL_STDERR.to_owned(), Some(json!("error")));
        replacements.insert(OPT_TYPE.to_owned(), Some(json!(kind.type_tag())));

        let host_cmd = self
            .config
            .get_str(&format!("{prefix}-host-cmd"))
            .unwrap_or(DEFAULT_HOST_CMD)
            .to_owned();
        let command: Vec<String> = iter::once(host_cmd)
            .chain(self.config.exec_params(Role::Remote, &replacements))
            .collect();
        params.push(command.join(" "));

        Ok(params)
    }

    fn remote_host(&self, kind: StorageType, host_id: u32) -> Result<String> {
        let option = format!("{}-host", kind.option_prefix(host_id));
        self.config
            .get_str(&option)
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::Option(format!("option '{option}' is required for a remote connection"))
            })
    }

    /// Cached client for local worker `process_id` (1-based, up to
    /// `process-max`), started on first use.
    pub async fn get_local(&mut self, process_id: u32) -> Result<SharedClient> {
        if self.local.is_empty() {
            self.local.resize_with(self.config.process_max() as usize, || None);
        }
        let max = self.local.len();
        let idx = (process_id as usize)
            .checked_sub(1)
            .filter(|idx| *idx < max)
            .ok_or_else(|| {
                Error::Assert(format!("process id {process_id} is out of range 1..={max}"))
            })?;

        if let Some(cached) = &self.local[idx] {
            return Ok(cached.client.clone());
        }

        let (exec, read, write) = Exec::spawn(
            &self.exe,
            self.local_params(process_id),
            &self.config.exec_env(),
            format!("local-{process_id} process"),
            self.config.protocol_timeout(),
        )?;
        let name = format!("local-{process_id} protocol");
        let connected = connect(exec, read, write, name, Role::Local).await?;
        let client = connected.client.clone();
        self.local[idx] = Some(connected);

        info!(process_id, "local worker started");
        Ok(client)
    }

    /// Cached client for the remote worker on `host_id` (1-based), started
    /// on first use.
    ///
    /// The first repository connection also asks the remote for its cipher
    /// settings when none are configured here.
    pub async fn get_remote(&mut self, kind: StorageType, host_id: u32) -> Result<SharedClient> {
        if host_id == 0 || host_id > kind.host_max() {
            return Err(Error::Assert(format!(
                "{kind} host id {host_id} is out of range 1..={}",
                kind.host_max()
            )));
        }

        if let Some(cached) = self.remote.get(&(kind, host_id)) {
            return Ok(cached.client.clone());
        }

        // Keep the process id of the local this runs under, so both ends log alike.
        let process_id = self
            .config
            .get_int(OPT_PROCESS)
            .and_then(|id| u32::try_from(id).ok())
            .unwrap_or(0);
        let host = self.remote_host(kind, host_id)?;
        let ssh = self.config.get_str(OPT_CMD_SSH).unwrap_or("ssh").to_owned();

        let (exec, read, write) = Exec::spawn(
            &ssh,
            self.remote_params(kind, process_id, host_id)?,
            &[],
            format!("remote-{process_id} process on '{host}'"),
            self.config.protocol_timeout(),
        )?;
        let connected = connect(
            exec,
            read,
            write,
            format!("remote-{process_id} protocol on '{host}'"),
            Role::Remote,
        )
        .await?;
        let client = connected.client.clone();
        self.remote.insert((kind, host_id), connected);
        info!(%kind, host_id, %host, "remote worker started");

        if kind == StorageType::Repo {
            self.cipher_fetch(&client).await?;
        }

        Ok(client)
    }

    async fn cipher_fetch(&mut self, client: &SharedClient) -> Result<()> {
        let configured = self.config.get_str(OPT_REPO_CIPHER_TYPE) != Some(CIPHER_TYPE_NONE);
        if self.cipher_checked || configured {
            return Ok(());
        }
        self.cipher_checked = true;

        let command = Command::new(COMMAND_CONFIG_OPTION)
            .param(OPT_REPO_CIPHER_TYPE)
            .param(OPT_REPO_CIPHER_PASS);
        let output = client.lock().await.execute(&command, true).await?;

        let values = match output {
            Some(Value::Array(values)) => values,
            other => {
                return Err(Error::Protocol(format!(
                    "expected option list from {COMMAND_CONFIG_OPTION} but got {}",
                    other.unwrap_or(Value::Null)
                )));
            }
        };

        let cipher_type = values.first().and_then(Value::as_str).unwrap_or(CIPHER_TYPE_NONE);
        if cipher_type != CIPHER_TYPE_NONE {
            debug!(cipher_type, "using cipher settings of the repository host");
            self.config.set(OPT_REPO_CIPHER_TYPE, Source::Config, Some(json!(cipher_type)))?;
            self.config.set(
                OPT_REPO_CIPHER_PASS,
                Source::Config,
                values.get(1).filter(|pass| !pass.is_null()).cloned(),
            )?;
        }

        Ok(())
    }

    /// Sends `noop` to every open remote so idle connections are not dropped.
    pub async fn keep_alive(&mut self) -> Result<()> {
        for cached in self.remote.values() {
            let mut client = cached.client.lock().await;
            if client.is_open() {
                client.noop().await?;
            }
        }
        Ok(())
    }

    /// Closes every cached client and ends its process. Safe to call again.
    pub async fn teardown(&mut self) {
        let cached: Vec<HelperClient> = std::mem::take(&mut self.remote)
            .into_values()
            .chain(std::mem::take(&mut self.local).into_iter().flatten())
            .collect();

        if !cached.is_empty() {
            debug!(clients = cached.len(), "protocol teardown");
        }
        for helper_client in cached {
            helper_client.free().await;
        }
    }
}

/// Handshakes with a freshly started worker. A worker that already died is
/// reported by its exit status rather than the broken handshake.
async fn connect(
    mut exec: Exec,
    read: ReadStream,
    write: WriteStream,
    name: String,
    role: Role,
) -> Result<HelperClient> {
    match Client::new(name, role.to_string(), read, write).await {
        Ok(client) => Ok(HelperClient { exec, client: client.into_shared() }),
        Err(err) => {
            exec.check(EXIT_GRACE).await?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper_from(args: &[&str]) -> ProtocolHelper {
        let args = iter::once("backhaul").chain(args.iter().copied());
        ProtocolHelper::with_exe(Config::parse_from(args).unwrap(), "backhaul")
    }

    /// Transport arguments and the worker command line, split apart.
    fn remote(
        helper: &ProtocolHelper,
        kind: StorageType,
        process_id: u32,
        host_id: u32,
    ) -> (Vec<String>, String) {
        let mut params = helper.remote_params(kind, process_id, host_id).unwrap();
        let command = params.pop().unwrap();
        (params, command)
    }

    fn ssh_args(extra: &[&str]) -> Vec<String> {
        SSH_OPTIONS.iter().chain(extra).map(|arg| (*arg).to_owned()).collect()
    }

    #[test]
    fn local_params() {
        assert_eq!(
            helper_from(&["--stanza=test1", "check"]).local_params(1),
            [
                "--command=check",
                "--host-id=1",
                "--log-level-file=off",
                "--log-level-stderr=error",
                "--process=1",
                "--stanza=test1",
                "--type=backup",
                "local",
            ]
        );

        assert_eq!(
            helper_from(&["--stanza=test1", "--log-subprocess", "check"]).local_params(2),
            [
                "--command=check",
                "--host-id=1",
                "--log-level-file=info",
                "--log-level-stderr=error",
                "--log-subprocess",
                "--process=2",
                "--stanza=test1",
                "--type=backup",
                "local",
            ]
        );
    }

    #[test]
    fn repo_remote_params() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("backhaul.conf");
        std::fs::write(&conf, "").unwrap();

        // local config locations never reach the remote
        let config = Config::parse_from([
            "backhaul".to_owned(),
            "--stanza=test1".to_owned(),
            "--repo1-host=repo-host".to_owned(),
            "--repo1-host-user=repo-host-user".to_owned(),
            format!("--config={}", conf.display()),
            format!("--config-include-path={}", dir.path().display()),
            format!("--config-path={}", dir.path().display()),
            "check".to_owned(),
        ])
        .unwrap();
        let helper = ProtocolHelper::with_exe(config, "backhaul");
        let (args, command) = remote(&helper, StorageType::Repo, 0, 1);
        assert_eq!(args, ssh_args(&["repo-host-user@repo-host"]));
        assert_eq!(
            command,
            [
                "backhaul",
                "--command=check",
                "--log-level-file=off",
                "--log-level-stderr=error",
                "--process=0",
                "--stanza=test1",
                "--type=backup",
                "remote",
            ]
            .join(" ")
        );

        let helper = helper_from(&[
            "--stanza=test1",
            "--log-subprocess",
            "--repo1-host=repo-host",
            "--repo1-host-port=444",
            "--repo1-host-config=/path/backhaul.conf",
            "--repo1-host-config-include-path=/path/include",
            "--repo1-host-config-path=/path/config",
            "--repo1-host-user=repo-host-user",
            "check",
        ]);
        let (args, command) = remote(&helper, StorageType::Repo, 1, 1);
        assert_eq!(args, ssh_args(&["-p", "444", "repo-host-user@repo-host"]));
        assert_eq!(
            command,
            [
                "backhaul",
                "--command=check",
                "--config=/path/backhaul.conf",
                "--config-include-path=/path/include",
                "--config-path=/path/config",
                "--log-level-file=info",
                "--log-level-stderr=error",
                "--log-subprocess",
                "--process=1",
                "--stanza=test1",
                "--type=backup",
                "remote",
            ]
            .join(" ")
        );
    }

    #[test]
    fn remote_from_a_local_keeps_its_process() {
        let helper = helper_from(&[
            "--stanza=test1",
            "--command=check",
            "--process=3",
            "--host-id=1",
            "--type=backup",
            "--repo1-host=repo-host",
            "local",
        ]);
        let (args, command) = remote(&helper, StorageType::Repo, 66, 1);
        assert_eq!(args, ssh_args(&["backhaul@repo-host"]));
        assert_eq!(
            command,
            [
                "backhaul",
                "--command=check",
                "--log-level-file=off",
                "--log-level-stderr=error",
                "--process=3",
                "--stanza=test1",
                "--type=backup",
                "remote",
            ]
            .join(" ")
        );
    }

    #[test]
    fn pg_remote_params() {
        let helper = helper_from(&[
            "--stanza=test1",
            "--pg1-path=/path/to/1",
            "--pg1-host=pg1-host",
            "check",
        ]);
        let (args, command) = remote(&helper, StorageType::Pg, 1, 1);
        assert_eq!(args, ssh_args(&["postgres@pg1-host"]));
        assert_eq!(
            command,
            [
                "backhaul",
                "--command=check",
                "--log-level-file=off",
                "--log-level-stderr=error",
                "--pg1-path=/path/to/1",
                "--process=1",
                "--stanza=test1",
                "--type=db",
                "remote",
            ]
            .join(" ")
        );

        let helper = helper_from(&[
            "--stanza=test1",
            "--command=backup",
            "--process=4",
            "--host-id=2",
            "--pg1-path=/path/to/1",
            "--pg1-socket-path=/socket3",
            "--pg1-port=1111",
            "--pg2-path=/path/to/2",
            "--pg2-host=pg2-host",
            "--type=db",
            "local",
        ]);
        let (args, command) = remote(&helper, StorageType::Pg, 1, 2);
        assert_eq!(args, ssh_args(&["postgres@pg2-host"]));
        assert_eq!(
            command,
            [
                "backhaul",
                "--command=backup",
                "--log-level-file=off",
                "--log-level-stderr=error",
                "--pg1-path=/path/to/2",
                "--process=4",
                "--stanza=test1",
                "--type=db",
                "remote",
            ]
            .join(" ")
        );

        let helper = helper_from(&[
            "--stanza=test1",
            "--command=backup",
            "--process=4",
            "--host-id=3",
            "--pg1-path=/path/to/1",
            "--pg3-path=/path/to/3",
            "--pg3-host=pg3-host",
            "--pg3-socket-path=/socket3",
            "--pg3-port=3333",
            "--type=db",
            "local",
        ]);
        let (args, command) = remote(&helper, StorageType::Pg, 1, 3);
        assert_eq!(args, ssh_args(&["postgres@pg3-host"]));
        assert_eq!(
            command,
            [
                "backhaul",
                "--command=backup",
                "--log-level-file=off",
                "--log-level-stderr=error",
                "--pg1-path=/path/to/3",
                "--pg1-port=3333",
                "--pg1-socket-path=/socket3",
                "--process=4",
                "--stanza=test1",
                "--type=db",
                "remote",
            ]
            .join(" ")
        );
    }

    #[test]
    fn remote_needs_a_host() {
        let err = helper_from(&["check"]).remote_params(StorageType::Pg, 0, 2).unwrap_err();
        assert_eq!(err.to_string(), "option 'pg2-host' is required for a remote connection");
    }

    #[tokio::test]
    async fn ids_out_of_range() {
        let mut helper = helper_from(&["--process-max=2", "check"]);

        let err = helper.get_local(3).await.unwrap_err();
        assert_eq!(err.to_string(), "process id 3 is out of range 1..=2");
        assert!(helper.get_local(0).await.is_err());

        let err = helper.get_remote(StorageType::Repo, 2).await.unwrap_err();
        assert_eq!(err.to_string(), "repo host id 2 is out of range 1..=1");

        // nothing was started, so there is nothing to tear down
        helper.teardown().await;
        helper.teardown().await;
    }
}
