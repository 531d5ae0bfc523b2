//! Controller and worker configuration.
//!
//! Every option lives in one static table. An option can be given on the
//! command line (`--name=value`, `--flag`, `--no-flag`) or as `BACKHAUL_<NAME>`
//! in the environment, which is also where config files land once
//! [`load_env_files`] has read them. Anything else falls back to the table
//! default.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use backhaul_protocol::{Error, Result};
use clap::builder::PossibleValuesParser;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches};
use serde_json::{Number, Value};
use strum_macros::{Display, EnumString};
use tracing::info;

pub const ENV_PREFIX: &str = "BACKHAUL_";
pub const ENV_FILE: &str = "BACKHAUL_ENV_FILE";
pub const CONFIG_FILE_NAME: &str = "backhaul.conf";

/// Highest `pgN-*` index.
pub const PG_INDEX_MAX: u32 = 8;

pub const CIPHER_TYPE_NONE: &str = "none";
pub const DEFAULT_HOST_CMD: &str = "backhaul";

pub const OPT_CMD_SSH: &str = "cmd-ssh";
pub const OPT_COMMAND: &str = "command";
pub const OPT_CONFIG: &str = "config";
pub const OPT_CONFIG_INCLUDE_PATH: &str = "config-include-path";
pub const OPT_CONFIG_PATH: &str = "config-path";
pub const OPT_HOST_ID: &str = "host-id";
pub const OPT_LOCK_PATH: &str = "lock-path";
pub const OPT_LOG_LEVEL_CONSOLE: &str = "log-level-console";
pub const OPT_LOG_LEVEL_FILE: &str = "log-level-file";
pub const OPT_LOG_LEVEL_STDERR: &str = "log-level-stderr";
pub const OPT_LOG_PATH: &str = "log-path";
pub const OPT_LOG_SUBPROCESS: &str = "log-subprocess";
pub const OPT_PROCESS: &str = "process";
pub const OPT_PROCESS_MAX: &str = "process-max";
pub const OPT_PROTOCOL_TIMEOUT: &str = "protocol-timeout";
pub const OPT_REPO_CIPHER_PASS: &str = "repo1-cipher-pass";
pub const OPT_REPO_CIPHER_TYPE: &str = "repo1-cipher-type";
pub const OPT_REPO_HOST: &str = "repo1-host";
pub const OPT_STANZA: &str = "stanza";
pub const OPT_TYPE: &str = "type";

const ARG_COMMAND: &str = "COMMAND";

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

/// What the binary was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum CommandName {
    Check,
    Local,
    Remote,
}

impl CommandName {
    /// Workers talk the protocol on stdout.
    pub fn is_worker(self) -> bool {
        matches!(self, Self::Local | Self::Remote)
    }
}

/// Role of a spawned worker. Rendered as the last argument of its command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Local,
    Remote,
}

/// Where an option value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    Default,
    Config,
    Param,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Boolean,
    Integer,
    Float,
    String,
}

#[derive(Debug)]
pub struct OptionDef {
    pub name: String,
    /// `no-<name>`, only used by booleans.
    pub negate: String,
    pub env: String,
    pub kind: OptionType,
    pub default: Option<&'static str>,
    pub allowed: &'static [&'static str],
    /// Never rendered on a command line.
    pub secure: bool,
    /// Describes how to reach a host; meaningless once on that host.
    pub host: bool,
}

impl OptionDef {
    fn new(name: impl Into<String>, kind: OptionType) -> Self {
        let name = name.into();
        Self {
            negate: format!("no-{name}"),
            env: env_name(&name),
            name,
            kind,
            default: None,
            allowed: &[],
            secure: false,
            host: false,
        }
    }

    fn default_value(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    fn allowed(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    fn host(mut self) -> Self {
        self.host = true;
        self
    }
}

fn boolean(name: impl Into<String>) -> OptionDef {
    OptionDef::new(name, OptionType::Boolean)
}

fn integer(name: impl Into<String>) -> OptionDef {
    OptionDef::new(name, OptionType::Integer)
}

fn float(name: impl Into<String>) -> OptionDef {
    OptionDef::new(name, OptionType::Float)
}

fn string(name: impl Into<String>) -> OptionDef {
    OptionDef::new(name, OptionType::String)
}

/// `repo1-host-user` -> `BACKHAUL_REPO1_HOST_USER`
pub fn env_name(option: &str) -> String {
    format!("{ENV_PREFIX}{}", option.to_uppercase().replace('-', "_"))
}

pub fn option_defs() -> &'static [OptionDef] {
    static DEFS: OnceLock<Vec<OptionDef>> = OnceLock::new();

    DEFS.get_or_init(|| {
        let mut defs = vec![
            string(OPT_CMD_SSH).default_value("ssh"),
            string(OPT_COMMAND),
            string(OPT_CONFIG),
            string(OPT_CONFIG_INCLUDE_PATH),
            string(OPT_CONFIG_PATH),
            integer(OPT_HOST_ID),
            string(OPT_LOCK_PATH).default_value("/tmp/backhaul"),
            string(OPT_LOG_LEVEL_CONSOLE).default_value("warn").allowed(LOG_LEVELS),
            string(OPT_LOG_LEVEL_FILE).default_value("info").allowed(LOG_LEVELS),
            string(OPT_LOG_LEVEL_STDERR).default_value("warn").allowed(LOG_LEVELS),
            string(OPT_LOG_PATH).default_value("/var/log/backhaul"),
            boolean(OPT_LOG_SUBPROCESS).default_value("false"),
            integer(OPT_PROCESS),
            integer(OPT_PROCESS_MAX).default_value("1"),
            float(OPT_PROTOCOL_TIMEOUT).default_value("1830"),
            string(OPT_REPO_CIPHER_PASS).secure(),
            string(OPT_REPO_CIPHER_TYPE)
                .default_value(CIPHER_TYPE_NONE)
                .allowed(&[CIPHER_TYPE_NONE, "aes-256-cbc"]),
            string(OPT_REPO_HOST).host(),
            string("repo1-host-cmd").default_value(DEFAULT_HOST_CMD).host(),
            string("repo1-host-config").host(),
            string("repo1-host-config-include-path").host(),
            string("repo1-host-config-path").host(),
            integer("repo1-host-port").host(),
            string("repo1-host-user").default_value("backhaul").host(),
            string("repo1-path").default_value("/var/lib/backhaul"),
            string(OPT_STANZA),
            string(OPT_TYPE).allowed(&["backup", "db"]),
        ];

        for idx in 1..=PG_INDEX_MAX {
            defs.extend([
                string(format!("pg{idx}-host")).host(),
                string(format!("pg{idx}-host-cmd")).default_value(DEFAULT_HOST_CMD).host(),
                string(format!("pg{idx}-host-config")).host(),
                string(format!("pg{idx}-host-config-include-path")).host(),
                string(format!("pg{idx}-host-config-path")).host(),
                integer(format!("pg{idx}-host-port")).host(),
                string(format!("pg{idx}-host-user")).default_value("postgres").host(),
                string(format!("pg{idx}-path")),
                integer(format!("pg{idx}-port")).default_value("5432"),
                string(format!("pg{idx}-socket-path")),
            ]);
        }

        defs
    })
}

pub fn option_def(name: &str) -> Option<&'static OptionDef> {
    option_defs().iter().find(|def| def.name == name)
}

fn invalid_option(name: &str) -> Error {
    Error::Option(format!("option '{name}' is not valid"))
}

fn parse_value(def: &OptionDef, raw: &str) -> Result<Value> {
    let invalid = || Error::Option(format!("'{raw}' is not valid for '{}' option", def.name));

    match def.kind {
        OptionType::Boolean => match raw {
            "true" | "y" | "1" => Ok(Value::Bool(true)),
            "false" | "n" | "0" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        OptionType::Integer => raw.parse::<i64>().map(Value::from).map_err(|_| invalid()),
        OptionType::Float => match raw.parse::<i64>() {
            Ok(value) => Ok(Value::from(value)),
            Err(_) => raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(invalid),
        },
        OptionType::String => Ok(Value::String(raw.to_owned())),
    }
}

/// Value as it appears after `=` on a command line or in the environment.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}

/// The clap command every process parses its arguments with.
pub fn cli() -> clap::Command {
    let mut cmd = clap::Command::new("backhaul")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Backup orchestration over a line-oriented worker protocol")
        .arg(
            Arg::new(ARG_COMMAND)
                .required(true)
                .value_parser(PossibleValuesParser::new(["check", "local", "remote"])),
        );

    for def in option_defs() {
        let mut arg = Arg::new(def.name.as_str()).long(def.name.as_str()).env(def.env.as_str());

        arg = match def.kind {
            OptionType::Boolean => {
                arg.action(ArgAction::SetTrue).overrides_with(def.negate.as_str())
            }
            _ => arg.action(ArgAction::Set).num_args(1),
        };
        if !def.allowed.is_empty() {
            arg = arg.value_parser(PossibleValuesParser::new(def.allowed.iter().copied()));
        }
        if def.secure {
            arg = arg.hide_env_values(true);
        }
        cmd = cmd.arg(arg);

        if def.kind == OptionType::Boolean {
            cmd = cmd.arg(
                Arg::new(def.negate.as_str())
                    .long(def.negate.as_str())
                    .action(ArgAction::SetTrue)
                    .overrides_with(def.name.as_str())
                    .hide(true),
            );
        }
    }

    cmd
}

/// Loads config files into the environment so clap can pick their values up.
///
/// `--config` (or `BACKHAUL_CONFIG`) names the file and must exist. Without
/// it `<config-path>/backhaul.conf` is tried, then `BACKHAUL_ENV_FILE`, then
/// `./.env`. Every `*.conf` in `config-include-path` is loaded afterwards.
/// Values already in the environment are never overwritten.
pub fn load_env_files(args: &[OsString]) -> Result<()> {
    if let Some(config) = arg_or_env(args, OPT_CONFIG) {
        if !config.is_file() {
            return Err(Error::Option(format!("unable to open config file '{}'", config.display())));
        }
        load_env_file(&config)?;
    } else {
        let fallback = arg_or_env(args, OPT_CONFIG_PATH)
            .map(|path| path.join(CONFIG_FILE_NAME))
            .filter(|path| path.is_file())
            .or_else(|| env::var_os(ENV_FILE).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(".env"));

        if fallback.is_file() {
            load_env_file(&fallback)?;
        }
    }

    if let Some(include) = arg_or_env(args, OPT_CONFIG_INCLUDE_PATH) {
        let entries = fs::read_dir(&include).map_err(|e| {
            let include = include.display();
            Error::Option(format!("unable to list config include path '{include}': {e}"))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "conf"))
            .collect();
        files.sort();

        for file in files {
            load_env_file(&file)?;
        }
    }

    Ok(())
}

fn load_env_file(path: &Path) -> Result<()> {
    dotenvy::from_path(path)
        .map_err(|e| {
            Error::Option(format!("unable to load config file '{}': {e}", path.display()))
        })?;
    info!("loaded config from {}", path.display());
    Ok(())
}

/// `--name=value` or `--name value` from raw args, else `BACKHAUL_<NAME>`.
fn arg_or_env(args: &[OsString], name: &str) -> Option<PathBuf> {
    let flag = format!("--{name}");
    let prefix = format!("{flag}=");

    let mut iter = args.iter().filter_map(|arg| arg.to_str());
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix(&prefix) {
            return Some(PathBuf::from(value));
        }
        if arg == flag {
            return iter.next().map(PathBuf::from);
        }
    }

    env::var_os(env_name(name)).map(PathBuf::from)
}

fn explicit_source(matches: &ArgMatches, id: &str) -> Option<Source> {
    match matches.value_source(id) {
        Some(ValueSource::CommandLine) => Some(Source::Param),
        Some(ValueSource::EnvVariable) => Some(Source::Config),
        _ => None,
    }
}

/// Option names mapped to a replacement value. `None` removes the option.
pub type Replacements = BTreeMap<String, Option<Value>>;

#[derive(Clone)]
struct OptionValue {
    value: Value,
    source: Source,
}

#[derive(Clone)]
pub struct Config {
    command: CommandName,
    options: BTreeMap<&'static str, OptionValue>,
}

impl Config {
    /// Loads config files, then parses `args` (program name first).
    pub fn parse_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        load_env_files(&args)?;

        let matches = cli().try_get_matches_from(args).map_err(|e| Error::Option(e.to_string()))?;
        Self::from_matches(&matches)
    }

    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let command = matches
            .get_one::<String>(ARG_COMMAND)
            .ok_or_else(|| Error::Option("command is required".to_owned()))?;
        let command = command
            .parse::<CommandName>()
            .map_err(|_| Error::Option(format!("invalid command '{command}'")))?;

        let mut options = BTreeMap::new();

        for def in option_defs() {
            let name = def.name.as_str();

            let given = match def.kind {
                OptionType::Boolean => {
                    let negated = explicit_source(matches, def.negate.as_str())
                        .filter(|_| matches.get_flag(def.negate.as_str()));

                    match negated {
                        Some(source) => Some((Value::Bool(false), source)),
                        None => explicit_source(matches, name)
                            .map(|source| (Value::Bool(matches.get_flag(name)), source)),
                    }
                }
                _ => match (explicit_source(matches, name), matches.get_one::<String>(name)) {
                    (Some(source), Some(raw)) => Some((parse_value(def, raw)?, source)),
                    _ => None,
                },
            };

            let entry = match (given, def.default) {
                (Some((value, source)), _) => OptionValue { value, source },
                (None, Some(default)) => OptionValue {
                    value: parse_value(def, default)?,
                    source: Source::Default,
                },
                (None, None) => continue,
            };
            options.insert(name, entry);
        }

        Ok(Self { command, options })
    }

    pub fn command(&self) -> CommandName {
        self.command
    }

    /// Name of the command being served: the `command` option on a worker,
    /// otherwise the command itself.
    pub fn command_label(&self) -> String {
        self.get_str(OPT_COMMAND)
            .map(str::to_owned)
            .unwrap_or_else(|| self.command.to_string())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.options.get(name).map(|entry| &entry.value)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    /// True when the option has a value, default or not.
    pub fn test(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn source(&self, name: &str) -> Source {
        self.options.get(name).map_or(Source::Default, |entry| entry.source)
    }

    /// Overrides an option. `None` clears it.
    pub fn set(&mut self, name: &str, source: Source, value: Option<Value>) -> Result<()> {
        let def = option_def(name).ok_or_else(|| invalid_option(name))?;

        match value {
            Some(value) => {
                self.options.insert(def.name.as_str(), OptionValue { value, source });
            }
            None => {
                self.options.remove(def.name.as_str());
            }
        }
        Ok(())
    }

    /// Value of a named option as served over the protocol. Unset options are
    /// `null`; unknown names are an error.
    pub fn option_value(&self, name: &str) -> Result<Value> {
        option_def(name).ok_or_else(|| invalid_option(name))?;
        Ok(self.get(name).cloned().unwrap_or(Value::Null))
    }

    pub fn process_max(&self) -> u32 {
        self.get_int(OPT_PROCESS_MAX)
            .and_then(|max| u32::try_from(max).ok())
            .unwrap_or(1)
    }

    pub fn protocol_timeout(&self) -> Duration {
        self.get_f64(OPT_PROTOCOL_TIMEOUT)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(backhaul_protocol::io::DEFAULT_TIMEOUT)
    }

    /// Arguments for a worker: every non-default option after `replacements`,
    /// sorted by name, then the role. Secure options are left out (see
    /// [`Config::exec_env`]) and remote workers get no host options.
    pub fn exec_params(&self, role: Role, replacements: &Replacements) -> Vec<String> {
        let mut values: BTreeMap<&str, &Value> = self
            .options
            .iter()
            .filter(|(_, entry)| entry.source != Source::Default)
            .map(|(name, entry)| (*name, &entry.value))
            .collect();

        for (name, value) in replacements {
            match value {
                Some(value) => values.insert(name.as_str(), value),
                None => values.remove(name.as_str()),
            };
        }

        let mut params: Vec<String> = values
            .into_iter()
            .filter(|(name, _)| {
                option_def(name)
                    .is_some_and(|def| !def.secure && !(role == Role::Remote && def.host))
            })
            .map(|(name, value)| match value {
                Value::Bool(true) => format!("--{name}"),
                Value::Bool(false) => format!("--no-{name}"),
                value => format!("--{name}={}", render_value(value)),
            })
            .collect();

        params.push(role.to_string());
        params
    }

    /// Secure options that are set, as environment for a local worker.
    pub fn exec_env(&self) -> Vec<(String, String)> {
        option_defs()
            .iter()
            .filter(|def| def.secure)
            .filter_map(|def| {
                let entry = self.options.get(def.name.as_str())?;
                (entry.source != Source::Default)
                    .then(|| (def.env.clone(), render_value(&entry.value)))
            })
            .collect()
    }

    pub fn repo_is_local(&self) -> bool {
        !self.test(OPT_REPO_HOST)
    }

    /// Fails for commands that only make sense next to the repository.
    pub fn repo_is_local_verify(&self) -> Result<()> {
        if self.repo_is_local() {
            Ok(())
        } else {
            Err(Error::HostInvalid(format!(
                "{} command must be run on the repository host",
                self.command_label()
            )))
        }
    }

    pub fn pg_is_local(&self, host_id: u32) -> bool {
        !self.test(&format!("pg{host_id}-host"))
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        map.entry(&"command", &self.command.to_string());
        for (name, entry) in &self.options {
            if option_def(name).is_some_and(|def| def.secure) {
                map.entry(name, &"<redacted>");
            } else {
                map.entry(name, &entry.value);
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(args: &[&str]) -> Config {
        Config::parse_from(std::iter::once("backhaul").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_and_sources() {
        let config = parse(&["--stanza=test1", "--process-max=4", "check"]);

        assert_eq!(config.command(), CommandName::Check);
        assert_eq!(config.get_str(OPT_STANZA), Some("test1"));
        assert_eq!(config.source(OPT_STANZA), Source::Param);
        assert_eq!(config.process_max(), 4);
        assert_eq!(config.get_str("repo1-host-user"), Some("backhaul"));
        assert_eq!(config.source("repo1-host-user"), Source::Default);
        assert_eq!(config.get_int("pg8-port"), Some(5432));
        assert_eq!(config.protocol_timeout(), Duration::from_secs(1830));
        assert!(!config.test(OPT_REPO_HOST));
    }

    #[test]
    fn replacements_set_and_remove() {
        let config = parse(&["--stanza=test1", "--log-subprocess", "--log-path=/tmp/log", "check"]);
        let replacements = Replacements::from([
            (OPT_PROCESS.to_owned(), Some(json!(2))),
            (OPT_LOG_PATH.to_owned(), None),
            (OPT_LOG_LEVEL_FILE.to_owned(), Some(json!("info"))),
        ]);

        assert_eq!(
            config.exec_params(Role::Local, &replacements).join("|"),
            "--log-level-file=info|--log-subprocess|--process=2|--stanza=test1|local"
        );
    }

    #[test]
    fn negated_and_secure_options() {
        let config = parse(&[
            "--no-log-subprocess",
            "--repo1-cipher-pass=xxx",
            "--protocol-timeout=0.5",
            "check",
        ]);

        assert!(!config.get_bool(OPT_LOG_SUBPROCESS));
        assert_eq!(config.protocol_timeout(), Duration::from_millis(500));
        assert_eq!(
            config.exec_params(Role::Local, &Replacements::new()),
            ["--no-log-subprocess", "--protocol-timeout=0.5", "local"]
        );
        assert_eq!(
            config.exec_env(),
            [("BACKHAUL_REPO1_CIPHER_PASS".to_owned(), "xxx".to_owned())]
        );
        assert!(!format!("{config:?}").contains("xxx"));
    }

    #[test]
    fn remote_workers_get_no_host_options() {
        let config = parse(&["--repo1-host=repo-host", "--pg1-path=/pg", "check"]);

        assert_eq!(
            config.exec_params(Role::Local, &Replacements::new()),
            ["--pg1-path=/pg", "--repo1-host=repo-host", "local"]
        );
        assert_eq!(
            config.exec_params(Role::Remote, &Replacements::new()),
            ["--pg1-path=/pg", "remote"]
        );
    }

    #[test]
    fn invalid_values_are_option_errors() {
        let err = Config::parse_from(["backhaul", "--process-max=many", "check"]).unwrap_err();
        assert!(matches!(err, Error::Option(_)));
        assert_eq!(err.to_string(), "'many' is not valid for 'process-max' option");

        assert!(Config::parse_from(["backhaul", "--log-level-file=loud", "check"]).is_err());
        assert!(Config::parse_from(["backhaul", "archive-get"]).is_err());

        let config = parse(&["check"]);
        let err = config.option_value("bogus").unwrap_err();
        assert_eq!(err.to_string(), "option 'bogus' is not valid");
        assert_eq!(config.option_value(OPT_REPO_HOST).unwrap(), Value::Null);
    }

    #[test]
    fn repo_and_pg_locality() {
        let config = parse(&["--stanza=test1", "check"]);
        assert!(config.repo_is_local());
        assert!(config.repo_is_local_verify().is_ok());

        let config = parse(&["--stanza=test1", "--repo1-host=remote-host", "check"]);
        assert!(!config.repo_is_local());
        let err = config.repo_is_local_verify().unwrap_err();
        assert!(matches!(err, Error::HostInvalid(_)));
        assert_eq!(err.to_string(), "check command must be run on the repository host");

        let config = parse(&["--pg1-path=/path/to", "check"]);
        assert!(config.pg_is_local(1));

        let config = parse(&[
            "--pg7-path=/path/to",
            "--pg7-host=test1",
            "--host-id=7",
            "--command=backup",
            "--type=db",
            "--process=0",
            "local",
        ]);
        assert!(!config.pg_is_local(7));
        assert_eq!(config.command_label(), "backup");
    }

    #[test]
    fn config_file_fills_the_environment() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("test.conf");
        std::fs::write(&file, "BACKHAUL_REPO1_CIPHER_PASS=from-file\n").unwrap();

        let config = Config::parse_from([
            "backhaul".to_owned(),
            format!("--config={}", file.display()),
            "check".to_owned(),
        ])
        .unwrap();
        assert_eq!(config.get_str(OPT_REPO_CIPHER_PASS), Some("from-file"));
        assert_eq!(config.source(OPT_REPO_CIPHER_PASS), Source::Config);

        let missing = dir.path().join("missing.conf");
        let err = Config::parse_from([
            "backhaul".to_owned(),
            format!("--config={}", missing.display()),
            "check".to_owned(),
        ])
        .unwrap_err();
        assert!(err.to_string().starts_with("unable to open config file"));
    }
}
