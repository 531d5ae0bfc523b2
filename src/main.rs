use std::env;
use std::ffi::OsString;
use std::time::{Duration, Instant};

use anyhow::bail;
use backhaul::{
    config::{cli, load_env_files, CommandName, Config, OPT_STANZA},
    helper::{ProtocolHelper, StorageType},
    logger::init_tracing,
    worker::{run_worker, COMMAND_CONFIG_OPTION},
};
use backhaul_protocol::{Command, Job, Parallel};
use serde_json::{json, Value};
use tracing::{error, info};

/// How long one scheduler sweep waits for a worker to answer.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Idle remotes get a `noop` this often while locals are busy.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let args: Vec<OsString> = env::args_os().collect();
    load_env_files(&args)?;

    let matches = cli().get_matches_from(args);
    let config = Config::from_matches(&matches)?;
    let _guard = init_tracing(&config)?;

    match config.command() {
        CommandName::Local | CommandName::Remote => run_worker(config).await,
        CommandName::Check => check(config).await,
    }
}

/// Starts every worker the config asks for and makes sure each one answers.
async fn check(config: Config) -> anyhow::Result<()> {
    let mut helper = ProtocolHelper::new(config)?;
    let result = run_check(&mut helper).await;
    helper.teardown().await;
    result
}

async fn run_check(helper: &mut ProtocolHelper) -> anyhow::Result<()> {
    if !helper.config().repo_is_local() {
        let client = helper.get_remote(StorageType::Repo, 1).await?;
        client.lock().await.noop().await?;
        info!("repository host responded");
    }

    let stanza = json!(helper.config().get_str(OPT_STANZA));
    let process_max = helper.config().process_max();
    let mut parallel = Parallel::new(POLL_TIMEOUT);

    for process_id in 1..=process_max {
        parallel.client_add(helper.get_local(process_id).await?).await?;
        let command = Command::new(COMMAND_CONFIG_OPTION).param(OPT_STANZA);
        parallel.job_add(Job::new(process_id, command));
    }

    let mut failed = 0;
    let mut keep_alive = Instant::now();
    while !parallel.done() {
        parallel.process().await?;

        if keep_alive.elapsed() >= KEEP_ALIVE_INTERVAL {
            helper.keep_alive().await?;
            keep_alive = Instant::now();
        }

        while let Some(job) = parallel.result() {
            if let Some(message) = job.error_message() {
                error!(job = %job.key(), "{message}");
                failed += 1;
                continue;
            }

            let served = job.result().and_then(|values| values.get(0)).unwrap_or(&Value::Null);
            if *served == stanza {
                info!(process_id = ?job.process_id(), "worker responded");
            } else {
                error!(job = %job.key(), "worker reports stanza {served} but expected {stanza}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {process_max} worker(s) failed the check");
    }

    println!("check passed: {process_max} local worker(s) responded");
    Ok(())
}
