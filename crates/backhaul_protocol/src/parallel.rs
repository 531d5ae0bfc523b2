//! Runs many jobs over a fixed set of clients, one job per client at a time.
//!
//! The scheduler never blocks on a single worker. Each call to
//! [`Parallel::process`] is one sweep: hand pending jobs to idle clients, wait
//! (at most `timeout`) for any busy client to answer, collect every answer that
//! is ready, then refill the clients that just became idle. Callers loop:
//!
//! ```ignore
//! while !parallel.done() {
//!     parallel.process().await?;
//!     while let Some(job) = parallel.result() {
//!         // inspect job.result() / job.error_message()
//!     }
//! }
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use futures::future::select_all;
use tokio::sync::OwnedMutexGuard;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::client::{Client, SharedClient};
use crate::error::{Error, ErrorKind, Result};
use crate::job::Job;

struct Slot {
    client: SharedClient,
    name: String,
    job: Option<Job>,
    dispatched: Option<Instant>,
    failed: bool,
}

pub struct Parallel {
    timeout: Duration,
    slots: Vec<Slot>,
    pending: VecDeque<Job>,
    completed: VecDeque<Job>,
    start: usize,
}

impl Parallel {
    /// `timeout` bounds how long one sweep waits for a response.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            slots: Vec::new(),
            pending: VecDeque::new(),
            completed: VecDeque::new(),
            start: 0,
        }
    }

    /// Registers a client. Its read side must be a live handle.
    pub async fn client_add(&mut self, client: SharedClient) -> Result<()> {
        let name = {
            let guard = client.lock().await;
            if !guard.is_pollable() {
                return Err(Error::Assert("client with read handle is required".to_owned()));
            }
            guard.name().to_owned()
        };

        self.slots.push(Slot { client, name, job: None, dispatched: None, failed: false });
        Ok(())
    }

    pub fn job_add(&mut self, job: Job) {
        self.pending.push_back(job);
    }

    /// One sweep over all clients. Returns how many jobs completed during it;
    /// zero means call again.
    pub async fn process(&mut self) -> Result<usize> {
        let total = self.slots.len();
        if total == 0 {
            return Err(Error::Assert("no clients have been added".to_owned()));
        }

        // Own every client for the length of the sweep.
        let mut guards: Vec<OwnedMutexGuard<Client>> = Vec::with_capacity(total);
        for slot in &self.slots {
            let guard = slot.client.clone().try_lock_owned().map_err(|_| {
                Error::Assert(format!("client '{}' is in use by another owner", slot.name))
            })?;
            guards.push(guard);
        }

        // Rotate the starting client so no index is always served last.
        let order: Vec<usize> = (0..total).map(|idx| (self.start + idx) % total).collect();
        self.start = (self.start + 1) % total;

        let mut completed = self.dispatch(&order, &mut guards).await?;
        completed += self.collect(&order, &mut guards).await?;
        completed += self.dispatch(&order, &mut guards).await?;
        completed += self.abandon_if_no_client()?;

        debug!(state = %self.to_log(), completed, "sweep complete");
        Ok(completed)
    }

    /// Pops one completed job, in completion order.
    pub fn result(&mut self) -> Option<Job> {
        self.completed.pop_front()
    }

    /// Nothing queued, nothing running and every result drained.
    pub fn done(&self) -> bool {
        self.pending.is_empty()
            && self.completed.is_empty()
            && self.slots.iter().all(|slot| slot.job.is_none())
    }

    /// Jobs currently in flight.
    pub fn running(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().filter_map(|slot| slot.job.as_ref())
    }

    pub fn to_log(&self) -> String {
        format!(
            "{{clientTotal: {}, jobPending: {}, jobRunning: {}, jobCompleted: {}}}",
            self.slots.len(),
            self.pending.len(),
            self.running().count(),
            self.completed.len()
        )
    }

    async fn dispatch(
        &mut self,
        order: &[usize],
        guards: &mut [OwnedMutexGuard<Client>],
    ) -> Result<usize> {
        let mut completed = 0;

        for &idx in order {
            let slot = &mut self.slots[idx];
            if slot.failed || slot.job.is_some() {
                continue;
            }

            // A job that cannot start stays queued.
            let Some(head) = self.pending.front_mut() else { break };
            head.start(idx as u32 + 1)?;
            let Some(mut job) = self.pending.pop_front() else { break };

            match guards[idx].write_command(job.command()).await {
                Ok(()) => {
                    debug!(
                        client = %slot.name,
                        command = %job.command().to_log(),
                        "job dispatched"
                    );
                    slot.job = Some(job);
                    slot.dispatched = Some(Instant::now());
                }
                Err(err) => {
                    warn!(client = %slot.name, "unable to dispatch job: {err}");
                    slot.failed = true;
                    job.fail(err.code(), err.to_string())?;
                    self.completed.push_back(job);
                    completed += 1;
                }
            }
        }

        Ok(completed)
    }

    async fn collect(
        &mut self,
        order: &[usize],
        guards: &mut [OwnedMutexGuard<Client>],
    ) -> Result<usize> {
        let mut ready: Vec<Option<Result<String>>> = (0..self.slots.len()).map(|_| None).collect();

        let busy: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&idx| self.slots[idx].job.is_some())
            .collect();
        if busy.is_empty() {
            return Ok(0);
        }

        // Wait for the first busy client to answer.
        {
            let waiting = guards
                .iter_mut()
                .enumerate()
                .filter(|(idx, _)| busy.contains(idx))
                .map(|(idx, guard)| Box::pin(async move { (idx, guard.next_line().await) }));

            if let Ok(((idx, line), _, _)) = timeout(self.timeout, select_all(waiting)).await {
                ready[idx] = Some(line);
            }
        }

        // Pick up everyone else who is already done.
        for &idx in &busy {
            if ready[idx].is_none() {
                ready[idx] = guards[idx].try_line();
            }
        }

        let mut completed = 0;

        for &idx in &busy {
            let slot = &mut self.slots[idx];
            let guard = &guards[idx];

            let outcome = match ready[idx].take() {
                Some(Ok(line)) => guard.parse_output(&line, true),
                Some(Err(err)) => Err(err),
                None => match slot.dispatched {
                    Some(at) if at.elapsed() >= guard.timeout() => Err(Error::Timeout(format!(
                        "no response from '{}' after {}ms",
                        slot.name,
                        guard.timeout().as_millis()
                    ))),
                    _ => continue,
                },
            };

            let Some(mut job) = slot.job.take() else { continue };
            slot.dispatched = None;

            match outcome {
                Ok(result) => job.finish(result)?,
                Err(err) => {
                    // A worker error leaves the stream in lockstep; anything
                    // else means the connection can no longer be trusted.
                    if !matches!(err, Error::Remote { .. }) {
                        warn!(client = %slot.name, "client failed: {err}");
                        slot.failed = true;
                    }
                    job.fail(err.code(), err.to_string())?;
                }
            }

            debug!(
                client = %slot.name,
                command = %job.command().to_log(),
                error = job.is_error(),
                "job complete"
            );
            self.completed.push_back(job);
            completed += 1;
        }

        Ok(completed)
    }

    /// With every client failed, queued jobs would never run. Each one is
    /// handed to a failed client in turn and fails there.
    fn abandon_if_no_client(&mut self) -> Result<usize> {
        if self.pending.is_empty() || self.slots.iter().any(|slot| !slot.failed) {
            return Ok(0);
        }

        let mut completed = 0;
        while let Some(head) = self.pending.front_mut() {
            head.start((completed % self.slots.len()) as u32 + 1)?;
            let Some(mut job) = self.pending.pop_front() else { break };
            job.fail(
                ErrorKind::Execute.code(),
                format!("no worker available to run {}", job.command().to_log()),
            )?;
            self.completed.push_back(job);
            completed += 1;
        }
        Ok(completed)
    }
}
