//! One unit of work for the parallel scheduler and its terminal outcome.

use serde_json::Value;
use strum_macros::{Display, EnumString};

use crate::command::Command;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Result(Option<Value>),
    Error { code: i64, message: String },
}

#[derive(Debug, Clone)]
pub struct Job {
    key: Value,
    command: Command,
    state: JobState,
    process_id: Option<u32>,
    outcome: Option<Outcome>,
}

impl Job {
    /// `key` is opaque to the engine and only lets the caller match results
    /// with what it submitted.
    pub fn new(key: impl Into<Value>, command: Command) -> Self {
        Self {
            key: key.into(),
            command,
            state: JobState::Pending,
            process_id: None,
            outcome: None,
        }
    }

    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// 1-based index of the client that ran (or is running) the job.
    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    /// Validates a move along `pending -> running -> done`. Reached only
    /// through [`Job::start`], [`Job::finish`] and [`Job::fail`] so that every
    /// state carries its data.
    fn state_set(&mut self, next: JobState) -> Result<()> {
        let legal = matches!(
            (self.state, next),
            (JobState::Pending, JobState::Running) | (JobState::Running, JobState::Done)
        );

        if !legal {
            return Err(Error::State(format!(
                "invalid state transition from '{}' to '{}'",
                self.state, next
            )));
        }

        self.state = next;
        Ok(())
    }

    pub(crate) fn start(&mut self, process_id: u32) -> Result<()> {
        self.state_set(JobState::Running)?;
        self.process_id = Some(process_id);
        Ok(())
    }

    pub(crate) fn finish(&mut self, result: Option<Value>) -> Result<()> {
        self.state_set(JobState::Done)?;
        self.outcome = Some(Outcome::Result(result));
        Ok(())
    }

    pub(crate) fn fail(&mut self, code: i64, message: impl Into<String>) -> Result<()> {
        self.state_set(JobState::Done)?;
        self.outcome = Some(Outcome::Error { code, message: message.into() });
        Ok(())
    }

    /// Output of a successful job. `None` when the job failed, is not done,
    /// or the worker sent no `out`.
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Some(Outcome::Result(result)) => result.as_ref(),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Error { .. }))
    }

    pub fn error_code(&self) -> Option<i64> {
        match &self.outcome {
            Some(Outcome::Error { code, .. }) => Some(*code),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Some(Outcome::Error { message, .. }) => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job::new("test", Command::new("command"))
    }

    #[test]
    fn only_forward_transitions_are_legal() {
        let all = [JobState::Pending, JobState::Running, JobState::Done];

        for from in all {
            for to in all {
                let mut job = job();
                match from {
                    JobState::Pending => {}
                    JobState::Running => job.state_set(JobState::Running).unwrap(),
                    JobState::Done => {
                        job.state_set(JobState::Running).unwrap();
                        job.state_set(JobState::Done).unwrap();
                    }
                }

                let legal = matches!(
                    (from, to),
                    (JobState::Pending, JobState::Running) | (JobState::Running, JobState::Done)
                );
                let result = job.state_set(to);

                if legal {
                    assert!(result.is_ok(), "{from} -> {to}");
                    assert_eq!(job.state(), to);
                } else {
                    let err = result.unwrap_err();
                    assert!(matches!(err, Error::State(_)));
                    assert_eq!(
                        err.to_string(),
                        format!("invalid state transition from '{from}' to '{to}'")
                    );
                    assert_eq!(job.state(), from);
                }
            }
        }
    }

    #[test]
    fn done_always_holds_an_outcome() {
        // no output from the worker is still a recorded result
        let mut silent = job();
        silent.start(1).unwrap();
        silent.finish(None).unwrap();
        assert_eq!(silent.state(), JobState::Done);
        assert_eq!(silent.outcome, Some(Outcome::Result(None)));
        assert!(!silent.is_error());

        // a pending job cannot finish, and nothing is recorded
        let mut pending = job();
        let err = pending.finish(Some(json!(1))).unwrap_err();
        assert_eq!(err.to_string(), "invalid state transition from 'pending' to 'done'");
        let err = pending.fail(25, "early").unwrap_err();
        assert_eq!(err.to_string(), "invalid state transition from 'pending' to 'done'");
        assert_eq!(pending.state(), JobState::Pending);
        assert_eq!(pending.outcome, None);
        assert_eq!(pending.process_id(), None);
    }

    #[test]
    fn running_always_holds_a_worker() {
        let mut running = job();
        running.start(3).unwrap();
        assert_eq!(running.state(), JobState::Running);
        assert_eq!(running.process_id(), Some(3));

        let err = running.start(4).unwrap_err();
        assert_eq!(err.to_string(), "invalid state transition from 'running' to 'running'");
        assert_eq!(running.process_id(), Some(3));
    }

    #[test]
    fn exact_transition_messages() {
        let mut job = job();
        assert_eq!(
            job.state_set(JobState::Done).unwrap_err().to_string(),
            "invalid state transition from 'pending' to 'done'"
        );
        job.state_set(JobState::Running).unwrap();
        assert_eq!(
            job.state_set(JobState::Pending).unwrap_err().to_string(),
            "invalid state transition from 'running' to 'pending'"
        );
    }

    #[test]
    fn done_job_holds_one_outcome() {
        let mut ok = job();
        ok.start(2).unwrap();
        ok.finish(Some(json!(1))).unwrap();
        assert_eq!(ok.process_id(), Some(2));
        assert_eq!(ok.result(), Some(&json!(1)));
        assert!(!ok.is_error());
        assert_eq!(ok.error_code(), None);

        // no mutation once done
        assert!(ok.fail(25, "late").is_err());
        assert_eq!(ok.result(), Some(&json!(1)));

        let mut failed = job();
        failed.start(1).unwrap();
        failed.fail(39, "very serious error").unwrap();
        assert!(failed.is_error());
        assert_eq!(failed.error_code(), Some(39));
        assert_eq!(failed.error_message(), Some("very serious error"));
        assert_eq!(failed.result(), None);
        assert_eq!(failed.key(), &json!("test"));
    }
}
