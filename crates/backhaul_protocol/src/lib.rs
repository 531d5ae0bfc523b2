//! Protocol engine shared by the backhaul controller and its workers.
//!
//! * [`wire`]: newline-delimited JSON frames
//! * [`Client`] / [`Server`]: the two ends of one session
//! * [`Job`] / [`Parallel`]: many jobs multiplexed over a fixed set of clients

pub mod client;
pub mod command;
pub mod error;
pub mod io;
pub mod job;
pub mod parallel;
pub mod server;
pub mod wire;

pub use client::{Client, SharedClient};
pub use command::Command;
pub use error::{Error, ErrorKind, Result};
pub use io::{ReadStream, WriteStream};
pub use job::{Job, JobState};
pub use parallel::Parallel;
pub use server::{Handler, Responder, Server};
