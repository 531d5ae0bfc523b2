use serde_json::Value;

use crate::wire::Request;

pub const COMMAND_NOOP: &str = "noop";
pub const COMMAND_EXIT: &str = "exit";

/// A named command with ordered parameters, as sent to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: String,
    params: Vec<Value>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), params: Vec::new() }
    }

    /// Builder-style parameter append.
    pub fn param(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn to_log(&self) -> String {
        format!("{{command: {}}}", self.name)
    }

    pub(crate) fn to_request(&self) -> Request {
        Request { cmd: self.name.clone(), param: self.params.clone() }
    }
}
