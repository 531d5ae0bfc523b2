pub mod config;
pub mod exec;
pub mod helper;
pub mod logger;
pub mod worker;
