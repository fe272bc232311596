pub mod agent;
pub mod artifacts;
pub mod config;
pub mod environment;
pub mod error;
pub mod exit_codes;
pub mod platform;
pub mod shutdown;
pub mod workflow;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;
