pub mod events;
pub mod invoker;
pub mod runner;
pub mod templates;

pub use invoker::{AgentInvoker, AgentResult};
pub use runner::{AgentRequest, AgentRunner, CliAgentRunner, RawAgentOutput};
