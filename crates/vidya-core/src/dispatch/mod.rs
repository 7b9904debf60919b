//! Task dispatch
//!
//! The dispatcher executes a task end to end: registry lookup, bandit
//! selection, retrieval enrichment for knowledge-seeking agents, bounded
//! invocation with a single retry on timeout, secondary-arm fallback, and a
//! deterministic emergency response when every option is exhausted. Agents
//! are reached through transport adapters (in-process or HTTP) selected by
//! their connection descriptor.

mod dispatcher;
mod invoker;

pub use dispatcher::{DispatchResponse, Dispatcher};
pub use invoker::{AgentClient, AgentHandler, AgentInvoker, AgentReply, InvokeRequest};
