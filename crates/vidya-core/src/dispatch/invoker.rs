//! Agent invocation transport adapters
//!
//! The dispatcher never talks to an agent directly; it hands the agent's
//! connection descriptor to the `AgentClient`, which routes the call through
//! an in-process handler or an HTTP endpoint. Transport failures are mapped
//! to the typed agent errors so the fallback chain can distinguish a timeout
//! (retry once) from an application failure (move to the secondary arm).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::registry::{AgentDescriptor, AgentProbe, ConnectionDescriptor, Health, InputType};

/// One agent invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub agent_id: String,
    pub model_id: String,
    pub input: String,
    pub input_type: InputType,
    /// Retrieval snippets attached for knowledge-seeking agents
    #[serde(default)]
    pub context: Vec<String>,
}

/// A successful agent reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub output: String,
    /// Agent-reported confidence, when the agent provides one
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Wire format of an HTTP agent's `/invoke` response
#[derive(Debug, Deserialize)]
struct InvokeWireReply {
    status: String,
    #[serde(default)]
    output: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

/// Invoke an agent with a bounded timeout
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(
        &self,
        descriptor: &AgentDescriptor,
        request: InvokeRequest,
        timeout: Duration,
    ) -> Result<AgentReply>;
}

/// In-process agent implementation registered on the client
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, request: &InvokeRequest) -> Result<AgentReply>;
}

/// Transport client routing invocations by connection descriptor
pub struct AgentClient {
    handlers: HashMap<String, Arc<dyn AgentHandler>>,
    http: reqwest::Client,
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentClient {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Register an in-process handler for an agent id
    pub fn with_handler(mut self, agent_id: impl Into<String>, handler: Arc<dyn AgentHandler>) -> Self {
        self.handlers.insert(agent_id.into(), handler);
        self
    }

    async fn invoke_in_process(
        &self,
        descriptor: &AgentDescriptor,
        request: InvokeRequest,
        timeout: Duration,
    ) -> Result<AgentReply> {
        let handler = self
            .handlers
            .get(&descriptor.id)
            .ok_or_else(|| Error::AgentNotFound(descriptor.id.clone()))?;

        match tokio::time::timeout(timeout, handler.handle(&request)).await {
            Ok(reply) => reply,
            Err(_) => Err(Error::AgentTimeout(descriptor.id.clone())),
        }
    }

    async fn invoke_http(
        &self,
        descriptor: &AgentDescriptor,
        endpoint: &str,
        request: InvokeRequest,
        timeout: Duration,
    ) -> Result<AgentReply> {
        let url = format!("{}/invoke", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::AgentTimeout(descriptor.id.clone())
                } else {
                    Error::AgentApplication {
                        agent_id: descriptor.id.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::AgentApplication {
                agent_id: descriptor.id.clone(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let reply: InvokeWireReply = response.json().await.map_err(|e| Error::AgentApplication {
            agent_id: descriptor.id.clone(),
            message: format!("Malformed reply: {e}"),
        })?;

        if reply.status != "ok" {
            return Err(Error::AgentApplication {
                agent_id: descriptor.id.clone(),
                message: reply.message.unwrap_or_else(|| "Agent reported failure".to_string()),
            });
        }

        Ok(AgentReply {
            output: reply.output,
            confidence: reply.confidence,
        })
    }
}

#[async_trait]
impl AgentInvoker for AgentClient {
    async fn invoke(
        &self,
        descriptor: &AgentDescriptor,
        request: InvokeRequest,
        timeout: Duration,
    ) -> Result<AgentReply> {
        debug!(agent = %descriptor.id, model = %request.model_id, "Invoking agent");
        match &descriptor.connection {
            ConnectionDescriptor::InProcess => {
                self.invoke_in_process(descriptor, request, timeout).await
            }
            ConnectionDescriptor::Http { endpoint } => {
                self.invoke_http(descriptor, endpoint, request, timeout).await
            }
        }
    }
}

#[async_trait]
impl AgentProbe for AgentClient {
    async fn probe(&self, descriptor: &AgentDescriptor) -> Health {
        match &descriptor.connection {
            ConnectionDescriptor::InProcess => {
                if self.handlers.contains_key(&descriptor.id) {
                    Health::Healthy
                } else {
                    Health::Unavailable
                }
            }
            ConnectionDescriptor::Http { endpoint } => {
                let url = format!("{}/health", endpoint.trim_end_matches('/'));
                match self
                    .http
                    .get(&url)
                    .timeout(Duration::from_secs(5))
                    .send()
                    .await
                {
                    Ok(response) if response.status().is_success() => Health::Healthy,
                    Ok(response) => {
                        warn!(agent = %descriptor.id, status = %response.status(), "Health probe rejected");
                        Health::Degraded
                    }
                    Err(e) => {
                        warn!(agent = %descriptor.id, error = %e, "Health probe failed");
                        Health::Unavailable
                    }
                }
            }
        }
    }
}
