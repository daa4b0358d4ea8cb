pub mod abstracts;
pub mod browser;
pub mod crawl;
pub mod exec;
pub mod search;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::core::llm::LlmHub;
use crate::core::team::Worker;

/// Typed tool failures. Nothing panics or escapes the layer as a raw error:
/// the caller decides per variant whether to retry or surface the text.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("invalid arguments: {0}")]
    Validation(String),
    #[error("{0}")]
    Permanent(String),
}

impl ToolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Network(_) | ToolError::Timeout(_))
    }
}

/// Per-invocation context threaded into every tool: the run-unique call id
/// and the run's cancellation token. Long-running tools must poll the token
/// between steps.
pub struct ToolContext {
    pub tool_call_id: String,
    pub run_id: String,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the accepted arguments object.
    fn parameters(&self) -> Value;

    /// Idempotent tools are safe to retry on transient failures.
    fn idempotent(&self) -> bool {
        false
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError>;
}

const MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Invoke with bounded backoff. Only transient failures of idempotent tools
/// are retried; everything else surfaces on the first attempt.
pub async fn invoke_with_retry(
    tool: &Arc<dyn Tool>,
    args: Value,
    ctx: &ToolContext,
) -> Result<String, ToolError> {
    let mut attempt = 0;
    loop {
        match tool.invoke(args.clone(), ctx).await {
            Ok(out) => return Ok(out),
            Err(e) if e.is_transient() && tool.idempotent() && attempt < MAX_RETRIES => {
                attempt += 1;
                let delay = Duration::from_millis(RETRY_BASE_DELAY_MS * (1 << attempt));
                warn!(
                    tool = tool.name(),
                    attempt, "Transient tool failure, retrying: {e}"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancel.cancelled() => {
                        return Err(ToolError::Permanent("cancelled".to_string()));
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// The process-wide capability set, one instance per server.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    browser_pool: Arc<browser::BrowserPool>,
}

impl ToolRegistry {
    pub fn new(cfg: &Config, llm: Arc<LlmHub>) -> Self {
        let browser_pool = Arc::new(browser::BrowserPool::new(cfg));
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(search::WebSearchTool::new(cfg)),
            Arc::new(crawl::CrawlTool::new()),
            Arc::new(abstracts::AbstractSearchTool::new()),
            Arc::new(exec::PythonReplTool::new()),
            Arc::new(exec::BashTool::new()),
            Arc::new(browser::BrowserTool::new(
                cfg,
                llm,
                browser_pool.clone(),
            )),
        ];
        Self {
            tools,
            browser_pool,
        }
    }

    #[cfg(test)]
    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            tools,
            browser_pool: Arc::new(browser::BrowserPool::disabled()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn browser_pool(&self) -> Arc<browser::BrowserPool> {
        self.browser_pool.clone()
    }

    /// The tool kit a worker is allowed to drive.
    pub fn kit_for(&self, worker: Worker) -> Vec<Arc<dyn Tool>> {
        let names: &[&str] = match worker {
            Worker::Researcher => &["web_search", "crawl", "abstract_search"],
            Worker::Coder => &["python_repl", "bash_tool"],
            Worker::Browser => &["browser"],
            Worker::Reporter | Worker::Translator => &[],
            Worker::Coordinator | Worker::Planner | Worker::Supervisor => &[],
        };
        names.iter().filter_map(|n| self.get(n)).collect()
    }
}
