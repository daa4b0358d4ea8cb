//! Instruction-driven headless browser.
//!
//! Chrome work happens inside `spawn_blocking` in short steps; between steps
//! the run's cancellation token is polled so an abandoned run releases its
//! browser within one step. The pool bounds total concurrent sessions and
//! keeps a handle per run so cancellation can reach the active session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use regex::Regex;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::{Tool, ToolContext, ToolError};
use crate::config::Config;
use crate::core::llm::{ChatMessage, LlmClass, LlmHub};

/// Upper bound on concurrently open Chrome sessions across all runs.
const MAX_SESSIONS: usize = 2;
const PAGE_TEXT_MAX_CHARS: usize = 10_000;

#[derive(Clone)]
struct LaunchSettings {
    instance_path: Option<String>,
    headless: bool,
    proxy_server: Option<String>,
}

/// Process-wide browser session pool: at most one session per run, bounded
/// total concurrency, and a terminate path for cancellation.
pub struct BrowserPool {
    permits: Arc<Semaphore>,
    active: Mutex<HashMap<String, Browser>>,
    launch: Option<LaunchSettings>,
}

impl BrowserPool {
    pub fn new(cfg: &Config) -> Self {
        // Chrome takes proxy credentials in the --proxy-server URL itself.
        let proxy_server = cfg.chrome_proxy_server.clone().map(|server| {
            match (&cfg.chrome_proxy_username, &cfg.chrome_proxy_password) {
                (Some(user), Some(pass)) => format!("{user}:{pass}@{server}"),
                (Some(user), None) => format!("{user}@{server}"),
                _ => server,
            }
        });
        Self {
            permits: Arc::new(Semaphore::new(MAX_SESSIONS)),
            active: Mutex::new(HashMap::new()),
            launch: Some(LaunchSettings {
                instance_path: cfg.chrome_instance_path.clone(),
                headless: cfg.chrome_headless,
                proxy_server,
            }),
        }
    }

    /// A pool that refuses every acquisition; used where no Chrome exists.
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            active: Mutex::new(HashMap::new()),
            launch: None,
        }
    }

    async fn acquire(
        self: &Arc<Self>,
        run_id: &str,
        ctx: &ToolContext,
    ) -> Result<BrowserLease, ToolError> {
        let Some(launch) = self.launch.clone() else {
            return Err(ToolError::Permanent(
                "browser driving is not available".to_string(),
            ));
        };

        {
            let active = self.active.lock().expect("browser pool lock");
            if active.contains_key(run_id) {
                return Err(ToolError::Validation(
                    "this run already holds a browser session".to_string(),
                ));
            }
        }

        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => permit
                .map_err(|_| ToolError::Permanent("browser pool closed".to_string()))?,
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::Permanent("cancelled".to_string()));
            }
        };

        let browser = tokio::task::spawn_blocking(move || launch_browser(&launch))
            .await
            .map_err(|e| ToolError::Permanent(format!("browser launch task: {e}")))??;

        self.active
            .lock()
            .expect("browser pool lock")
            .insert(run_id.to_string(), browser.clone());
        info!(run_id, "browser session opened");

        Ok(BrowserLease {
            pool: self.clone(),
            run_id: run_id.to_string(),
            browser,
            _permit: permit,
        })
    }

    /// Drop the pool's handle for a run. The Chrome process dies as soon as
    /// the last clone (held briefly by an in-flight blocking step) goes away.
    pub fn terminate_run(&self, run_id: &str) {
        let removed = self
            .active
            .lock()
            .expect("browser pool lock")
            .remove(run_id)
            .is_some();
        if removed {
            info!(run_id, "browser session terminated");
        }
    }

    pub fn has_session(&self, run_id: &str) -> bool {
        self.active
            .lock()
            .expect("browser pool lock")
            .contains_key(run_id)
    }
}

struct BrowserLease {
    pool: Arc<BrowserPool>,
    run_id: String,
    browser: Browser,
    _permit: OwnedSemaphorePermit,
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        self.pool.terminate_run(&self.run_id);
    }
}

fn launch_browser(settings: &LaunchSettings) -> Result<Browser, ToolError> {
    let mut builder = LaunchOptions::default_builder();
    builder.headless(settings.headless);
    if let Some(ref path) = settings.instance_path {
        builder.path(Some(PathBuf::from(path)));
    }
    if let Some(ref proxy) = settings.proxy_server {
        builder.proxy_server(Some(proxy.as_str()));
    }
    let options = builder
        .build()
        .map_err(|e| ToolError::Permanent(format!("browser launch options: {e}")))?;
    Browser::new(options).map_err(|e| {
        ToolError::Permanent(format!(
            "Chrome launch failed: {e}. Install Chrome or set CHROME_INSTANCE_PATH."
        ))
    })
}

fn first_url(text: &str) -> Option<String> {
    let re = Regex::new(r"https?://[^\s)\]>'\x22]+").expect("url regex");
    re.find(text).map(|m| m.as_str().to_string())
}

pub struct BrowserTool {
    llm: Arc<LlmHub>,
    pool: Arc<BrowserPool>,
    text_only: bool,
    history_dir: PathBuf,
}

impl BrowserTool {
    pub fn new(cfg: &Config, llm: Arc<LlmHub>, pool: Arc<BrowserPool>) -> Self {
        Self {
            llm,
            pool,
            text_only: cfg.browser_text_only,
            history_dir: cfg.browser_history_dir.clone(),
        }
    }

    fn fetch_page_text(browser: &Browser, url: &str) -> Result<String, ToolError> {
        let tab = browser
            .new_tab()
            .map_err(|e| ToolError::Network(format!("browser tab: {e}")))?;
        tab.navigate_to(url)
            .map_err(|e| ToolError::Network(format!("navigate to {url}: {e}")))?;
        tab.wait_for_element("body")
            .map_err(|e| ToolError::Timeout(format!("page load for {url}: {e}")))?;
        let content = tab
            .get_content()
            .map_err(|e| ToolError::Network(format!("page content: {e}")))?;

        let text = html2text::from_read(content.as_bytes(), 120);
        if text.chars().count() > PAGE_TEXT_MAX_CHARS {
            Ok(text.chars().take(PAGE_TEXT_MAX_CHARS).collect::<String>() + "\n...[truncated]")
        } else {
            Ok(text)
        }
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn description(&self) -> &'static str {
        "Drive a real browser. Give a natural-language instruction that names the URL to \
         visit, e.g. 'Go to https://clinicaltrials.gov and find trials for condition X'."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "instruction": {
                    "type": "string",
                    "description": "What to do in the browser; must mention a concrete URL"
                },
                "url": {"type": "string", "description": "Optional explicit URL override"}
            },
            "required": ["instruction"]
        })
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let instruction = args
            .get("instruction")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .ok_or_else(|| {
                ToolError::Validation("missing required field: instruction".to_string())
            })?;

        let url = args
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| first_url(instruction))
            .ok_or_else(|| {
                ToolError::Validation(
                    "instruction must include the URL to visit (or pass `url`)".to_string(),
                )
            })?;

        let lease = self.pool.acquire(&ctx.run_id, ctx).await?;
        let trace_path = self
            .history_dir
            .join(format!("{}.gif", uuid::Uuid::new_v4()));

        debug!(url, "browser navigating");
        let browser = lease.browser.clone();
        let nav_url = url.clone();
        let page_text = tokio::select! {
            text = tokio::task::spawn_blocking(move || Self::fetch_page_text(&browser, &nav_url)) => {
                text.map_err(|e| ToolError::Permanent(format!("browser task: {e}")))??
            }
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::Permanent("cancelled".to_string()));
            }
        };

        // Vision unless the deployment opted into text-only driving.
        let class = if self.text_only {
            LlmClass::Basic
        } else {
            LlmClass::Vision
        };
        let client = self.llm.client_for(class);

        let messages = vec![
            ChatMessage::system(
                "You are operating a web browser for a research team. Below is the readable \
                 content of the page you navigated to. Carry out the instruction against it \
                 and report what you found, quoting the page where useful.",
            ),
            ChatMessage::user(format!(
                "Instruction: {instruction}\n\nPage ({url}):\n{page_text}"
            )),
        ];

        let result_content = tokio::select! {
            out = client.generate(&messages) => out.map_err(|e| {
                ToolError::Network(format!("browser model call: {e}"))
            })?,
            _ = ctx.cancel.cancelled() => {
                return Err(ToolError::Permanent("cancelled".to_string()));
            }
        };

        if let Err(e) = std::fs::create_dir_all(&self.history_dir) {
            warn!("Could not create browser history dir: {e}");
        }

        serde_json::to_string(&serde_json::json!({
            "result_content": result_content,
            "generated_gif_path": trace_path.to_string_lossy(),
        }))
        .map_err(|e| ToolError::Permanent(format!("serializing browser result: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn first_url_finds_embedded_urls() {
        assert_eq!(
            first_url("go to https://example.com/page?q=1 and read it"),
            Some("https://example.com/page?q=1".to_string())
        );
        assert_eq!(first_url("no links here"), None);
    }

    #[test]
    fn first_url_stops_at_closing_punctuation() {
        assert_eq!(
            first_url("(see https://example.com/a)"),
            Some("https://example.com/a".to_string())
        );
    }

    #[tokio::test]
    async fn disabled_pool_refuses_acquisition() {
        let pool = Arc::new(BrowserPool::disabled());
        let ctx = ToolContext {
            tool_call_id: "wf_browser_browser_0".to_string(),
            run_id: "wf".to_string(),
            cancel: CancellationToken::new(),
        };
        let out = pool.acquire("wf", &ctx).await;
        assert!(out.is_err());
    }

    #[test]
    fn terminate_run_on_empty_pool_is_a_no_op() {
        let pool = BrowserPool::disabled();
        pool.terminate_run("nope");
        assert!(!pool.has_session("nope"));
    }
}
