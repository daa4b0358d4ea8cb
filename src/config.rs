use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for one LLM model class.
#[derive(Debug, Clone)]
pub struct LlmEndpoint {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl LlmEndpoint {
    fn from_env(prefix: &str, default_model: &str) -> Self {
        Self {
            api_key: env_str(&format!("{prefix}_API_KEY")).unwrap_or_default(),
            model: env_str(&format!("{prefix}_MODEL"))
                .unwrap_or_else(|| default_model.to_string()),
            base_url: env_str(&format!("{prefix}_BASE_URL"))
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        }
    }
}

/// Process configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub basic: LlmEndpoint,
    pub reasoning: LlmEndpoint,
    pub vision: LlmEndpoint,

    pub tavily_api_key: String,
    pub tavily_max_results: usize,

    pub chrome_instance_path: Option<String>,
    pub chrome_headless: bool,
    pub chrome_proxy_server: Option<String>,
    pub chrome_proxy_username: Option<String>,
    pub chrome_proxy_password: Option<String>,
    pub browser_text_only: bool,
    pub browser_history_dir: PathBuf,

    /// `DATABASE_URL`; `None` falls back to the local embedded store.
    pub database_url: Option<String>,

    /// Soft per-run deadline; the run is cancelled when it fires.
    pub workflow_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let browser_history_dir = env_str("BROWSER_HISTORY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".deepmedical")
                    .join("browser_history")
            });

        Self {
            basic: LlmEndpoint::from_env("BASIC", "gpt-4o-mini"),
            reasoning: LlmEndpoint::from_env("REASONING", "o3-mini"),
            vision: LlmEndpoint::from_env("VL", "gpt-4o"),
            tavily_api_key: env_str("TAVILY_API_KEY").unwrap_or_default(),
            tavily_max_results: env_str("TAVILY_MAX_RESULTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            chrome_instance_path: env_str("CHROME_INSTANCE_PATH"),
            chrome_headless: env_flag("CHROME_HEADLESS", true),
            chrome_proxy_server: env_str("CHROME_PROXY_SERVER"),
            chrome_proxy_username: env_str("CHROME_PROXY_USERNAME"),
            chrome_proxy_password: env_str("CHROME_PROXY_PASSWORD"),
            browser_text_only: env_flag("BROWSER_USE_TEXT_ONLY", false),
            browser_history_dir,
            database_url: env_str("DATABASE_URL"),
            workflow_timeout: Duration::from_secs(
                env_str("WORKFLOW_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(900),
            ),
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str, default: bool) -> bool {
    match env_str(key) {
        Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "y"),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_recognizes_truthy_values() {
        unsafe {
            std::env::set_var("DEEPMEDICAL_TEST_FLAG_A", "Yes");
        }
        assert!(env_flag("DEEPMEDICAL_TEST_FLAG_A", false));
        unsafe {
            std::env::set_var("DEEPMEDICAL_TEST_FLAG_A", "0");
        }
        assert!(!env_flag("DEEPMEDICAL_TEST_FLAG_A", true));
    }

    #[test]
    fn env_flag_falls_back_to_default_when_unset() {
        assert!(env_flag("DEEPMEDICAL_TEST_FLAG_MISSING", true));
        assert!(!env_flag("DEEPMEDICAL_TEST_FLAG_MISSING", false));
    }

    #[test]
    fn llm_endpoint_defaults_apply_without_env() {
        let ep = LlmEndpoint::from_env("DEEPMEDICAL_TEST_UNSET", "fallback-model");
        assert_eq!(ep.model, "fallback-model");
        assert_eq!(ep.base_url, "https://api.openai.com/v1");
        assert!(ep.api_key.is_empty());
    }
}
