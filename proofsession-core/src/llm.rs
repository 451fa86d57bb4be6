//! OpenAI-compatible chat completions, used as the default proof generator.
//!
//! Provider routing (first usable one in `PROOFSESSION_PROVIDER_ORDER`,
//! default `ollama,groq,openrouter,openai`):
//! - `OLLAMA_MODEL` (+ optional `OLLAMA_HOST`)
//! - `GROQ_API_KEY` and `GROQ_MODEL`
//! - `OPENROUTER_API_KEY` and `OPENROUTER_MODEL` (+ optional `OPENROUTER_BASE_URL`)
//! - `OPENAI_API_KEY` and `OPENAI_MODEL` (+ optional `OPENAI_BASE_URL`)

use crate::prover::{ChatTurn, ProofGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResult {
    pub provider: String,
    pub model: String,
    pub content: String,
    pub raw: Value,
}

#[derive(Debug, Clone)]
struct Provider {
    name: &'static str,
    base_url: String,
    api_key_env: Option<&'static str>,
    model_env: &'static str,
}

fn base_url_from_env(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn providers_from_env() -> Vec<Provider> {
    vec![
        Provider {
            name: "ollama",
            base_url: base_url_from_env("OLLAMA_HOST", "http://localhost:11434"),
            api_key_env: None,
            model_env: "OLLAMA_MODEL",
        },
        Provider {
            name: "groq",
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: Some("GROQ_API_KEY"),
            model_env: "GROQ_MODEL",
        },
        Provider {
            name: "openrouter",
            base_url: base_url_from_env("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1"),
            api_key_env: Some("OPENROUTER_API_KEY"),
            model_env: "OPENROUTER_MODEL",
        },
        Provider {
            name: "openai",
            base_url: base_url_from_env("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            api_key_env: Some("OPENAI_API_KEY"),
            model_env: "OPENAI_MODEL",
        },
    ]
}

fn provider_order() -> Vec<String> {
    if let Ok(v) = std::env::var("PROOFSESSION_PROVIDER_ORDER") {
        let v = v.trim().to_string();
        if !v.is_empty() {
            return v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    vec!["ollama".into(), "groq".into(), "openrouter".into(), "openai".into()]
}

fn env_nonempty(key: &str) -> bool {
    !std::env::var(key).ok().unwrap_or_default().trim().is_empty()
}

async fn is_ollama_reachable(base_url: &str, timeout: Duration) -> bool {
    let Ok(client) = reqwest::Client::builder().timeout(timeout).build() else {
        return false;
    };
    for u in [format!("{base_url}/v1/models"), format!("{base_url}/api/tags")] {
        if let Ok(resp) = client.get(u).send().await {
            // 401/404 still mean something is listening.
            if matches!(resp.status().as_u16(), 200 | 401 | 404) {
                return true;
            }
        }
    }
    false
}

async fn select_provider(timeout: Duration) -> Result<(Provider, String), String> {
    let provs = providers_from_env();
    for name in provider_order() {
        let Some(p) = provs.iter().find(|pp| pp.name == name).cloned() else {
            continue;
        };
        let model = std::env::var(p.model_env).ok().unwrap_or_default();
        let model = model.trim().to_string();
        if model.is_empty() {
            continue;
        }
        if let Some(k) = p.api_key_env {
            if !env_nonempty(k) {
                continue;
            }
        }
        if p.name == "ollama" && !is_ollama_reachable(&p.base_url, timeout).await {
            continue;
        }
        return Ok((p, model));
    }
    Err("No usable provider found. Set one of:\n\
- OLLAMA_MODEL (+ optional OLLAMA_HOST)\n\
- GROQ_API_KEY and GROQ_MODEL\n\
- OPENROUTER_API_KEY and OPENROUTER_MODEL\n\
- OPENAI_API_KEY and OPENAI_MODEL\n\
Optionally set PROOFSESSION_PROVIDER_ORDER."
        .to_string())
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

/// `POST <base_url>/chat/completions` with the whole conversation.
pub async fn chat_completion(
    turns: &[ChatTurn],
    temperature: f32,
    timeout: Duration,
) -> Result<ChatCompletionResult, String> {
    let (provider, model) = select_provider(Duration::from_secs(3)).await?;

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    if let Some(k) = provider.api_key_env {
        let key = std::env::var(k).ok().unwrap_or_default();
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("missing {k}"));
        }
        let hv = reqwest::header::HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|e| format!("invalid Authorization header: {e}"))?;
        headers.insert(reqwest::header::AUTHORIZATION, hv);
    }

    let payload = serde_json::json!({
        "model": model,
        "messages": turns,
        "temperature": temperature,
    });

    let url = format!("{}/chat/completions", provider.base_url);
    debug!(provider = provider.name, %model, turns = turns.len(), "chat completion");
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| format!("http client build: {e}"))?;
    let resp = client
        .post(url)
        .json(&payload)
        .send()
        .await
        .map_err(|e| format!("http request failed: {e}"))?;

    let status = resp.status();
    let raw: Value = resp.json().await.map_err(|e| format!("http json decode: {e}"))?;
    if !status.is_success() {
        return Err(format!(
            "provider {} returned {}: {}",
            provider.name,
            status.as_u16(),
            raw
        ));
    }

    let parsed: ChatCompletionResponse =
        serde_json::from_value(raw.clone()).map_err(|e| format!("invalid chat response: {e}"))?;
    let content = parsed
        .choices
        .first()
        .and_then(|c| c.message.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| "missing choices[0].message.content".to_string())?
        .to_string();

    Ok(ChatCompletionResult {
        provider: provider.name.to_string(),
        model,
        content,
        raw,
    })
}

/// [`ProofGenerator`] backed by [`chat_completion`].
#[derive(Debug, Clone)]
pub struct ChatGenerator {
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for ChatGenerator {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            timeout: Duration::from_secs(300),
        }
    }
}

#[async_trait]
impl ProofGenerator for ChatGenerator {
    async fn generate(&self, turns: &[ChatTurn]) -> Result<String, String> {
        chat_completion(turns, self.temperature, self.timeout)
            .await
            .map(|r| r.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            Self {
                saved: keys.iter().map(|k| (k.to_string(), std::env::var(k).ok())).collect(),
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (k, v) in self.saved.drain(..) {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    fn env_lock() -> &'static std::sync::Mutex<()> {
        static LOCK: OnceLock<std::sync::Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| std::sync::Mutex::new(()))
    }

    const KEYS: &[&str] = &[
        "PROOFSESSION_PROVIDER_ORDER",
        "OLLAMA_MODEL",
        "GROQ_API_KEY",
        "GROQ_MODEL",
        "OPENROUTER_API_KEY",
        "OPENROUTER_MODEL",
        "OPENAI_API_KEY",
        "OPENAI_MODEL",
    ];

    #[test]
    fn provider_order_default() {
        let _lock = env_lock().lock().unwrap();
        let _g = EnvGuard::new(KEYS);
        std::env::remove_var("PROOFSESSION_PROVIDER_ORDER");
        assert_eq!(provider_order(), vec!["ollama", "groq", "openrouter", "openai"]);
    }

    #[tokio::test]
    async fn select_provider_openrouter_by_env() {
        let _lock = env_lock().lock().unwrap();
        let _g = EnvGuard::new(KEYS);
        for k in KEYS {
            std::env::remove_var(k);
        }
        std::env::set_var("PROOFSESSION_PROVIDER_ORDER", "openrouter");
        std::env::set_var("OPENROUTER_API_KEY", "test_key");
        std::env::set_var("OPENROUTER_MODEL", "deepseek/deepseek-prover-v2");

        let (p, model) = select_provider(Duration::from_millis(10))
            .await
            .expect("expected provider");
        assert_eq!(p.name, "openrouter");
        assert_eq!(model, "deepseek/deepseek-prover-v2");
    }

    #[tokio::test]
    async fn select_provider_errors_when_unconfigured() {
        let _lock = env_lock().lock().unwrap();
        let _g = EnvGuard::new(KEYS);
        for k in KEYS {
            std::env::remove_var(k);
        }
        std::env::set_var("PROOFSESSION_PROVIDER_ORDER", "openrouter,openai,groq");

        let err = select_provider(Duration::from_millis(10)).await.unwrap_err();
        assert!(err.contains("No usable provider found"));
    }
}
