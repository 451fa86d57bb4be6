//! Environment-driven configuration.
//!
//! Env (all optional):
//! - `PROOFSESSION_REPO`: Lake project to verify in (bare `lean` when unset)
//! - `PROOFSESSION_TIMEOUT_S` (default: `180`)
//! - `PROOFSESSION_AUTO_BUILD` (default: on): `lake build` when build output is missing
//! - `PROOFSESSION_UNIQUE_NAMES` (default: on): per-session theorem renaming
//! - `LAKE`, `LEAN`: tool overrides (see [`crate::lake`])

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_S: u64 = 180;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub repo_root: Option<PathBuf>,
    pub timeout_s: u64,
    pub auto_build: bool,
    pub unique_names: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            repo_root: None,
            timeout_s: DEFAULT_TIMEOUT_S,
            auto_build: true,
            unique_names: true,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Read a JSON config file; env variables that are set still win.
    pub fn from_json_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config {}: {}", path.display(), e))?;
        let mut cfg: Self =
            serde_json::from_str(&text).map_err(|e| format!("invalid config {}: {}", path.display(), e))?;
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_nonempty("PROOFSESSION_REPO") {
            self.repo_root = Some(PathBuf::from(v));
        }
        if let Some(v) = env_nonempty("PROOFSESSION_TIMEOUT_S").and_then(|s| s.parse::<u64>().ok()) {
            self.timeout_s = v;
        }
        self.auto_build = env_truthy("PROOFSESSION_AUTO_BUILD", self.auto_build);
        self.unique_names = env_truthy("PROOFSESSION_UNIQUE_NAMES", self.unique_names);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s.max(1))
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn env_truthy(name: &str, default_on: bool) -> bool {
    let v = std::env::var(name).ok().unwrap_or_default();
    let v = v.trim().to_lowercase();
    if v.is_empty() {
        return default_on;
    }
    !matches!(v.as_str(), "0" | "false" | "no" | "off")
}

/// Parse a `.env` file, skipping keys that are already set in the environment.
pub fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Ok(text) = std::fs::read_to_string(path) else {
        return out;
    };
    for raw in text.lines() {
        let mut line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("export ") {
            line = rest.trim_start();
        }
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if k.is_empty() {
            continue;
        }
        let mut v = v.trim().to_string();
        if v.len() >= 2 {
            let bytes = v.as_bytes();
            let first = bytes[0];
            let last = bytes[bytes.len() - 1];
            if first == last && (first == b'"' || first == b'\'') {
                v = v[1..v.len() - 1].to_string();
            }
        }
        if std::env::var(k).ok().as_deref().unwrap_or("").is_empty() {
            out.insert(k.to_string(), v);
        }
    }
    out
}

/// Merge `<dir>/.env` into the process environment without overriding.
pub fn load_dotenv_if_present(dir: &Path) {
    for (k, v) in parse_dotenv(&dir.join(".env")) {
        if std::env::var(&k).ok().as_deref().unwrap_or("").is_empty() {
            std::env::set_var(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_strips_quotes_and_export() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join(".env");
        std::fs::write(
            &p,
            "# comment\nexport PROOFSESSION_TEST_A=\"quoted\"\nPROOFSESSION_TEST_B='single'\nnot a pair\n",
        )
        .unwrap();
        let m = parse_dotenv(&p);
        assert_eq!(m.get("PROOFSESSION_TEST_A").map(String::as_str), Some("quoted"));
        assert_eq!(m.get("PROOFSESSION_TEST_B").map(String::as_str), Some("single"));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn json_config_fills_defaults() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("cfg.json");
        std::fs::write(&p, r#"{"timeout_s": 30}"#).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        let cfg: SessionConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(cfg.timeout_s, 30);
        assert!(cfg.auto_build);
        assert!(cfg.unique_names);
        assert_eq!(cfg.repo_root, None);
    }
}
