//! Running Lean on a piece of text: `lake env lean` inside a Lake project,
//! or a bare `lean` when there is no project.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub ok: bool,
    pub timeout: bool,
    pub returncode: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub cmd: Vec<String>,
    pub cwd: String,
}

impl VerifyResult {
    fn failed(cmd: Vec<String>, cwd: &Path, timeout: bool, stderr: String) -> Self {
        Self {
            ok: false,
            timeout,
            returncode: None,
            stdout: String::new(),
            stderr,
            cmd,
            cwd: cwd.display().to_string(),
        }
    }
}

pub fn find_lean_repo_root(start: &Path) -> Result<PathBuf, String> {
    let mut cur = start
        .canonicalize()
        .map_err(|e| format!("failed to resolve start path {}: {}", start.display(), e))?;
    for _ in 0..80 {
        let has_toolchain = cur.join("lean-toolchain").exists();
        let has_lakefile = cur.join("lakefile.lean").exists() || cur.join("lakefile.toml").exists();
        if has_toolchain && has_lakefile {
            return Ok(cur);
        }
        if cur.join("leanpkg.toml").exists() {
            return Err(format!(
                "Lean 3 project detected at {} (found leanpkg.toml); only Lean 4 (Lake) projects are supported",
                cur.display()
            ));
        }
        match cur.parent() {
            Some(parent) if parent != cur => cur = parent.to_path_buf(),
            _ => break,
        }
    }
    Err(format!(
        "Could not find Lean repo root from {} (expected lean-toolchain + lakefile.*)",
        start.display()
    ))
}

fn resolve_elan_tool(env_key: &str, name: &str) -> PathBuf {
    if let Ok(v) = std::env::var(env_key) {
        let v = v.trim().to_string();
        if !v.is_empty() {
            return PathBuf::from(v);
        }
    }
    if let Some(home) = dirs::home_dir() {
        let p = home.join(".elan").join("bin").join(name);
        if p.exists() {
            return p;
        }
    }
    PathBuf::from(name)
}

/// `$LAKE`, then `~/.elan/bin/lake`, then `lake` on `PATH`.
pub fn resolve_lake() -> PathBuf {
    resolve_elan_tool("LAKE", "lake")
}

/// `$LEAN`, then `~/.elan/bin/lean`, then `lean` on `PATH`.
pub fn resolve_lean() -> PathBuf {
    resolve_elan_tool("LEAN", "lean")
}

fn looks_like_missing_olean(stdout: &str, stderr: &str) -> bool {
    let s = format!("{stdout}\n{stderr}");
    s.contains("object file '") && s.contains(".olean") && s.contains("does not exist")
}

async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> (bool, bool, Option<i32>, String, String) {
    match tokio::time::timeout(timeout, cmd.kill_on_drop(true).output()).await {
        Err(_) => (false, true, None, String::new(), String::new()),
        Ok(Err(e)) => (false, false, None, String::new(), format!("failed to execute: {e}")),
        Ok(Ok(output)) => (
            output.status.success(),
            false,
            output.status.code(),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ),
    }
}

/// `lake build` in `repo_root`; `Some(failure)` when it did not succeed.
async fn lake_build(lake: &Path, repo_root: &Path, timeout: Duration) -> Option<VerifyResult> {
    let cmd_vec = vec![lake.display().to_string(), "build".to_string()];
    debug!(repo = %repo_root.display(), "running lake build");
    let mut build_cmd = Command::new(lake);
    build_cmd.arg("build").current_dir(repo_root);
    let (ok, timeout, returncode, stdout, stderr) = run_with_timeout(&mut build_cmd, timeout).await;
    if ok {
        return None;
    }
    if timeout {
        return Some(VerifyResult::failed(
            cmd_vec,
            repo_root,
            true,
            "timeout during `lake build`".to_string(),
        ));
    }
    Some(VerifyResult {
        ok: false,
        timeout: false,
        returncode,
        stdout,
        stderr: format!("`lake build` failed\n{stderr}"),
        cmd: cmd_vec,
        cwd: repo_root.display().to_string(),
    })
}

fn write_temp_lean(lean_text: &str) -> Result<tempfile::TempPath, String> {
    let mut tmp = tempfile::Builder::new()
        .prefix("proofsession-")
        .suffix(".lean")
        .tempfile()
        .map_err(|e| format!("failed to create temp file: {e}"))?;
    std::io::Write::write_all(&mut tmp, lean_text.as_bytes())
        .map_err(|e| format!("failed to write temp lean file: {e}"))?;
    Ok(NamedTempFile::into_temp_path(tmp))
}

/// Check `lean_text` with `lake env lean` inside `repo_root`.
///
/// A fresh project without `.lake/build/lib/lean` is built first when
/// `auto_build` is on; a missing-`.olean` failure triggers one build and
/// one retry.
pub async fn verify_lean_text(
    repo_root: &Path,
    lean_text: &str,
    timeout_s: Duration,
    auto_build: bool,
) -> Result<VerifyResult, String> {
    let repo_root = find_lean_repo_root(repo_root)?;
    let lake = resolve_lake();

    if auto_build && !repo_root.join(".lake/build/lib/lean").exists() {
        if let Some(failed) = lake_build(&lake, &repo_root, timeout_s).await {
            return Ok(failed);
        }
    }

    // Dropping the TempPath removes the file, also on timeout.
    let tmp_path = write_temp_lean(lean_text)?;
    let cmd_vec = vec![
        lake.display().to_string(),
        "env".to_string(),
        "lean".to_string(),
        tmp_path.display().to_string(),
    ];
    let mut cmd = Command::new(&lake);
    cmd.arg("env").arg("lean").arg(&*tmp_path).current_dir(&repo_root);

    let (mut ok, mut timeout, mut returncode, mut stdout, mut stderr) =
        run_with_timeout(&mut cmd, timeout_s).await;

    if !ok && !timeout && auto_build && looks_like_missing_olean(&stdout, &stderr) {
        warn!(repo = %repo_root.display(), "missing .olean; building and retrying once");
        if let Some(failed) = lake_build(&lake, &repo_root, timeout_s).await {
            return Ok(failed);
        }
        (ok, timeout, returncode, stdout, stderr) = run_with_timeout(&mut cmd, timeout_s).await;
    }

    Ok(VerifyResult {
        ok,
        timeout,
        returncode,
        stdout,
        stderr,
        cmd: cmd_vec,
        cwd: repo_root.display().to_string(),
    })
}

/// Check `lean_text` with a bare `lean` (core library only, no project).
pub async fn verify_lean_text_standalone(lean_text: &str, timeout_s: Duration) -> Result<VerifyResult, String> {
    let lean = resolve_lean();
    let tmp_path = write_temp_lean(lean_text)?;
    let cwd = std::env::temp_dir();
    let cmd_vec = vec![lean.display().to_string(), tmp_path.display().to_string()];
    let mut cmd = Command::new(&lean);
    cmd.arg(&*tmp_path).current_dir(&cwd);
    let (ok, timeout, returncode, stdout, stderr) = run_with_timeout(&mut cmd, timeout_s).await;
    if timeout {
        return Ok(VerifyResult::failed(cmd_vec, &cwd, true, String::new()));
    }
    Ok(VerifyResult {
        ok,
        timeout,
        returncode,
        stdout,
        stderr,
        cmd: cmd_vec,
        cwd: cwd.display().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_repo_root_from_nested_dir() {
        let td = tempfile::tempdir().unwrap();
        std::fs::write(td.path().join("lean-toolchain"), "leanprover/lean4:v4.9.0\n").unwrap();
        std::fs::write(td.path().join("lakefile.toml"), "name = \"demo\"\n").unwrap();
        let nested = td.path().join("Demo").join("Sub");
        std::fs::create_dir_all(&nested).unwrap();
        let root = find_lean_repo_root(&nested).unwrap();
        assert_eq!(root, td.path().canonicalize().unwrap());
    }

    #[test]
    fn rejects_lean3_projects() {
        let td = tempfile::tempdir().unwrap();
        std::fs::write(td.path().join("leanpkg.toml"), "[package]\n").unwrap();
        let err = find_lean_repo_root(td.path()).unwrap_err();
        assert!(err.contains("Lean 3"));
    }

    #[test]
    fn missing_olean_detection() {
        let stderr = "error: object file '/x/.lake/build/lib/lean/Foo.olean' of module Foo does not exist";
        assert!(looks_like_missing_olean("", stderr));
        assert!(!looks_like_missing_olean("Foo.lean:1:0: error: boom", ""));
    }
}
