use proofsession_core as psc;
use psc::llm::ChatGenerator;
use psc::prover::{ProverConfig, ProverLoop};
use psc::session::{structure_suggestions, SessionFactory};
use psc::{LakeVerifier, SessionConfig};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, io};

fn arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn arg_values(args: &[String], key: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < args.len() {
        if args[i] == key {
            if let Some(v) = args.get(i + 1) {
                out.push(v.clone());
            }
            i = i.saturating_add(2);
            continue;
        }
        i += 1;
    }
    out
}

fn arg_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn arg_u64(args: &[String], key: &str) -> Option<u64> {
    arg_value(args, key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create dir {}: {}", parent.display(), e))?;
    }
    let mut f = fs::File::create(path)
        .map_err(|e| format!("failed to create {}: {}", path.display(), e))?;
    let s = serde_json::to_string_pretty(value).map_err(|e| format!("json encode: {e}"))?;
    io::Write::write_all(&mut f, s.as_bytes())
        .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
    Ok(())
}

fn emit(out: serde_json::Value, output_json: Option<PathBuf>) -> Result<(), String> {
    if let Some(p) = output_json {
        write_json(&p, &out)?;
        println!("{}", json!({"ok": true, "written": p.display().to_string()}));
    } else {
        let s = serde_json::to_string_pretty(&out).map_err(|e| format!("json encode: {e}"))?;
        println!("{s}");
    }
    Ok(())
}

fn to_json<T: serde::Serialize>(v: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(v).map_err(|e| format!("serialize: {e}"))
}

fn usage() -> String {
    [
        "proofsession: interactive Lean 4 proof editing.",
        "",
        "Commands:",
        "  load      --file <path>",
        "  clauses   --file <path>",
        "  edit      --file <path> --clause <id> --text <text> [--write]",
        "  structure --file <path> [--line <text> ...] [--write]",
        "  script    --file <path> --script <json> [--write]",
        "  prove     --statement-file <path> [--max-turns N] [--n-pass N] [--no-refinement] [--remove-cot]",
        "",
        "Common flags: [--repo <path>] [--timeout-s N] [--config <json>] [--output-json <path>]",
        "",
        "Notes:",
        "- Output is JSON to stdout; logs go to stderr (RUST_LOG=proofsession_core=debug).",
        "- `structure` without --line uses the first built-in skeleton.",
        "- Script steps: {\"op\":\"edit\",\"clause\":..,\"text\":..}, {\"op\":\"structure\",\"lines\":[..]}, {\"op\":\"panel\"}, {\"op\":\"suggest\"}.",
    ]
    .join("\n")
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ScriptStep {
    Edit { clause: String, text: String },
    Structure { lines: Vec<String> },
    Panel,
    Suggest,
}

fn load_config(rest: &[String]) -> Result<SessionConfig, String> {
    if let Ok(cwd) = std::env::current_dir() {
        psc::config::load_dotenv_if_present(&cwd);
    }
    let mut cfg = match arg_value(rest, "--config") {
        Some(p) => SessionConfig::from_json_file(Path::new(&p))?,
        None => SessionConfig::from_env(),
    };
    if let Some(repo) = arg_value(rest, "--repo") {
        let root = psc::lake::find_lean_repo_root(Path::new(&repo))
            .map_err(|e| format!("repo_root: {e}"))?;
        psc::config::load_dotenv_if_present(&root);
        cfg.repo_root = Some(root);
    }
    if let Some(t) = arg_u64(rest, "--timeout-s") {
        cfg.timeout_s = t;
    }
    Ok(cfg)
}

fn read_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))
}

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    let cmd = args.get(1).map(|s| s.as_str()).unwrap_or("");
    let rest = args.get(2..).unwrap_or(&[]);

    if cmd.is_empty() || cmd == "--help" || cmd == "-h" || cmd == "help" {
        println!("{}", usage());
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let output_json = arg_value(rest, "--output-json").map(PathBuf::from);

    if cmd == "clauses" {
        let file = arg_value(rest, "--file")
            .map(PathBuf::from)
            .ok_or_else(|| "missing --file".to_string())?;
        let text = read_file(&file)?;
        let clauses = psc::scan_clauses(&text);
        return emit(
            json!({
                "file": file.display().to_string(),
                "clauses": to_json(&clauses)?,
            }),
            output_json,
        );
    }

    let cfg = load_config(rest)?;
    let verifier = Arc::new(LakeVerifier::from_config(&cfg));
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("failed to build tokio runtime: {e}"))?;

    match cmd {
        "load" => {
            let file = arg_value(rest, "--file")
                .map(PathBuf::from)
                .ok_or_else(|| "missing --file".to_string())?;
            let text = read_file(&file)?;
            let mut session = SessionFactory::new(verifier)
                .with_unique_names(cfg.unique_names)
                .session();
            let compiled = rt.block_on(session.load(text));
            emit(
                json!({
                    "file": file.display().to_string(),
                    "compilation": to_json(&compiled)?,
                    "panel": to_json(&session.panel())?,
                    "suggestions": session.suggest_next_actions(),
                }),
                output_json,
            )
        }
        "edit" | "structure" | "script" => {
            let file = arg_value(rest, "--file")
                .map(PathBuf::from)
                .ok_or_else(|| "missing --file".to_string())?;
            let write = arg_flag(rest, "--write");
            let steps: Vec<ScriptStep> = match cmd {
                "edit" => {
                    let clause =
                        arg_value(rest, "--clause").ok_or_else(|| "missing --clause".to_string())?;
                    let text =
                        arg_value(rest, "--text").ok_or_else(|| "missing --text".to_string())?;
                    vec![ScriptStep::Edit { clause, text }]
                }
                "structure" => {
                    let mut lines = arg_values(rest, "--line");
                    if lines.is_empty() {
                        lines = structure_suggestions()
                            .into_iter()
                            .next()
                            .map(|s| s.lines)
                            .unwrap_or_default();
                    }
                    vec![ScriptStep::Structure { lines }]
                }
                _ => {
                    let raw =
                        arg_value(rest, "--script").ok_or_else(|| "missing --script".to_string())?;
                    serde_json::from_str(&raw).map_err(|e| format!("invalid --script: {e}"))?
                }
            };

            let text = read_file(&file)?;
            let mut session = SessionFactory::new(verifier)
                .with_unique_names(cfg.unique_names)
                .session();
            let initial = rt.block_on(session.load(text));

            let mut results = Vec::new();
            for step in steps {
                let v = match step {
                    ScriptStep::Edit { clause, text } => {
                        match rt.block_on(session.edit(&clause, &text)) {
                            Ok(r) => json!({"op": "edit", "ok": true, "result": to_json(&r)?}),
                            Err(e) => json!({"op": "edit", "ok": false, "error": e.to_string()}),
                        }
                    }
                    ScriptStep::Structure { lines } => {
                        match rt.block_on(session.add_structure(lines.as_slice())) {
                            Ok(r) => json!({"op": "structure", "ok": true, "result": to_json(&r)?}),
                            Err(e) => json!({"op": "structure", "ok": false, "error": e.to_string()}),
                        }
                    }
                    ScriptStep::Panel => json!({"op": "panel", "ok": true, "result": to_json(&session.panel())?}),
                    ScriptStep::Suggest => {
                        json!({"op": "suggest", "ok": true, "result": session.suggest_next_actions()})
                    }
                };
                results.push(v);
            }

            if write {
                fs::write(&file, session.document())
                    .map_err(|e| format!("failed to write {}: {}", file.display(), e))?;
            }
            emit(
                json!({
                    "file": file.display().to_string(),
                    "written": write,
                    "initial": to_json(&initial)?,
                    "steps": results,
                    "panel": to_json(&session.panel())?,
                }),
                output_json,
            )
        }
        "prove" => {
            let path = arg_value(rest, "--statement-file")
                .map(PathBuf::from)
                .ok_or_else(|| "missing --statement-file".to_string())?;
            let statement = read_file(&path)?;
            let defaults = ProverConfig::default();
            let pcfg = ProverConfig {
                max_turns: arg_u64(rest, "--max-turns")
                    .map(|n| n as usize)
                    .unwrap_or(defaults.max_turns),
                n_pass: arg_u64(rest, "--n-pass")
                    .map(|n| n as usize)
                    .unwrap_or(defaults.n_pass),
                refinement: !arg_flag(rest, "--no-refinement"),
                remove_cot: arg_flag(rest, "--remove-cot"),
                ..defaults
            };
            let prover = ProverLoop::new(Arc::new(ChatGenerator::default()), verifier, pcfg)?;
            let res = rt.block_on(prover.pass_at_n(&statement))?;
            emit(
                json!({
                    "statement_file": path.display().to_string(),
                    "result": to_json(&res)?,
                }),
                output_json,
            )
        }
        other => Err(format!("unknown command: {other}\n\n{}", usage())),
    }
}
