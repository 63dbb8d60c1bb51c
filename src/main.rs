//! Sheetsense - ask natural-language questions about spreadsheet data.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sheetsense_core::analysis::{AnalysisRequest, Analyzer, ScriptedCompletion};
use sheetsense_core::config::AnalysisConfig;
use sheetsense_engine::builtins::TRANSFORM_BUILTINS;

fn print_usage() {
    eprintln!("Usage: sheetsense [OPTIONS] [REQUEST_FILE]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  [REQUEST_FILE]            Analysis request as JSON (default: stdin)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --script <FILE>       Use the file's contents as the completion reply");
    eprintln!("                            (offline mode; no model call is made)");
    eprintln!("  -c, --config <FILE>       Load pipeline thresholds from a TOML file");
    eprintln!("  --timeout-ms <N>          Sandbox time budget in milliseconds");
    eprintln!("  --pretty                  Pretty-print the JSON response");
    eprintln!("  --builtins                List sandbox builtins and exit");
    eprintln!("  -h, --help                Print help");
}

fn print_builtins() {
    for builtin in TRANSFORM_BUILTINS {
        println!("{:<40} {}", builtin.signature, builtin.description);
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    let mut request_file: Option<PathBuf> = None;
    let mut script_file: Option<PathBuf> = None;
    let mut config_file: Option<PathBuf> = None;
    let mut timeout_ms: Option<u64> = None;
    let mut pretty = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "--builtins" => {
                print_builtins();
                return Ok(());
            }
            "-s" | "--script" => {
                i += 1;
                let path = args.get(i).context("--script requires a file path")?;
                script_file = Some(PathBuf::from(path));
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).context("--config requires a file path")?;
                config_file = Some(PathBuf::from(path));
            }
            "--timeout-ms" => {
                i += 1;
                let value = args.get(i).context("--timeout-ms requires a value")?;
                timeout_ms = Some(value.parse().context("--timeout-ms must be an integer")?);
            }
            "--pretty" => pretty = true,
            other if other.starts_with('-') => {
                eprintln!("Error: unknown option '{}'", other);
                print_usage();
                std::process::exit(1);
            }
            other => request_file = Some(PathBuf::from(other)),
        }
        i += 1;
    }

    let mut config = match &config_file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            AnalysisConfig::from_toml_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => AnalysisConfig::default(),
    };
    if let Some(ms) = timeout_ms {
        config.sandbox_timeout_ms = ms;
    }

    let raw = match &request_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading request {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading request from stdin")?;
            buffer
        }
    };
    let request: AnalysisRequest =
        serde_json::from_str(&raw).context("request is not valid JSON")?;
    log::debug!(
        "request: {} columns, {} rows, timeout {} ms",
        request.columns.len(),
        request.rows.len(),
        config.sandbox_timeout_ms
    );

    let mut analyzer = Analyzer::new(config);
    if let Some(path) = &script_file {
        let reply = fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        analyzer = analyzer.with_provider(Arc::new(ScriptedCompletion::new(reply)));
    }

    let response = analyzer.analyze(&request)?;
    let json = if pretty {
        serde_json::to_string_pretty(&response)?
    } else {
        serde_json::to_string(&response)?
    };
    println!("{}", json);
    Ok(())
}
