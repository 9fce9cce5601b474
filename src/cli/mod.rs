//! CLI command handling
//!
//! Discovers scenario files, runs them through the engine, and renders
//! colored verdicts. Rendering lives here; the engine only returns the
//! structured verdict.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::engine::{ActionOutcome, Engine, RunStatus, Verdict};
use crate::handlers;
use crate::scenario::load_scenario;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            paths,
            env,
            fail_fast,
            json,
        } => run(paths, env, fail_fast, json).await,
        Commands::List { dir } => list(&dir),
        Commands::Validate { paths } => validate(paths),
    }
}

async fn run(paths: Vec<PathBuf>, env: Vec<String>, fail_fast: bool, json: bool) -> Result<()> {
    let files = discover(&paths)?;
    if files.is_empty() {
        return Err(Error::Config("no scenario files found".to_string()));
    }

    let mut engine = Engine::with_config(Config::load()?);
    handlers::register_builtins(&mut engine)?;

    if !env.is_empty() {
        let mut merged: HashMap<String, String> = std::env::vars().collect();
        for entry in &env {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                Error::Config(format!("invalid --env entry '{entry}', expected KEY=VALUE"))
            })?;
            merged.insert(key.to_string(), value.to_string());
        }
        engine.set_env(merged);
    }

    let mut passed = 0usize;
    let mut failed = 0usize;

    for file in &files {
        let scenario = match load_scenario(file) {
            Ok(scenario) => scenario,
            Err(e) => {
                println!("{} {}: {}", "✗".red(), file.display(), e);
                failed += 1;
                if fail_fast {
                    break;
                }
                continue;
            }
        };

        println!(
            "\n{} {}",
            "Running Scenario:".blue().bold(),
            scenario.name.white().bold()
        );
        if let Some(desc) = &scenario.description {
            println!("  {}", desc.dimmed());
        }

        let verdict = engine.run(&scenario).await;

        if json {
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        } else {
            render(&verdict);
        }

        if verdict.passed() {
            passed += 1;
        } else {
            failed += 1;
            if fail_fast {
                break;
            }
        }
    }

    println!(
        "\n{} {} passed, {} failed",
        "Summary:".cyan().bold(),
        passed.to_string().green(),
        if failed > 0 {
            failed.to_string().red()
        } else {
            failed.to_string().normal()
        }
    );

    if failed > 0 {
        return Err(Error::Config(format!("{failed} scenario(s) failed")));
    }
    Ok(())
}

fn render(verdict: &Verdict) {
    for result in &verdict.actions {
        let symbol = match result.outcome {
            ActionOutcome::Success => "✓".green(),
            ActionOutcome::Failure => "✗".red(),
        };
        let phase = format!("{:?}", result.phase).to_lowercase();
        match &result.error {
            Some(error) => println!(
                "  {} [{}] {}: {}",
                symbol,
                phase.dimmed(),
                result.name,
                error.message.red()
            ),
            None => println!("  {} [{}] {}", symbol, phase.dimmed(), result.name.dimmed()),
        }
    }

    for (name, outcome) in &verdict.assertions {
        if outcome.passed {
            println!("  {} assertion {}", "✓".green(), name.dimmed());
        } else {
            println!("  {} assertion {}: {}", "✗".red(), name, outcome.reason.red());
        }
    }

    match verdict.status {
        RunStatus::Passed => println!("{} {}", "✓".green().bold(), "Passed".green().bold()),
        RunStatus::Failed => println!(
            "{} {} — {}",
            "✗".red().bold(),
            "Failed".red().bold(),
            verdict.reason()
        ),
        RunStatus::Cancelled => println!(
            "{} {} — {}",
            "⚠".yellow().bold(),
            "Cancelled".yellow().bold(),
            verdict.reason()
        ),
    }
}

fn list(dir: &Path) -> Result<()> {
    let files = discover(std::slice::from_ref(&dir.to_path_buf()))?;
    if files.is_empty() {
        println!("No scenario files found under '{}'", dir.display());
        return Ok(());
    }
    for file in files {
        match load_scenario(&file) {
            Ok(scenario) => println!("{}  {}", file.display(), scenario.name.dimmed()),
            Err(e) => println!("{}  {}", file.display(), format!("(invalid: {e})").red()),
        }
    }
    Ok(())
}

fn validate(paths: Vec<PathBuf>) -> Result<()> {
    let files = discover(&paths)?;
    if files.is_empty() {
        return Err(Error::Config("no scenario files found".to_string()));
    }

    let mut invalid = 0usize;
    for file in &files {
        match load_scenario(file) {
            Ok(scenario) => println!("{} {} ({})", "✓".green(), file.display(), scenario.name),
            Err(e) => {
                println!("{} {}: {}", "✗".red(), file.display(), e);
                invalid += 1;
            }
        }
    }

    if invalid > 0 {
        return Err(Error::Config(format!("{invalid} scenario file(s) invalid")));
    }
    Ok(())
}

/// Expand files and directories into a sorted list of scenario files
fn discover(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            collect_dir(path, &mut files)?;
        } else {
            files.push(path.clone());
        }
    }
    files.sort();
    Ok(files)
}

fn collect_dir(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_dir(&path, files)?;
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("json") | Some("yaml") | Some("yml")
        ) {
            files.push(path);
        }
    }
    Ok(())
}
