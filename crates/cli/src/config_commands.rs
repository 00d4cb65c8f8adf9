use std::path::Path;

use {
    anyhow::Result,
    clap::Subcommand,
    valet_config::{
        ValetConfig, render_config,
        validate::{self, Severity, ValidationResult},
    },
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration with secrets redacted.
    Show {
        /// Output format: toml, yaml or json.
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

pub fn handle_config(action: ConfigAction, config: &ValetConfig) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(None, verbose),
        ConfigAction::Show { format } => {
            print!("{}", render_config(&config.redacted(), &format)?);
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let lines = report(&result, verbose);
    for line in &lines {
        eprintln!("{line}");
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if !lines.is_empty() {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

/// Refuse to run on a config file with error diagnostics.
pub fn ensure_valid(path: Option<&Path>) -> Result<()> {
    let result = validate::validate(path);
    let errors = result.count(Severity::Error);
    if errors > 0 {
        for line in report(&result, false) {
            eprintln!("{line}");
        }
        anyhow::bail!("configuration has {errors} error(s); run `valet config check` for details");
    }
    Ok(())
}

fn report(result: &ValidationResult, verbose: bool) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .map(|d| {
            let (color, label) = match d.severity {
                Severity::Error => (RED, "error"),
                Severity::Warning => (YELLOW, "warning"),
                Severity::Info => (CYAN, "info"),
            };
            if d.path.is_empty() {
                format!("  {BOLD}{color}{label}{RESET} {}", d.message)
            } else {
                format!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message)
            }
        })
        .collect()
}
