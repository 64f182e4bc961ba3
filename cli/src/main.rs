use anyhow::{anyhow, Context};
use axecheck_core::{
    load_suite, render_violation_table, validate_suite, write_junit, AuditReport, AuditStatus,
    Auditor, BrowserKind, CaseSpec, Diagnostic, DiagnosticLevel, FixtureRegistry, HarnessConfig,
    Reporter, Suite,
};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Accessibility audits with axe-core over WebDriver")]
struct AxecheckCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a suite file and print the cases it would run
    Plan {
        /// Path to the YAML suite file
        input: PathBuf,
        /// Output JSON instead of a human-readable summary
        #[arg(long)]
        json: bool,
    },
    /// Run the cases of a suite against a live browser
    Run {
        /// Path to the YAML suite file
        input: PathBuf,
        /// Output JSON instead of a human-readable summary
        #[arg(long)]
        json: bool,
        /// Write a JUnit XML report to this path
        #[arg(long, value_name = "PATH")]
        junit: Option<PathBuf>,
        /// Only run the named case. Repeat for multiple cases.
        #[arg(long = "case", value_name = "NAME", action = ArgAction::Append)]
        cases: Vec<String>,
        #[command(flatten)]
        overrides: ConfigOverrides,
    },
    /// List the fixtures a suite can open and where they resolve
    Fixtures {
        /// Path to the YAML suite file; default fixtures only when omitted
        input: Option<PathBuf>,
        /// Output format
        #[arg(long, default_value_t = ListFormat::Text)]
        format: ListFormat,
    },
}

/// Command-line settings layered over `AXECHECK_*` variables.
#[derive(Debug, Args)]
struct ConfigOverrides {
    /// WebDriver endpoint, e.g. http://localhost:9515
    #[arg(long, value_name = "URL")]
    webdriver_url: Option<String>,
    /// Browser to drive (chrome or firefox)
    #[arg(long, value_parser = parse_browser)]
    browser: Option<BrowserKind>,
    /// Show the browser window
    #[arg(long)]
    headed: bool,
    /// Path to axe.min.js
    #[arg(long, value_name = "PATH")]
    axe_source: Option<PathBuf>,
    /// Directory scan results are written to
    #[arg(long, value_name = "DIR")]
    artifacts_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    fn apply(self, mut config: HarnessConfig) -> HarnessConfig {
        if let Some(url) = self.webdriver_url {
            config.webdriver_url = url;
        }
        if let Some(browser) = self.browser {
            config.browser = browser;
        }
        if self.headed {
            config.headless = false;
        }
        if let Some(path) = self.axe_source {
            config.axe_source = path;
        }
        if let Some(dir) = self.artifacts_dir {
            config.artifacts_dir = dir;
        }
        config
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ListFormat {
    Text,
    Json,
    Yaml,
}

impl std::fmt::Display for ListFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            ListFormat::Text => "text",
            ListFormat::Json => "json",
            ListFormat::Yaml => "yaml",
        };
        write!(f, "{value}")
    }
}

fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = AxecheckCli::parse();

    match cli.command {
        Command::Plan { input, json } => {
            let config = HarnessConfig::from_env()?;
            let suite = load_suite(&input)?;
            let registry = suite.registry(&config.fixtures_dir);
            let diagnostics = validate_suite(&suite, &registry);
            if output_plan(&suite, &diagnostics, json)? {
                anyhow::bail!("validation failed");
            }
        }
        Command::Run {
            input,
            json,
            junit,
            cases,
            overrides,
        } => {
            let config = overrides.apply(HarnessConfig::from_env()?);
            let suite = load_suite(&input)?;
            let registry = suite.registry(&config.fixtures_dir);

            let diagnostics = validate_suite(&suite, &registry);
            if diagnostics.iter().any(Diagnostic::is_error) {
                print_diagnostics(&diagnostics);
                anyhow::bail!("validation failed");
            }
            if !json {
                print_diagnostics(&diagnostics);
            }

            let selected = select_cases(&suite, &cases)?;
            let auditor = Auditor::from_config(&config)?.with_registry(registry);
            debug!(?auditor, cases = selected.len(), "running suite");
            let report = auditor.run_cases(selected);

            if let Some(path) = junit {
                let suite_name = suite_label(&suite, &input);
                write_junit_file(&report, &suite_name, &path)?;
            }

            output_run(&report, json)?;
            if report.has_failures() {
                let failing = report.outcomes.len() - report.count(AuditStatus::Passed);
                anyhow::bail!("{failing} case(s) did not pass");
            }
        }
        Command::Fixtures { input, format } => {
            let config = HarnessConfig::from_env()?;
            let registry = match input {
                Some(path) => load_suite(&path)?.registry(&config.fixtures_dir),
                None => FixtureRegistry::with_default_fixtures(&config.fixtures_dir),
            };
            output_fixtures(&registry, format)?;
        }
    }

    Ok(())
}

fn select_cases<'s>(suite: &'s Suite, names: &[String]) -> anyhow::Result<Vec<&'s CaseSpec>> {
    if names.is_empty() {
        return Ok(suite.cases.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            suite
                .cases
                .iter()
                .find(|case| &case.name == name)
                .ok_or_else(|| anyhow!("unknown case '{name}'"))
        })
        .collect()
}

fn suite_label(suite: &Suite, input: &Path) -> String {
    suite.name.clone().unwrap_or_else(|| {
        input
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "axecheck".to_string())
    })
}

fn write_junit_file(report: &AuditReport, suite_name: &str, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create report directory {:?}", parent))?;
    }
    let file = fs::File::create(path)
        .with_context(|| format!("failed to create report file {:?}", path))?;
    let mut writer = BufWriter::new(file);
    write_junit(report, suite_name, &mut writer)
        .and_then(|_| writer.flush())
        .with_context(|| format!("failed to write report file {:?}", path))?;
    Ok(())
}

fn output_plan(suite: &Suite, diagnostics: &[Diagnostic], json: bool) -> anyhow::Result<bool> {
    let has_errors = diagnostics.iter().any(Diagnostic::is_error);
    let summary = suite.summary();

    if json {
        let payload = json!({
            "summary": summary,
            "diagnostics": diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_diagnostics(diagnostics);
        println!("{summary}");
    }

    Ok(has_errors)
}

fn output_run(report: &AuditReport, json: bool) -> anyhow::Result<()> {
    if json {
        let payload = json!({ "execution": report });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("{report}");
    for outcome in &report.outcomes {
        if outcome.violations.unwrap_or(0) == 0 {
            continue;
        }
        let Some(artifact) = &outcome.artifact else {
            continue;
        };
        match Reporter::load(Path::new(artifact)) {
            Ok(stored) => {
                println!("Violations in {}:", outcome.name);
                println!("{}\n", render_violation_table(&stored.result));
            }
            Err(err) => warn!("could not reload artifact {artifact}: {err}"),
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct FixtureListing {
    name: String,
    path: String,
    uri: String,
}

fn output_fixtures(registry: &FixtureRegistry, format: ListFormat) -> anyhow::Result<()> {
    let mut listing = Vec::new();
    for name in registry.names() {
        let uri = registry.resolve(name)?;
        let path = registry
            .get(name)
            .map(|fixture| fixture.path.clone())
            .unwrap_or_default();
        listing.push(FixtureListing {
            name: name.to_string(),
            path,
            uri: uri.to_string(),
        });
    }

    match format {
        ListFormat::Text => {
            println!("Fixtures in {}:", registry.base_dir().display());
            for entry in &listing {
                println!("  - {} -> {}", entry.name, entry.uri);
            }
        }
        ListFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        ListFormat::Yaml => {
            let yaml = serde_yaml::to_string(&listing)?;
            print!("{yaml}");
        }
    }

    Ok(())
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }

    println!("Diagnostics:");
    for diagnostic in diagnostics {
        let level = match diagnostic.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warn",
        };
        match diagnostic.location() {
            Some(location) => println!("  - [{level}] {location}: {}", diagnostic.message),
            None => println!("  - [{level}] {}", diagnostic.message),
        }
    }
    println!();
}

fn parse_browser(raw: &str) -> Result<BrowserKind, String> {
    BrowserKind::parse(raw).ok_or_else(|| format!("unsupported browser '{raw}'"))
}
