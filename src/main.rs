//! Module Guardian CLI - Command-line interface for module compliance validation
//!
//! Architecture: Application Layer - CLI coordinates user interactions with domain services
//! - Translates commands to validator operations
//! - Owns process concerns: logging setup, config discovery, output and exit codes

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use module_guardian::{
    BatchOptions, ComplianceValidator, EcosystemSummary, FixRequest, FixSession, GuardianConfig, OutputFormat,
    ReportFormatter, ReportOptions, RuleSelection, Severity, ValidationOptions,
};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Module Guardian - Compliance and architecture validation for module ecosystems
#[derive(Parser)]
#[command(name = "module-guardian")]
#[command(version)]
#[command(about = "Validate modules against compliance rules, dependency architecture and security patterns")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, global = true, default_value = "human")]
    format: OutputFormatArg,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(clap::Args, Clone, Default)]
struct SelectionArgs {
    /// Only run rules whose id matches (glob)
    #[arg(long, action = clap::ArgAction::Append)]
    include: Vec<String>,

    /// Skip rules whose id matches (glob)
    #[arg(long, action = clap::ArgAction::Append)]
    exclude: Vec<String>,

    /// Only run rules carrying one of these tags
    #[arg(long, action = clap::ArgAction::Append)]
    tag: Vec<String>,

    /// Skip dependency graph analysis
    #[arg(long)]
    no_dependencies: bool,

    /// Skip the security scan
    #[arg(long)]
    no_security: bool,

    /// Minimum severity to display
    #[arg(short, long, value_enum)]
    severity: Option<SeverityArg>,

    /// List passing results too
    #[arg(long)]
    show_passing: bool,
}

#[derive(clap::Args, Clone, Default)]
struct BatchArgs {
    /// Maximum modules validated at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Per-module timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Stop dispatching after the first failure
    #[arg(long)]
    stop_on_error: bool,

    /// Analyze all modules as one dependency graph (finds cross-module cycles)
    #[arg(long)]
    shared_graph: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a single module
    Validate {
        /// Module directory
        path: PathBuf,

        #[command(flatten)]
        selection: SelectionArgs,

        /// Fail with a timeout error after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Validate many modules concurrently
    Batch {
        /// Module directories or globs
        #[arg(required = true)]
        paths: Vec<String>,

        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Summarize the health of a module ecosystem
    Health {
        /// Module directories or globs
        #[arg(required = true)]
        paths: Vec<String>,

        /// Previous summary (JSON) to compute a trend against
        #[arg(long)]
        prior: Option<PathBuf>,

        /// Write the summary as JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// List available rules
    Rules {
        /// Filter by category
        #[arg(long)]
        category: Option<String>,

        /// Only rules applicable to this module type
        #[arg(long)]
        module_type: Option<String>,
    },

    /// Apply automatic fixes to a module and re-validate it
    Fix {
        /// Module directory
        path: PathBuf,

        /// Only fix these rules
        #[arg(long, action = clap::ArgAction::Append)]
        rule: Vec<String>,

        /// Show what would change without touching the module
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config_file: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, ValueEnum, PartialEq)]
enum OutputFormatArg {
    Human,
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
enum SeverityArg {
    Info,
    Warning,
    Error,
    Critical,
}

impl From<SeverityArg> for Severity {
    fn from(arg: SeverityArg) -> Self {
        match arg {
            SeverityArg::Info => Severity::Info,
            SeverityArg::Warning => Severity::Warning,
            SeverityArg::Error => Severity::Error,
            SeverityArg::Critical => Severity::Critical,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    match run_command(cli).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(2);
        }
    }
}

async fn run_command(cli: Cli) -> anyhow::Result<i32> {
    let format = cli.format;
    let use_colors = !cli.no_color;

    match cli.command {
        Commands::Validate {
            path,
            selection,
            timeout_secs,
        } => run_validate(cli.config.as_deref(), &path, &selection, timeout_secs, format, use_colors).await,
        Commands::Batch {
            paths,
            selection,
            batch,
        } => run_batch(cli.config.as_deref(), &paths, &selection, &batch, format, use_colors).await,
        Commands::Health {
            paths,
            prior,
            output,
            batch,
        } => {
            run_health(
                cli.config.as_deref(),
                &paths,
                prior.as_deref(),
                output.as_deref(),
                &batch,
                format,
                use_colors,
            )
            .await
        }
        Commands::Rules {
            category,
            module_type,
        } => run_list_rules(cli.config.as_deref(), category.as_deref(), module_type.as_deref(), format),
        Commands::Fix { path, rule, dry_run } => {
            run_fix(cli.config.as_deref(), &path, rule, dry_run, format)
        }
        Commands::ValidateConfig { config_file } => Ok(run_validate_config(config_file.or(cli.config))),
    }
}

/// `--config`, else a config file in the working directory, else defaults
fn load_config(config_path: Option<&Path>) -> anyhow::Result<GuardianConfig> {
    let config = match config_path {
        Some(path) => GuardianConfig::load_from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => GuardianConfig::discover(".").context("discovering configuration")?,
    };
    Ok(config)
}

fn build_validator(config_path: Option<&Path>, options: ReportOptions) -> anyhow::Result<ComplianceValidator> {
    let validator = ComplianceValidator::new_with_config(load_config(config_path)?)?
        .with_report_formatter(ReportFormatter::new(options));
    Ok(validator)
}

fn report_options(selection: &SelectionArgs, use_colors: bool) -> ReportOptions {
    ReportOptions {
        use_colors,
        show_passing: selection.show_passing,
        min_severity: selection.severity.map(Severity::from),
        ..Default::default()
    }
}

fn validation_options(selection: &SelectionArgs) -> anyhow::Result<ValidationOptions> {
    Ok(ValidationOptions {
        selection: RuleSelection::new(&selection.include, &selection.exclude, &selection.tag)?,
        dependency_analysis: !selection.no_dependencies,
        security_scan: !selection.no_security,
        ..Default::default()
    })
}

fn batch_options(
    validator: &ComplianceValidator,
    args: &BatchArgs,
    validation: ValidationOptions,
) -> BatchOptions {
    let mut options = validator.batch_options();
    if let Some(max_concurrent) = args.max_concurrent {
        options.max_concurrent = max_concurrent.max(1);
    }
    if let Some(secs) = args.timeout_secs {
        options.timeout = Duration::from_secs(secs);
    }
    if args.stop_on_error {
        options.continue_on_error = false;
    }
    if args.shared_graph {
        options.shared_graph = true;
    }
    options.validation = validation;
    options
}

async fn run_validate(
    config_path: Option<&Path>,
    path: &Path,
    selection: &SelectionArgs,
    timeout_secs: Option<u64>,
    format: OutputFormatArg,
    use_colors: bool,
) -> anyhow::Result<i32> {
    let validator = build_validator(config_path, report_options(selection, use_colors))?;
    let options = validation_options(selection)?;

    let report = match timeout_secs {
        Some(secs) => {
            validator
                .validate_module_with_timeout(path, &options, Duration::from_secs(secs))
                .await?
        }
        None => validator.validate_module(path, &options)?,
    };

    println!("{}", validator.format_report(&report, format.into())?);
    Ok(report.exit_code())
}

async fn run_batch(
    config_path: Option<&Path>,
    paths: &[String],
    selection: &SelectionArgs,
    args: &BatchArgs,
    format: OutputFormatArg,
    use_colors: bool,
) -> anyhow::Result<i32> {
    let options = report_options(selection, use_colors);
    let formatter = ReportFormatter::new(options.clone());
    let validator = build_validator(config_path, options)?;
    let batch = batch_options(&validator, args, validation_options(selection)?);

    let outcome = validator.validate_batch(paths, &batch).await?;

    println!("{}", formatter.format_batch(&outcome, format.into())?);
    Ok(outcome.exit_code())
}

async fn run_health(
    config_path: Option<&Path>,
    paths: &[String],
    prior_path: Option<&Path>,
    output_path: Option<&Path>,
    args: &BatchArgs,
    format: OutputFormatArg,
    use_colors: bool,
) -> anyhow::Result<i32> {
    let options = ReportOptions {
        use_colors,
        ..Default::default()
    };
    let formatter = ReportFormatter::new(options.clone());
    let validator = build_validator(config_path, options)?;
    let batch = batch_options(&validator, args, ValidationOptions::default());

    let prior = prior_path
        .map(|path| {
            EcosystemSummary::load_from_file(path)
                .with_context(|| format!("loading prior summary {}", path.display()))
        })
        .transpose()?;

    let summary = validator.ecosystem_health(paths, &batch, prior.as_ref()).await?;

    if let Some(path) = output_path {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json).with_context(|| format!("writing summary to {}", path.display()))?;
        tracing::info!("Summary written to {}", path.display());
    }

    println!("{}", formatter.format_summary(&summary, format.into())?);
    Ok(summary.exit_code())
}

fn run_list_rules(
    config_path: Option<&Path>,
    category: Option<&str>,
    module_type: Option<&str>,
    format: OutputFormatArg,
) -> anyhow::Result<i32> {
    let config = load_config(config_path)?;
    let catalog = config.build_catalog()?;

    let rules: Vec<_> = match module_type {
        Some(module_type) => catalog.get_applicable_rules(Some(module_type)),
        None => catalog.get_all_rules(),
    }
    .into_iter()
    .filter(|rule| category.map_or(true, |c| rule.category.eq_ignore_ascii_case(c)))
    .collect();

    let formatter = ReportFormatter::default();
    println!("{}", formatter.format_rules(&rules, format.into())?);
    Ok(0)
}

fn run_fix(
    config_path: Option<&Path>,
    path: &Path,
    rule_ids: Vec<String>,
    dry_run: bool,
    format: OutputFormatArg,
) -> anyhow::Result<i32> {
    let validator = build_validator(config_path, ReportOptions::default())?;
    let session = validator.fix_module(path, &FixRequest { rule_ids, dry_run })?;

    match format {
        OutputFormatArg::Json => println!("{}", serde_json::to_string_pretty(&session)?),
        OutputFormatArg::Human => print_fix_session(&session),
    }

    if !session.failed.is_empty() {
        return Ok(1);
    }
    Ok(session.after.as_ref().unwrap_or(&session.before).exit_code())
}

fn print_fix_session(session: &FixSession) {
    if session.changes.is_empty() {
        println!("✅ {}: nothing to fix", session.module_id);
        return;
    }

    let verb = if session.dry_run { "Would apply" } else { "Applied" };
    println!("🔧 {} {} fix(es) to {}", verb, session.applied.len(), session.module_id);
    for outcome in &session.applied {
        println!("  {}", outcome.plan.rule_id);
        for step in outcome.plan.describe_steps() {
            println!("    - {step}");
        }
    }
    for failure in &session.failed {
        let note = if failure.rolled_back { " (rolled back)" } else { "" };
        println!("❌ {}: {}{}", failure.rule_id, failure.message, note);
    }
    if !session.dry_run {
        for change in &session.changes {
            let after = change.after.map_or("-", |s| s.as_str());
            println!("  {} {} -> {}", change.rule_id, change.before.as_str(), after);
        }
    }
}

fn run_validate_config(config_path: Option<PathBuf>) -> i32 {
    let config_path = config_path.unwrap_or_else(|| PathBuf::from("module_guardian.yaml"));

    println!("Validating configuration: {}", config_path.display());

    let config = match GuardianConfig::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration validation failed: {e}");
            return 1;
        }
    };

    match config.build_catalog() {
        Ok(catalog) => {
            println!("✅ Configuration is valid");
            println!("📊 Configuration summary:");
            println!("  Rules: {} registered, {} disabled", catalog.len(), config.disabled_rules.len());
            println!("  Layers: {}", config.architecture.layers.len());
            println!("  Fingerprint: {}", config.fingerprint());
            0
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed: {e}");
            1
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn module_without_readme(root: &Path) -> PathBuf {
        let path = root.join("orders");
        fs::create_dir_all(path.join("src")).unwrap();
        fs::write(path.join("package.json"), r#"{"name": "orders", "version": "1.0.0"}"#).unwrap();
        fs::write(path.join("src/index.js"), "module.exports = {};\n").unwrap();
        path
    }

    #[tokio::test]
    async fn test_validate_command_exit_code() {
        let temp_dir = TempDir::new().unwrap();
        let path = module_without_readme(temp_dir.path());

        let code = run_validate(None, &path, &SelectionArgs::default(), None, OutputFormatArg::Json, false)
            .await
            .unwrap();
        assert_eq!(code, 1);

        let missing = temp_dir.path().join("missing");
        assert!(
            run_validate(None, &missing, &SelectionArgs::default(), None, OutputFormatArg::Json, false)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_health_writes_summary() {
        let temp_dir = TempDir::new().unwrap();
        let path = module_without_readme(temp_dir.path());
        let output = temp_dir.path().join("summary.json");

        let code = run_health(
            None,
            &[path.display().to_string()],
            None,
            Some(&output),
            &BatchArgs::default(),
            OutputFormatArg::Json,
            false,
        )
        .await
        .unwrap();

        assert_eq!(code, 1);
        let summary = EcosystemSummary::load_from_file(&output).unwrap();
        assert_eq!(summary.total_modules, 1);
    }

    #[test]
    fn test_fix_command() {
        let temp_dir = TempDir::new().unwrap();
        let path = module_without_readme(temp_dir.path());

        let code = run_fix(None, &path, vec!["docs.readme".to_string()], true, OutputFormatArg::Human).unwrap();
        assert_eq!(code, 1);
        assert!(!path.join("README.md").exists());

        run_fix(None, &path, vec!["docs.readme".to_string()], false, OutputFormatArg::Json).unwrap();
        assert!(path.join("README.md").exists());
    }

    #[test]
    fn test_validate_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("module_guardian.yaml");

        let yaml = serde_yaml::to_string(&GuardianConfig::default()).unwrap();
        fs::write(&config_file, yaml).unwrap();
        assert_eq!(run_validate_config(Some(config_file.clone())), 0);

        fs::write(&config_file, "version: \"9.9\"\n").unwrap();
        assert_eq!(run_validate_config(Some(config_file)), 1);
    }

    #[test]
    fn test_list_rules() {
        assert_eq!(run_list_rules(None, None, None, OutputFormatArg::Human).unwrap(), 0);
        assert_eq!(
            run_list_rules(None, Some("documentation"), Some("service"), OutputFormatArg::Json).unwrap(),
            0
        );
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "module-guardian",
            "batch",
            "mods/*",
            "--max-concurrent",
            "2",
            "--stop-on-error",
            "--format",
            "json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Batch { .. }));
        assert!(cli.format == OutputFormatArg::Json);
    }
}
