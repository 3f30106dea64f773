//! shardrun CLI - multi-worker test orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use shardrun::config::{
    self, Config, CtestConfig, FrameworkConfig, GtestConfig, StaticWorkersConfig, Strategy,
    WorkersConfig,
};
use shardrun::orchestrator::Orchestrator;
use shardrun::report::{
    ConsoleReporter, JUnitReporter, JsonReporter, MarkdownReporter, MultiReporter, NullReporter,
    report_path,
};
use shardrun::runner::OutputCallback;

const DEFAULT_CONFIG: &str = "shardrun.toml";

#[derive(Parser)]
#[command(name = "shardrun")]
#[command(about = "Distribute a test suite across the devices of one host", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (default: shardrun.toml, optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum FrameworkKind {
    Ctest,
    Gtest,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the test suite across all workers
    Run {
        /// Scheduling strategy
        #[arg(short, long, value_enum)]
        strategy: Option<Strategy>,

        /// Extra attempts for a failing shard or test
        #[arg(short, long)]
        retries: Option<usize>,

        /// Use N statically pinned workers instead of discovery
        #[arg(short, long)]
        workers: Option<u32>,

        /// Kill a command after this many seconds without output
        #[arg(long)]
        idle_timeout: Option<u64>,

        /// Test framework integration
        #[arg(short, long, value_enum)]
        framework: Option<FrameworkKind>,

        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,

        /// Markdown report output path
        #[arg(long)]
        markdown: Option<PathBuf>,

        /// JSON verdict output path
        #[arg(long)]
        json: Option<PathBuf>,

        /// Don't mirror test output to the console
        #[arg(long)]
        no_stream: bool,

        /// Base command, replacing the configured one
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Enumerate tests without running them
    Collect {
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: CollectFormat,

        /// Test framework integration
        #[arg(short, long, value_enum)]
        framework: Option<FrameworkKind>,

        /// Base command, replacing the configured one
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// List the workers discovery would use
    Workers,

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Test framework
        #[arg(short, long, value_enum, default_value = "ctest")]
        framework: FrameworkKind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CollectFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone();
    match cli.command {
        Commands::Run {
            strategy,
            retries,
            workers,
            idle_timeout,
            framework,
            junit,
            markdown,
            json,
            no_stream,
            command,
        } => {
            let mut config = load(config_path.as_deref())?;
            if let Some(strategy) = strategy {
                config.shardrun.strategy = strategy;
            }
            if let Some(retries) = retries {
                config.shardrun.retries = retries;
            }
            if let Some(secs) = idle_timeout {
                config.shardrun.idle_timeout_secs = secs;
            }
            if no_stream {
                config.shardrun.stream_output = false;
            }
            if let Some(count) = workers {
                override_workers(&mut config, count);
            }
            if let Some(kind) = framework {
                override_framework(&mut config, kind);
            }
            let outputs = ReportOverrides {
                junit,
                markdown,
                json,
            };
            run_tests(config, command, outputs, cli.verbose).await
        }
        Commands::Collect {
            format,
            framework,
            command,
        } => {
            let mut config = load(config_path.as_deref())?;
            if let Some(kind) = framework {
                override_framework(&mut config, kind);
            }
            collect_tests(config, command, format).await
        }
        Commands::Workers => list_workers(load(config_path.as_deref())?).await,
        Commands::Validate => validate_config(config_path.as_deref()),
        Commands::Init { framework } => init_config(framework),
    }
}

fn load(path: Option<&Path>) -> Result<Config> {
    let explicit = path.is_some();
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG));
    config::load_or_default(path, explicit)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

fn override_workers(config: &mut Config, count: u32) {
    let pin_env = match &config.workers {
        WorkersConfig::RenderNodes(cfg) => cfg.pin_env.clone(),
        WorkersConfig::Static(cfg) => cfg.pin_env.clone(),
    };
    config.workers = WorkersConfig::Static(StaticWorkersConfig {
        count: Some(count),
        devices: Vec::new(),
        pin_env,
    });
}

fn override_framework(config: &mut Config, kind: FrameworkKind) {
    let command = config.framework.command().to_string();
    let env = config.framework.env().clone();
    let replacement = match (kind, &config.framework) {
        (FrameworkKind::Ctest, FrameworkConfig::Ctest(_))
        | (FrameworkKind::Gtest, FrameworkConfig::Gtest(_)) => return,
        (FrameworkKind::Ctest, _) => FrameworkConfig::Ctest(CtestConfig {
            command,
            env,
            ..CtestConfig::default()
        }),
        (FrameworkKind::Gtest, _) => FrameworkConfig::Gtest(GtestConfig { command, env }),
    };
    config.framework = replacement;
}

struct ReportOverrides {
    junit: Option<PathBuf>,
    markdown: Option<PathBuf>,
    json: Option<PathBuf>,
}

async fn run_tests(
    config: Config,
    command: Vec<String>,
    outputs: ReportOverrides,
    verbose: bool,
) -> Result<()> {
    let (reporter, output_callback) = create_reporter(&config, outputs, verbose);

    let mut orchestrator =
        Orchestrator::new(config, Arc::new(reporter)).with_output_callback(output_callback);
    if !command.is_empty() {
        orchestrator = orchestrator.with_command(command);
    }

    let verdict = orchestrator.run().await?;
    std::process::exit(verdict.exit_code());
}

async fn collect_tests(config: Config, command: Vec<String>, format: CollectFormat) -> Result<()> {
    let mut orchestrator = Orchestrator::new(config, Arc::new(NullReporter));
    if !command.is_empty() {
        orchestrator = orchestrator.with_command(command);
    }

    let tests = orchestrator.collect().await?;
    match format {
        CollectFormat::Json => {
            let json = serde_json::to_string_pretty(&tests)?;
            println!("{}", json);
        }
        CollectFormat::Text => {
            println!("Enumerated {} tests:", tests.len());
            for test in &tests {
                println!("  {}", test);
            }
        }
    }

    Ok(())
}

async fn list_workers(config: Config) -> Result<()> {
    let orchestrator = Orchestrator::new(config, Arc::new(NullReporter));
    let pool = orchestrator.discover_workers().await?;

    println!("{} worker(s):", pool.len());
    for worker in pool.workers() {
        let device = match &worker.device().path {
            Some(path) => format!(" ({})", path.display()),
            None => String::new(),
        };
        let pins: Vec<String> = worker
            .pin_env()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!(
            "  {} on {}{} {}",
            worker.id(),
            worker.host(),
            device,
            pins.join(" ")
        );
    }
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match load(path) {
        Ok(config) => {
            info!("Configuration loaded");
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Strategy: {}", config.shardrun.strategy);
            println!("  Retries: {}", config.shardrun.retries);
            println!("  Idle timeout: {}s", config.shardrun.idle_timeout_secs);

            let workers = match &config.workers {
                WorkersConfig::RenderNodes(cfg) => {
                    format!("render-nodes ({})", cfg.dri_dir.display())
                }
                WorkersConfig::Static(cfg) if !cfg.devices.is_empty() => {
                    format!("static {:?}", cfg.devices)
                }
                WorkersConfig::Static(cfg) => format!("static x{}", cfg.count.unwrap_or(0)),
            };
            println!("  Workers: {}", workers);
            println!(
                "  Framework: {} ({})",
                config.framework.name(),
                config.framework.command()
            );

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(framework: FrameworkKind) -> Result<()> {
    let framework_config = match framework {
        FrameworkKind::Ctest => {
            r#"[framework]
type = "ctest"
command = "ctest --output-on-failure"
# Write report_<worker>.xml per shard
junit_per_shard = false"#
        }
        FrameworkKind::Gtest => {
            r#"[framework]
type = "gtest"
command = "./build/bin/unit_tests""#
        }
    };

    let config = format!(
        r#"# shardrun configuration file

[shardrun]
strategy = "shard"
retries = 3
idle_timeout_secs = 1200
# working_dir = "build"

[workers]
type = "render-nodes"
dri_dir = "/dev/dri"
pin_env = ["HIP_VISIBLE_DEVICES", "HSA_VISIBLE_DEVICES"]

{}

[report]
output_dir = "test-results"
markdown = true
junit = true
json = false
"#,
        framework_config
    );

    let path = PathBuf::from(DEFAULT_CONFIG);
    if path.exists() {
        eprintln!("{} already exists. Remove it first or edit manually.", DEFAULT_CONFIG);
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created {}", DEFAULT_CONFIG);
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  shardrun run");

    Ok(())
}

fn create_reporter(
    config: &Config,
    overrides: ReportOverrides,
    verbose: bool,
) -> (MultiReporter, OutputCallback) {
    let report = &config.report;
    let console = ConsoleReporter::new(report.title.clone(), verbose);
    let output_callback = console.output_callback();
    let mut multi = MultiReporter::new().with_reporter(console);

    let junit = overrides.junit.or_else(|| {
        report
            .junit
            .then(|| report_path(&report.output_dir, &report.junit_file))
    });
    if let Some(path) = junit {
        multi = multi.with_reporter(JUnitReporter::new(path));
    }

    let markdown_file = overrides.markdown.or_else(|| {
        report
            .markdown
            .then(|| report_path(&report.output_dir, &report.markdown_file))
    });
    let mut markdown = MarkdownReporter::new(report.title.clone());
    if let Some(path) = markdown_file {
        markdown = markdown.with_file(path);
    }
    if report.github_step_summary {
        markdown = markdown.with_github_step_summary();
    }
    if markdown.has_destination() {
        multi = multi.with_reporter(markdown);
    }

    let json = overrides.json.or_else(|| {
        report
            .json
            .then(|| report_path(&report.output_dir, &report.json_file))
    });
    if let Some(path) = json {
        multi = multi.with_reporter(JsonReporter::new(path));
    }

    (multi, output_callback)
}
