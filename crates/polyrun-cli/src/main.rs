//! polyrun CLI
//!
//! Serves the HTTP execution API, or runs single submissions from the
//! command line.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use polyrun::{
    Config, DependencyRequest, EXAMPLE_CONFIG, LanguageRegistry, ResourceLimits, RunOutcome,
    Runner, SubmissionRequest,
};
use tracing::{Level, debug, info};
use tracing_subscriber::EnvFilter;

mod server;

#[derive(Parser)]
#[command(name = "polyrun")]
#[command(about = "Compile and run untrusted code in many languages under strict limits")]
#[command(version)]
struct Cli {
    /// Path to configuration file (layered over the built-in language table)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Address to listen on (default: server.bind_addr from the config)
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path (default: polyrun.toml)
        #[arg(short, long, default_value = "polyrun.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Compile source code without running it
    Compile {
        /// Source file to compile
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., c, cpp, java)
        #[arg(short, long)]
        language: String,
    },

    /// Run a program (compile if needed, then execute)
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., python, go)
        #[arg(short, long)]
        language: String,

        /// CPU time limit in seconds
        #[arg(short, long)]
        time_limit: Option<f64>,

        /// Wall clock limit in seconds for the whole request
        #[arg(short, long)]
        wall_time_limit: Option<f64>,

        /// Memory limit in KB
        #[arg(short, long)]
        memory_limit: Option<u64>,
    },

    /// Install dependencies with a language's package manager
    Install {
        /// Language ID (e.g., python, javascript)
        #[arg(short, long)]
        language: String,

        /// Dependency names
        #[arg(value_name = "NAME", required = true)]
        dependencies: Vec<String>,
    },

    /// List available languages
    Languages,

    /// Show effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Commands::Init { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
    } else {
        debug!("using built-in configuration");
    }
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Serve { bind } => {
            let bind_addr = bind.unwrap_or(config.server.bind_addr);
            server::serve(Runner::new(config), bind_addr).await
        }
        Commands::Compile { source, language } => run_compile(config, &source, &language).await,
        Commands::Run {
            source,
            language,
            time_limit,
            wall_time_limit,
            memory_limit,
        } => {
            // Only explicitly-specified values, so they don't override
            // per-language defaults
            let user_limits = ResourceLimits {
                time_limit,
                wall_time_limit,
                memory_limit,
                ..ResourceLimits::unset()
            };
            let has_user_limits =
                time_limit.is_some() || wall_time_limit.is_some() || memory_limit.is_some();
            run_execute(
                config,
                &source,
                &language,
                has_user_limits.then_some(&user_limits),
            )
            .await
        }
        Commands::Install {
            language,
            dependencies,
        } => run_install(config, &language, dependencies).await,
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => show_config(&config).await,
    }
}

async fn read_submission(source: &Path, language: &str) -> Result<SubmissionRequest> {
    let content = tokio::fs::read(source)
        .await
        .with_context(|| format!("failed to read source file '{}'", source.display()))?;
    let mut request = SubmissionRequest::new(language, content);
    request.file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    Ok(request)
}

async fn run_compile(config: Config, source: &Path, language: &str) -> Result<()> {
    let request = read_submission(source, language).await?;
    let runner = Runner::new(config);

    info!(language, "compiling source");
    let outcome = runner
        .compile(request)
        .await
        .context("compilation failed")?;

    match &outcome.compile {
        None => println!("Language '{}' does not require compilation", outcome.language),
        Some(result) if outcome.success => {
            println!("Compilation successful");
            println!("Wall time: {:.3}s", result.execution.wall_time.as_secs_f64());
        }
        Some(result) => {
            println!("Compilation failed");
            println!("Exit code: {:?}", result.execution.exit_code);
            if let Some(error) = &outcome.error {
                println!("\nCompiler output:\n{error}");
            }
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn run_execute(
    config: Config,
    source: &Path,
    language: &str,
    limits: Option<&ResourceLimits>,
) -> Result<()> {
    let request = read_submission(source, language).await?;
    let runner = Runner::new(config);

    info!(language, "running program");
    let outcome = runner
        .run_source(request, limits)
        .await
        .context("execution failed")?;

    print!("{}", outcome.output);
    report(&outcome);

    if outcome.success {
        Ok(())
    } else {
        let code = outcome
            .run
            .as_ref()
            .and_then(|run| run.exit_code)
            .filter(|code| *code != 0)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

/// Log the outcome via tracing (stderr), keeping stdout clean for piping
fn report(outcome: &RunOutcome) {
    if let Some(error) = &outcome.error {
        eprintln!("{error}");
    }
    if let Some(run) = &outcome.run {
        info!(
            status = ?run.status,
            wall_time = format_args!("{:.3}s", run.wall_time.as_secs_f64()),
            exit_code = run.exit_code,
            signal = run.signal,
            limit = ?run.limit_exceeded,
            truncated = outcome.truncated,
            "execution result"
        );
    } else if let Some(failure) = outcome.failure {
        info!(%failure, "request failed before execution");
    }
}

async fn run_install(config: Config, language: &str, dependencies: Vec<String>) -> Result<()> {
    let runner = Runner::new(config);

    info!(language, count = dependencies.len(), "installing dependencies");
    let outcome = runner
        .installer()
        .install(DependencyRequest::new(language, dependencies))
        .await
        .context("installation failed")?;

    print!("{}", outcome.output);
    if outcome.success {
        Ok(())
    } else {
        if let Some(error) = &outcome.error {
            eprintln!("{error}");
        }
        std::process::exit(1);
    }
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    let registry = LanguageRegistry::from_config(config);
    for (id, lang) in registry.iter() {
        let lang_type = if lang.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        let install = if lang.is_installable() {
            ", installable"
        } else {
            ""
        };
        println!("  {:<15} {} ({}{})", id, lang.name, lang_type, install);
    }
}

async fn show_config(config: &Config) -> Result<()> {
    println!("Default resource limits:");
    println!("  Time limit: {:?}", config.default_limits.time_limit);
    println!(
        "  Wall time limit: {:?}",
        config.default_limits.wall_time_limit
    );
    println!(
        "  Memory limit: {:?} KB",
        config.default_limits.memory_limit
    );
    println!("  Data limit: {:?} KB", config.default_limits.data_limit);
    println!("  Stack limit: {:?} KB", config.default_limits.stack_limit);
    println!("  Max processes: {:?}", config.default_limits.max_processes);
    println!("  Max output: {:?} bytes", config.default_limits.max_output);
    println!();
    println!("Request timeout: {:.1}s", config.request_timeout);
    println!("Max concurrent processes: {}", config.max_concurrent);
    println!("Sandbox PATH: {}", config.sandbox.path);
    println!();

    let runner = Runner::new(config.clone());
    let residual = runner
        .store()
        .residual_entries()
        .await
        .context("failed to inspect staging directory")?;
    println!(
        "Staging directory: {} ({} residual entries)",
        config.staging_dir.display(),
        residual
    );
    println!("Listen address: {}", config.server.bind_addr);
    println!();
    println!("Languages configured: {}", config.languages.len());
    Ok(())
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
