//! Terracarta CLI entry point.

use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use terracarta::cli::{Cli, Commands, GraphArgs, ValidateArgs};
use terracarta::graph::export::export_graph;
use terracarta::{Compiler, Config, LoadOptions, OutputFormat, TerracartaError, TfData};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            eprintln!("{} {e}", "Error:".red().bold());
            let mut source = std::error::Error::source(&e);
            if source.is_some() {
                eprintln!("\nCaused by:");
                let mut i = 0;
                while let Some(cause) = source {
                    eprintln!("  {i}: {cause}");
                    source = cause.source();
                    i += 1;
                }
            }
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let base_level = match verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            };
            EnvFilter::new(format!("warn,terracarta={base_level}"))
        })
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode, TerracartaError> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Graph(args) => run_graph(config, args).await,
        Commands::Validate(args) => run_validate(config, args).await,
        Commands::Init => run_init(),
    }
}

fn load_config(cli: &Cli) -> Result<Config, TerracartaError> {
    match &cli.config {
        Some(path) => Config::from_file(path),
        None => {
            let default_path = std::path::Path::new("terracarta.yaml");
            if default_path.exists() {
                Config::from_file(default_path)
            } else {
                Ok(Config::default())
            }
        }
    }
}

async fn run_graph(config: Config, args: GraphArgs) -> Result<ExitCode, TerracartaError> {
    let options = LoadOptions {
        plan_path: args.plan,
        graph_path: args.graph_file,
        source_dirs: args.sources,
        varfiles: args.varfiles,
        annotations_path: args.annotations,
        config: config.clone(),
    };

    let compiler = Compiler::new(config.clone());
    let tfdata = compiler.compile_paths(&options).await?;

    if let Some(detection) = &tfdata.provider_detection {
        let summary = format!(
            "Detected provider: {} (confidence {:.2}, {} resources)",
            detection.primary_provider.to_uppercase(),
            detection.confidence,
            tfdata.graphdict.len()
        );
        if config.output.colored {
            eprintln!("{}", summary.cyan().bold());
        } else {
            eprintln!("{summary}");
        }
    }

    let rendered = match args.format {
        OutputFormat::Json => tfdata.to_output_json()?,
        other => export_graph(&tfdata.graphdict, other)?,
    };

    match args.output {
        Some(path) => {
            tokio::fs::write(&path, rendered)
                .await
                .map_err(|e| TerracartaError::io(&path, e))?;
            tracing::info!(path = %path.display(), "output written");
        }
        None => println!("{rendered}"),
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_validate(config: Config, args: ValidateArgs) -> Result<ExitCode, TerracartaError> {
    if !args.document.exists() {
        return Err(TerracartaError::InputNotFound { path: args.document });
    }
    let content = tokio::fs::read_to_string(&args.document)
        .await
        .map_err(|e| TerracartaError::io(&args.document, e))?;
    let tfdata: TfData =
        serde_json::from_str(&content).map_err(|e| TerracartaError::MalformedPlan {
            path: args.document.clone(),
            message: e.to_string(),
        })?;

    let compiler = Compiler::new(config);
    let problems = compiler.validate(&tfdata);
    if problems.is_empty() {
        println!("{}", "OK: all invariants hold".green());
        Ok(ExitCode::SUCCESS)
    } else {
        for problem in &problems {
            eprintln!("{} {problem}", "invariant violation:".yellow());
        }
        Ok(ExitCode::from(1))
    }
}

fn run_init() -> Result<ExitCode, TerracartaError> {
    let path = std::path::Path::new("terracarta.yaml");
    if path.exists() {
        eprintln!("{}", "terracarta.yaml already exists, not overwriting".yellow());
        return Ok(ExitCode::from(1));
    }
    std::fs::write(path, Config::example()).map_err(|e| TerracartaError::io(path, e))?;
    println!("Wrote example configuration to terracarta.yaml");
    Ok(ExitCode::SUCCESS)
}
