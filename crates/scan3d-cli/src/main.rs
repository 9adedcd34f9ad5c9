//! scan3d command line
//!
//! `scan3d run` drives one pipeline run and prints the outcome as JSON on
//! stdout. Logs go to stderr.

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use scan3d_core::{
    JsonLinesCatalog, OwnerId, PipelineConfig, PipelineOrchestrator, PipelineRequest,
    Registration, RequestId,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

fn cli() -> Command {
    let config_arg = Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration file");

    Command::new("scan3d")
        .version(scan3d_core::VERSION)
        .about("Turn a short video into a 3D model")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("run")
                .about("Run the pipeline for one video")
                .arg(
                    Arg::new("video")
                        .long("video")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Source video"),
                )
                .arg(
                    Arg::new("name")
                        .long("name")
                        .required(true)
                        .help("Desired model name"),
                )
                .arg(
                    Arg::new("request-id")
                        .long("request-id")
                        .help("Request token (generated when absent)"),
                )
                .arg(
                    Arg::new("owner")
                        .long("owner")
                        .requires("display-name")
                        .help("Owner to register the model under"),
                )
                .arg(
                    Arg::new("display-name")
                        .long("display-name")
                        .requires("owner")
                        .help("Catalog display name"),
                )
                .arg(
                    Arg::new("description")
                        .long("description")
                        .requires("owner")
                        .help("Catalog description"),
                )
                .arg(
                    Arg::new("category")
                        .long("category")
                        .requires("owner")
                        .help("Catalog category"),
                )
                .arg(config_arg.clone())
                .arg(
                    Arg::new("catalog")
                        .long("catalog")
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON Lines catalog file"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the outcome as compact JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration")
                .arg(config_arg),
        )
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> anyhow::Result<PipelineConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn build_request(args: &ArgMatches) -> anyhow::Result<PipelineRequest> {
    let video = args
        .get_one::<PathBuf>("video")
        .context("--video is required")?;
    let name = args
        .get_one::<String>("name")
        .context("--name is required")?;

    let mut request = PipelineRequest::new(video, name);
    if let Some(token) = args.get_one::<String>("request-id") {
        request = request.with_request_id(RequestId::parse(token.as_str())?);
    }
    if let (Some(owner), Some(display_name)) = (
        args.get_one::<String>("owner"),
        args.get_one::<String>("display-name"),
    ) {
        let mut registration = Registration::new(OwnerId::new(owner.as_str()), display_name.as_str());
        if let Some(description) = args.get_one::<String>("description") {
            registration = registration.with_description(description.as_str());
        }
        if let Some(category) = args.get_one::<String>("category") {
            registration = registration.with_category(category.as_str());
        }
        request = request.with_registration(registration);
    }
    Ok(request)
}

async fn cmd_run(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = load_config(args)?;
    let request = build_request(args)?;

    let mut orchestrator = PipelineOrchestrator::new(config)?;
    if let Some(path) = args.get_one::<PathBuf>("catalog") {
        orchestrator = orchestrator.with_registrar(Arc::new(JsonLinesCatalog::new(path)));
    }

    let outcome = orchestrator.run(request).await;
    let rendered = if args.get_flag("json") {
        serde_json::to_string(&outcome)?
    } else {
        serde_json::to_string_pretty(&outcome)?
    };
    println!("{rendered}");

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_config(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let config = load_config(args)?;
    print!("{}", config.to_toml_string()?);
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let result = match matches.subcommand() {
        Some(("run", args)) => cmd_run(args).await,
        Some(("config", args)) => cmd_config(args),
        _ => Ok(ExitCode::from(2)),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
