use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use sessionguard::Config;
use sessionguard::http::{Executor, HttpResponse, RequestDescriptor, ReqwestTransport};
use sessionguard::id::generate_request_id;
use sessionguard::session::{ActionOutcome, SessionActions};
use sessionguard::throttle::{SessionSnapshot, ThrottleSettings, should_interact_at};

mod cli;

use cli::Cli;
use cli::commands::{Commands, SessionArgs, parse_header};

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sessionguard")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("sessionguard.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the config file
    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn build_executor(config: &Config) -> Result<Executor> {
    let transport = ReqwestTransport::new().context("Failed to create HTTP transport")?;
    Ok(Executor::from_config(Arc::new(transport), config))
}

async fn run_application(cli: &Cli, config: &Config) -> Result<ExitCode> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Fetch {
            url,
            method,
            headers,
            data,
            retries,
            request_id,
            timeout_ms,
        } => {
            let mut request = RequestDescriptor::new(
                method.to_uppercase().parse().context("Invalid HTTP method")?,
                url.clone(),
            )
            .with_request_id(request_id.clone().unwrap_or_else(|| generate_request_id("fetch")));
            for raw in headers {
                let (name, value) = parse_header(raw).ok_or_else(|| eyre!("Invalid header {:?}, expected 'Name: value'", raw))?;
                request = request.with_header(name, value);
            }
            if let Some(data) = data {
                request = request.with_body(data.clone());
            }
            if let Some(retries) = retries {
                request = request.with_retries(*retries);
            }
            if let Some(ms) = timeout_ms {
                request = request.with_timeout(Duration::from_millis(*ms));
            }
            handle_fetch_command(request, config, cli.is_verbose()).await
        }
        Commands::ShouldInteract {
            session,
            min_interval,
            retry_timeout,
        } => {
            let settings = ThrottleSettings {
                min_session_interaction_interval: min_interval.unwrap_or(config.throttle.min_session_interaction_interval),
                retry_timeout: retry_timeout.unwrap_or(config.throttle.retry_timeout),
            };
            handle_should_interact_command(session, &settings)
        }
        Commands::SendMessage {
            session_id,
            text,
            session,
        } => {
            let snapshot = SessionSnapshot::new(session_id.clone(), session.last_interaction_at, session.update_time.clone());
            let actions = SessionActions::from_config(build_executor(config)?, config)?;
            info!("Sending message to session: {}", session_id);
            let outcome = actions.send_message(&snapshot, text).await?;
            Ok(report_outcome(&outcome, cli.is_verbose()))
        }
        Commands::ApprovePlan { session_id, session } => {
            let snapshot = SessionSnapshot::new(session_id.clone(), session.last_interaction_at, session.update_time.clone());
            let actions = SessionActions::from_config(build_executor(config)?, config)?;
            info!("Approving plan for session: {}", session_id);
            let outcome = actions.approve_plan(&snapshot).await?;
            Ok(report_outcome(&outcome, cli.is_verbose()))
        }
        Commands::Config => {
            print!("{}", serde_yaml::to_string(config).context("Failed to serialize config")?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn handle_fetch_command(request: RequestDescriptor, config: &Config, verbose: bool) -> Result<ExitCode> {
    let executor = build_executor(config)?;
    let request_id = request.request_id.clone().unwrap_or_default();
    info!("Fetching {} {} (request id {})", request.method, request.url, request_id);

    // Ctrl-C cancels the in-flight request, including any backoff sleep
    let canceller = executor.clone();
    let cancel_id = request_id.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel(&cancel_id);
        }
    });

    let result = executor.execute(request).await;
    watcher.abort();

    let response = result?;
    print_response(&response, verbose);
    Ok(ExitCode::SUCCESS)
}

fn handle_should_interact_command(session: &SessionArgs, settings: &ThrottleSettings) -> Result<ExitCode> {
    let now = sessionguard::id::now_ms();
    let allowed = should_interact_at(now, session.last_interaction_at, session.update_time.as_deref(), settings);
    info!(
        "Throttle check: last={} update={:?} -> {}",
        session.last_interaction_at, session.update_time, allowed
    );

    if allowed {
        println!("{}", "interact".green());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}", "wait".yellow());
        Ok(ExitCode::from(1))
    }
}

fn report_outcome(outcome: &ActionOutcome, verbose: bool) -> ExitCode {
    match outcome {
        ActionOutcome::Sent(response) => {
            println!("{} HTTP {}", "Sent:".green(), response.status);
            if verbose {
                println!("{}", response.text());
            }
            ExitCode::SUCCESS
        }
        ActionOutcome::Throttled => {
            println!("{}", "Throttled: too soon to interact with this session".yellow());
            ExitCode::from(1)
        }
    }
}

fn print_response(response: &HttpResponse, verbose: bool) {
    println!("{} {}", "HTTP".cyan(), response.status);
    if verbose {
        for (name, value) in &response.headers {
            println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
        }
        println!();
    }
    println!("{}", response.text());
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging at the configured level
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")
}
