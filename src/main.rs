use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use visionlink::session::DEFAULT_PROMPT;
use visionlink::{
    SessionEvent, SessionOrchestrator, SessionState, TestPatternSource, VisionConfig,
};

#[derive(Parser, Debug)]
#[command(name = "visionlink")]
#[command(about = "Stream camera frames to a remote AI analysis service")]
#[command(version)]
#[command(long_about = "Headless VisionLink client. Maintains an authenticated session \
against the analysis backend, keeps a persistent connection alive across network \
interruptions, streams encoded camera frames, and exchanges chat-style analysis \
requests and responses.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "visionlink.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Username to log in with (omit to resume a persisted session)
    #[arg(short, long)]
    username: Option<String>,

    /// Password for the given username
    #[arg(short, long)]
    password: Option<String>,

    /// Submit this prompt once the camera and connection are ready
    #[arg(long)]
    prompt: Option<String>,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the client")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting VisionLink client v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match VisionConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let orchestrator = Arc::new(SessionOrchestrator::new(
        config,
        Box::new(TestPatternSource::new()),
    ));

    // Bring the connection up independently of authentication
    orchestrator.connect();

    // Enter the session: explicit login wins over a persisted one
    match (&args.username, &args.password) {
        (Some(username), Some(password)) => {
            orchestrator.login(username, password).await.map_err(|e| {
                error!("Login failed: {}", e);
                e
            })?;
            info!("Logged in as {}", username);
        }
        (Some(_), None) | (None, Some(_)) => {
            anyhow::bail!("--username and --password must be provided together");
        }
        (None, None) => match orchestrator.resume_session().await {
            Some(profile) => info!("Resumed session as {}", profile.username),
            None => {
                anyhow::bail!(
                    "No valid persisted session; log in with --username and --password"
                );
            }
        },
    }

    if let Err(e) = orchestrator.start_camera().await {
        error!("Failed to start camera: {}", e);
        return Err(e.into());
    }

    let token = CancellationToken::new();
    let runner = Arc::clone(&orchestrator);
    let run_token = token.clone();
    let run_handle = tokio::spawn(async move { runner.run(run_token).await });

    let exit_code = drive_session(&orchestrator, args.prompt.as_deref()).await;

    token.cancel();
    let _ = run_handle.await;
    orchestrator.logout().await;
    orchestrator.disconnect();

    info!("VisionLink client exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

/// Watch session events, submitting the requested prompt once the
/// preconditions hold, until the response arrives or Ctrl-C lands.
async fn drive_session(orchestrator: &SessionOrchestrator, prompt: Option<&str>) -> i32 {
    let mut events = orchestrator.event_bus().subscribe();
    let mut submitted = prompt.is_none();
    let mut submit_attempts = 0u32;

    loop {
        if !submitted {
            let text = prompt.filter(|p| !p.trim().is_empty()).unwrap_or(DEFAULT_PROMPT);
            match orchestrator.submit_prompt(text) {
                Ok(request_id) => {
                    info!("Prompt submitted as request {}", request_id);
                    submitted = true;
                }
                Err(e) => {
                    submit_attempts += 1;
                    if submit_attempts == 1 {
                        info!("Waiting to submit prompt: {}", e);
                    }
                    if submit_attempts > 100 {
                        error!("Giving up on prompt submission: {}", e);
                        return 1;
                    }
                }
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return 0;
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Lagged behind by {} events", n);
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return 0,
                };
                match event {
                    SessionEvent::ResponseArrived { response, confidence, processing_time } => {
                        println!("{}", response);
                        println!("  (confidence {:.2}, {:.2}s)", confidence, processing_time);
                        if prompt.is_some() {
                            return 0;
                        }
                    }
                    SessionEvent::ReconnectExhausted { attempts } => {
                        error!("Connection lost after {} reconnect attempts", attempts);
                        return 1;
                    }
                    SessionEvent::SessionEnded { reason } => {
                        warn!("Session ended: {}", reason);
                        return if orchestrator.state() == SessionState::Unauthenticated { 1 } else { 0 };
                    }
                    _ => {}
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)), if !submitted => {}
        }
    }
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("visionlink={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# VisionLink Configuration File");
    println!("# This is the default configuration with all available options");
    println!();

    let default_config = r#"[server]
# Base URL of the HTTP API
http_url = "http://localhost:8000"
# URL of the persistent WebSocket endpoint
ws_url = "ws://localhost:8000/ws"

[connection]
# Base delay for linear reconnect backoff, in milliseconds
base_delay_ms = 1000
# Consecutive failed attempts before reconnection is abandoned
max_attempts = 5

[capture]
# Target canvas size; source frames are resized to fit
width = 640
height = 480
# Capture cadence in frames per second
fps = 15
# Primary JPEG quality (1-100)
primary_quality = 60
# Fallback JPEG quality used when the primary encoding is over budget
fallback_quality = 50
# Per-frame payload budget in bytes
max_payload_bytes = 512000

[auth]
# Directory for persisted tokens (optional)
# state_dir = "/var/lib/visionlink"
"#;

    println!("{}", default_config);
}
