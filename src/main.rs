use anyhow::Result;
use clap::Parser;
use stylebot::cli::{output, Cli, Commands};
use stylebot::server::auth::generate_password_hash_with;
use stylebot::{app, Settings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Bot => app::run_bot(settings).await,
        Commands::Serve { host, port } => app::run_model_server(settings, host, port).await,
        Commands::Stylize {
            content,
            style,
            output: destination,
            iterations,
        } => handle_stylize(settings, content, style, destination, iterations).await,
        Commands::HashPassword {
            password,
            iterations,
        } => {
            println!("{}", generate_password_hash_with(&password, iterations));
            Ok(())
        }
    }
}

async fn handle_stylize(
    settings: Settings,
    content: std::path::PathBuf,
    style: std::path::PathBuf,
    destination: std::path::PathBuf,
    iterations: Option<usize>,
) -> Result<()> {
    println!("{}", output::stylize_banner(&content, &style, iterations));
    println!("{}", output::progress("Fitting..."));

    let target = destination.clone();
    let result = tokio::task::spawn_blocking(move || {
        app::stylize_files(&settings, &content, &style, &target, iterations)
    })
    .await?;

    match result {
        Ok(()) => {
            println!("{}", output::saved(&destination));
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", output::failed(&e));
            Err(e)
        }
    }
}
