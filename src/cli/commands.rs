use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stylebot")]
#[command(author, version, about = "Telegram style-transfer bot and its model service", long_about = None)]
pub struct Cli {
    /// Settings file; defaults to config/$CONFIG_ENV
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the Telegram bot
    Bot,

    /// Run the model service
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Transfer the style of one image onto another, offline
    Stylize {
        #[arg(long)]
        content: PathBuf,

        #[arg(long)]
        style: PathBuf,

        #[arg(short, long, default_value = "stylized.png")]
        output: PathBuf,

        /// Override the configured optimizer evaluation budget
        #[arg(short, long)]
        iterations: Option<usize>,
    },

    /// Print a password hash for the users file
    HashPassword {
        password: String,

        #[arg(long, default_value_t = crate::server::auth::DEFAULT_ITERATIONS)]
        iterations: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_with_global_config() {
        let cli = Cli::parse_from(["stylebot", "serve", "--port", "8080", "--config", "prod.yaml"]);
        assert_eq!(cli.config.as_deref(), Some("prod.yaml"));
        assert!(matches!(cli.command, Commands::Serve { port: Some(8080), host: None }));
    }

    #[test]
    fn test_parse_stylize() {
        let cli = Cli::parse_from([
            "stylebot", "stylize", "--content", "a.jpg", "--style", "b.jpg", "-i", "50",
        ]);
        match cli.command {
            Commands::Stylize { output, iterations, .. } => {
                assert_eq!(output, PathBuf::from("stylized.png"));
                assert_eq!(iterations, Some(50));
            }
            _ => panic!("expected stylize"),
        }
    }
}
