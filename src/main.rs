//! Main entry point for passvault.

use clap::Parser;
use passvault::cli::Cli;
use passvault::utils::error_exit;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let filter = EnvFilter::from_default_env();
    let filter = match "passvault=warn".parse::<Directive>() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = cli.execute().await {
        error_exit(&e.to_string(), 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["passvault", "list"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["passvault", "show", "abc", "--reveal"]);
        assert!(cli.is_ok());

        let cli = Cli::try_parse_from(["passvault", "show"]);
        assert!(cli.is_err());
    }
}
