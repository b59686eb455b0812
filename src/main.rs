use clap::Parser;

mod app;
mod cli;
mod config;
mod db;
mod error;
mod models;
mod notify;
mod policy;
mod render;
mod session;

use app::App;
use cli::Cli;
use config::Config;
use error::Result;

fn main() -> Result<()> {
    // Only show warnings and errors unless RUST_LOG says otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let mut app = App::open(&config)?;

    if let Err(e) = cli::run(&mut app, cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
