#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for serving or running the newest-messages inbox reader

use clap::{Parser, Subcommand};
use inbox_glance::{ErrorBody, ServiceConfig, fetch_latest, http};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "glance")]
#[command(about = "Serve or print the newest messages of an IMAP inbox")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the JSON endpoint over HTTP
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8888")]
        addr: SocketAddr,
    },

    /// Run one invocation and print the envelope as JSON
    Fetch {
        /// Override EMAIL_COUNT
        #[arg(long)]
        count: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = ServiceConfig::from_env()?;

    match args.command {
        Command::Serve { addr } => cmd_serve(config, addr).await,
        Command::Fetch { count } => {
            if let Some(count) = count {
                config.email_count = inbox_glance::requested_count(Some(&count));
            }
            cmd_fetch(&config).await
        }
    }
}

async fn cmd_serve(config: ServiceConfig, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}{}", addr, http::EMAILS_PATH);
    axum::serve(listener, http::router(config)).await?;
    Ok(())
}

async fn cmd_fetch(config: &ServiceConfig) -> anyhow::Result<()> {
    match fetch_latest(config).await {
        Ok(envelope) => {
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(())
        }
        Err(e) => {
            let body = ErrorBody::new(&e, config.expose_errors);
            println!("{}", serde_json::to_string_pretty(&body)?);
            Err(e.into())
        }
    }
}
