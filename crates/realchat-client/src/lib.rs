pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod render;
pub mod shell;
pub mod state;
pub mod terminal;
pub mod view;

use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use realchat_backend::{ChatBackend, HostedBackend, InMemoryBackend};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::shell::ChatShell;
use crate::terminal::TerminalUi;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("realchat_client=info,realchat_backend=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Run the terminal chat until the user quits.
pub async fn run() -> Result<()> {
    init_tracing();

    let config = ClientConfig::from_env();
    let backend: Arc<dyn ChatBackend> = if config.offline {
        tracing::info!("Starting offline with an in-memory backend");
        Arc::new(InMemoryBackend::new())
    } else {
        let hosted = config.hosted()?;
        tracing::info!(url = %hosted.url, "Starting against hosted backend");
        Arc::new(HostedBackend::new(hosted)?)
    };

    let (width, height) = config.terminal_size(TerminalUi::detect_size());
    let ui = TerminalUi::new(width, height);

    let mut shell = ChatShell::mount(backend, config.shell()).await;
    let result = terminal::run(&mut shell, &ui).await;
    shell.unmount();
    result
}
