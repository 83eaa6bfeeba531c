use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::style::Stylize;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::{broadcast, watch};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use courier::core::Notifier;
use courier::utils::format_elapsed;
use courier::{
    ClientError,
    Config,
    Dashboard,
    DashboardBuilder,
    NotifyKind,
    PollingState,
    UploadEvent,
    UploadFile,
};

/// 终端里的彩色通知
struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, kind: NotifyKind, text: &str) {
        match kind {
            NotifyKind::Success => print!("{}\r\n", text.green()),
            NotifyKind::Error => print!("{}\r\n", text.red()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| Config::DEFAULT_PATH.to_string());
    let config = Config::load(&config_path)?;

    let dashboard = DashboardBuilder::from_config(&config)
        .context("Can't create the API client")?
        .notifier(std::sync::Arc::new(TerminalNotifier))
        .build()?;

    tokio::spawn(print_jobs(dashboard.poller().subscribe()));
    tokio::spawn(print_uploads(dashboard.uploader().subscribe()));

    print!("u: upload  r: refresh  p: toggle polling  q: quit\r\n");
    enable_raw_mode()?;
    let result = handle_keyboard(&dashboard, config.file_path.clone()).await;
    disable_raw_mode()?;

    dashboard.shutdown().await;
    result
}

async fn handle_keyboard(dashboard: &Dashboard, file_path: Option<PathBuf>) -> anyhow::Result<()> {
    loop {
        if !event::poll(Duration::from_millis(100))? {
            continue;
        }

        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press {
            continue;
        }

        match code {
            KeyCode::Char('q') => {
                print!("Quitting...\r\n");
                break;
            }
            KeyCode::Char('u') => {
                let Some(path) = file_path.clone() else {
                    print!("{}\r\n", "No file_path configured".yellow());
                    continue;
                };

                let uploader = dashboard.uploader().clone();
                tokio::spawn(async move {
                    let file = match UploadFile::from_path(&path).await {
                        Ok(file) => file,
                        Err(err) => {
                            print!("{}\r\n", format!("Can't open {}: {}", path.display(), err).red());
                            return;
                        }
                    };

                    if let Err(ClientError::UploadInProgress) = uploader.submit(file).await {
                        print!("{}\r\n", "An upload is already in progress".yellow());
                    }
                });
            }
            KeyCode::Char('r') => {
                dashboard.refresh().await?;
            }
            KeyCode::Char('p') => {
                let polling = dashboard.toggle_polling().await?;
                print!("Polling {}\r\n", if polling { "resumed" } else { "paused" });
            }
            _ => {}
        }
    }

    Ok(())
}

async fn print_uploads(mut event_rx: broadcast::Receiver<UploadEvent>) {
    loop {
        match event_rx.recv().await {
            Ok(UploadEvent::Progress { percent, .. }) => {
                print!("\rUploading... {:>3}%", percent);
                let _ = std::io::stdout().flush();
            }
            Ok(UploadEvent::StateChanged { upload_id, from, to }) => {
                print!("\r\nUpload {}: {:?} -> {:?}\r\n", upload_id, from, to);
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn print_jobs(mut state_rx: watch::Receiver<PollingState>) {
    while state_rx.changed().await.is_ok() {
        let state = state_rx.borrow_and_update().clone();
        if state.loading {
            continue;
        }

        print!(
            "============== Jobs ({}, polling {}) ==============\r\n",
            state.jobs.len(),
            if state.polling { "on" } else { "off" }
        );
        for job in &state.jobs {
            let detail = job
                .error_details
                .clone()
                .or_else(|| job.message.clone())
                .or_else(|| job.elapsed().map(format_elapsed))
                .unwrap_or_default();
            print!("{:<20} {:<28} {:<11} {}\r\n", job.id, job.filename, job.status.to_string(), detail);
        }
        if let Some(error) = &state.error {
            print!("{}\r\n", error.as_str().red());
        }
    }
}
