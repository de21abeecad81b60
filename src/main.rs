use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::event::Event;
use netgauge::app::{poll_event, App, AppAction};
use netgauge::settings::{Args, Settings};
use netgauge::speedtest::scheduler::{Control, PhaseScheduler};
use netgauge::speedtest::transport::HttpTransport;
use netgauge::speedtest::TestUpdate;
use netgauge::ui::draw_ui;
use ratatui::DefaultTerminal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if let Some(path) = args.log_file.as_deref() {
        init_tracing(path)?;
    }
    let settings = Settings::from(&args);

    let mut terminal = ratatui::init();
    terminal.clear()?;

    let result = run_app(&mut terminal, settings).await;

    ratatui::restore();
    result
}

/// The terminal belongs to the UI, so logs only go to a file.
fn init_tracing(path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow!("cannot install tracing subscriber: {}", e))?;

    info!("tracing initialized");
    Ok(())
}

async fn run_app(terminal: &mut DefaultTerminal, settings: Settings) -> Result<()> {
    let mut app = App::new(settings.clone());

    let transport = Arc::new(HttpTransport::new(settings.clone())?);
    let (update_tx, mut update_rx) = mpsc::unbounded_channel::<TestUpdate>();
    let (control_tx, control_rx) = mpsc::channel::<Control>(8);
    let scheduler = PhaseScheduler::new(settings, transport, update_tx);
    let engine = tokio::spawn(scheduler.run(control_rx));

    loop {
        terminal.draw(|frame| draw_ui(frame, &app))?;

        while let Ok(update) = update_rx.try_recv() {
            app.apply_update(update);
        }

        if let Some(Event::Key(key)) = poll_event(Duration::from_millis(30))? {
            if let Some(action) = app.handle_key_event(key) {
                let command = match action {
                    AppAction::Quit => break,
                    AppAction::StartTest => Control::Start,
                    AppAction::CancelTest => Control::Cancel,
                    AppAction::ApplySettings => Control::Configure(app.settings.clone()),
                };
                let _ = control_tx.send(command).await;
            }
        }

        if app.should_quit {
            break;
        }
    }

    let _ = control_tx.send(Control::Shutdown).await;
    let _ = engine.await;
    Ok(())
}
