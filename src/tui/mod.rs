//! Terminal lifecycle and the main event loop.
//!
//! The loop owns the view state and serialises everything that mutates it:
//! key events, records off the capture channel, and notices from replay
//! threads.

pub mod event;
pub mod handler;

use std::io::{stdout, Stdout};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use tokio::sync::mpsc::{Receiver, UnboundedReceiver};

use crate::app::App;
use crate::record::Record;
use crate::ui;
use event::{Event, EventHandler};

/// Terminal type alias
type Tui = Terminal<CrosstermBackend<Stdout>>;

/// How many queued records one draw may absorb.
const DRAIN_BATCH: usize = 64;

fn init_terminal() -> Result<Tui> {
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Tui) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Run the UI until the user quits. Restores the terminal on the way out,
/// including on error.
pub async fn run(
    app: &mut App,
    records: Receiver<Arc<Record>>,
    notices: UnboundedReceiver<String>,
) -> Result<()> {
    let mut terminal = init_terminal()?;
    let result = run_app(&mut terminal, app, records, notices).await;
    restore_terminal(&mut terminal)?;
    result
}

async fn run_app(
    terminal: &mut Tui,
    app: &mut App,
    mut records: Receiver<Arc<Record>>,
    mut notices: UnboundedReceiver<String>,
) -> Result<()> {
    let mut events = EventHandler::new(Duration::from_millis(100));
    let mut capture_open = true;

    while app.running {
        terminal.draw(|frame| ui::render(frame, app))?;

        tokio::select! {
            event = events.next() => match event? {
                Event::Tick => {}
                Event::Key(key) => handler::handle_key_event(app, key),
                Event::Mouse(_) => {}
                Event::Resize(_, _) => {}
            },
            maybe = records.recv(), if capture_open => match maybe {
                Some(record) => {
                    app.on_record(record);
                    // absorb a burst without redrawing per record
                    for _ in 1..DRAIN_BATCH {
                        match records.try_recv() {
                            Ok(record) => app.on_record(record),
                            Err(_) => break,
                        }
                    }
                }
                None => {
                    tracing::info!("capture pipeline finished");
                    capture_open = false;
                }
            },
            maybe = notices.recv() => {
                if let Some(text) = maybe {
                    app.prompt(text);
                }
            }
        }
    }

    Ok(())
}
