use crate::spoof_server::{ResponseMode, SharedMode, SpoofLog};
use color_eyre::Result;
use crossterm::event::{self, Event as CrosstermEvent, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{prelude::*, widgets::*};
use std::collections::VecDeque;
use tokio::sync::mpsc;

const MAX_LOGS: usize = 200;

pub struct App {
    logs: VecDeque<String>,
    log_rx: mpsc::Receiver<SpoofLog>,
    mode: SharedMode,
    current_mode: ResponseMode,
    request_count: usize,
    should_quit: bool,
    log_list_state: ListState,
}

fn format_log(entry: &SpoofLog) -> String {
    match entry {
        SpoofLog::Request {
            model,
            topic,
            count,
            mode,
        } => format!("[REQ] {} topic=\"{}\" count={} -> {}", model, topic, count, mode),
        SpoofLog::ModelsListed => "[REQ] list models".to_string(),
        SpoofLog::ModeChanged(mode) => format!("[CTL] mode set to {}", mode),
        SpoofLog::Internal(msg) => format!("[SPOOF] {}", msg),
    }
}

impl App {
    pub fn new(log_rx: mpsc::Receiver<SpoofLog>, mode: SharedMode) -> Self {
        App {
            logs: VecDeque::with_capacity(MAX_LOGS),
            log_rx,
            mode,
            current_mode: ResponseMode::WellFormed,
            request_count: 0,
            should_quit: false,
            log_list_state: ListState::default(),
        }
    }

    fn push_log(&mut self, line: String) {
        if self.logs.len() >= MAX_LOGS {
            self.logs.pop_front();
        }
        self.logs.push_back(line);
        self.log_list_state.select(Some(self.logs.len() - 1));
    }

    pub async fn run_ui(&mut self, mut terminal: Terminal<impl Backend>) -> Result<()> {
        while !self.should_quit {
            while let Ok(entry) = self.log_rx.try_recv() {
                match &entry {
                    SpoofLog::Request { .. } => self.request_count += 1,
                    SpoofLog::ModeChanged(mode) => self.current_mode = *mode,
                    _ => {}
                }
                self.push_log(format_log(&entry));
            }

            terminal.draw(|f| self.draw_ui(f))?;

            if event::poll(std::time::Duration::from_millis(50))? {
                if let CrosstermEvent::Key(key_event) = event::read()? {
                    self.handle_key_event(key_event).await;
                }
            }
        }
        Ok(())
    }

    async fn set_mode(&mut self, mode: ResponseMode) {
        *self.mode.write().await = mode;
        self.current_mode = mode;
        self.push_log(format_log(&SpoofLog::ModeChanged(mode)));
    }

    async fn handle_key_event(&mut self, key_event: KeyEvent) {
        if key_event.kind != KeyEventKind::Press {
            return;
        }
        match key_event.code {
            KeyCode::Esc | KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Down | KeyCode::Tab => self.set_mode(self.current_mode.next()).await,
            KeyCode::Up | KeyCode::BackTab => self.set_mode(self.current_mode.prev()).await,
            KeyCode::Char(c) => {
                if let Some(mode) = c
                    .to_digit(10)
                    .and_then(|d| (d as usize).checked_sub(1))
                    .and_then(|i| ResponseMode::ALL.get(i))
                {
                    self.set_mode(*mode).await;
                }
            }
            KeyCode::PageUp => {
                if let Some(selected) = self.log_list_state.selected() {
                    self.log_list_state.select(Some(selected.saturating_sub(5)));
                }
            }
            KeyCode::PageDown => {
                if let Some(selected) = self.log_list_state.selected() {
                    if !self.logs.is_empty() {
                        self.log_list_state
                            .select(Some((selected + 5).min(self.logs.len() - 1)));
                    }
                }
            }
            _ => {}
        }
    }

    fn draw_ui(&mut self, f: &mut Frame) {
        let main_layout =
            Layout::horizontal([Constraint::Percentage(65), Constraint::Percentage(35)])
                .split(f.area());

        self.draw_logs(f, main_layout[0]);
        self.draw_mode_panel(f, main_layout[1]);
    }

    fn draw_logs(&mut self, f: &mut Frame, area: Rect) {
        let log_items: Vec<ListItem> = self
            .logs
            .iter()
            .map(|log| ListItem::new(Text::raw(log.clone())))
            .collect();
        let list = List::new(log_items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("Provider requests ({})", self.request_count)),
            )
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_symbol(">> ");
        f.render_stateful_widget(list, area, &mut self.log_list_state);
    }

    fn draw_mode_panel(&self, f: &mut Frame, area: Rect) {
        let panel_layout =
            Layout::vertical([Constraint::Min(0), Constraint::Length(4)]).split(area);

        let items: Vec<ListItem> = ResponseMode::ALL
            .iter()
            .enumerate()
            .map(|(i, mode)| {
                let style = if *mode == self.current_mode {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(vec![
                    Line::from(format!("{} {}", i + 1, mode)),
                    Line::from(format!("  {}", mode.describe())).style(Style::default().fg(Color::DarkGray)),
                ])
                .style(style)
            })
            .collect();
        let modes = List::new(items).block(Block::default().borders(Borders::ALL).title("Response mode"));
        f.render_widget(modes, panel_layout[0]);

        let help = Paragraph::new("Up/Down or 1-5: switch mode\nPgUp/PgDn: scroll  Esc: quit")
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(help, panel_layout[1]);
    }
}
