#![forbid(unsafe_code)]

use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table, TableState, Wrap};

use crate::config::UiConfig;
use crate::job::lifecycle::JobControl;
use crate::job::model::{Job, JobStatus};
use crate::output;
use crate::tui::log_pane::LogPane;
use crate::tui::{self, TerminalGuard};

pub async fn run(control: &JobControl, ui: &UiConfig) -> anyhow::Result<()> {
    let terminal = tui::init_terminal()?;
    let mut guard = TerminalGuard::new(terminal);

    let refresh_interval = Duration::from_millis(ui.refresh_interval_ms.max(1));
    let mut app = AppState::new(ui.tilde_home);
    let mut last_refresh = Instant::now();
    refresh(&mut app, control);

    loop {
        {
            let Some(terminal) = guard.terminal.as_mut() else {
                anyhow::bail!("terminal unavailable");
            };
            terminal.draw(|f| draw(f, &mut app))?;
        }

        if app.needs_refresh || last_refresh.elapsed() >= refresh_interval {
            app.needs_refresh = false;
            refresh(&mut app, control);
            last_refresh = Instant::now();
        }

        if event::poll(Duration::from_millis(50))?
            && let Event::Key(key) = event::read()?
        {
            match handle_key(key, &mut app) {
                KeyOutcome::Continue => {}
                KeyOutcome::Quit => break,
                KeyOutcome::Act(action) => {
                    app.flash = Some(perform(control, action).await);
                    app.needs_refresh = true;
                }
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Approve(String),
    Deny(String),
    Kill(String),
    Clean(String),
    CleanFinished,
}

#[derive(Debug, PartialEq, Eq)]
enum KeyOutcome {
    Continue,
    Quit,
    Act(Action),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Flash {
    text: String,
    error: bool,
}

#[derive(Debug)]
struct AppState {
    jobs: Vec<Job>,
    table_state: TableState,
    filter: Option<JobStatus>,
    full_log: bool,
    log: LogPane,
    log_height: usize,
    tilde_home: bool,
    flash: Option<Flash>,
    last_error: Option<String>,
    needs_refresh: bool,
}

impl AppState {
    fn new(tilde_home: bool) -> Self {
        let mut table_state = TableState::default();
        table_state.select(Some(0));
        Self {
            jobs: Vec::new(),
            table_state,
            filter: None,
            full_log: false,
            log: LogPane::new(),
            log_height: 10,
            tilde_home,
            flash: None,
            last_error: None,
            needs_refresh: false,
        }
    }

    fn selected(&self) -> Option<&Job> {
        self.jobs.get(self.table_state.selected().unwrap_or(0))
    }

    fn selected_id(&self) -> Option<String> {
        self.selected().map(|j| j.id.clone())
    }

    fn set_jobs(&mut self, jobs: Vec<Job>) {
        let keep = self.selected_id();
        self.jobs = jobs;
        let idx = keep
            .and_then(|id| self.jobs.iter().position(|j| j.id == id))
            .unwrap_or_else(|| {
                self.table_state
                    .selected()
                    .unwrap_or(0)
                    .min(self.jobs.len().saturating_sub(1))
            });
        self.table_state.select(Some(idx));
    }

    fn move_selection(&mut self, delta: isize) {
        if self.jobs.is_empty() {
            return;
        }
        let cur = self.table_state.selected().unwrap_or(0);
        let next = cur
            .saturating_add_signed(delta)
            .min(self.jobs.len() - 1);
        self.table_state.select(Some(next));
    }
}

fn refresh(app: &mut AppState, control: &JobControl) {
    match control.list(app.filter) {
        Ok(jobs) => {
            app.set_jobs(jobs);
            app.last_error = None;
        }
        Err(e) => app.last_error = Some(e.to_string()),
    }

    let selected = app.selected_id();
    app.log.select(selected.as_deref());
    if let Some(id) = selected
        && let Ok(path) = control.store().log_path(&id)
        && let Err(e) = app.log.refresh(&path)
    {
        app.last_error = Some(format!("failed to read log for job {id}: {e}"));
    }
}

async fn perform(control: &JobControl, action: Action) -> Flash {
    let result = match &action {
        Action::Approve(id) => control
            .approve(id)
            .await
            .map(|_| format!("Approved job {id}")),
        Action::Deny(id) => control.deny(id).await.map(|_| format!("Denied job {id}")),
        Action::Kill(id) => control.kill(id).await.map(|_| format!("Killed job {id}")),
        Action::Clean(id) => control.clean(id).map(|_| format!("Cleaned job {id}")),
        Action::CleanFinished => control
            .clean_all(false)
            .map(|n| format!("Cleaned {n} job(s)")),
    };
    match result {
        Ok(text) => Flash { text, error: false },
        Err(e) => Flash {
            text: e.to_string(),
            error: true,
        },
    }
}

fn handle_key(key: KeyEvent, app: &mut AppState) -> KeyOutcome {
    if key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c')) {
        return KeyOutcome::Quit;
    }

    match key.code {
        KeyCode::Char('q') => return KeyOutcome::Quit,
        KeyCode::Esc if app.full_log => app.full_log = false,
        KeyCode::Esc => return KeyOutcome::Quit,
        KeyCode::Char('a') => return on_selected(app, Action::Approve),
        KeyCode::Char('d') => return on_selected(app, Action::Deny),
        KeyCode::Char('x') => return on_selected(app, Action::Kill),
        KeyCode::Char('c') => return on_selected(app, Action::Clean),
        KeyCode::Char('C') => return KeyOutcome::Act(Action::CleanFinished),
        KeyCode::Enter => app.full_log = !app.full_log,
        KeyCode::Char('f') => {
            app.filter = next_filter(app.filter);
            app.needs_refresh = true;
        }
        KeyCode::Char('g') => app.log.top(),
        KeyCode::Char('G') => app.log.bottom(),
        KeyCode::Up | KeyCode::Char('k') if app.full_log => app.log.scroll_by(-1, app.log_height),
        KeyCode::Down | KeyCode::Char('j') if app.full_log => app.log.scroll_by(1, app.log_height),
        KeyCode::Up | KeyCode::Char('k') => app.move_selection(-1),
        KeyCode::Down | KeyCode::Char('j') => app.move_selection(1),
        KeyCode::PageUp => {
            let page = isize::try_from(app.log_height).unwrap_or(10);
            app.log.scroll_by(-page, app.log_height);
        }
        KeyCode::PageDown => {
            let page = isize::try_from(app.log_height).unwrap_or(10);
            app.log.scroll_by(page, app.log_height);
        }
        _ => {}
    }
    KeyOutcome::Continue
}

fn on_selected(app: &AppState, make: fn(String) -> Action) -> KeyOutcome {
    app.selected_id()
        .map_or(KeyOutcome::Continue, |id| KeyOutcome::Act(make(id)))
}

fn next_filter(current: Option<JobStatus>) -> Option<JobStatus> {
    match current {
        None => Some(JobStatus::Pending),
        Some(JobStatus::Pending) => Some(JobStatus::Working),
        Some(JobStatus::Working) => Some(JobStatus::Done),
        Some(JobStatus::Done) => Some(JobStatus::Error),
        Some(JobStatus::Error) => None,
    }
}

fn status_color(status: JobStatus) -> Color {
    match status {
        JobStatus::Pending => Color::Yellow,
        JobStatus::Working => Color::Cyan,
        JobStatus::Done => Color::Green,
        JobStatus::Error => Color::Red,
    }
}

fn draw(f: &mut Frame<'_>, app: &mut AppState) {
    let area = f.area();
    let outer = Block::default().title("ccl").borders(Borders::ALL);
    let inner = outer.inner(area);
    f.render_widget(outer, area);

    let body = if app.full_log {
        [Constraint::Length(0), Constraint::Min(3)]
    } else {
        [Constraint::Percentage(40), Constraint::Min(3)]
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([body[0], body[1], Constraint::Length(2)])
        .split(inner);

    if !app.full_log {
        draw_table(f, chunks[0], app);
    }
    draw_log(f, chunks[1], app);
    draw_footer(f, chunks[2], app);
}

fn draw_table(f: &mut Frame<'_>, area: Rect, app: &mut AppState) {
    let header = Row::new(vec!["ID", "STATUS", "DIR", "TASK", "TIME"])
        .style(Style::default().add_modifier(Modifier::BOLD));

    let rows = app.jobs.iter().map(|j| {
        Row::new(vec![
            Span::raw(j.id.clone()),
            Span::styled(j.status.as_str(), Style::default().fg(status_color(j.status))),
            Span::raw(output::display_dir(j, app.tilde_home)),
            Span::raw(output::truncate(&j.task, 80)),
            Span::raw(output::job_duration(j)),
        ])
    });

    let widths = [
        Constraint::Length(14),
        Constraint::Length(8),
        Constraint::Percentage(30),
        Constraint::Min(10),
        Constraint::Length(8),
    ];
    let title = match app.filter {
        Some(status) => format!("Jobs ({status})"),
        None => "Jobs".to_owned(),
    };

    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .row_highlight_style(
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol(">");

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn draw_log(f: &mut Frame<'_>, area: Rect, app: &mut AppState) {
    let title = match app.log.job_id() {
        Some(id) => format!("Log: {id}"),
        None => "Log".to_owned(),
    };
    let block = Block::default().title(title).borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    app.log_height = usize::from(inner.height);
    let start = app.log.first_visible(app.log_height);
    let lines: Vec<Line<'_>> = app
        .log
        .lines()
        .iter()
        .skip(start)
        .take(app.log_height)
        .map(|l| Line::from(l.as_str()))
        .collect();
    f.render_widget(Paragraph::new(lines), inner);
}

fn draw_footer(f: &mut Frame<'_>, area: Rect, app: &AppState) {
    let keys = "j/k move • Enter log • a approve • d deny • x kill • c clean • C clean finished • f filter • g/G top/bottom • q quit";

    let status_line = if let Some(err) = &app.last_error {
        Line::from(Span::styled(
            format!("Last error: {err}"),
            Style::default().fg(Color::Red),
        ))
    } else if let Some(flash) = &app.flash {
        let color = if flash.error { Color::Red } else { Color::Green };
        Line::from(Span::styled(flash.text.clone(), Style::default().fg(color)))
    } else {
        Line::from(format!("{} job(s)", app.jobs.len()))
    };

    let lines = vec![
        status_line,
        Line::from(Span::styled(keys, Style::default().fg(Color::DarkGray))),
    ];
    f.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), area);
}
