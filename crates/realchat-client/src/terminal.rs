//! Line-oriented terminal front-end.
//!
//! Each redraw clears the screen and prints the current [`View`], keeping
//! the newest end of the transcript in view. Input is read a line at a
//! time: email then password on the auth form, message text in the chat.
//! Stdin is read on its own thread so the password can be read with echo
//! turned off.

use std::io::{self, BufRead};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use console::{style, Term};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::Result;
use crate::render::{LineRole, Tone};
use crate::shell::ChatShell;
use crate::state::SessionPhase;
use crate::view::{AuthForm, ChatView, Header, View, SIGN_OUT_LABEL};

/// Relative times are refreshed this often even without new messages.
const CLOCK_REDRAW_SECS: u64 = 30;

const QUIT_COMMAND: &str = "/quit";
const SIGN_OUT_COMMAND: &str = "/signout";

/// A line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Quit,
    SignOut,
    Text(String),
}

pub fn parse_input(line: &str) -> Input {
    match line.trim() {
        QUIT_COMMAND => Input::Quit,
        SIGN_OUT_COMMAND => Input::SignOut,
        _ => Input::Text(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

pub struct TerminalUi {
    term: Term,
    width: usize,
    height: usize,
}

impl TerminalUi {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            term: Term::stdout(),
            width: width.max(10),
            height: height.max(6),
        }
    }

    /// Size reported by the attached terminal as `(columns, rows)`.
    pub fn detect_size() -> Option<(usize, usize)> {
        Term::stdout()
            .size_checked()
            .map(|(rows, cols)| (cols as usize, rows as usize))
    }

    /// Lines to print for `view`, without the prompt.
    pub fn frame(&self, view: &View) -> Vec<String> {
        let mut lines = self.header(view.header());
        match view {
            View::Auth(form) => lines.extend(self.auth_form(form)),
            View::Chat(chat) => {
                let footer = self.composer(chat);
                // One row stays free for the prompt.
                let room = self
                    .height
                    .saturating_sub(lines.len() + footer.len() + 1);
                let transcript = self.transcript(chat);
                let skip = transcript.len().saturating_sub(room);
                lines.extend(transcript.into_iter().skip(skip));
                lines.extend(footer);
            }
        }
        lines
    }

    /// Redraw the screen for `view` and return how its prompt is read.
    pub fn draw(&self, view: &View) -> io::Result<Echo> {
        self.term.clear_screen()?;
        for line in self.frame(view) {
            self.term.write_line(&line)?;
        }
        self.term.write_str(prompt(view))?;
        self.term.flush()?;
        Ok(echo_for(view))
    }

    fn header(&self, header: &Header) -> Vec<String> {
        let title = style(header.title).bold().to_string();
        let first = match &header.user_email {
            Some(email) => {
                let right = format!("{email}  [{SIGN_OUT_LABEL}: {SIGN_OUT_COMMAND}]");
                let gap = self
                    .width
                    .saturating_sub(header.title.len() + right.chars().count())
                    .max(1);
                format!("{title}{}{}", " ".repeat(gap), style(right).dim())
            }
            None => title,
        };
        vec![first, "─".repeat(self.width)]
    }

    fn auth_form(&self, form: &AuthForm) -> Vec<String> {
        let submit = format!("[{}]", form.submit_label);
        let submit = if form.submit_enabled {
            style(submit).white().on_blue().to_string()
        } else {
            style(submit).dim().to_string()
        };
        vec![
            String::new(),
            style(form.heading).bold().to_string(),
            String::new(),
            format!("Email:    {}", form.email),
            format!("Password: {}", form.password_mask),
            String::new(),
            submit,
            style(format!("Enter your email, then your password. {QUIT_COMMAND} exits."))
                .dim()
                .to_string(),
        ]
    }

    fn transcript(&self, chat: &ChatView) -> Vec<String> {
        let mut lines = Vec::new();
        for bubble in &chat.bubbles {
            for line in bubble.layout(self.width) {
                let text = match (line.role, bubble.tone) {
                    (LineRole::Caption, _) => style(line.text).dim(),
                    (LineRole::Body, Tone::Highlighted) => style(line.text).white().on_blue(),
                    (LineRole::Body, Tone::Neutral) => style(line.text).black().on_color256(252),
                };
                lines.push(format!("{}{}", " ".repeat(line.indent), text));
            }
            lines.push(String::new());
        }
        lines
    }

    fn composer(&self, chat: &ChatView) -> Vec<String> {
        let composer = &chat.composer;
        let draft = if composer.draft.is_empty() {
            style(composer.placeholder.to_string()).dim().to_string()
        } else {
            composer.draft.clone()
        };
        let send = format!("[{}]", composer.send_label);
        let send = if composer.send_enabled {
            style(send).white().on_blue().to_string()
        } else {
            style(send).dim().to_string()
        };
        vec![
            "─".repeat(self.width),
            format!("{draft}  {send}"),
            style(format!("{SIGN_OUT_COMMAND} signs out, {QUIT_COMMAND} exits."))
                .dim()
                .to_string(),
        ]
    }
}

fn prompt(view: &View) -> &'static str {
    match view {
        View::Auth(form) if form.email.is_empty() => "Email: ",
        View::Auth(_) => "Password: ",
        View::Chat(_) => "> ",
    }
}

/// Whether typed characters are shown while a line is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    Visible,
    Hidden,
}

/// The password line is read hidden; everything else is echoed.
pub fn echo_for(view: &View) -> Echo {
    match view {
        View::Auth(form) if !form.email.is_empty() => Echo::Hidden,
        _ => Echo::Visible,
    }
}

fn read_line(term: &Term, echo: Echo) -> io::Result<Option<String>> {
    if echo == Echo::Hidden && term.is_term() {
        return term.read_secure_line().map(Some);
    }
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Blocking stdin reads on a dedicated thread, one line per request.
struct InputReader {
    requests: std_mpsc::Sender<Echo>,
    lines: mpsc::UnboundedReceiver<io::Result<Option<String>>>,
    /// A request was sent and its line not yet taken.
    pending: bool,
}

impl InputReader {
    fn spawn() -> io::Result<Self> {
        let (requests, request_rx) = std_mpsc::channel::<Echo>();
        let (line_tx, lines) = mpsc::unbounded_channel();

        thread::Builder::new()
            .name("stdin".into())
            .spawn(move || {
                let term = Term::stdout();
                while let Ok(echo) = request_rx.recv() {
                    let line = read_line(&term, echo);
                    let finished = !matches!(line, Ok(Some(_)));
                    if line_tx.send(line).is_err() || finished {
                        break;
                    }
                }
            })?;

        Ok(Self {
            requests,
            lines,
            pending: false,
        })
    }

    /// Next input line, `None` once stdin is closed.
    ///
    /// Cancel-safe: when the future is dropped mid-read, the next call waits
    /// for the same line instead of requesting another.
    async fn next_line(&mut self, echo: Echo) -> io::Result<Option<String>> {
        if !self.pending {
            if self.requests.send(echo).is_err() {
                return Ok(None);
            }
            self.pending = true;
        }
        let line = self.lines.recv().await.unwrap_or(Ok(None));
        self.pending = false;
        line
    }
}

enum Flow {
    Continue,
    Quit,
}

async fn handle_line(shell: &mut ChatShell, line: &str) -> Flow {
    match parse_input(line) {
        Input::Quit => return Flow::Quit,
        Input::SignOut => {
            if shell.state().phase() == SessionPhase::Authenticated {
                shell.sign_out().await;
            }
        }
        Input::Text(text) => match shell.state().phase() {
            SessionPhase::Unauthenticated => {
                if shell.state().email().is_empty() {
                    shell.state_mut().set_email(text.trim());
                } else {
                    shell.state_mut().set_password(text);
                    shell.authenticate().await;
                }
            }
            SessionPhase::Authenticated => {
                shell.state_mut().set_draft(text);
                shell.send_message().await;
            }
        },
    }
    Flow::Continue
}

/// Drive the shell from stdin until the user quits, stdin closes or
/// Ctrl-C is pressed.
pub async fn run(shell: &mut ChatShell, ui: &TerminalUi) -> Result<()> {
    let mut input = InputReader::spawn()?;
    let mut clock = tokio::time::interval(Duration::from_secs(CLOCK_REDRAW_SECS));
    clock.tick().await;

    let mut echo = ui.draw(&shell.view(Utc::now()))?;

    loop {
        let redraw = tokio::select! {
            line = input.next_line(echo) => {
                let Some(line) = line? else {
                    debug!("Input closed");
                    break;
                };
                match handle_line(shell, &line).await {
                    Flow::Quit => break,
                    Flow::Continue => true,
                }
            }
            update = shell.next_update(), if shell.is_live() => {
                update.is_some_and(|u| u.needs_redraw())
            }
            _ = clock.tick() => true,
            _ = tokio::signal::ctrl_c() => break,
        };

        if shell.take_scroll().is_some() || redraw {
            echo = ui.draw(&shell.view(Utc::now()))?;
        }
    }

    ui.term.write_line("")?;
    Ok(())
}
