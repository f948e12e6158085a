//! Line-oriented console
//!
//! Lines starting with `:` are console commands; anything else is sent to the
//! device with the configured line ending. Frames go to stdout, everything
//! else to the log.

use anyhow::{bail, Result};
use hub_session::{Session, SessionError, SessionEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const HELP: &str = "\
:check       is a supported device plugged in?
:connect     connect to the attached device
:disconnect  close the link
:send64 <b>  decode base64 and send the bytes as-is
:status      connection state as JSON
:info        device identity as JSON
:help        this list
:quit        exit
anything else is sent to the device";

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Check,
    Connect,
    Disconnect,
    Status,
    Info,
    Help,
    Quit,
    /// Raw text for the device
    Send(String),
    /// Base64 payload, decoded before sending
    Send64(String),
    /// A `:` command we don't know
    Unknown(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);

        let Some(name) = line.strip_prefix(':') else {
            return ConsoleCommand::Send(line.to_string());
        };

        let name = name.trim();
        if let Some(payload) = name.strip_prefix("send64") {
            if payload.is_empty() || payload.starts_with(char::is_whitespace) {
                return ConsoleCommand::Send64(payload.trim().to_string());
            }
        }

        match name {
            "check" => ConsoleCommand::Check,
            "connect" => ConsoleCommand::Connect,
            "disconnect" => ConsoleCommand::Disconnect,
            "status" => ConsoleCommand::Status,
            "info" => ConsoleCommand::Info,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "q" | "exit" => ConsoleCommand::Quit,
            other => ConsoleCommand::Unknown(other.to_string()),
        }
    }
}

/// Result of running one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Keep reading; print the text if any
    Continue(Option<String>),
    Quit,
}

/// Maps console commands onto session calls
pub struct Console {
    session: Session,
    line_ending: String,
}

impl Console {
    pub fn new(session: Session, line_ending: impl Into<String>) -> Self {
        Self {
            session,
            line_ending: line_ending.into(),
        }
    }

    pub async fn execute(&self, command: ConsoleCommand) -> Result<Outcome> {
        let output = match command {
            ConsoleCommand::Check => {
                if self.session.query_attached_valid_device().await {
                    Some("supported device attached".to_string())
                } else {
                    Some("no supported device attached".to_string())
                }
            }
            ConsoleCommand::Connect => {
                self.session.request_connect().await?;
                None
            }
            ConsoleCommand::Disconnect => {
                self.session.disconnect().await?;
                None
            }
            ConsoleCommand::Status => Some(serde_json::to_string(&self.session.status().await?)?),
            ConsoleCommand::Info => match self.session.device_info().await? {
                Some(info) => Some(serde_json::to_string(&info)?),
                None => Some("no device".to_string()),
            },
            ConsoleCommand::Help => Some(HELP.to_string()),
            ConsoleCommand::Quit => return Ok(Outcome::Quit),
            ConsoleCommand::Send(text) => {
                self.session
                    .send(format!("{}{}", text, self.line_ending))
                    .await?;
                None
            }
            ConsoleCommand::Send64(payload) => {
                self.session.send_encoded(&payload).await?;
                None
            }
            ConsoleCommand::Unknown(name) => {
                Some(format!("unknown command :{} (try :help)", name))
            }
        };

        Ok(Outcome::Continue(output))
    }

    /// Read stdin until EOF, `:quit` or the session stopping
    pub async fn run(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Some(line) = lines.next_line().await? {
            match self.execute(ConsoleCommand::parse(&line)).await {
                Ok(Outcome::Continue(Some(text))) => println!("{}", text),
                Ok(Outcome::Continue(None)) => {}
                Ok(Outcome::Quit) => break,
                Err(e) => {
                    if let Some(SessionError::SessionClosed) = e.downcast_ref::<SessionError>() {
                        bail!("session stopped unexpectedly");
                    }
                    eprintln!("error: {}", e);
                }
            }
        }

        Ok(())
    }
}

/// Print frames to stdout and log everything else until the session stops
pub async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::FrameReceived { text } => println!("{}", text),
            SessionEvent::StateChanged(snapshot) => info!(
                "attached={} connected={} device={}",
                snapshot.attached, snapshot.connected, snapshot.device_type
            ),
            SessionEvent::Error { error } => warn!("{}", error),
        }
    }
}
