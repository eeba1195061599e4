pub mod commands;

use log::{ debug, error, info, warn };
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{ AsyncBufReadExt, AsyncWriteExt, BufReader };

use self::commands::{ Command, HELP };
use crate::attachments::{ extract_text, Attachment };
use crate::llm::AVAILABLE_MODELS;
use crate::models::chat::Role;
use crate::session::compose::speakable_text;
use crate::session::{ AbortHandle, SendOutcome, SessionManager };

struct Palette {
    user: &'static str,
    assistant: &'static str,
    error: &'static str,
    dim: &'static str,
    reset: &'static str,
}

const LIGHT: Palette = Palette {
    user: "\x1b[34m",
    assistant: "\x1b[0m",
    error: "\x1b[31m",
    dim: "\x1b[90m",
    reset: "\x1b[0m",
};

const DARK: Palette = Palette {
    user: "\x1b[96m",
    assistant: "\x1b[97m",
    error: "\x1b[91m",
    dim: "\x1b[37m",
    reset: "\x1b[0m",
};

pub struct ConsoleOptions {
    pub max_attachment_bytes: usize,
    pub speech_command: Option<String>,
}

/// Line-oriented front end over a [`SessionManager`].
pub struct Console {
    session: SessionManager,
    options: ConsoleOptions,
    pending: Vec<Attachment>,
    voice: bool,
    dark: bool,
}

impl Console {
    pub fn new(session: SessionManager, options: ConsoleOptions) -> Self {
        let voice = session.preferences().voice_enabled();
        let dark = session.preferences().dark_mode();
        Self {
            session,
            options,
            pending: Vec::new(),
            voice,
            dark,
        }
    }

    fn palette(&self) -> &'static Palette {
        if self.dark { &DARK } else { &LIGHT }
    }

    fn notice(&self, text: &str) {
        let p = self.palette();
        println!("{}{}{}", p.dim, text, p.reset);
    }

    fn failure(&self, text: &str) {
        let p = self.palette();
        println!("{}{}{}", p.error, text, p.reset);
    }

    pub async fn run(mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        spawn_interrupt_watcher(self.session.abort_handle());

        let p = self.palette();
        println!("{}Mini Chat Bot{} ({}). Type /help for commands.", p.assistant, p.reset, self.session.state().model);
        self.print_header();
        if !self.session.has_api_key() {
            self.notice("No API key configured. Set one with /key <key> or CHAT_API_KEY.");
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            self.prompt();
            let line = match lines.next_line().await? {
                Some(line) => line,
                None => {
                    break;
                }
            };
            if !self.handle(Command::parse(&line)).await {
                break;
            }
        }

        self.session.teardown();
        info!("Session closed");
        Ok(())
    }

    fn prompt(&self) {
        let p = self.palette();
        let marker = if self.pending.is_empty() { String::new() } else { format!("[{} file(s)] ", self.pending.len()) };
        print!("{}{}> {}", p.user, marker, p.reset);
        let _ = std::io::stdout().flush();
    }

    fn print_header(&self) {
        let state = self.session.state();
        let id = state.active_conversation_id.as_deref().unwrap_or("-");
        self.notice(&format!("Conversation: {} [{}]", state.title, id));
    }

    /// Returns false when the loop should stop.
    async fn handle(&mut self, command: Command) -> bool {
        debug!("Console command: {:?}", command);
        match command {
            Command::Empty => {}
            Command::Send(text) => self.send(&text).await,
            Command::New => {
                self.session.new_conversation();
                self.pending.clear();
                self.print_header();
            }
            Command::List => self.list(),
            Command::Switch(id) =>
                match self.session.switch_conversation(&id) {
                    Ok(()) => {
                        self.print_header();
                        self.print_history();
                    }
                    Err(e) => self.failure(&e.to_string()),
                }
            Command::Delete(id) => {
                let id = id.or_else(|| self.session.state().active_conversation_id.clone());
                match id {
                    Some(id) =>
                        match self.session.delete_conversation(&id) {
                            Ok(()) => {
                                self.notice(&format!("Deleted {}", id));
                                self.print_header();
                            }
                            Err(e) => self.failure(&e.to_string()),
                        }
                    None => self.failure("No conversation to delete"),
                }
            }
            Command::Rename(title) => {
                self.session.rename_conversation(&title);
                self.print_header();
            }
            Command::System(prompt) => {
                self.session.update_system_prompt(&prompt);
                self.notice("System prompt updated");
            }
            Command::Clear => {
                self.session.clear_conversation();
                self.pending.clear();
                self.print_header();
            }
            Command::Export(dir) => self.export(dir).await,
            Command::Model(None) => {
                self.notice(&format!("Model: {}", self.session.state().model));
                self.notice(&format!("Available: {}", AVAILABLE_MODELS.join(", ")));
            }
            Command::Model(Some(model)) => {
                if !AVAILABLE_MODELS.contains(&model.as_str()) {
                    warn!("Model '{}' is not in the known list, using it anyway", model);
                }
                self.session.set_model(&model);
                self.notice(&format!("Model set to {}", model));
            }
            Command::Key(key) => {
                self.session.set_api_key(&key);
                self.notice("API key saved");
            }
            Command::Attach(path) =>
                match extract_text(&PathBuf::from(&path), self.options.max_attachment_bytes).await {
                    Ok(file) => {
                        self.notice(&format!("Attached {} ({} chars)", file.name, file.content.chars().count()));
                        self.pending.push(file);
                    }
                    Err(e) => self.failure(&format!("Could not read {}: {}", path, e)),
                }
            Command::Detach => {
                self.pending.clear();
                self.notice("Attachments cleared");
            }
            Command::Voice => {
                self.voice = !self.voice;
                self.session.preferences().set_voice_enabled(self.voice);
                self.notice(&format!("Voice {}", if self.voice { "on" } else { "off" }));
                if self.voice && self.options.speech_command.is_none() {
                    self.failure("No speech command configured (set SPEECH_COMMAND)");
                }
            }
            Command::Dark => {
                self.dark = !self.dark;
                self.session.preferences().set_dark_mode(self.dark);
                self.notice(&format!("Dark mode {}", if self.dark { "on" } else { "off" }));
            }
            Command::History => self.print_history(),
            Command::Help => println!("{}", HELP),
            Command::Usage(usage) => self.failure(&format!("Usage: {}", usage)),
            Command::Unknown(name) => self.failure(&format!("Unknown command {} (try /help)", name)),
            Command::Quit => {
                return false;
            }
        }
        true
    }

    async fn send(&mut self, text: &str) {
        let attachments = std::mem::take(&mut self.pending);
        let p = self.palette();
        print!("{}", p.assistant);
        let _ = std::io::stdout().flush();

        let result = self.session.send_message(text, &attachments, |delta| {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
        }).await;

        match result {
            Ok(SendOutcome::Replied(reply)) => {
                // streamed replies were echoed chunk by chunk
                if !self.session.settings().streaming {
                    print!("{}", reply.content);
                }
                println!("{}", p.reset);
                if self.voice {
                    self.speak(&reply.content);
                }
            }
            Ok(SendOutcome::Aborted { partial }) => {
                println!("{}", p.reset);
                self.notice(if partial.is_some() { "[stopped]" } else { "[cancelled]" });
            }
            Ok(SendOutcome::Failed { message, needs_credentials }) => {
                println!("{}", p.reset);
                self.failure(&message.content);
                if needs_credentials {
                    self.notice("Set an API key with /key <key> and try again.");
                }
            }
            Err(e) => {
                println!("{}", p.reset);
                self.pending = attachments;
                self.failure(&e.to_string());
            }
        }
    }

    fn list(&self) {
        let conversations = self.session.conversations();
        if conversations.is_empty() {
            self.notice("No saved conversations");
            return;
        }
        let active = self.session.state().active_conversation_id.as_deref();
        for c in conversations {
            let marker = if Some(c.id.as_str()) == active { "*" } else { " " };
            let updated = c.last_updated
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            println!("{} {:<16} {:<32} {}", marker, c.id, c.title, updated);
        }
    }

    fn print_history(&self) {
        let p = self.palette();
        for m in self.session.messages() {
            match m.role {
                Role::System => self.notice(&format!("system: {}", m.content)),
                Role::User => println!("{}you:{} {}", p.user, p.reset, m.content),
                Role::Assistant if m.error => self.failure(&m.content),
                Role::Assistant => println!("{}assistant:{} {}", p.assistant, p.reset, m.content),
            }
        }
    }

    async fn export(&self, dir: Option<String>) {
        let transcript = self.session.export_conversation();
        let path = PathBuf::from(dir.unwrap_or_else(|| ".".to_string())).join(&transcript.file_name);
        match tokio::fs::write(&path, transcript.content.as_bytes()).await {
            Ok(()) => self.notice(&format!("Exported to {}", path.display())),
            Err(e) => self.failure(&format!("Export failed: {}", e)),
        }
    }

    fn speak(&self, reply: &str) {
        let Some(command) = self.options.speech_command.clone() else {
            return;
        };
        let text = speakable_text(reply);
        if text.is_empty() {
            return;
        }
        tokio::spawn(async move {
            if let Err(e) = run_speech(&command, &text).await {
                error!("Speech command '{}' failed: {}", command, e);
            }
        });
    }
}

async fn run_speech(command: &str, text: &str) -> std::io::Result<()> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty speech command"))?;
    let mut child = tokio::process::Command
        ::new(program)
        .args(parts)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes()).await?;
    }
    child.wait().await?;
    Ok(())
}

fn spawn_interrupt_watcher(handle: AbortHandle) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            if handle.abort() {
                info!("Interrupt received, stopping the reply in progress");
            } else {
                println!("\n(use /quit to exit)");
            }
        }
    });
}
