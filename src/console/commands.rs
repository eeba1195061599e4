/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    List,
    Switch(String),
    Delete(Option<String>),
    Rename(String),
    System(String),
    Clear,
    Export(Option<String>),
    Model(Option<String>),
    Key(String),
    Attach(String),
    Detach,
    Voice,
    Dark,
    History,
    Help,
    Quit,
    Empty,
    Unknown(String),
    /// A known command missing its required argument.
    Usage(&'static str),
}

pub const HELP: &str =
    "Commands:
  /new                 start a new conversation
  /list                list saved conversations
  /switch <id>         open a saved conversation
  /delete [id]         delete a conversation (default: the current one)
  /rename <title>      rename the current conversation
  /system <prompt>     set the system prompt
  /clear               start over keeping the system prompt
  /export [dir]        write the transcript to a text file
  /model [name]        show or change the model
  /key <key>           save the API key
  /attach <path>       attach a file to the next message
  /detach              drop pending attachments
  /voice               toggle reading replies aloud
  /dark                toggle the dark color scheme
  /history             show the current conversation
  /help                show this help
  /quit                exit
Anything else is sent as a message. Ctrl-C stops a reply in progress.";

fn required(arg: &str, usage: &'static str, build: fn(String) -> Command) -> Command {
    if arg.is_empty() { Command::Usage(usage) } else { build(arg.to_string()) }
}

fn optional(arg: &str) -> Option<String> {
    if arg.is_empty() { None } else { Some(arg.to_string()) }
}

impl Command {
    pub fn parse(line: &str) -> Command {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        if !line.starts_with('/') {
            return Command::Send(line.to_string());
        }
        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (line, ""),
        };
        match name.to_lowercase().as_str() {
            "/new" => Command::New,
            "/list" | "/ls" => Command::List,
            "/switch" => required(arg, "/switch <id>", Command::Switch),
            "/delete" => Command::Delete(optional(arg)),
            "/rename" => required(arg, "/rename <title>", Command::Rename),
            "/system" => required(arg, "/system <prompt>", Command::System),
            "/clear" => Command::Clear,
            "/export" => Command::Export(optional(arg)),
            "/model" => Command::Model(optional(arg)),
            "/key" => required(arg, "/key <key>", Command::Key),
            "/attach" => required(arg, "/attach <path>", Command::Attach),
            "/detach" => Command::Detach,
            "/voice" => Command::Voice,
            "/dark" => Command::Dark,
            "/history" => Command::History,
            "/help" | "/?" => Command::Help,
            "/quit" | "/exit" => Command::Quit,
            other => Command::Unknown(other.to_string()),
        }
    }
}
