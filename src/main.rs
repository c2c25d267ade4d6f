//! Resident Assistant CLI
//!
//! Line-oriented front end for the resident management assistant: chat with
//! the server, watch the agent drive the list pages, and rate answers.

use anyhow::Context;
use clap::Parser;
use resident_assistant::agent::{AgentBus, Notice, NoticeLevel, Subscription};
use resident_assistant::chat::{
    ChatSession, Conversation, FeedbackOutcome, Message, SessionInbox, StreamEvent, Turn, TurnState,
};
use resident_assistant::display::format_message;
use resident_assistant::pages::{Directory, ListRow, Route, Router};
use resident_assistant::protocol::FeedbackKind;
use resident_assistant::{AssistantConfig, HttpTransport};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SERVER_URL_ENV: &str = "ASSISTANT_SERVER_URL";

/// Resident Assistant - chat with the resident management assistant
#[derive(Parser, Debug)]
#[command(name = "resident-assistant")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Assistant server base URL
    #[arg(short, long)]
    server: Option<String>,

    /// Path to the config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ask for complete answers instead of streamed ones
    #[arg(long)]
    no_stream: bool,

    /// Verbose output: log protocol decisions
    #[arg(short, long)]
    verbose: bool,

    /// JSON file with the residents and households shown on the list pages
    #[arg(long)]
    directory: Option<PathBuf>,

    /// First message to send
    #[arg(trailing_var_arg = true)]
    prompt: Vec<String>,
}

/// A line typed at the prompt
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Say(String),
    Feedback {
        kind: FeedbackKind,
        index: usize,
        answer: Option<String>,
    },
    Cancel,
    Reset,
    History,
    Help,
    Quit,
    Invalid(String),
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };

    let mut parts = rest.splitn(3, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let index = parts.next().map(|n| n.parse::<usize>());
    let tail = parts.next().map(str::trim).filter(|t| !t.is_empty());

    let feedback = |kind: FeedbackKind| match index {
        Some(Ok(index)) => Command::Feedback {
            kind,
            index,
            answer: tail.map(String::from),
        },
        _ => Command::Invalid(format!("usage: /{name} <message number>")),
    };

    match name {
        "good" => feedback(FeedbackKind::Confirm),
        "wrong" => feedback(FeedbackKind::Wrong),
        "correct" if tail.is_none() => {
            Command::Invalid("usage: /correct <message number> <corrected answer>".to_string())
        }
        "correct" => feedback(FeedbackKind::Correct),
        "cancel" => Command::Cancel,
        "reset" => Command::Reset,
        "history" => Command::History,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => Command::Invalid(format!("unknown command /{other}, try /help")),
    }
}

const HELP: &str = "\
Commands:
  /good N              confirm answer N
  /wrong N             report answer N as wrong
  /correct N <answer>  send a corrected answer for N
  /cancel              stop the answer being streamed
  /reset               start a new conversation
  /history             print the whole conversation
  /quit                leave";

/// Prints history entries as they appear or change
#[derive(Default)]
struct HistoryPrinter {
    seen: Vec<Message>,
}

impl HistoryPrinter {
    /// Mark the first `count` messages as already shown
    fn accept(&mut self, conversation: &Conversation, count: usize) {
        let count = count.min(conversation.len());
        self.seen = conversation.messages()[..count].to_vec();
    }

    fn print_changes(&mut self, conversation: &Conversation) {
        for (index, message) in conversation.messages().iter().enumerate() {
            if self.seen.get(index) != Some(message) {
                println!("{}", format_message(index, message));
            }
        }
        self.seen = conversation.messages().to_vec();
    }

    fn print_all(&mut self, conversation: &Conversation) {
        for (index, message) in conversation.messages().iter().enumerate() {
            println!("{}", format_message(index, message));
        }
        self.seen = conversation.messages().to_vec();
    }
}

/// What the CLI last showed about the pages
#[derive(Default, PartialEq)]
struct PageView {
    route: Route,
    person_query: String,
    household_query: String,
    opened_person: Option<String>,
    opened_household: Option<String>,
}

impl PageView {
    fn capture(router: &Router) -> Self {
        Self {
            route: router.current().clone(),
            person_query: router.persons().query().to_string(),
            household_query: router.households().query().to_string(),
            opened_person: router.persons().opened().map(|p| p.id()),
            opened_household: router.households().opened().map(|h| h.id()),
        }
    }
}

struct Repl {
    session: ChatSession<HttpTransport>,
    router: Router,
    notices: Subscription<Notice>,
    printer: HistoryPrinter,
    page: PageView,
    turn: Option<Turn>,
    /// Index of the answer being streamed, printed live
    live_answer: Option<usize>,
    live_text: String,
}

impl Repl {
    /// Run every scheduled or queued piece of work due at `now`
    fn step(&mut self, now: Instant) {
        self.session.tick(now);
        self.router.tick(now);
        self.session.tick(now);
        self.report();
    }

    fn report(&mut self) {
        for notice in self.notices.drain() {
            let marker = match notice.level {
                NoticeLevel::Info => "ℹ",
                NoticeLevel::Success => "✓",
                NoticeLevel::Warning => "⚠",
                NoticeLevel::Error => "✗",
            };
            eprintln!("{marker} {}", notice.text);
        }

        if self.live_answer.is_none() {
            self.printer.print_changes(self.session.conversation());
        }

        let page = PageView::capture(&self.router);
        if page != self.page {
            if page.route != self.page.route {
                println!("📍 {}", page.route);
            }
            if page.person_query != self.page.person_query {
                println!("🔎 residents: \"{}\" ({} rows)", page.person_query, self.router.persons().rows().len());
            }
            if page.household_query != self.page.household_query {
                println!(
                    "🔎 households: \"{}\" ({} rows)",
                    page.household_query,
                    self.router.households().rows().len()
                );
            }
            if page.opened_person != self.page.opened_person {
                if let Some(person) = self.router.persons().opened() {
                    println!("👤 {} | ID card {} | {}", person.full_name, person.id_card.as_deref().unwrap_or("—"), person.address);
                }
            }
            if page.opened_household != self.page.opened_household {
                if let Some(household) = self.router.households().opened() {
                    println!("🏠 {} | {} | {}", household.code, household.display_name(), household.address);
                }
            }
            self.page = page;
        }
    }

    async fn say(&mut self, text: &str) {
        if self.session.state() == TurnState::Streaming {
            eprintln!("⚠ still answering, wait or /cancel");
            return;
        }
        let Some(request) = self.session.begin_turn(text) else {
            return;
        };
        let answer_index = self.session.conversation().len() - 1;
        self.printer.accept(self.session.conversation(), answer_index + 1);

        print!("{} ", format_message(answer_index, &Message::bot_untimed("")).trim_end_matches('…').trim_end());
        let _ = io::stdout().flush();
        self.live_answer = Some(answer_index);
        self.live_text.clear();

        self.turn = self.session.open_turn(&request, Instant::now()).await;
        if self.turn.is_none() {
            self.end_live_answer();
        }
    }

    fn on_turn_event(&mut self, event: Option<resident_assistant::Result<StreamEvent>>) {
        match event {
            Some(Ok(event)) => {
                self.session.apply(event.clone());
                if let StreamEvent::TextDelta(delta) = event {
                    // Deltas after the end sentinel are dropped by the session
                    let grew = self
                        .live_answer
                        .and_then(|index| self.session.conversation().get(index))
                        .is_some_and(|m| m.text.len() > self.live_text.len());
                    if grew {
                        print!("{delta}");
                        let _ = io::stdout().flush();
                        self.live_text.push_str(&delta);
                    }
                }
            }
            Some(Err(e)) => {
                self.turn = None;
                self.session.fail_turn(&e);
                self.end_live_answer();
            }
            None => {
                self.turn = None;
                self.session.finish_turn(Instant::now());
                self.end_live_answer();
            }
        }
    }

    fn cancel(&mut self) {
        match self.turn.take() {
            Some(turn) => {
                self.session.cancel_turn(turn);
                self.end_live_answer();
            }
            None => eprintln!("ℹ nothing to cancel"),
        }
    }

    /// The streamed answer is complete: what was printed live counts as shown
    fn end_live_answer(&mut self) {
        let Some(index) = self.live_answer.take() else {
            return;
        };
        println!();
        let conversation = self.session.conversation();
        let streamed_text_kept = conversation
            .get(index)
            .is_some_and(|m| !m.is_status() && !m.text.is_empty() && m.text == self.live_text);
        if streamed_text_kept {
            self.printer.accept(conversation, index + 1);
        }
    }

    async fn feedback(&mut self, kind: FeedbackKind, index: usize, answer: Option<String>) {
        match self.session.send_feedback(kind, index, answer.as_deref()).await {
            FeedbackOutcome::Skipped(reason) => eprintln!("⚠ feedback not sent: {reason}"),
            outcome => info!("Feedback on [{}]: {:?}", index, outcome),
        }
    }

    fn reset(&mut self) {
        if let Some(turn) = self.turn.take() {
            self.session.cancel_turn(turn);
        }
        self.live_answer = None;
        self.session.reset();
        self.printer = HistoryPrinter::default();
        println!("── new conversation ──");
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.session.next_deadline(), self.router.next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }
}

async fn next_turn_event(turn: &mut Option<Turn>) -> Option<resident_assistant::Result<StreamEvent>> {
    match turn {
        Some(turn) => turn.next_event().await,
        None => std::future::pending().await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AssistantConfig> {
    let path = cli.config.clone().or_else(AssistantConfig::default_path);
    let mut config = match &path {
        Some(path) => AssistantConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AssistantConfig::default(),
    };

    if let Ok(url) = std::env::var(SERVER_URL_ENV) {
        if !url.trim().is_empty() {
            config = config.with_server_url(url.trim());
        }
    }
    if let Some(url) = &cli.server {
        config = config.with_server_url(url.as_str());
    }
    if cli.no_stream {
        config = config.with_stream(false);
    }
    if let Some(directory) = &cli.directory {
        config = config.with_directory_file(directory.clone());
    }
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = load_config(&cli)?;
    info!("Assistant server: {} (stream: {})", config.server_url, config.stream);

    let directory = match &config.directory_file {
        Some(path) => Directory::load(path)
            .with_context(|| format!("failed to load directory {}", path.display()))?,
        None => {
            info!("No directory file, list pages are empty");
            Directory::default()
        }
    };

    let (bus, inbox) = AgentBus::channel();
    let transport = HttpTransport::new(&config)?;
    let session = ChatSession::new(
        transport,
        &config,
        bus.clone(),
        SessionInbox {
            status: inbox.status,
            bot_message: inbox.bot_message,
        },
    );
    let router = Router::new(directory, bus, inbox.pages, config.typing_delay);

    let mut repl = Repl {
        session,
        router,
        notices: inbox.notice,
        printer: HistoryPrinter::default(),
        page: PageView::default(),
        turn: None,
        live_answer: None,
        live_text: String::new(),
    };

    // Spawn blocking thread to read from stdin
    let (input_tx, mut input_rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if input_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    repl.step(Instant::now());
    if !cli.prompt.is_empty() {
        let prompt = cli.prompt.join(" ");
        repl.printer.accept(repl.session.conversation(), repl.session.conversation().len());
        println!("{}", format_message(repl.session.conversation().len(), &Message::user(prompt.as_str())));
        repl.say(&prompt).await;
    }

    let mut input_open = true;
    loop {
        if !input_open && repl.turn.is_none() {
            break;
        }
        let deadline = repl.next_deadline();

        tokio::select! {
            line = input_rx.recv(), if input_open => {
                match line.map(|l| parse_command(&l)) {
                    None => input_open = false,
                    Some(Command::Say(text)) if text.is_empty() => {}
                    Some(Command::Say(text)) => repl.say(&text).await,
                    Some(Command::Feedback { kind, index, answer }) => repl.feedback(kind, index, answer).await,
                    Some(Command::Cancel) => repl.cancel(),
                    Some(Command::Reset) => repl.reset(),
                    Some(Command::History) => repl.printer.print_all(repl.session.conversation()),
                    Some(Command::Help) => println!("{HELP}"),
                    Some(Command::Quit) => break,
                    Some(Command::Invalid(message)) => eprintln!("⚠ {message}"),
                }
            }
            event = next_turn_event(&mut repl.turn), if repl.turn.is_some() => {
                repl.on_turn_event(event);
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
        }

        repl.step(Instant::now());
    }

    if let Some(turn) = repl.turn.take() {
        repl.session.cancel_turn(turn);
    }
    if let Err(e) = io::stdout().flush() {
        error!("Error flushing stdout: {}", e);
    }
    Ok(())
}
