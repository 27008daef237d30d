use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mailbucket_client::{AddressStore, Config, Error, Inbox, InboxState, Notice, ViewMode, view};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Parser)]
#[command(name = "mailbucket")]
#[command(about = "Temporary email inbox in the terminal", long_about = None, version)]
struct Cli {
    /// Backend base URL (overrides the config file and MAILBUCKET_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// File holding the active address
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the domains addresses can be created on
    Domains,

    /// Replace the active address with a new one
    New {
        /// Custom username; random when omitted
        #[arg(long)]
        username: Option<String>,
        /// Domain; the first available one when omitted
        #[arg(long)]
        domain: Option<String>,
    },

    /// Print the active address and its remaining lifetime
    Show,

    /// List the inbox
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        unread: bool,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },

    /// Print one message
    Read {
        id: String,
        /// Do not mark the message read
        #[arg(long)]
        keep_unread: bool,
        /// Show the plain-text body even when an HTML body exists
        #[arg(long)]
        plain: bool,
        #[arg(long, default_value_t = 80)]
        width: usize,
    },

    /// Delete one message
    Delete { id: String },

    /// Print the download URL of a raw message or one of its attachments
    Url {
        id: String,
        #[arg(long)]
        attachment: Option<String>,
    },

    /// Keep the inbox open, refreshing it in the background
    Watch {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        no_auto_refresh: bool,
    },

    /// Drop the active address
    Forget,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load().context("Configuration error")?;
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    if let Some(path) = &cli.state_file {
        config.state_file = Some(path.clone());
    }
    Ok(config)
}

fn open_inbox(config: &Config) -> Result<(Inbox, UnboundedReceiver<Notice>)> {
    let client = config.client()?;
    let store = Arc::new(config.store());
    Ok(Inbox::new(client, store, config.inbox_options()))
}

fn print_notices(notices: &mut UnboundedReceiver<Notice>) {
    while let Ok(notice) = notices.try_recv() {
        eprintln!("! {notice}");
    }
}

const NO_ADDRESS: &str = "no active address; run `mailbucket new`";

fn active_address(config: &Config) -> Result<mailbucket_client::Address> {
    config.store().get()?.ok_or_else(|| anyhow!(NO_ADDRESS))
}

fn resume(inbox: &Inbox) -> Result<()> {
    match inbox.resume() {
        Ok(_) => Ok(()),
        Err(Error::NoAddress) => Err(anyhow!(NO_ADDRESS)),
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("warn"));

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.cmd {
        Command::Domains => {
            for domain in config.client()?.domains().await? {
                println!("{domain}");
            }
            Ok(())
        }

        Command::New { username, domain } => {
            let (inbox, mut notices) = open_inbox(&config)?;
            if domain.is_none() {
                // Failures only mean the backend picks its default domain.
                let _ = inbox.load_domains().await;
            }
            let created = inbox.create_address(username, domain).await;
            print_notices(&mut notices);
            let address = created?;
            println!("{}", view::render_address(&address, Utc::now()));
            Ok(())
        }

        Command::Show => {
            match config.store().get()? {
                Some(address) => println!("{}", view::render_address(&address, Utc::now())),
                None => println!("No active address. Run `mailbucket new` to create one."),
            }
            Ok(())
        }

        Command::List {
            search,
            unread,
            page,
        } => {
            let (inbox, mut notices) = open_inbox(&config)?;
            inbox.set_filters(search.unwrap_or_default(), unread, page);
            let mounted = inbox.mount().await;
            print_notices(&mut notices);
            mounted?;
            print!("{}", view::render_inbox(&inbox.state(), Utc::now()));
            Ok(())
        }

        Command::Read {
            id,
            keep_unread,
            plain,
            width,
        } => {
            let (inbox, mut notices) = open_inbox(&config)?;
            resume(&inbox)?;
            let opened = if keep_unread {
                inbox.peek_email(&id).await
            } else {
                inbox.select_email(&id).await
            };
            print_notices(&mut notices);
            opened?;

            let state = inbox.state();
            let (Some(detail), Some(address)) = (&state.selected, &state.address) else {
                return Err(anyhow!("message {id} is no longer available"));
            };
            let mode = if plain { ViewMode::Plain } else { ViewMode::Html };
            print!("{}", view::render_detail(detail, mode, width));
            let attachments = view::render_attachments(inbox.client(), &address.token, detail);
            if !attachments.is_empty() {
                print!("\n{attachments}");
            }
            Ok(())
        }

        Command::Delete { id } => {
            let (inbox, mut notices) = open_inbox(&config)?;
            resume(&inbox)?;
            let deleted = inbox.delete_email(&id).await;
            print_notices(&mut notices);
            deleted?;
            println!("Deleted {id}");
            Ok(())
        }

        Command::Url { id, attachment } => {
            let address = active_address(&config)?;
            let client = config.client()?;
            let url = match attachment {
                Some(att) => client.attachment_url(&address.token, &id, &att),
                None => client.raw_email_url(&address.token, &id),
            };
            println!("{url}");
            Ok(())
        }

        Command::Watch {
            search,
            unread,
            no_auto_refresh,
        } => {
            let (inbox, notices) = open_inbox(&config)?;
            inbox.set_filters(search.unwrap_or_default(), unread, 1);
            inbox.set_auto_refresh(!no_auto_refresh);
            watch(inbox, notices).await
        }

        Command::Forget => {
            let (inbox, _) = open_inbox(&config)?;
            inbox.forget()?;
            println!("Forgot the active address.");
            Ok(())
        }
    }
}

const WATCH_HELP: &str = "commands: r refresh | o <id> open | d <id> delete | n [username] new address \
                          | s [query] search | u toggle unread | a toggle auto-refresh \
                          | v toggle html/plain | q quit";

/// What the inbox printout depends on; reprint when it changes.
fn fingerprint(state: &InboxState) -> (u64, Vec<(String, bool)>) {
    (
        state.generation(),
        state
            .emails
            .iter()
            .map(|e| (e.id.clone(), e.is_read))
            .collect(),
    )
}

async fn watch(inbox: Inbox, mut notices: UnboundedReceiver<Notice>) -> Result<()> {
    if let Err(e) = inbox.mount().await {
        log::error!("startup failed: {e}");
    }
    let _timer = inbox.spawn_auto_refresh();

    let print_inbox = |state: &InboxState| {
        if let Some(address) = &state.address {
            println!("{}", view::render_address(address, Utc::now()));
        }
        print!("{}", view::render_inbox(state, Utc::now()));
        println!("{WATCH_HELP}");
    };

    let mut shown = fingerprint(&inbox.state());
    print_inbox(&inbox.state());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut redraw = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(notice) = notices.recv() => eprintln!("! {notice}"),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !run_watch_command(&inbox, line.trim()).await {
                    break;
                }
            }
            _ = redraw.tick() => {
                let state = inbox.state();
                let current = fingerprint(&state);
                if current != shown {
                    shown = current;
                    print_inbox(&state);
                }
            }
        }
    }
    Ok(())
}

/// Run one interactive command. Returns false to quit.
///
/// Failures were already logged and turned into notices by the inbox.
async fn run_watch_command(inbox: &Inbox, line: &str) -> bool {
    let (cmd, arg) = match line.split_once(' ') {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (line, ""),
    };

    match cmd {
        "" => {}
        "q" => return false,
        "r" => {
            let _ = inbox.refresh().await;
        }
        "o" if !arg.is_empty() => {
            if inbox.select_email(arg).await.is_ok() {
                let state = inbox.state();
                if let (Some(detail), Some(address)) = (&state.selected, &state.address) {
                    print!("{}", view::render_detail(detail, state.view_mode, 80));
                    print!("{}", view::render_attachments(inbox.client(), &address.token, detail));
                }
            }
        }
        "d" if !arg.is_empty() => {
            if inbox.delete_email(arg).await.is_ok() {
                println!("Deleted {arg}");
            }
        }
        "n" => {
            let username = Some(arg.to_string()).filter(|u| !u.is_empty());
            match inbox.create_address(username, None).await {
                Ok(address) => println!("New address: {}", address.email),
                Err(Error::Superseded(email)) => println!("{email} was replaced by a newer address"),
                Err(_) => {}
            }
        }
        "s" => {
            let _ = inbox.search(arg).await;
        }
        "u" => {
            let unread_only = !inbox.state().unread_only;
            let _ = inbox.set_unread_only(unread_only).await;
        }
        "a" => {
            let enabled = !inbox.state().auto_refresh;
            inbox.set_auto_refresh(enabled);
            println!("Auto-refresh {}", if enabled { "on" } else { "off" });
        }
        "v" => {
            let mode = match inbox.state().view_mode {
                ViewMode::Html => ViewMode::Plain,
                ViewMode::Plain => ViewMode::Html,
            };
            inbox.set_view_mode(mode);
        }
        _ => println!("{WATCH_HELP}"),
    }
    true
}
