// tteams: serverless terminal chat for a local network
//
// `tteams run` joins the network: it listens for neighbors over TCP,
// renders the contact list and the selected chat on stdout, and reads
// commands and messages from stdin.

mod config;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::io::BufRead;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tteams_core::{Engine, MemoryChannel, TcpServer, TcpTransport};

#[derive(Parser)]
#[command(name = "tteams")]
#[command(about = "TerminalTeams: serverless chat for your local network", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the network and start chatting
    Run {
        #[arg(short, long)]
        nickname: Option<String>,
        #[arg(short, long)]
        interface: Option<String>,
        #[arg(short, long)]
        address: Option<Ipv4Addr>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Neighbor to greet, `ip` or `ip:port`; repeatable
        #[arg(long = "neighbor")]
        neighbors: Vec<String>,
        /// Log at debug level
        #[arg(short, long)]
        verbose: bool,
        /// Write the log file as JSON lines
        #[arg(long)]
        log_json: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show this node's identity
    Identity,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Switch(usize),
    Contacts,
    Quit,
    Message(String),
    Empty,
    Invalid(String),
}

impl Input {
    fn parse(line: &str) -> Input {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Input::Empty;
        }
        let mut words = trimmed.split_whitespace();
        match words.next() {
            Some("/switch") | Some("/s") => match (words.next().map(str::parse::<usize>), words.next()) {
                (Some(Ok(id)), None) => Input::Switch(id),
                _ => Input::Invalid("usage: /switch <contact number>".into()),
            },
            Some("/contacts") => Input::Contacts,
            Some("/quit") | Some("/exit") => Input::Quit,
            _ => Input::Message(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            nickname,
            interface,
            address,
            port,
            neighbors,
            verbose,
            log_json,
        } => {
            let _guard = init_file_logging(verbose, log_json)?;
            let mut config = config::Config::load()?;
            if let Some(nickname) = nickname {
                config.nickname = nickname;
            }
            if let Some(interface) = interface {
                config.interface = interface;
            }
            if let Some(address) = address {
                config.address = address;
            }
            if let Some(port) = port {
                config.listen_port = port;
            }
            for neighbor in neighbors {
                config.add_neighbor(neighbor);
            }
            cmd_run(config).await
        }
        Commands::Config { action } => {
            init_stderr_logging();
            cmd_config(action)
        }
        Commands::Identity => {
            init_stderr_logging();
            cmd_identity()
        }
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(false))
        .with_writer(std::io::stderr)
        .init();
}

/// stdout belongs to the chat, so a running node logs to a file.
fn init_file_logging(verbose: bool, json: bool) -> Result<WorkerGuard> {
    let log_dir = config::Config::data_dir()?;
    let appender = tracing_appender::rolling::never(&log_dir, "tteams.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(writer)
        .with_ansi(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(guard)
}

async fn cmd_run(config: config::Config) -> Result<()> {
    let node = config.node_config();
    node.validate()?;

    let server = TcpServer::bind(&node.address(), &node.transport)
        .await
        .with_context(|| format!("Failed to listen on {}", node.address()))?;
    let transport = Arc::new(TcpTransport::new(&node.transport));
    let (contacts, contacts_view) = MemoryChannel::pair();
    let (chat, chat_view) = MemoryChannel::pair();
    let engine = Arc::new(
        Engine::new(node, transport, Arc::new(contacts), Arc::new(chat))
            .context("Failed to create node")?,
    );

    println!("{}", "TerminalTeams starting...".bold());
    println!("  Nickname: {}", config.nickname.bright_cyan());
    println!("  Identity: {}", config.identity.bright_yellow());
    println!("  Listening on {}", engine.address().bright_green());
    println!();
    println!("{}", "Commands:".bold());
    println!("  {} <n>    select contact n", "/switch".bright_green());
    println!("  {}      list contacts", "/contacts".bright_green());
    println!("  {}          stop", "/quit".bright_green());
    println!("  anything else is sent to the selected contact");
    println!();

    let views = [
        tokio::spawn(render::contacts_view(contacts_view)),
        tokio::spawn(render::chat_view(chat_view, engine.registry())),
    ];
    tokio::spawn(server.serve(engine.service(), engine.stopper()));
    engine.start().context("Failed to start node")?;

    // Blocking stdin reads live on a plain thread so they never hold up
    // runtime shutdown.
    let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let input_engine = engine.clone();
    let input_task = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            match Input::parse(&line) {
                Input::Empty => {}
                Input::Switch(id) => {
                    if !input_engine.switcher(id) {
                        println!("{} No contact #{}", "✗".red(), id);
                    }
                }
                Input::Contacts => print_contacts(&input_engine),
                Input::Quit => break,
                Input::Message(text) => {
                    if !input_engine.mailbox(&text) {
                        println!("{} Not sent", "✗".red());
                    }
                }
                Input::Invalid(usage) => println!("{}", usage.dimmed()),
            }
        }
        input_engine.stop();
    });

    let stopper = engine.stopper();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("Shutting down...");
            engine.stop();
        }
        _ = stopper.wait() => {}
    }
    engine.wait().await;
    input_task.abort();
    for view in views {
        let _ = view.await;
    }
    Ok(())
}

fn print_contacts(engine: &Engine<TcpTransport>) {
    let contacts = engine.contacts();
    println!("{} ({} total)", "Contacts".bold(), contacts.len());
    for contact in contacts {
        println!(
            "  #{} {} {} {}",
            contact.id,
            contact.nickname.bright_cyan(),
            contact.address.dimmed(),
            contact.status
        );
    }
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();
            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
            println!();
            println!("Config file: {}", config::Config::config_file()?.display());
        }
    }
    Ok(())
}

fn cmd_identity() -> Result<()> {
    let config = config::Config::load()?;
    println!("{}", "Identity Information".bold());
    println!("  Nickname: {}", config.nickname.bright_cyan());
    println!("  Identity: {}", config.identity.bright_yellow());
    println!(
        "  Address:  {}",
        format!("{}:{}", config.address, config.listen_port).bright_green()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(Input::parse("/switch 2"), Input::Switch(2));
        assert_eq!(Input::parse("  /s 0 "), Input::Switch(0));
        assert_eq!(Input::parse("/contacts"), Input::Contacts);
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse("   "), Input::Empty);
        assert_eq!(
            Input::parse("hello there"),
            Input::Message("hello there".into())
        );
    }

    #[test]
    fn test_parse_bad_switch() {
        assert!(matches!(Input::parse("/switch"), Input::Invalid(_)));
        assert!(matches!(Input::parse("/switch x"), Input::Invalid(_)));
        assert!(matches!(Input::parse("/s 1 2"), Input::Invalid(_)));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "tteams", "run", "-n", "alice", "-p", "9191", "--neighbor", "10.0.0.2",
            "--neighbor", "10.0.0.3:9000", "--log-json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                nickname,
                port,
                neighbors,
                log_json,
                verbose,
                ..
            } => {
                assert_eq!(nickname.as_deref(), Some("alice"));
                assert_eq!(port, Some(9191));
                assert_eq!(neighbors, ["10.0.0.2", "10.0.0.3:9000"]);
                assert!(log_json);
                assert!(!verbose);
            }
            _ => panic!("expected run"),
        }
    }
}
