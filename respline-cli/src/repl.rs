//! Interactive REPL.
//!
//! Lines are parsed with the same subcommands as one-shot mode. Anything that
//! is not one of them is sent to the server verbatim, like `redis-cli`.

use crate::commands;
use crate::Commands;
use clap::error::ErrorKind;
use clap::Parser;
use colored::Colorize;
use respline_client::Client;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

const HELP_TEXT: &str = r#"
Available commands:
  help                                   Show this help
  ping                                   Ping the server
  info [section]                         Get server info
  version                                Server version and capabilities

  geoadd <key> <lon> <lat> <member> ...  Add members to a geo set
  geohash <key> <member> ...             Geohash of members
  geopos <key> <member> ...              Position of members
  geodist <key> <m1> <m2> [--unit u]     Distance between members
  georadius <key> <lon> <lat> <r> [unit] [--withdist] [--withcoord]
            [--withhash] [--count n] [--order asc|desc]
  georadiusbymember <key> <member> <r> [unit] [...same flags]

  <any other command>                    Sent to the server as-is

  quit, exit                             Exit the REPL
"#;

/// One REPL line, parsed without a binary name.
#[derive(Parser)]
#[command(no_binary_name = true, disable_help_subcommand = true, name = "")]
struct ReplLine {
    #[command(subcommand)]
    command: Commands,
}

/// What to do with one line of input.
#[derive(Debug, PartialEq)]
enum Action {
    Quit,
    Help,
    Command(Vec<String>),
    Raw(Vec<String>),
}

pub async fn run(client: &Client, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "respline CLI".bold().cyan());
    println!(
        "{} {}",
        "Connected to".green(),
        client.connection().peer()
    );

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".respline_history"))
        .unwrap_or_else(|_| ".respline_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "respline>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let output = match classify(&line) {
                    None => continue,
                    Some(Action::Quit) => break,
                    Some(Action::Help) => Ok(HELP_TEXT.to_string()),
                    Some(Action::Command(words)) => run_command(client, words, json).await,
                    Some(Action::Raw(words)) => run_raw(client, &words, json).await,
                };
                match output {
                    Ok(output) => println!("{}\n", output),
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

fn classify(line: &str) -> Option<Action> {
    let words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
    let first = words.first()?.to_lowercase();

    Some(match first.as_str() {
        "quit" | "exit" | "q" => Action::Quit,
        "help" | "?" => Action::Help,
        _ => match ReplLine::try_parse_from(&words) {
            Err(e) if e.kind() == ErrorKind::InvalidSubcommand => Action::Raw(words),
            _ => Action::Command(words),
        },
    })
}

async fn run_command(
    client: &Client,
    words: Vec<String>,
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    match ReplLine::try_parse_from(&words) {
        Ok(line) => commands::execute(client, line.command, json).await,
        // Usage errors are shown, not treated as failures
        Err(e) => Ok(e.render().to_string()),
    }
}

async fn run_raw(
    client: &Client,
    words: &[String],
    json: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    let reply = commands::execute_raw(client, words).await?;
    if json {
        return Ok(serde_json::to_string_pretty(&reply)?);
    }
    Ok(commands::format_reply(&reply))
}
