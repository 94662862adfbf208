//! Interactive REPL.
//!
//! Lines are parsed with the same subcommands as the command line, so
//! `take PL 1042:FULL1` in the REPL does what `vizmse take PL 1042:FULL1` does.

use crate::commands;
use crate::Commands;
use clap::Parser;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use vizmse_core::{create_session, SessionConfig};

const HELP_TEXT: &str = r#"
Available commands:
  help                                  Show this help
  ping                                  Ping the MSE
  timeout [ms]                          Show or set the request timeout

  get <path> [-d depth] [--flat]        Print a subtree
  set <path> <text>                     Set the text of a node
  delete <path>                         Delete a node
  raw <command...>                      Send a raw PepTalk command

  shows | playlists | profiles | engines
  rundowns                              List rundowns
  create-rundown -s <show> -p <profile> [--playlist id] [-d description]
  delete-rundown <playlist>
  elements <playlist>
  activate <playlist> [--twice]
  deactivate <playlist>
  cue | take | out <playlist> <element>  Element is a name or vcpid[:channel]

  quit, exit                            Exit the REPL

Arguments containing spaces can be double-quoted.
"#;

#[derive(Parser, Debug)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct ReplLine {
    #[command(subcommand)]
    command: Commands,
}

pub async fn run(mut config: SessionConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "vizmse CLI".bold().cyan());
    println!("Connecting to {}:{}...", config.host, config.peptalk_port);

    config.noevents = true;
    let mse = create_session(config).await?;
    if mse.is_connected() {
        println!("{}", "Connected!".green());
    } else {
        println!(
            "{}",
            "Not connected; retrying in the background.".yellow()
        );
    }

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".vizmse_history"))
        .unwrap_or_else(|_| ".vizmse_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "mse>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&mse, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
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

    let _ = mse.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

async fn execute_repl_command(
    mse: &vizmse_core::Mse,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let args = split_args(line)?;
    let Some(first) = args.first() else {
        return Ok(Some(String::new()));
    };

    match first.to_lowercase().as_str() {
        "help" | "?" => return Ok(Some(HELP_TEXT.to_string())),
        "quit" | "exit" | "q" => return Ok(None),
        "timeout" => {
            if let Some(ms) = args.get(1) {
                let ms: u64 = ms.parse()?;
                mse.set_timeout(std::time::Duration::from_millis(ms));
            }
            return Ok(Some(format!("Timeout: {}ms", mse.timeout().as_millis())));
        }
        _ => {}
    }

    let parsed = match ReplLine::try_parse_from(&args) {
        Ok(parsed) => parsed,
        Err(e) => return Ok(Some(e.to_string().trim_end().to_string())),
    };

    match parsed.command {
        Commands::Repl | Commands::Watch => {
            Ok(Some("Not available inside the REPL".yellow().to_string()))
        }
        command => commands::execute(mse, command).await.map(Some),
    }
}

/// Splits a line on whitespace, keeping double-quoted runs together.
fn split_args(line: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if in_quotes {
        return Err("unterminated quote".to_string());
    }
    if has_token {
        args.push(current);
    }
    Ok(args)
}
