//! Command execution.

use crate::Commands;
use colored::Colorize;
use vizmse_core::{
    flatten_entry, parse_xml, CommandResult, ElementRef, ExternalId, FlatEntry, Mse, MseCommand,
};

/// Executes a command and returns the formatted output.
pub async fn execute(mse: &Mse, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        // Handled by main.rs and the REPL.
        Commands::Repl | Commands::Watch => unreachable!(),

        Commands::Ping => {
            let response = mse.ping().await?;
            Ok(response.body.green().to_string())
        }

        Commands::Get { path, depth, flat } => {
            let response = mse.peptalk().get(&path, depth).await?;
            if flat {
                Ok(format_json(&flatten_entry(&parse_xml(&response.body)?)))
            } else {
                Ok(response.body)
            }
        }

        Commands::Set { path, text } => {
            mse.peptalk().set_text(&path, &text).await?;
            Ok(format!("{} {}", "Set".green(), path.cyan()))
        }

        Commands::Delete { path } => {
            mse.peptalk().delete(&path).await?;
            Ok(format!("{} {}", "Deleted".green(), path.cyan()))
        }

        Commands::Raw { words } => {
            let response = mse.peptalk().send_raw(&words.join(" ")).await?;
            Ok(response.body)
        }

        Commands::Shows => {
            let shows = mse.list_shows().await?;
            if shows.is_empty() {
                return Ok("No shows".yellow().to_string());
            }
            Ok(shows
                .iter()
                .map(|show| format!("  {}", show.id.cyan()))
                .collect::<Vec<_>>()
                .join("\n"))
        }

        Commands::Playlists => {
            let playlists = mse.list_playlists().await?;
            if playlists.is_empty() {
                return Ok("No playlists".yellow().to_string());
            }
            let mut output = String::new();
            for playlist in playlists {
                output.push_str(&format!(
                    "  {} [show: {}, profile: {}] {}\n",
                    playlist.id.cyan(),
                    playlist.show.as_deref().unwrap_or("-"),
                    playlist.profile.as_deref().unwrap_or("-"),
                    playlist.description.unwrap_or_default().dimmed()
                ));
            }
            Ok(output)
        }

        Commands::Profiles => {
            let profiles = mse.list_profiles().await?;
            if profiles.is_empty() {
                return Ok("No profiles".yellow().to_string());
            }
            Ok(profiles
                .iter()
                .map(|profile| format!("  {}", profile.name.cyan()))
                .collect::<Vec<_>>()
                .join("\n"))
        }

        Commands::Engines => {
            let engines = mse.get_engines().await?;
            if engines.is_empty() {
                return Ok("No Viz Engine handlers".yellow().to_string());
            }
            let mut output = String::new();
            for engine in engines {
                let renderer = engine
                    .node
                    .get("renderer")
                    .and_then(|v| v.as_text())
                    .unwrap_or("-");
                output.push_str(&format!("  {} ({})\n", engine.name.cyan(), renderer));
            }
            Ok(output)
        }

        Commands::Rundowns => {
            let rundowns = mse.list_rundowns().await?;
            if rundowns.is_empty() {
                return Ok("No rundowns".yellow().to_string());
            }
            let mut output = String::new();
            for rundown in rundowns {
                output.push_str(&format!(
                    "  {} [show: {}, profile: {}] {}\n",
                    rundown.playlist().cyan(),
                    rundown.show(),
                    rundown.profile().yellow(),
                    rundown.description().dimmed()
                ));
            }
            Ok(output)
        }

        Commands::CreateRundown {
            show,
            profile,
            playlist,
            description,
        } => {
            let rundown = mse
                .create_rundown(&show, &profile, playlist.as_deref(), description.as_deref())
                .await?;
            Ok(format!(
                "{} rundown {}\n  Show: {}\n  Profile: {}",
                "Created".green(),
                rundown.playlist().cyan(),
                rundown.show(),
                rundown.profile().yellow()
            ))
        }

        Commands::DeleteRundown { playlist } => {
            let rundown = mse.get_rundown(&playlist).await?;
            mse.delete_rundown(&rundown).await?;
            Ok(format!("{} rundown {}", "Deleted".green(), playlist.cyan()))
        }

        Commands::Elements { playlist } => {
            let rundown = mse.get_rundown(&playlist).await?;
            let elements = rundown.list_elements().await?;
            if elements.is_empty() {
                return Ok("No elements".yellow().to_string());
            }
            let mut output = String::new();
            for element in elements {
                match element {
                    ElementRef::Internal(name) => {
                        output.push_str(&format!("  {}\n", name.cyan()))
                    }
                    ElementRef::External(id) => output.push_str(&format!(
                        "  {} {}\n",
                        id.vcpid.to_string().yellow(),
                        id.channel.unwrap_or_default()
                    )),
                }
            }
            Ok(output)
        }

        Commands::Activate { playlist, twice } => {
            let rundown = mse.get_rundown(&playlist).await?;
            let result = rundown.activate(twice).await?;
            Ok(format_result("Activated", &playlist, &result))
        }

        Commands::Deactivate { playlist } => {
            let rundown = mse.get_rundown(&playlist).await?;
            let result = rundown.deactivate().await?;
            Ok(format_result("Deactivated", &playlist, &result))
        }

        Commands::Cue { playlist, element } => {
            playout(mse, MseCommand::Cue, &playlist, &element).await
        }

        Commands::Take { playlist, element } => {
            playout(mse, MseCommand::Take, &playlist, &element).await
        }

        Commands::Out { playlist, element } => {
            playout(mse, MseCommand::Out, &playlist, &element).await
        }
    }
}

async fn playout(
    mse: &Mse,
    command: MseCommand,
    playlist: &str,
    element: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let rundown = mse.get_rundown(playlist).await?;
    let element = parse_element(element);
    let result = rundown.command(command, &element).await?;
    Ok(format_result(command.as_str(), &element.to_string(), &result))
}

/// Parses an element argument: `vcpid[:channel]` names an external
/// element, anything else an internal one.
pub fn parse_element(arg: &str) -> ElementRef {
    let (id, channel) = match arg.split_once(':') {
        Some((id, channel)) => (id, Some(channel).filter(|c| !c.is_empty())),
        None => (arg, None),
    };
    match id.parse::<u64>() {
        Ok(vcpid) => ElementRef::External(ExternalId::new(vcpid, channel)),
        Err(_) => ElementRef::Internal(arg.to_string()),
    }
}

fn format_result(action: &str, target: &str, result: &CommandResult) -> String {
    let mut output = format!("{} {} ({})", action.green(), target.cyan(), result.status);
    if !result.response.trim().is_empty() {
        output.push_str(&format!("\n{}", result.response.trim()));
    }
    output
}

/// Formats a flattened node for display.
fn format_json(entry: &FlatEntry) -> String {
    serde_json::to_string_pretty(entry).unwrap_or_else(|e| format!("<{}>", e))
}
