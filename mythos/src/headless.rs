//! Line-oriented session driver.
//!
//! `new` creates a session in a JSON store file. `play` reads one turn per
//! line from stdin:
//! - Lines starting with `#` are commands (quit, save, status, help)
//! - Everything else is sent to the game masters as the player's input
//!
//! The store file is rewritten after every turn.

use claude::Claude;
use mythos_core::{
    ApiKey, ClaudeCompletion, EngineConfig, EngineError, MemoryStore, Orchestrator, PlayerId,
    SessionId, SessionSetup, SessionSnapshot, SetupRequest, WorldStore,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_PLAYER: &str = "player";

/// Arguments of `mythos new`.
#[derive(Debug, Clone)]
pub struct NewArgs {
    pub store: PathBuf,
    pub request: SetupRequest,
}

impl NewArgs {
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut store = None;
        let mut name = None;
        let mut request = SetupRequest::new("", DEFAULT_PLAYER);

        let mut i = 0;
        while i < args.len() {
            let value = || value_of(args, i);
            match args[i].as_str() {
                "--name" => name = Some(value()?),
                "--setting" => request = request.with_setting(value()?),
                "--tone" => request = request.with_tone(value()?),
                "--mode" => {
                    let mode = value()?.to_lowercase();
                    if mode != "solo" && mode != "group" {
                        return Err(format!("--mode must be solo or group, not '{mode}'"));
                    }
                    request = request.with_mode(mode);
                }
                "--duration" => request = request.with_duration(value()?),
                "--system" => request = request.with_system(value()?),
                "--player" => request.owner = PlayerId::from(value()?),
                flag if flag.starts_with("--") => return Err(format!("unknown option '{flag}'")),
                path if store.is_none() => {
                    store = Some(PathBuf::from(path));
                    i += 1;
                    continue;
                }
                extra => return Err(format!("unexpected argument '{extra}'")),
            }
            i += 2;
        }

        request.campaign_name = name.ok_or("--name is required")?;
        Ok(Self {
            store: store.ok_or("missing store file")?,
            request,
        })
    }
}

/// Arguments of `mythos play`.
#[derive(Debug, Clone)]
pub struct PlayArgs {
    pub store: PathBuf,
    pub session: SessionId,
    pub player: PlayerId,
}

impl PlayArgs {
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut positional = Vec::new();
        let mut player = PlayerId::from(DEFAULT_PLAYER);

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--player" => {
                    let id = args.get(i + 1).ok_or("--player needs a value")?;
                    player = PlayerId::from(id.as_str());
                    i += 1;
                }
                flag if flag.starts_with("--") => return Err(format!("unknown option '{flag}'")),
                arg => positional.push(arg.to_string()),
            }
            i += 1;
        }

        match positional.as_slice() {
            [store, session] => Ok(Self {
                store: PathBuf::from(store),
                session: SessionId::from(session.as_str()),
                player,
            }),
            _ => Err("expected <STORE> <SESSION>".to_string()),
        }
    }
}

fn value_of(args: &[String], i: usize) -> Result<String, String> {
    args.get(i + 1)
        .cloned()
        .ok_or_else(|| format!("{} needs a value", args[i]))
}

fn completion(config: &EngineConfig) -> Arc<ClaudeCompletion> {
    // The key travels with each call, not with the client.
    Arc::new(ClaudeCompletion::configured(Claude::new(""), config))
}

/// Create a session and print its opening message.
pub async fn run_new(args: NewArgs, api_key: String) -> Result<(), EngineError> {
    let config = EngineConfig::from_env();
    let store = Arc::new(MemoryStore::open_or_default(&args.store).await?);

    let created = SessionSetup::new(store.clone(), completion(&config))
        .with_timeout(config.compiler_timeout)
        .create_session(&args.request, &ApiKey::from(api_key))
        .await?;
    store.save_json(&args.store).await?;

    println!("[SESSION] {}", created.session);
    println!();
    for para in created.initial_message.split("\n\n") {
        println!("{para}");
    }
    println!();
    println!(
        "Play with: mythos play {} {} --player {}",
        args.store.display(),
        created.session,
        args.request.owner
    );
    Ok(())
}

/// Run the REPL until `#quit` or end of input.
pub async fn run_play(args: PlayArgs, api_key: String) -> Result<(), EngineError> {
    let config = EngineConfig::from_env();
    let store = Arc::new(MemoryStore::load_json(&args.store).await?);
    let orchestrator = Orchestrator::new(store.clone(), completion(&config)).with_config(&config);
    let credential = ApiKey::from(api_key);

    let snapshot = read_snapshot(store.as_ref(), &args.session).await?;
    tracing::info!(session = %args.session, store = %args.store.display(), "session loaded");
    println!("=== {} ===", title(&snapshot));
    print_status(&snapshot, &args.player);
    println!();
    print_help();
    println!();
    println!("Enter your actions (one per line):");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('#') {
            let parts: Vec<&str> = command.split_whitespace().collect();
            match parts.first().copied() {
                Some("quit") | Some("exit") => {
                    println!("Goodbye!");
                    break;
                }
                Some("save") => {
                    let path = parts
                        .get(1)
                        .map(|p| PathBuf::from(*p))
                        .unwrap_or_else(|| args.store.clone());
                    match store.save_json(&path).await {
                        Ok(()) => println!("[SAVED] {}", path.display()),
                        Err(e) => println!("[ERROR] Save failed: {e}"),
                    }
                }
                Some("status") => match read_snapshot(store.as_ref(), &args.session).await {
                    Ok(snapshot) => print_status(&snapshot, &args.player),
                    Err(e) => println!("[ERROR] {e}"),
                },
                Some("help") => print_help(),
                _ => println!("[ERROR] Unknown command. Type #help for help."),
            }
            stdout.flush().ok();
            continue;
        }

        print!("[PROCESSING]");
        stdout.flush().ok();

        let result = orchestrator
            .process_input(&args.session, &args.player, &credential, line)
            .await;

        // Clear the processing indicator
        print!("\r            \r");
        stdout.flush().ok();

        match result {
            Ok(turn) => {
                println!("[GM]");
                for para in turn.narrative.split("\n\n") {
                    println!("{para}");
                }
                println!();
                if !turn.state_committed {
                    println!("[WARNING] World changes from this turn were not saved.");
                }
                if let Err(e) = store.save_json(&args.store).await {
                    tracing::error!(error = %e, "autosave failed");
                    println!("[ERROR] Save failed: {e}");
                }
            }
            Err(e) => println!("[ERROR] {e}"),
        }
    }

    store.save_json(&args.store).await?;
    Ok(())
}

async fn read_snapshot(
    store: &MemoryStore,
    session: &SessionId,
) -> Result<SessionSnapshot, EngineError> {
    let raw = store
        .read_session(session)
        .await?
        .ok_or_else(|| EngineError::NotFound(session.clone()))?;
    Ok(SessionSnapshot::from_value(session.clone(), raw))
}

fn title(snapshot: &SessionSnapshot) -> &str {
    match snapshot.metadata.campaign_name.as_str() {
        "" => snapshot.id.as_str(),
        name => name,
    }
}

fn print_status(snapshot: &SessionSnapshot, player: &PlayerId) {
    let character = snapshot
        .player(player)
        .map(|pc| pc.character_name.as_str())
        .filter(|name| !name.is_empty())
        .unwrap_or("(no character yet)");
    let location = snapshot
        .current_location()
        .map(|loc| loc.name.as_str())
        .or(snapshot.current_location_id())
        .unwrap_or("(nowhere yet)");
    let mode = if snapshot.metadata.is_oracle_mode() {
        "solo"
    } else {
        "group"
    };

    println!("[STATUS]");
    println!("  Session: {}", snapshot.id);
    println!("  Player: {player} as {character}");
    println!("  Location: {location}");
    println!("  Mode: {mode}");
    println!("  Chaos: {}", snapshot.game_state.chaos_factor.get());
    println!("  In Combat: {}", snapshot.game_state.combat.in_combat);
    println!("  Messages: {}", snapshot.history.chat.len());
}

fn print_help() {
    println!("[HELP]");
    println!("  #quit        - Exit (the store is saved)");
    println!("  #save [path] - Save the store, optionally to another file");
    println!("  #status      - Show the session status");
    println!("  #help        - Show this help");
    println!("  (anything else is sent as your action)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_new() {
        let parsed = NewArgs::parse(&args(&[
            "world.json",
            "--name",
            "Ashes",
            "--tone",
            "grim",
            "--mode",
            "Group",
            "--player",
            "ayla",
        ]))
        .unwrap();
        assert_eq!(parsed.store, PathBuf::from("world.json"));
        assert_eq!(parsed.request.campaign_name, "Ashes");
        assert_eq!(parsed.request.tone, "grim");
        assert_eq!(parsed.request.player_mode, "group");
        assert_eq!(parsed.request.owner.as_str(), "ayla");
    }

    #[test]
    fn test_parse_new_rejects_bad_input() {
        assert!(NewArgs::parse(&args(&["world.json"])).is_err());
        assert!(NewArgs::parse(&args(&["--name", "Ashes"])).is_err());
        assert!(NewArgs::parse(&args(&["w.json", "--name", "A", "--mode", "duo"])).is_err());
        assert!(NewArgs::parse(&args(&["w.json", "--name"])).is_err());
    }

    #[test]
    fn test_parse_play() {
        let parsed =
            PlayArgs::parse(&args(&["world.json", "session_1", "--player", "bo"])).unwrap();
        assert_eq!(parsed.session.as_str(), "session_1");
        assert_eq!(parsed.player.as_str(), "bo");

        let parsed = PlayArgs::parse(&args(&["world.json", "session_1"])).unwrap();
        assert_eq!(parsed.player.as_str(), DEFAULT_PLAYER);
        assert!(PlayArgs::parse(&args(&["world.json"])).is_err());
    }
}
