//! Mythos: play AI-narrated campaigns from a terminal.
//!
//! The world lives in a single JSON store file. Create a session, then play it:
//!
//! ```bash
//! cargo run -p mythos -- new campaigns.json --name "Ashes of Varn" --tone grim
//! cargo run -p mythos -- play campaigns.json <session-id> --player ayla
//! ```

mod headless;

use headless::{NewArgs, PlayArgs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // Check for API key
    let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") else {
        eprintln!("Error: ANTHROPIC_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export ANTHROPIC_API_KEY=your_key_here");
        std::process::exit(1);
    };

    match args[1].as_str() {
        "new" => match NewArgs::parse(&args[2..]) {
            Ok(new) => headless::run_new(new, api_key).await?,
            Err(e) => usage_error(&e),
        },
        "play" => match PlayArgs::parse(&args[2..]) {
            Ok(play) => headless::run_play(play, api_key).await?,
            Err(e) => usage_error(&e),
        },
        other => usage_error(&format!("unknown command '{other}'")),
    }

    Ok(())
}

fn usage_error(message: &str) {
    eprintln!("Error: {message}");
    eprintln!("Run `mythos --help` for usage.");
    std::process::exit(2);
}

fn print_help() {
    println!("Mythos - AI-narrated campaigns run by a team of specialist game masters");
    println!();
    println!("USAGE:");
    println!("  mythos new <STORE> --name <NAME> [OPTIONS]");
    println!("  mythos play <STORE> <SESSION> [--player <ID>]");
    println!();
    println!("NEW OPTIONS:");
    println!("  --name <NAME>         Campaign name (required)");
    println!("  --setting <TEXT>      One-line setting summary");
    println!("  --tone <TONE>         Narrative tone (e.g. grim, heroic, whimsical)");
    println!("  --mode <MODE>         solo or group (default: solo)");
    println!("  --duration <TEXT>     Expected campaign length");
    println!("  --system <SYSTEM>     Game system key for reference data");
    println!("  --player <ID>         Session owner (default: player)");
    println!();
    println!("PLAY OPTIONS:");
    println!("  --player <ID>         Who is speaking (default: player)");
    println!();
    println!("ENVIRONMENT:");
    println!("  ANTHROPIC_API_KEY     Required");
    println!("  RUST_LOG              Log filter (default: info), logs go to stderr");
    println!("  MYTHOS_*              Engine settings, e.g. MYTHOS_MODEL, MYTHOS_CONFLICT_POLICY");
    println!();
    println!("EXAMPLES:");
    println!("  mythos new world.json --name \"Ashes of Varn\" --tone grim");
    println!("  mythos play world.json session_5f0c9a7e... --player ayla");
}
