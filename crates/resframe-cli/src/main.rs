use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use resframe_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use resframe_contracts::events::EventLog;
use resframe_contracts::profiles::{ChatGate, ProfileRegistry, WorkflowProfile, DEFAULT_PROFILE};
use resframe_engine::{
    load_uploads, AppState, EstimatorConfig, EstimatorError, SessionManager, TurnKind, Workflow,
};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "resframe", version, about = "Framing labor estimator chat client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: plan analysis plus follow-up chat.
    Chat(ChatArgs),
    /// Analyze plan images once and print the estimate.
    Estimate(EstimateArgs),
    /// List the available workflow profiles.
    Profiles,
}

#[derive(Debug, Parser)]
struct SharedArgs {
    #[arg(long, conflicts_with = "no_events")]
    events: Option<PathBuf>,
    /// Do not write events.jsonl.
    #[arg(long)]
    no_events: bool,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long, default_value = DEFAULT_PROFILE)]
    profile: String,
    #[arg(long, default_value = ".")]
    out: PathBuf,
    #[command(flatten)]
    shared: SharedArgs,
}

#[derive(Debug, Parser)]
struct EstimateArgs {
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long, default_value = DEFAULT_PROFILE)]
    profile: String,
    #[arg(long)]
    out: Option<PathBuf>,
    #[command(flatten)]
    shared: SharedArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("resframe error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Estimate(args) => run_estimate(args),
        Command::Profiles => {
            print_profiles(&ProfileRegistry::load());
            Ok(0)
        }
    }
}

fn build_workflow(
    profiles: &ProfileRegistry,
    profile_name: &str,
    default_events_path: PathBuf,
    shared: &SharedArgs,
) -> Result<(Workflow, AppState)> {
    let profile = lookup_profile(profiles, profile_name)?;
    let config = EstimatorConfig::from_env(shared.api_key.clone(), shared.model.clone());
    let manager = SessionManager::new(&config)?;
    if let Some(reason) = manager.fallback_reason() {
        eprintln!("{reason}");
    }
    if manager.provider() == "gemini" && !config.has_credential() {
        eprintln!("No API key configured; set GEMINI_API_KEY or pass --api-key.");
    }
    let events = if shared.no_events {
        EventLog::disabled()
    } else {
        EventLog::new(shared.events.clone().unwrap_or(default_events_path), "")
    };
    let workflow = Workflow::new(manager, events);
    Ok((workflow, AppState::new(profile)))
}

fn lookup_profile(profiles: &ProfileRegistry, name: &str) -> Result<WorkflowProfile> {
    profiles.get(name.trim()).cloned().ok_or_else(|| {
        anyhow!(
            "unknown profile '{}' (available: {})",
            name.trim(),
            profiles.names().join(", ")
        )
    })
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let profiles = ProfileRegistry::load();
    let (workflow, mut state) = build_workflow(
        &profiles,
        &args.profile,
        args.out.join("events.jsonl"),
        &args.shared,
    )?;

    let stdin = io::stdin();
    let mut line = String::new();
    print_banner(&state.profile);

    loop {
        print!("{}", prompt_for(&state));
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        match intent.action.as_str() {
            "noop" => {}
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join("  "));
                println!("Anything else is sent to the assistant as a message.");
            }
            "quit" => break,
            "estimate" => {
                let paths = value_as_string_list(intent.command_args.get("paths"));
                if paths.is_empty() {
                    println!("/estimate requires at least one image path");
                    continue;
                }
                let images = match load_uploads(&paths) {
                    Ok(images) => images,
                    Err(err) => {
                        println!("Upload failed: {err:#}");
                        continue;
                    }
                };
                println!("Analyzing plans and calculating labor estimates...");
                let outcome = workflow.generate_estimate(&mut state, images);
                render_outcome(outcome, TurnKind::Estimate);
            }
            "message" => {
                let Some(message) = intent.message.as_deref() else {
                    continue;
                };
                let outcome = workflow.send_message(&mut state, message);
                render_outcome(outcome, TurnKind::Message);
            }
            "clear" => {
                workflow.clear_history(&mut state);
                println!("Chat history cleared.");
            }
            "export" => {
                if state.transcript().is_empty() {
                    println!("Nothing to export yet.");
                    continue;
                }
                let target = value_as_non_empty_string(intent.command_args.get("path"))
                    .map(PathBuf::from)
                    .unwrap_or_else(|| args.out.clone());
                match workflow.export(&state, &target) {
                    Ok(path) => println!("Transcript written to {}", path.display()),
                    Err(err) => println!("Export failed: {err:#}"),
                }
            }
            "set_profile" => {
                let name = value_as_non_empty_string(intent.command_args.get("profile"))
                    .unwrap_or_default();
                match lookup_profile(&profiles, &name) {
                    Ok(profile) => {
                        workflow.set_profile(&mut state, profile);
                        print_banner(&state.profile);
                    }
                    Err(err) => println!("{err}"),
                }
            }
            _ => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
        }
    }

    Ok(())
}

fn run_estimate(args: EstimateArgs) -> Result<i32> {
    let profiles = ProfileRegistry::load();
    let out_dir = args.out.clone().unwrap_or_else(|| PathBuf::from("."));
    let (workflow, mut state) = build_workflow(
        &profiles,
        &args.profile,
        out_dir.join("events.jsonl"),
        &args.shared,
    )?;

    let images = load_uploads(&args.images)?;
    let outcome = workflow.generate_estimate(&mut state, images);
    let code = if outcome.is_ok() { 0 } else { 1 };
    render_outcome(outcome, TurnKind::Estimate);

    if let Some(out) = args.out.as_deref() {
        std::fs::create_dir_all(out)?;
        let path = workflow.export(&state, out)?;
        eprintln!("Transcript written to {}", path.display());
    }
    Ok(code)
}

fn render_outcome(outcome: Result<String, EstimatorError>, kind: TurnKind) {
    match outcome {
        Ok(text) => println!("{text}"),
        Err(err) if err.is_rejection() => println!("{err}"),
        Err(err) => println!("! {}", err.diagnostic_text(kind)),
    }
}

fn print_banner(profile: &WorkflowProfile) {
    println!("{}", profile.title);
    println!("{}", profile.description);
    if profile.accepts_images() {
        println!("Use /estimate <image>... with PNG or JPEG plan sheets.");
    }
    println!("Type /help for commands.");
}

fn prompt_for(state: &AppState) -> String {
    if state.chat_enabled() {
        format!("[{}] > ", state.profile.chat_placeholder)
    } else {
        "[generate an estimate first] > ".to_string()
    }
}

fn print_profiles(profiles: &ProfileRegistry) {
    for profile in profiles.list() {
        let gate = match profile.chat_gate {
            ChatGate::Always => "chat always open",
            ChatGate::AfterEstimate => "chat after estimate",
        };
        let marker = if profile.name == DEFAULT_PROFILE { "*" } else { " " };
        println!("{marker} {:<24} {} ({gate})", profile.name, profile.title);
    }
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn value_as_string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
