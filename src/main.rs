use clap::{Parser, Subcommand};
use taco_telemetry::config::{LogLevel, TelemetryConfig};
use taco_telemetry::observability;
use taco_telemetry::telemetry::{
    self, ConsolePrompter, Telemetry, TelemetryEvent, TelemetrySettings,
};

#[derive(Parser)]
#[command(name = "taco-telemetry")]
#[command(about = "Anonymous usage telemetry for taco command line tools", long_about = None)]
struct Cli {
    /// Application name used for event names and the opt-in prompt
    #[arg(long, global = true, default_value = "taco")]
    app_name: String,

    /// Application version reported with every event
    #[arg(long, global = true)]
    app_version: Option<String>,

    /// Output verbosity: silent, normal or diagnostic
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the stored identity and opt-in decision without prompting
    Status,
    /// Send one event (prompts for consent on first use)
    Send {
        /// Event name, e.g. `taco/build`
        name: String,
        /// Plain property, `key=value`
        #[arg(long = "prop", value_parser = parse_key_value)]
        props: Vec<(String, String)>,
        /// Property hashed before it leaves the machine, `key=value`
        #[arg(long = "pii", value_parser = parse_key_value)]
        pii: Vec<(String, String)>,
        /// Record the event as an activity with a duration
        #[arg(long)]
        activity: bool,
    },
    /// Forget the opt-in decision so the next run asks again
    ResetConsent,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn main() {
    let cli = Cli::parse();

    let mut config = TelemetryConfig::new(cli.app_name);
    if let Some(version) = cli.app_version {
        config = config.app_version(version);
    }
    if let Some(level) = cli.log_level.as_deref() {
        match LogLevel::parse(level) {
            Some(level) => config = config.log_level(level),
            None => {
                eprintln!("Error: unknown log level '{}'", level);
                std::process::exit(2);
            }
        }
    }
    observability::init_logging(config.log_level);

    match cli.command {
        Command::Status => print_status(&config),
        Command::Send {
            name,
            props,
            pii,
            activity,
        } => {
            let telemetry = Telemetry::init(&config, &mut ConsolePrompter);
            let mut event = if activity {
                TelemetryEvent::activity(name)
            } else {
                TelemetryEvent::new(name)
            };
            for (key, value) in props {
                event.set_property(key, value);
            }
            for (key, value) in pii {
                telemetry.set_pii_property(&mut event, &key, &value);
            }
            telemetry.send_event(&mut event);
            telemetry.flush();
            if !telemetry.is_opted_in() {
                tracing::debug!("telemetry disabled; event '{}' not sent", event.name());
            }
        }
        Command::ResetConsent => {
            if let Err(e) = telemetry::reset_consent(&config) {
                eprintln!("Failed to reset telemetry consent: {}", e);
                std::process::exit(1);
            }
            eprintln!("Telemetry consent cleared; you will be asked again on next use.");
        }
    }
}

fn print_status(config: &TelemetryConfig) {
    let path = config.settings_file();
    let settings = TelemetrySettings::load(&path);

    println!("Settings file: {}", path.display());
    println!(
        "User ID: {}",
        settings.user_id.as_deref().unwrap_or("<not yet assigned>")
    );
    println!(
        "Machine ID: {}",
        match &settings.machine_id {
            Some(Some(id)) => id.as_str(),
            Some(None) => "<unavailable>",
            None => "<not yet assigned>",
        }
    );
    println!(
        "User type: {}",
        settings
            .user_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "<not yet classified>".to_string())
    );
    println!(
        "Opt-in: {}",
        match settings.opt_in {
            Some(true) => "yes",
            Some(false) => "no",
            None => "<not yet asked>",
        }
    );
}
