//! A terminal chat with the order support assistant.
//!
//! The endpoint is configured through environment variables:
//!
//! - `OPENAI_API_KEY`: sent as a bearer token when set.
//! - `OPENAI_BASE_URL`: defaults to a local server on port 10240.
//! - `OPENAI_MODEL`: the model identifier.
//! - `OPENAI_TEMPERATURE`: the sampling temperature.
//! - `OPENAI_TIMEOUT_SECS`: the ceiling for a single request.
//! - `TOOLRELAY_MAX_TOOL_ROUNDS`: the rounds of tool calls per message.

#[macro_use]
extern crate tracing;

use std::env;
use std::fmt::Display;
use std::io::Write as _;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::{select, signal};
use toolrelay::SessionBuilder;
use toolrelay_openai_model::{
    OpenAIConfig, OpenAIConfigBuilder, OpenAIProvider,
};

const BAR_CHAR: &str = "▎";

struct Settings {
    config: OpenAIConfig,
    max_tool_rounds: Option<u32>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let model = settings.config.model().to_owned();
    let base_url = settings.config.base_url().to_owned();
    let model_provider = match OpenAIProvider::new(settings.config) {
        Ok(provider) => provider,
        Err(err) => {
            eprintln!("Error initializing the client: {err}");
            return ExitCode::FAILURE;
        }
    };

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .map(|style| style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let spinner = Spinner::default();

    let mut builder = SessionBuilder::with_model_provider(model_provider)
        .on_transcript({
            let spinner = spinner.clone();
            move |delta| {
                // The spinner is only running before the first delta.
                if spinner.stop() {
                    print!("{}🤖 ", BAR_CHAR.bright_cyan());
                }
                print!("{}", delta.bright_white());
                std::io::stdout().flush().ok();
            }
        })
        .on_tool_result({
            let spinner = spinner.clone();
            let progress_style = progress_style.clone();
            move |req, result| {
                if !spinner.stop() {
                    println!();
                }
                eprintln!(
                    "{}🔧 {}({}) → {}",
                    BAR_CHAR.bright_yellow(),
                    req.name.bold(),
                    req.arguments.dimmed(),
                    result.content.dimmed()
                );
                spinner.start(&progress_style);
            }
        });
    if let Some(max_tool_rounds) = settings.max_tool_rounds {
        builder = builder.with_max_tool_rounds(max_tool_rounds);
    }
    let mut session = builder.build();

    println!("Model: {model}");
    println!("Server: {base_url}");
    println!("Type 'exit' or 'quit' to end.");

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = select! {
            line = lines.next_line() => line,
            _ = signal::ctrl_c() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!("error reading input: {err}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit")
        {
            break;
        }

        spinner.start(&progress_style);
        // Dropping the turn on Ctrl-C rolls the conversation back.
        let result = select! {
            result = session.send_message(line) => Some(result),
            _ = signal::ctrl_c() => None,
        };
        if !spinner.stop() {
            println!();
        }
        match result {
            Some(Ok(_)) => {}
            Some(Err(err)) => eprintln!("{} {err}", "Error:".bright_red()),
            None => eprintln!("{}", "Cancelled.".dimmed()),
        }
        println!();
    }

    println!("\nExiting chat.");
    ExitCode::SUCCESS
}

fn load_settings() -> Result<Settings, String> {
    let mut builder = match env_var("OPENAI_API_KEY") {
        Some(api_key) => OpenAIConfigBuilder::with_api_key(api_key),
        None => OpenAIConfigBuilder::new(),
    };
    if let Some(base_url) = env_var("OPENAI_BASE_URL") {
        builder = builder.with_base_url(base_url);
    }
    if let Some(model) = env_var("OPENAI_MODEL") {
        builder = builder.with_model(model);
    }
    if let Some(temperature) = parse_env::<f32>("OPENAI_TEMPERATURE")? {
        builder = builder.with_temperature(temperature);
    }
    if let Some(secs) = parse_env::<u64>("OPENAI_TIMEOUT_SECS")? {
        if secs == 0 {
            return Err("OPENAI_TIMEOUT_SECS must be positive".to_owned());
        }
        builder = builder.with_timeout(Duration::from_secs(secs));
    }
    let max_tool_rounds = parse_env::<u32>("TOOLRELAY_MAX_TOOL_ROUNDS")?;

    let config = builder.build();
    debug!("loaded config: {config:?}");
    Ok(Settings {
        config,
        max_tool_rounds,
    })
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = env_var(name) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|err| format!("Invalid {name} `{value}`: {err}"))
}

/// A spinner shown while the assistant has nothing to print yet.
#[derive(Clone, Default)]
struct Spinner {
    slot: Arc<Mutex<Option<ProgressBar>>>,
}

impl Spinner {
    fn start(&self, style: &ProgressStyle) {
        let progress_bar = ProgressBar::new_spinner();
        progress_bar.set_style(style.clone());
        progress_bar.set_message("🤔 Thinking...");
        progress_bar.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut slot) = self.slot.lock() {
            if let Some(previous) = slot.replace(progress_bar) {
                previous.finish_and_clear();
            }
        }
    }

    /// Clears the spinner, returns `false` if it was not running.
    fn stop(&self) -> bool {
        let progress_bar =
            self.slot.lock().ok().and_then(|mut slot| slot.take());
        match progress_bar {
            Some(progress_bar) => {
                progress_bar.finish_and_clear();
                true
            }
            None => false,
        }
    }
}
