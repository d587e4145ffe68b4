//! `pursuit ask`: one question, or an interactive thread on stdin.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;

use pursuit_agent::{ChatService, SubmitRequest};
use pursuit_config::AppConfig;
use pursuit_core::answer::TurnResponse;
use pursuit_core::event::ProgressKind;
use pursuit_core::thread::ThreadId;

pub async fn run(
    config: AppConfig,
    message: Option<String>,
    thread: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !config.has_api_key() {
        eprintln!("  No API key configured. Set PURSUIT_API_KEY or OPENROUTER_API_KEY,");
        eprintln!("  or add one to {}", AppConfig::config_dir().join("config.toml").display());
        return Err("No API key found".into());
    }

    let service = pursuit_agent::bootstrap::build(&config).await?;
    let mut thread_id = thread.map(ThreadId::from).unwrap_or_default();

    if let Some(message) = message {
        let response = turn(&service, &thread_id, &message, !json).await?;
        print_response(&response, json)?;
        return Ok(());
    }

    println!();
    println!("  Pursuit, interactive mode");
    println!("  Provider: {} / {}", config.default_provider, config.default_model);
    println!("  Thread:   {thread_id}");
    println!("  Type a question and press Enter; 'exit' to quit.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        let response = turn(&service, &thread_id, line, !json).await?;
        thread_id = response.thread_id.clone();
        print_response(&response, json)?;
        println!();
    }

    Ok(())
}

/// Submit one message and follow its progress until the terminal event.
async fn turn(
    service: &ChatService,
    thread_id: &ThreadId,
    message: &str,
    show_progress: bool,
) -> Result<TurnResponse, Box<dyn std::error::Error>> {
    let receipt = service
        .submit(SubmitRequest::new(message).on_thread(thread_id.as_str()))
        .await?;

    let mut events = service.stream(&receipt.correlation_id, 0).await?;
    while let Some(event) = events.next().await {
        if show_progress
            && event.kind == ProgressKind::Thinking
            && let Some(line) = event.line()
        {
            eprintln!("  ... {line}");
        }
    }

    // The stream can end early; the ledger has the outcome either way
    let polled = service.poll(&receipt.correlation_id).await?;
    match polled.response {
        Some(response) => Ok(response),
        None => {
            let record = service
                .wait_for(&receipt.correlation_id, std::time::Duration::from_secs(120))
                .await?;
            record.response.ok_or_else(|| "the turn did not finish in time".into())
        }
    }
}

fn print_response(response: &TurnResponse, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }

    println!("\n{}", response.message);
    if !response.sources.is_empty() {
        println!("\n  Sources:");
        for (i, source) in response.sources.iter().enumerate() {
            match &source.url {
                Some(url) => println!("  [{}] {} ({url})", i + 1, source.label),
                None => println!("  [{}] {}", i + 1, source.label),
            }
        }
    }
    if response.degraded {
        eprintln!("\n  (some stages degraded for this answer)");
    }
    Ok(())
}
