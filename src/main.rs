use anyhow::{Context, Result};
use clap::Parser;
use cliclack::{input, spinner};
use console::style;
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use drover::agent::Agent;
use drover::calculator;
use drover::checkpoint::{CheckpointStore, FileCheckpoint};
use drover::models::{Message, MessageContent};
use drover::providers::factory::{get_provider, ProviderType};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Model to use (provider is inferred from the name)
    #[arg(short, long, default_value = "gpt-4o-mini")]
    model: String,

    /// System prompt override
    #[arg(short, long)]
    system: Option<String>,

    /// Safety cap on model turns per reply
    #[arg(long, default_value_t = 25)]
    max_turns: usize,

    /// Resume a prior session by id
    #[arg(short, long)]
    resume: Option<String>,
}

fn render(message: &Message) {
    for content in &message.content {
        match content {
            MessageContent::Text(text) => {
                if !text.is_empty() {
                    println!("{}", style(text).green());
                }
            }
            MessageContent::ToolRequest(request) => match &request.tool_call {
                Ok(call) => println!(
                    "{}",
                    style(format!("-> {}({})", call.name, call.arguments)).magenta()
                ),
                Err(e) => println!("{}", style(format!("-> invalid tool call: {}", e)).red()),
            },
            MessageContent::ToolResponse(response) => {
                println!("{}", style(format!("<- {}", response.content)).cyan());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let provider_type = ProviderType::for_model(&cli.model)
        .with_context(|| format!("no known provider for model '{}'", cli.model))?;
    let provider = get_provider(provider_type.config_from_env(&cli.model)?)?;

    let agent = Agent::builder(provider)
        .name("calculator")
        .system(cli.system.unwrap_or_else(|| calculator::SYSTEM_PROMPT.to_string()))
        .registry(calculator::registry()?)
        .max_turns(cli.max_turns)
        .build()?;

    let store = FileCheckpoint::default_dir()?;
    let thread_id = cli
        .resume
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut messages = store.load(&thread_id).await?.unwrap_or_default();

    println!(
        "drover calculator session {} {}",
        style(&thread_id).dim(),
        style("- type \"exit\" to end the session").dim()
    );

    loop {
        let message_text: String = input("Message:").placeholder("").interact()?;
        if message_text.trim().eq_ignore_ascii_case("exit")
            || message_text.trim().eq_ignore_ascii_case("quit")
        {
            break;
        }
        println!("{}", style(&message_text).blue());

        messages.push(Message::user().with_text(&message_text));

        let spin = spinner();
        spin.start("awaiting reply");
        let mut replied = Vec::new();
        {
            let mut stream = agent.reply(&messages);
            let mut first = true;
            while let Some(response) = stream.next().await {
                if first {
                    spin.stop("");
                    first = false;
                }
                match response {
                    Ok(message) => {
                        render(&message);
                        replied.push(message);
                    }
                    Err(e) => {
                        eprintln!("{}", style(format!("Error: {}", e)).red());
                        break;
                    }
                }
            }
        }
        messages.extend(replied);
        store.persist(&thread_id, &messages).await?;
        println!();
    }

    Ok(())
}
