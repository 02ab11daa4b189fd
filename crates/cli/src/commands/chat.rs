//! `barebone chat`: an interactive conversation on one agent.

use std::io::Write;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::AgentOpts;

use super::run::{report_partial, stream_turn};

/// What a line of input asks for.
#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
    Quit,
    Clear,
    Skip,
    Prompt(&'a str),
}

fn classify(line: &str) -> Line<'_> {
    match line.trim() {
        "" => Line::Skip,
        "exit" | "quit" | "/exit" | "/quit" => Line::Quit,
        "/clear" => Line::Clear,
        prompt => Line::Prompt(prompt),
    }
}

pub async fn run(config_path: Option<&Path>, opts: &AgentOpts) -> anyhow::Result<()> {
    let mut agent = super::build_agent(config_path, opts).await?;

    println!();
    println!("  Barebone chat");
    println!("  Provider:  {}", agent.provider().name());
    println!("  Model:     {}", agent.provider().model());
    let tools = agent.tools().names();
    println!(
        "  Tools:     {}",
        if tools.is_empty() { "none".to_string() } else { tools.join(", ") }
    );
    println!();
    println!("  /clear starts over, exit quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match classify(&line) {
            Line::Quit => break,
            Line::Skip => continue,
            Line::Clear => {
                agent.clear_messages();
                println!("  (conversation cleared)");
            }
            Line::Prompt(prompt) => {
                println!();
                if let Err(e) = stream_turn(&mut agent, prompt.into()).await {
                    report_partial(&e);
                    eprintln!("  [error] {e}");
                }
                println!();
            }
        }
    }

    agent.close().await;
    println!();
    Ok(())
}
