//! `barebone run`: one prompt, one answer.

use std::io::Write;
use std::path::Path;
use std::pin::pin;

use futures::StreamExt;

use barebone_agent::{Agent, UserInput};
use barebone_core::Error;
use barebone_core::message::ImageContent;
use barebone_core::provider::Response;
use barebone_core::stream::StreamEvent;

use crate::AgentOpts;

pub async fn run(
    config_path: Option<&Path>,
    opts: &AgentOpts,
    prompt: String,
    images: Vec<String>,
    stream: bool,
) -> anyhow::Result<()> {
    let mut agent = super::build_agent(config_path, opts).await?;
    let input = UserInput::new(prompt).with_images(resolve_images(images)?);

    let outcome = if stream {
        stream_turn(&mut agent, input).await
    } else {
        agent.run(input).await.map(|response| println!("{}", answer_text(&response)))
    };
    agent.close().await;

    outcome.map_err(|e| {
        report_partial(&e);
        e.into()
    })
}

/// Local paths become data URIs; URLs and data URIs pass through.
fn resolve_images(images: Vec<String>) -> anyhow::Result<Vec<String>> {
    images
        .into_iter()
        .map(|reference| {
            if reference.starts_with("http://")
                || reference.starts_with("https://")
                || reference.starts_with("data:")
            {
                Ok(reference)
            } else {
                Ok(ImageContent::from_file(&reference)?.to_reference())
            }
        })
        .collect()
}

/// Stream one turn to stdout. Tool activity goes to stderr.
pub(crate) async fn stream_turn(agent: &mut Agent, input: UserInput) -> Result<(), Error> {
    let mut events = pin!(agent.stream(input));
    let mut stdout = std::io::stdout();
    let mut printed = false;

    while let Some(event) = events.next().await {
        match event? {
            StreamEvent::TextDelta { text } => {
                print!("{text}");
                let _ = stdout.flush();
                printed = true;
            }
            StreamEvent::ToolCallDelta { name: Some(name), .. } => {
                if printed {
                    println!();
                    printed = false;
                }
                eprintln!("  [tool] {name}");
            }
            StreamEvent::ToolCallDelta { .. } => {}
            StreamEvent::Done { response } => {
                if !response.has_tool_calls() && !printed {
                    if let Some(parsed) = &response.parsed {
                        print!("{parsed}");
                        printed = true;
                    }
                }
            }
        }
    }
    if printed {
        println!();
    }
    Ok(())
}

pub(crate) fn answer_text(response: &Response) -> String {
    match (&response.content, &response.parsed) {
        (_, Some(parsed)) => parsed.to_string(),
        (Some(text), None) => text.clone(),
        (None, None) => String::new(),
    }
}

/// Show what the model had produced before a turn limit or timeout.
pub(crate) fn report_partial(error: &Error) {
    if let Some(partial) = error.partial_response() {
        if let Some(text) = partial.content.as_deref().filter(|t| !t.is_empty()) {
            eprintln!("  [partial] {text}");
        }
        for call in &partial.tool_calls {
            eprintln!("  [pending tool] {}", call.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parsed_output_wins() {
        let mut response = Response::text("{\"a\": 1}");
        assert_eq!(answer_text(&response), "{\"a\": 1}");
        response.parsed = Some(json!({"a": 1}));
        assert_eq!(answer_text(&response), "{\"a\":1}");
        assert_eq!(answer_text(&Response::default()), "");
    }

    #[test]
    fn urls_pass_through_and_files_are_inlined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dot.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let resolved = resolve_images(vec![
            "https://example.com/cat.jpg".into(),
            path.display().to_string(),
        ])
        .unwrap();
        assert_eq!(resolved[0], "https://example.com/cat.jpg");
        assert!(resolved[1].starts_with("data:image/png;base64,"));
    }

    #[test]
    fn missing_file_fails() {
        assert!(resolve_images(vec!["/no/such/image.png".into()]).is_err());
    }
}
