//! Terminal rendering of turn progress and outcomes.

use std::io::Write;
use std::sync::Mutex;

use kiln_agent::{ProgressSink, TurnEvent};
use kiln_core::{AssistantReply, EngineError};

/// Prints streamed text as it arrives and tool activity to stderr.
#[derive(Default)]
pub struct TerminalSink {
    streamed: Mutex<String>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The part of the reply not already shown through deltas.
    pub fn unseen<'a>(&self, reply: &'a AssistantReply) -> &'a str {
        let streamed = self.streamed.lock().map(|s| s.clone()).unwrap_or_default();
        reply
            .content
            .strip_prefix(streamed.as_str())
            .unwrap_or(&reply.content)
    }

    /// Print whatever the deltas did not, then end the line.
    pub fn finish(&self, reply: &AssistantReply) {
        let rest = self.unseen(reply);
        println!("{rest}");
        println!();
    }
}

impl ProgressSink for TerminalSink {
    fn emit(&self, event: TurnEvent) {
        match event {
            TurnEvent::Delta { content } => {
                print!("{content}");
                let _ = std::io::stdout().flush();
                if let Ok(mut streamed) = self.streamed.lock() {
                    streamed.push_str(&content);
                }
            }
            TurnEvent::ToolCall { name, origin, .. } => {
                eprintln!("\n  [tool] {name} ({})", origin.as_str());
            }
            TurnEvent::ToolResult {
                name,
                output,
                success,
                ..
            } => {
                if success {
                    eprintln!("  [ok] {name}");
                } else {
                    eprintln!("  [failed] {name}: {output}");
                }
            }
            TurnEvent::Done { .. } => {}
        }
    }
}

/// Show an engine failure the way the assistant would. Cancellation is
/// silent.
pub fn render_error(err: &EngineError) {
    if let Some(message) = err.user_message() {
        println!();
        for line in message.lines() {
            println!("  Assistant > {line}");
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_skips_streamed_prefix() {
        let sink = TerminalSink::new();
        sink.streamed.lock().unwrap().push_str("Writing it.");
        let reply = AssistantReply::new("Writing it.\n\nDone.", vec![]);
        assert_eq!(sink.unseen(&reply), "\n\nDone.");
    }

    #[test]
    fn unseen_is_everything_without_deltas() {
        let sink = TerminalSink::new();
        let reply = AssistantReply::new("Done.", vec![]);
        assert_eq!(sink.unseen(&reply), "Done.");
    }

    #[test]
    fn text_scanned_reply_is_printed_in_full() {
        // Scanned calls drop the streamed text from the final reply
        let sink = TerminalSink::new();
        sink.streamed.lock().unwrap().push_str(r#"{"name":"create_file"}"#);
        let reply = AssistantReply::new("Created a.md.", vec![]);
        assert_eq!(sink.unseen(&reply), "Created a.md.");
    }
}
