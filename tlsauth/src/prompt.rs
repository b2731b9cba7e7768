//! Terminal approval prompt.

use async_trait::async_trait;
use tlsauth_lib::{ApprovalRequest, InteractivePrompt, PromptOutcome, TlsAuthError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// Asks on stderr and reads the answer from stdin.
///
/// Concurrent attempts queue on the lock, so one question is on screen at a
/// time.
pub struct TerminalPrompt {
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        TerminalPrompt {
            input: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

#[async_trait]
impl InteractivePrompt for TerminalPrompt {
    async fn ask(&self, request: &ApprovalRequest) -> Result<PromptOutcome, TlsAuthError> {
        let mut input = self.input.lock().await;
        let mut stderr = tokio::io::stderr();
        stderr.write_all(render(request).as_bytes()).await?;

        loop {
            stderr
                .write_all(b"[a]ccept once, accept and [r]emember, or re[j]ect? ")
                .await?;
            stderr.flush().await?;
            let Some(line) = input.next_line().await? else {
                // Closed stdin counts as a refusal.
                return Ok(PromptOutcome::Reject);
            };
            match parse_answer(&line) {
                Some(outcome) => return Ok(outcome),
                None => stderr.write_all(b"Please answer a, r or j.\n").await?,
            }
        }
    }
}

/// Multi-line explanation of the failure.
fn render(request: &ApprovalRequest) -> String {
    let mut out = format!("\n{}\n\n", request.summary());
    out.push_str(&format!("  Server:      {}\n", request.hostname));
    if !request.reference_identities.is_empty() {
        out.push_str(&format!(
            "  Also valid:  {}\n",
            request.reference_identities.join(", ")
        ));
    }
    out.push_str(&format!("  Fingerprint: {}\n", request.fingerprint));
    for rejection in &request.rejections {
        out.push_str(&format!("  - {}\n", rejection));
    }
    out.push('\n');
    out
}

fn parse_answer(line: &str) -> Option<PromptOutcome> {
    match line.trim().to_ascii_lowercase().as_str() {
        "a" | "accept" | "y" | "yes" => Some(PromptOutcome::Accept),
        "r" | "remember" | "always" => Some(PromptOutcome::AcceptAndRemember),
        "j" | "reject" | "n" | "no" => Some(PromptOutcome::Reject),
        _ => None,
    }
}
