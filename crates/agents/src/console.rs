//! Console agent: interactive terminal chat.
//!
//! Reads lines from stdin and dispatches them as the local user; prints
//! whatever is sent back to it on stdout. `exit`, `quit` or end of input ask
//! the host to shut down.

use std::io::Write;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use halyard_runtime::{Actor, ActorContext, Message, Plugin};

pub const DEFAULT_USER: &str = "local_user";

type Input = Box<dyn AsyncBufRead + Unpin + Send>;
type Output = Box<dyn Write + Send>;

/// Interactive stdin/stdout agent.
pub struct Console {
    user: String,
    input: Option<Input>,
    output: Output,
    reader: Option<JoinHandle<()>>,
}

impl Console {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            input: None,
            output: Box::new(std::io::stdout()),
            reader: None,
        }
    }

    /// Read from and write to something other than the terminal.
    pub fn with_io(
        mut self,
        input: impl AsyncBufRead + Unpin + Send + 'static,
        output: impl Write + Send + 'static,
    ) -> Self {
        self.input = Some(Box::new(input));
        self.output = Box::new(output);
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new(DEFAULT_USER)
    }
}

impl Plugin for Console {
    const MINIMUM_CORE: Option<&'static str> = Some("0.1");

    fn from_config(settings: &serde_json::Map<String, serde_json::Value>) -> anyhow::Result<Self> {
        let user = settings
            .get("user")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_USER);
        Ok(Self::new(user))
    }
}

fn is_exit(line: &str) -> bool {
    matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q")
}

async fn read_lines(input: Input, ctx: ActorContext, user: String) {
    let origin = format!("{}/console", ctx.name());
    let mut lines = input.lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if is_exit(line) {
                    break;
                }

                let msg = Message::new(line)
                    .with_author(user.as_str())
                    .with_identity(user.as_str())
                    .with_origin(origin.as_str());
                let delivered = ctx.dispatch(msg);
                if delivered.is_empty() {
                    tracing::warn!(agent = %ctx.name(), "No destination took the message");
                }
            }
            // Ctrl+D
            Ok(None) => break,
            Err(e) => {
                tracing::error!(agent = %ctx.name(), error = %e, "Console input failed");
                break;
            }
        }
    }

    ctx.request_shutdown();
}

#[async_trait]
impl Actor for Console {
    async fn init(&mut self, ctx: &ActorContext) -> anyhow::Result<()> {
        let input = self
            .input
            .take()
            .unwrap_or_else(|| Box::new(BufReader::new(tokio::io::stdin())));
        self.reader = Some(tokio::spawn(read_lines(input, ctx.clone(), self.user.clone())));
        tracing::debug!(agent = %ctx.name(), user = %self.user, "Console reading input");
        Ok(())
    }

    async fn receive(&mut self, _ctx: &ActorContext, msg: Message) -> anyhow::Result<()> {
        match msg.body_str() {
            Some(text) => writeln!(self.output, "{text}")?,
            None => writeln!(self.output, "{}", msg.body)?,
        }
        self.output.flush()?;
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
