use anyhow::{Context, Result};
use salescope_agent::{assemble, AgentRuntime, TurnRequest};
use salescope_core::config::AppConfig;
use salescope_core::domain::session::SessionId;
use salescope_core::errors::ApplicationError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::commands::{current_thread_runtime, load_config, CommandResult};

const EXIT_WORDS: [&str; 2] = ["exit", "quit"];

pub fn run(session: Option<String>) -> CommandResult {
    let config = match load_config("chat") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let session_id = match session.map(SessionId::parse).transpose() {
        Ok(session_id) => session_id.unwrap_or_else(SessionId::generate),
        Err(error) => {
            return CommandResult::failure("chat", "invalid_session", error.to_string(), 2);
        }
    };
    let runtime = match current_thread_runtime("chat") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    init_logging(&config);
    match runtime.block_on(interactive(&config, session_id.clone())) {
        Ok(turns) => CommandResult::success(
            "chat",
            format!("session {session_id} closed after {turns} turn(s)"),
        ),
        Err(error) => CommandResult::failure("chat", "chat_session", format!("{error:#}"), 4),
    }
}

/// Chat logs go to stderr so the transcript on stdout stays readable.
fn init_logging(config: &AppConfig) {
    let level = config.logging.level.parse::<tracing_subscriber::filter::LevelFilter>();
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_max_level(level.unwrap_or(tracing_subscriber::filter::LevelFilter::WARN))
        .compact()
        .try_init();
}

async fn interactive(config: &AppConfig, session_id: SessionId) -> Result<usize> {
    let services = assemble(config).await.context("failed to assemble the agent runtime")?;

    let shutdown = CancellationToken::new();
    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(format!("salescope chat, session {session_id}. Type `exit` to quit.\n").as_bytes())
        .await?;

    let stdin = BufReader::new(tokio::io::stdin());
    converse(&services.runtime, session_id, stdin, &mut stdout, &shutdown).await
}

/// Runs the read-answer loop until `exit`, end of input, or `shutdown`.
/// Returns the number of turns that reached the orchestrator.
pub async fn converse<R, W>(
    runtime: &AgentRuntime,
    session_id: SessionId,
    input: R,
    output: &mut W,
    shutdown: &CancellationToken,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut turns = 0;

    loop {
        output.write_all(b"you> ").await?;
        output.flush().await?;

        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let message = line.trim();
        if EXIT_WORDS.iter().any(|word| message.eq_ignore_ascii_case(word)) {
            break;
        }
        if message.is_empty() {
            continue;
        }

        turns += 1;
        let request = TurnRequest::new(session_id.clone(), message);
        let correlation_id = request.correlation_id.clone();
        let rendered = match runtime.handle_turn(request, shutdown.child_token()).await {
            Ok(reply) => format!("assistant> {}\n", reply.response),
            Err(error) => {
                let interface = ApplicationError::from(error).into_interface(correlation_id);
                format!("error> {} (correlation id {})\n", interface.user_message(), interface.correlation_id())
            }
        };
        output.write_all(rendered.as_bytes()).await?;
    }

    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(turns)
}
