//! Headless replay of one session to stdout.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use debrief_index::{IndexCache, JsonLinesLogReader, LogReader};
use debrief_kernel::{MessageCursor, PlaybackState, spawn_playback};
use debrief_types::{LogMetadata, Message};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;

/// How often the replay checks whether playback has reached the end.
const END_POLL: Duration = Duration::from_millis(250);

/// Find the session of `log_file` that starts at `start_time`.
pub fn find_indexed(cache: &IndexCache, log_file: &str, start_time: i64) -> Result<LogMetadata> {
    let (index, _) = cache.refresh()?;
    index
        .get(log_file)
        .and_then(|sessions| sessions.iter().find(|m| m.start_time() == start_time))
        .cloned()
        .ok_or_else(|| anyhow!("no session in {log_file} starting at {start_time}"))
}

/// The recorded messages of one session, patch file applied.
pub fn prepare_cursor(config: &Config, metadata: &LogMetadata) -> Result<MessageCursor> {
    let path = config.index.resolve(metadata.log_file());
    let messages = JsonLinesLogReader
        .read_all(&path)
        .with_context(|| format!("reading {}", path.display()))?;

    let span = metadata.log_span();
    let end = span.end().min(messages.len());
    let session: Vec<Message> = messages
        .get(span.start()..end)
        .ok_or_else(|| anyhow!("session span {}..{} is outside {}", span.start(), span.end(), path.display()))?
        .to_vec();

    let mut cursor = MessageCursor::from_log(session, &config.playback)?;
    cursor.load_patch_file(&path, &config.playback)?;
    Ok(cursor)
}

/// Play `metadata` in real time, writing each emitted message as a JSON
/// line, until the end of the log.
pub async fn replay(config: &Config, metadata: &LogMetadata, seek_ms: Option<i64>) -> Result<()> {
    let cursor = prepare_cursor(config, metadata)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = spawn_playback(cursor, tx, None, config.playback.clone());

    if let Some(offset) = seek_ms {
        handle.seek(metadata.start_time() + offset).await?;
    }
    handle.start(false).await?;
    info!(
        session = %metadata.session().name_of_session,
        log = metadata.log_file(),
        "replaying"
    );

    let stdout = std::io::stdout();
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => write_line(&mut stdout.lock(), &msg)?,
                None => break,
            },
            _ = tokio::time::sleep(END_POLL) => {
                if handle.status().await?.state != PlaybackState::Playing {
                    break;
                }
            }
        }
    }
    while let Ok(msg) = rx.try_recv() {
        write_line(&mut stdout.lock(), &msg)?;
    }

    handle.terminate().await?;
    Ok(())
}

fn write_line(out: &mut impl Write, msg: &Message) -> Result<()> {
    serde_json::to_writer(&mut *out, msg)?;
    out.write_all(b"\n")?;
    Ok(())
}
