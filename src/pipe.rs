//! Pipe mode: every update and every displayed-lyrics change goes to stdout
//! as one JSON line; control commands are read from stdin.

use crate::lyrics::LyricsPipeline;
use crate::mpris::metadata::Metadata;
use crate::mpris::source::ControlOp;
use crate::state::{DisplayedLyrics, Update};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

#[derive(Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
enum Record<'a> {
    Update(Option<&'a Update>),
    Lyrics(&'a DisplayedLyrics),
}

fn print_record(record: &Record<'_>) {
    match serde_json::to_string(record) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize record"),
    }
}

/// Parse one stdin command line.
pub fn parse_command(line: &str) -> Result<ControlOp, String> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next().ok_or_else(|| "empty command".to_string())?;
    let mut number = || -> Result<f64, String> {
        parts
            .next()
            .ok_or_else(|| format!("{cmd} needs a number"))?
            .parse::<f64>()
            .map_err(|e| format!("{cmd}: {e}"))
    };
    let op = match cmd.to_lowercase().as_str() {
        "play" => ControlOp::Play,
        "pause" => ControlOp::Pause,
        "toggle" => ControlOp::PlayPause,
        "stop" => ControlOp::Stop,
        "next" => ControlOp::Next,
        "prev" | "previous" => ControlOp::Previous,
        "seek" => ControlOp::Seek(number()?),
        "pos" => ControlOp::SetPosition(number()?),
        "jump" => ControlOp::SeekFraction(number()?),
        "shuffle" => ControlOp::ToggleShuffle,
        "loop" => ControlOp::CycleLoop,
        other => return Err(format!("unknown command {other:?}")),
    };
    Ok(op)
}

/// Decides when a new lyrics lookup is due: once per distinct track.
#[derive(Default)]
struct LyricsTrigger {
    last: Option<String>,
}

impl LyricsTrigger {
    fn on_update(&mut self, update: Option<&Update>) -> Option<Metadata> {
        let identity = update.map(|u| u.metadata.track_identity());
        if identity == self.last {
            return None;
        }
        self.last = identity;
        update.map(|u| u.metadata.clone())
    }
}

async fn read_commands(commands: mpsc::Sender<ControlOp>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match parse_command(&line) {
                Ok(op) => {
                    if commands.send(op).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring command"),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }
    tracing::debug!("Command input closed");
}

/// Print updates and lyrics until the update stream ends.
pub async fn run(
    mut updates: mpsc::Receiver<Option<Update>>,
    mut lyrics: watch::Receiver<DisplayedLyrics>,
    pipeline: Arc<LyricsPipeline>,
    commands: mpsc::Sender<ControlOp>,
) {
    let reader = tokio::spawn(read_commands(commands));
    let mut trigger = LyricsTrigger::default();
    let mut lyrics_open = true;

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                print_record(&Record::Update(update.as_ref()));
                if let Some(metadata) = trigger.on_update(update.as_ref()) {
                    let pipeline = Arc::clone(&pipeline);
                    tokio::spawn(async move {
                        pipeline.resolve(&metadata).await;
                    });
                }
            }
            changed = lyrics.changed(), if lyrics_open => {
                if changed.is_err() {
                    lyrics_open = false;
                    continue;
                }
                let current = lyrics.borrow_and_update().clone();
                print_record(&Record::Lyrics(&current));
            }
        }
    }
    reader.abort();
}
