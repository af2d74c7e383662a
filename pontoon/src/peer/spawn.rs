//! Spawning the peer process and teeing its output.

use std::env;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;

use uuid::Uuid;

use crate::error::PeerError;

use super::config::PeerOptions;

/// Spawn the peer executable.
///
/// The child receives the caller-supplied arguments followed by the two
/// positional bootstrap arguments: the session id and the callback port
/// (`0` selects stdio piping). Listed environment variables are forwarded
/// when set.
pub(crate) fn spawn_peer(
    program: &Path,
    args: &[String],
    options: &PeerOptions,
    session_id: Uuid,
    port: u16,
) -> Result<Child, PeerError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .arg(session_id.to_string())
        .arg(port.to_string())
        .stderr(Stdio::piped());

    if port == 0 {
        // stdio piping mode: stdin/stdout are the channel.
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
    } else {
        command.stdin(Stdio::null()).stdout(Stdio::piped());
    }

    for key in &options.forwarded_env {
        if let Ok(value) = env::var(key) {
            command.env(key, value);
        }
    }

    tracing::info!(program = %program.display(), session = %session_id, port, "spawning peer");
    command
        .spawn()
        .map_err(|e| PeerError::SpawnFailed(format!("{}: {e}", program.display())))
}

/// Tee a child output stream into the log, one line at a time, tagged with
/// the session it belongs to.
pub(crate) fn tee_lines(
    stream: &'static str,
    session_id: Uuid,
    source: impl Read + Send + 'static,
) {
    let spawned = thread::Builder::new()
        .name(format!("pontoon-tee-{stream}"))
        .spawn(move || {
            for line in BufReader::new(source).lines() {
                match line {
                    Ok(line) => {
                        tracing::info!(target: "pontoon::peer", session = %session_id, stream, "{line}");
                    }
                    Err(_) => break,
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to start tee thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::config::LaunchMode;

    #[test]
    fn test_spawn_missing_program_fails() {
        let options = PeerOptions::stdio_process("/nonexistent/pontoon-peer");
        let LaunchMode::StdioProcess { program, args } = options.mode.clone() else {
            panic!("expected stdio mode");
        };
        let result = spawn_peer(&program, &args, &options, Uuid::new_v4(), 0);
        assert!(matches!(result, Err(PeerError::SpawnFailed(_))));
    }
}
