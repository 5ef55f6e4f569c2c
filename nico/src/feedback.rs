//! Startup audio prompt.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// Plays a WAV file once through `aplay`. Best-effort.
#[derive(Debug, Clone)]
pub struct PromptPlayer {
    audio: Option<PathBuf>,
    player: String,
}

impl PromptPlayer {
    pub fn new(audio: Option<&Path>) -> Self {
        Self {
            audio: audio.map(Path::to_path_buf),
            player: "aplay".to_string(),
        }
    }

    pub fn with_player(mut self, player: impl Into<String>) -> Self {
        self.player = player.into();
        self
    }

    /// Block until playback finishes. Returns `false` when nothing played.
    pub fn play(&self) -> bool {
        let Some(audio) = &self.audio else {
            return false;
        };
        if !audio.exists() {
            warn!("Prompt audio {} not found", audio.display());
            return false;
        }
        match Command::new(&self.player).arg(audio).status() {
            Ok(status) if status.success() => {
                info!("Played prompt {}", audio.display());
                true
            }
            Ok(status) => {
                warn!("{} exited with {status}", self.player);
                false
            }
            Err(e) => {
                warn!("Failed to run {}: {e}", self.player);
                false
            }
        }
    }
}
