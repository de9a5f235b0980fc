//! Data directory resolution.

use std::path::PathBuf;

/// Directory holding config and the default TTS pipe: `~/.voice-node`.
pub fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".voice-node"))
        .unwrap_or_else(|| PathBuf::from(".voice-node"))
}
