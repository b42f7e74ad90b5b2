//! Interactive first-run setup wizard (`parley setup`)

use std::path::PathBuf;

use dialoguer::{Confirm, Input};

use crate::config::{ParleyConfigFile, config_file_path, load_config_file};

/// Run the interactive setup wizard
///
/// # Errors
///
/// Returns error if user input fails or config cannot be written
pub fn run_setup() -> anyhow::Result<()> {
    println!("Parley Setup\n");

    let existing = load_config_file();
    let config_path = config_file_path()
        .unwrap_or_else(|| PathBuf::from("~/.config/omni/parley/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. Backend URL
    let default_url = existing
        .backend_url
        .clone()
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let backend_url: String = Input::new()
        .with_prompt("Chat backend URL")
        .default(default_url)
        .interact_text()?;

    // 2. Request timeout
    let timeout_secs: u64 = Input::new()
        .with_prompt("Request timeout (seconds)")
        .default(existing.request_timeout_secs.unwrap_or(30))
        .interact_text()?;

    // 3. Voice (optional)
    let voice_default = !existing.disable_voice.unwrap_or(false);
    let enable_voice = Confirm::new()
        .with_prompt("Enable voice (microphone capture and speech playback)?")
        .default(voice_default)
        .interact()?;

    let voice_profile = if enable_voice {
        let current = existing.voice_profile.clone().unwrap_or_default();
        let input: String = Input::new()
            .with_prompt("Voice profile (leave blank for the character default)")
            .with_initial_text(current)
            .allow_empty(true)
            .interact_text()?;
        if input.is_empty() { None } else { Some(input) }
    } else {
        existing.voice_profile.clone()
    };

    let config_file = ParleyConfigFile {
        backend_url: Some(backend_url),
        request_timeout_secs: Some(timeout_secs),
        voice_profile,
        disable_voice: Some(!enable_voice),
        reveal_char_ms: existing.reveal_char_ms,
        reveal_segment_ms: existing.reveal_segment_ms,
    };

    write_config(&config_path, &config_file)?;
    println!("\nConfig written to {}", config_path.display());
    println!("\nSetup complete! Run `parley` to start chatting.");

    Ok(())
}

/// Serialize and write the config file
fn write_config(path: &PathBuf, config: &ParleyConfigFile) -> anyhow::Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, serialize_config(config))?;

    Ok(())
}

/// Serialize config to a readable TOML string
fn serialize_config(config: &ParleyConfigFile) -> String {
    let mut out = String::new();

    if let Some(ref url) = config.backend_url {
        out.push_str(&format!("backend_url = \"{url}\"\n"));
    }
    if let Some(secs) = config.request_timeout_secs {
        out.push_str(&format!("request_timeout_secs = {secs}\n"));
    }
    if let Some(ref profile) = config.voice_profile {
        out.push_str(&format!("voice_profile = \"{profile}\"\n"));
    }
    if let Some(disabled) = config.disable_voice {
        out.push_str(&format!("disable_voice = {disabled}\n"));
    }
    if let Some(ms) = config.reveal_char_ms {
        out.push_str(&format!("reveal_char_ms = {ms}\n"));
    }
    if let Some(ms) = config.reveal_segment_ms {
        out.push_str(&format!("reveal_segment_ms = {ms}\n"));
    }

    out
}
