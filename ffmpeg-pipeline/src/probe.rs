//! Capture-device discovery helpers.

use tokio::process::Command;

use crate::error::PipelineError;

/// Check if ffmpeg is available on the system.
pub async fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// List local capture devices, for the "no source specified" error message.
///
/// Uses `v4l2-ctl --list-devices` on Linux and ffmpeg's avfoundation device
/// listing on macOS.
pub async fn list_capture_devices() -> Result<String, PipelineError> {
    let out = if cfg!(target_os = "macos") {
        Command::new("ffmpeg")
            .args(["-hide_banner", "-f", "avfoundation", "-list_devices", "true", "-i", ""])
            .output()
            .await?
    } else if cfg!(target_os = "linux") {
        Command::new("v4l2-ctl")
            .arg("--list-devices")
            .output()
            .await?
    } else {
        return Err(PipelineError::UnsupportedPlatform);
    };
    let mut listing = String::from_utf8_lossy(&out.stdout).into_owned();
    listing.push_str(&String::from_utf8_lossy(&out.stderr));
    Ok(listing.trim().to_string())
}
