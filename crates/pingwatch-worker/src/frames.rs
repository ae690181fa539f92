//! Best-effort frame extraction via ffmpeg/ffprobe.
//!
//! Frames only feed the image-mode fallback, so every failure here —
//! missing binaries included — degrades to an empty frame list and the job
//! continues on the video-mode path.

use std::io::Write;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::process::Command;
use tracing::{debug, warn};

/// JPEG quality for extracted frames (ffmpeg's 2..=31 scale; 3 ≈ quality 85).
const JPEG_QSCALE: &str = "3";

/// Assumed clip length when the container will not reveal one.
const FALLBACK_DURATION_SECONDS: f64 = 1.0;

/// Sample instants for `num_frames` frames over `duration` seconds,
/// skipping the very start and end; a single frame comes from the middle.
pub fn sample_positions(duration: f64, num_frames: usize) -> Vec<f64> {
    if num_frames == 0 || duration <= 0.0 {
        return Vec::new();
    }
    if num_frames == 1 {
        return vec![duration / 2.0];
    }
    let step = duration / (num_frames as f64 + 1.0);
    (1..=num_frames).map(|i| step * i as f64).collect()
}

/// Extract up to `num_frames` JPEG frames and return them as base64
/// `data:image/jpeg` URIs. Never fails — problems are logged and an empty
/// list is returned.
pub async fn extract_frames_as_data_uris(video_bytes: &[u8], num_frames: usize) -> Vec<String> {
    match try_extract(video_bytes, num_frames).await {
        Ok(frames) => frames,
        Err(reason) => {
            warn!(reason, "frame extraction failed; continuing without frames");
            Vec::new()
        }
    }
}

async fn try_extract(video_bytes: &[u8], num_frames: usize) -> Result<Vec<String>, String> {
    if video_bytes.is_empty() || num_frames == 0 {
        return Ok(Vec::new());
    }
    let ffmpeg = which::which("ffmpeg").map_err(|_| "ffmpeg not found on PATH".to_string())?;
    let ffprobe = which::which("ffprobe").ok();

    // ffmpeg needs a file path; stage the bytes in a temp file.
    let mut clip = tempfile::Builder::new()
        .suffix(".webm")
        .tempfile()
        .map_err(|e| format!("temp file: {e}"))?;
    clip.write_all(video_bytes)
        .map_err(|e| format!("temp write: {e}"))?;
    let clip_path = clip.path().to_path_buf();

    let duration = match ffprobe {
        Some(ffprobe) => probe_duration(&ffprobe, &clip_path)
            .await
            .unwrap_or(FALLBACK_DURATION_SECONDS),
        None => FALLBACK_DURATION_SECONDS,
    };
    let positions = sample_positions(duration, num_frames);
    debug!(duration, ?positions, "sampling clip frames");

    let out_dir = tempfile::tempdir().map_err(|e| format!("temp dir: {e}"))?;
    let mut frames = Vec::new();
    for (index, position) in positions.iter().enumerate() {
        let out_path = out_dir.path().join(format!("frame-{index}.jpg"));
        let status = Command::new(&ffmpeg)
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg(format!("{position:.3}"))
            .arg("-i")
            .arg(&clip_path)
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg(JPEG_QSCALE)
            .arg("-f")
            .arg("image2")
            .arg(&out_path)
            .status()
            .await
            .map_err(|e| format!("ffmpeg spawn: {e}"))?;
        if !status.success() {
            warn!(index, position, "ffmpeg frame extraction failed at position");
            continue;
        }
        match std::fs::read(&out_path) {
            Ok(bytes) if !bytes.is_empty() => {
                frames.push(format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)));
            }
            _ => warn!(index, "no frame produced at position"),
        }
    }
    debug!(extracted = frames.len(), requested = num_frames, "frame extraction done");
    Ok(frames)
}

async fn probe_duration(ffprobe: &Path, clip_path: &Path) -> Option<f64> {
    let output = Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(clip_path)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let duration: f64 = String::from_utf8_lossy(&output.stdout).trim().parse().ok()?;
    (duration > 0.0).then_some(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_frame_samples_the_middle() {
        assert_eq!(sample_positions(10.0, 1), vec![5.0]);
    }

    #[test]
    fn multiple_frames_avoid_the_edges() {
        let positions = sample_positions(8.0, 3);
        assert_eq!(positions, vec![2.0, 4.0, 6.0]);
        assert!(positions.first().copied().unwrap() > 0.0);
        assert!(positions.last().copied().unwrap() < 8.0);
    }

    #[test]
    fn degenerate_inputs_sample_nothing() {
        assert!(sample_positions(0.0, 3).is_empty());
        assert!(sample_positions(-1.0, 3).is_empty());
        assert!(sample_positions(10.0, 0).is_empty());
    }

    #[tokio::test]
    async fn empty_clip_extracts_no_frames() {
        assert!(extract_frames_as_data_uris(&[], 3).await.is_empty());
    }
}
