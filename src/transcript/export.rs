//! Transcript export formats.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};

use super::index::TranscriptIndex;

/// Output format for [`export`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// `[mm:ss] text`, one cue per line.
    Text,
    Srt,
    Json,
}

impl ExportFormat {
    /// Guess the format from a file extension; unknown extensions are Text.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("srt") => ExportFormat::Srt,
            Some("json") => ExportFormat::Json,
            _ => ExportFormat::Text,
        }
    }
}

/// Render `index` in `format`.
pub fn render(index: &TranscriptIndex, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Text => Ok(index
            .cues()
            .iter()
            .map(|c| format!("[{}] {}", format_time(c.start), c.text))
            .collect::<Vec<_>>()
            .join("\n")),
        ExportFormat::Srt => {
            let mut out = String::new();
            for (i, cue) in index.cues().iter().enumerate() {
                writeln!(out, "{}", i + 1)?;
                writeln!(out, "{} --> {}", srt_time(cue.start), srt_time(cue.end))?;
                writeln!(out, "{}", cue.text)?;
                writeln!(out)?;
            }
            Ok(out)
        }
        ExportFormat::Json => {
            serde_json::to_string_pretty(index.cues()).context("serialising transcript")
        }
    }
}

/// Write `index` to `path`. An empty transcript is refused.
pub fn export(index: &TranscriptIndex, path: &Path, format: ExportFormat) -> Result<()> {
    if index.is_empty() {
        bail!("no transcript loaded");
    }
    let content = render(index, format)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)
        .with_context(|| format!("writing transcript to {}", path.display()))?;
    log::info!(
        "transcript: exported {} cue(s) to {}",
        index.len(),
        path.display()
    );
    Ok(())
}

/// `mm:ss`, or `hh:mm:ss` from one hour on. Negative input reads `00:00`.
pub fn format_time(seconds: f64) -> String {
    if !(seconds >= 0.0) {
        return "00:00".into();
    }
    let total = seconds as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

/// `HH:MM:SS,mmm`.
fn srt_time(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let (h, rem) = (millis / 3_600_000, millis % 3_600_000);
    let (m, rem) = (rem / 60_000, rem % 60_000);
    let (s, ms) = (rem / 1000, rem % 1000);
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::RawCue;
    use tempfile::tempdir;

    fn sample() -> TranscriptIndex {
        TranscriptIndex::from_raw(vec![
            RawCue::new(65.5, 68.25, "second"),
            RawCue::new(0.0, 2.0, "first"),
        ])
    }

    #[test]
    fn time_formats() {
        assert_eq!(format_time(0.0), "00:00");
        assert_eq!(format_time(65.9), "01:05");
        assert_eq!(format_time(3725.0), "01:02:05");
        assert_eq!(format_time(-3.0), "00:00");
        assert_eq!(srt_time(65.5), "00:01:05,500");
        assert_eq!(srt_time(3600.001), "01:00:00,001");
    }

    #[test]
    fn text_export() {
        assert_eq!(
            render(&sample(), ExportFormat::Text).unwrap(),
            "[00:00] first\n[01:05] second"
        );
    }

    #[test]
    fn srt_export() {
        let srt = render(&sample(), ExportFormat::Srt).unwrap();
        assert_eq!(
            srt,
            "1\n00:00:00,000 --> 00:00:02,000\nfirst\n\n\
             2\n00:01:05,500 --> 00:01:08,250\nsecond\n\n"
        );
    }

    #[test]
    fn json_export_parses_back() {
        let json = render(&sample(), ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["text"], "first");
        assert_eq!(value[1]["start"], 65.5);
    }

    #[test]
    fn export_writes_file_and_refuses_empty() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("out").join("talk.srt");

        export(&sample(), &path, ExportFormat::from_path(&path)).expect("export");
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("1\n00:00:00,000"));

        let err = export(&TranscriptIndex::default(), &path, ExportFormat::Text).unwrap_err();
        assert!(err.to_string().contains("no transcript"));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ExportFormat::from_path(Path::new("a.SRT")), ExportFormat::Srt);
        assert_eq!(ExportFormat::from_path(Path::new("a.json")), ExportFormat::Json);
        assert_eq!(ExportFormat::from_path(Path::new("a")), ExportFormat::Text);
    }
}
