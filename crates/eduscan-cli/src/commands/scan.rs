//! Scan command - run a scanning session over image files

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use eduscan_client::{
    data_url, ChannelNotifier, ErrorKind, NoticeLevel, RecognitionResult, SavedResult,
    ScanConfig, ScanError, ScanSessionController, TokenSource,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::output::{OutputContext, OutputFormat, ResultRow};

/// What to scan
pub struct ScanRequest<'a> {
    pub exam_id: i64,
    pub template_id: i64,
    pub frames: &'a [PathBuf],
    pub save: bool,
    /// Per-frame wait for recognition and save acknowledgements
    pub timeout: Duration,
}

/// Scan every frame in order, printing one row per sheet
pub async fn scan(
    config: &ScanConfig,
    tokens: Arc<dyn TokenSource>,
    request: ScanRequest<'_>,
    ctx: &OutputContext,
) -> Result<()> {
    let frames = request
        .frames
        .iter()
        .map(|path| encode_frame(path).map(|frame| (display_name(path), frame)))
        .collect::<Result<Vec<_>>>()?;

    let (notifier, mut notices) = ChannelNotifier::new();
    let controller = ScanSessionController::new(config, tokens, Arc::new(notifier))
        .context("Invalid scanning configuration")?;

    let (saved_tx, mut saved_rx) = mpsc::unbounded_channel();
    controller.set_saved_callback(move |saved| {
        let _ = saved_tx.send(saved.clone());
    });

    let pb = progress_bar(frames.len() as u64, ctx)?;
    let printer = {
        let pb = pb.clone();
        let ctx = *ctx;
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                if ctx.quiet && notice.level != NoticeLevel::Error {
                    continue;
                }
                let line = ctx.notice_line(&notice);
                if pb.is_hidden() {
                    eprintln!("{}", line);
                } else {
                    pb.println(line);
                }
            }
        })
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    ctx.info(&format!(
        "Starting scanning session for exam {} (template {}) at {}",
        request.exam_id,
        request.template_id,
        controller.transport().url()
    ));
    controller.set_context(request.exam_id, request.template_id);
    controller
        .start_scanning()
        .await
        .context("Failed to start scanning session")?;
    controller
        .wait_until_scanning(config.timeouts.connected_wait())
        .await
        .context("Scanning service did not start the session")?;

    let mut rows = Vec::with_capacity(frames.len());
    let mut fatal: Option<ScanError> = None;
    let mut interrupted = false;

    for (file, frame) in &frames {
        if !running.load(Ordering::SeqCst) {
            interrupted = true;
            break;
        }
        pb.set_message(file.clone());

        let frame_id = match controller.capture_frame(frame.as_str()) {
            Ok(id) => id,
            Err(e) => {
                rows.push(ResultRow::failed(0, file, e.to_string()));
                fatal = Some(e);
                break;
            }
        };

        match controller.wait_for_result(frame_id, request.timeout).await {
            Ok(result) => {
                let mut row = ResultRow::recognised(frame_id, file, &result);
                if request.save && result.success {
                    row.saved = save(&controller, result, &mut saved_rx, request.timeout).await;
                }
                rows.push(row);
            }
            Err(e) => {
                rows.push(ResultRow::failed(frame_id, file, e.to_string()));
                if e.kind() != ErrorKind::Remote {
                    fatal = Some(e);
                    break;
                }
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    if interrupted {
        ctx.warn("Interrupted, ending session");
    }

    controller
        .end_session()
        .await
        .context("Failed to end scanning session")?;
    drop(controller);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    ctx.print(&rows);
    if ctx.format == OutputFormat::Table {
        let recognised = rows.iter().filter(|row| row.status == "recognised").count();
        ctx.success(&format!(
            "{} of {} sheet(s) recognised",
            recognised,
            frames.len()
        ));
    }

    match fatal {
        Some(e) => Err(e).context("Scanning session failed"),
        None => Ok(()),
    }
}

async fn save(
    controller: &ScanSessionController,
    result: RecognitionResult,
    saved_rx: &mut mpsc::UnboundedReceiver<SavedResult>,
    timeout: Duration,
) -> String {
    if let Err(e) = controller.save_result(Some(result)) {
        return format!("failed: {}", e);
    }
    match tokio::time::timeout(timeout, saved_rx.recv()).await {
        Ok(Some(saved)) if saved.success => "yes".into(),
        Ok(Some(saved)) => format!("failed: {}", saved.message),
        _ => "no ack".into(),
    }
}

fn progress_bar(len: u64, ctx: &OutputContext) -> Result<ProgressBar> {
    if ctx.quiet || ctx.format != OutputFormat::Table {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

/// Read an image file and encode it as a base64 data URL
pub fn encode_frame(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read frame: {}", path.display()))?;
    if bytes.is_empty() {
        bail!("Frame file is empty: {}", path.display());
    }
    Ok(data_url(mime_type(path), &STANDARD.encode(bytes)))
}

fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_encode_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.JPG");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"hello")
            .unwrap();

        assert_eq!(
            encode_frame(&path).unwrap(),
            "data:image/jpeg;base64,aGVsbG8="
        );
    }

    #[test]
    fn test_encode_empty_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        std::fs::File::create(&path).unwrap();

        assert!(encode_frame(&path).is_err());
        assert!(encode_frame(&dir.path().join("missing.png")).is_err());
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type(Path::new("a.png")), "image/png");
        assert_eq!(mime_type(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_type(Path::new("scan")), "application/octet-stream");
    }
}
