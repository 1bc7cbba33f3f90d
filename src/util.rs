use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Try to enable ANSI escape sequence support on Windows consoles.
/// Returns true if enabling succeeded (or platform likely already supports ANSI), false otherwise.
#[cfg(windows)]
pub fn try_enable_ansi_on_windows() -> bool {
    enable_ansi_support::enable_ansi_support().is_ok()
}

#[cfg(not(windows))]
pub fn try_enable_ansi_on_windows() -> bool {
    true
}

/// Convert a byte count into a human readable string using IEC units (KiB/MiB/GiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Byte progress bar for one file. Hidden when `total` is unknown and the
/// output is not a terminal, so piped logs stay clean.
pub fn file_progress(label: &str, total: Option<u64>) -> Result<ProgressBar> {
    let style = ProgressStyle::with_template(
        "{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    )
    .context("invalid progress template")?
    .progress_chars("=> ");
    let pb = match total {
        Some(n) => ProgressBar::new(n),
        None => ProgressBar::new_spinner(),
    };
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(style);
    pb.set_message(label.to_string());
    let _ = try_enable_ansi_on_windows();
    Ok(pb)
}

// Default backoff base in milliseconds. Can be adjusted at runtime via `set_backoff_ms`.
static BACKOFF_BASE_MS: AtomicU64 = AtomicU64::new(500);

/// Set the base backoff in milliseconds used by `retry_operation` between attempts.
pub fn set_backoff_ms(ms: u64) {
    BACKOFF_BASE_MS.store(ms, Ordering::SeqCst);
}

pub fn get_backoff_ms() -> u64 {
    BACKOFF_BASE_MS.load(Ordering::SeqCst)
}

/// Run `op` up to `max_retries` times with linear backoff between attempts.
/// `what` names the operation in debug logs.
pub fn retry_operation<F, T>(max_retries: usize, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_retries = max_retries.max(1);
    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 0..max_retries {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                tracing::debug!("{} failed (attempt {}/{}): {:#}", what, attempt + 1, max_retries, e);
                last_err = Some(e);
                if attempt + 1 < max_retries {
                    let wait = get_backoff_ms().saturating_mul(attempt as u64 + 1);
                    std::thread::sleep(Duration::from_millis(wait));
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed", what)))
}

/// Rename `tmp_path` over `target`, retrying a few times if the target
/// already exists or is briefly locked (Windows semantics).
pub fn atomic_rename_with_retries(tmp_path: &Path, target: &Path) -> std::io::Result<()> {
    let mut attempts = 0;
    loop {
        match std::fs::rename(tmp_path, target) {
            Ok(()) => return Ok(()),
            Err(e) => {
                let kind = e.kind();
                if attempts < 2
                    && (kind == std::io::ErrorKind::AlreadyExists
                        || kind == std::io::ErrorKind::PermissionDenied)
                {
                    let _ = std::fs::remove_file(target);
                    std::thread::sleep(Duration::from_millis(50));
                    attempts += 1;
                    continue;
                }
                return Err(e);
            }
        }
    }
}

/// Remove `start` and its parents while they are empty directories, stopping
/// at (and never removing) `root`.
pub fn prune_empty_dirs(start: &Path, root: &Path) {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        // remove_dir refuses non-empty directories; that is the stop signal
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        tracing::debug!("removed empty cache folder {}", dir.display());
        current = dir.parent();
    }
}
