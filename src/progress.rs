//! Download progress reporting.
//!
//! The fetcher never writes to the console itself, it hands [`ProgressEvent`]s to a
//! [`Progress`] sink. Any `Fn(ProgressEvent)` closure is a sink, which is handy in tests.
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// Something happened to a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent<'a> {
    /// The response arrived. `total` is the announced size, if any.
    Started {
        /// The url being fetched.
        resource: &'a str,
        /// Expected number of bytes.
        total: Option<u64>,
    },
    /// More bytes were written to disk.
    Advanced {
        /// The url being fetched.
        resource: &'a str,
        /// Bytes written so far.
        downloaded: u64,
        /// Expected number of bytes.
        total: Option<u64>,
    },
    /// The transfer completed.
    Finished {
        /// The url being fetched.
        resource: &'a str,
        /// Bytes written in total.
        downloaded: u64,
    },
}

impl ProgressEvent<'_> {
    /// Percentage done, `None` when the total is unknown or zero.
    pub fn percent(&self) -> Option<u64> {
        match *self {
            ProgressEvent::Advanced {
                downloaded,
                total: Some(total),
                ..
            } if total > 0 => Some((downloaded.min(total) * 100) / total),
            ProgressEvent::Finished { .. } => Some(100),
            _ => None,
        }
    }
}

/// A sink for [`ProgressEvent`]s.
pub trait Progress: Send + Sync {
    /// Called for every event, in order.
    fn report(&self, event: ProgressEvent<'_>);
}

impl<F> Progress for F
where
    F: Fn(ProgressEvent<'_>) + Send + Sync,
{
    fn report(&self, event: ProgressEvent<'_>) {
        self(event)
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&self, _event: ProgressEvent<'_>) {}
}

/// Logs a line through `log` every time another 10% is crossed.
///
/// When the size is unknown a line is logged every [`LogProgress::UNKNOWN_STEP`] bytes instead.
#[derive(Debug, Default)]
pub struct LogProgress {
    last: Mutex<u64>,
}

impl LogProgress {
    /// Bytes between two lines when the total size is unknown.
    pub const UNKNOWN_STEP: u64 = 10 * 1024 * 1024;
}

impl Progress for LogProgress {
    fn report(&self, event: ProgressEvent<'_>) {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match event {
            ProgressEvent::Started { resource, total } => {
                *last = 0;
                match total {
                    Some(total) => log::debug!("{resource}: {total} bytes to download"),
                    None => log::debug!("{resource}: size unknown"),
                }
            }
            ProgressEvent::Advanced {
                resource,
                downloaded,
                ..
            } => match event.percent() {
                Some(percent) => {
                    let step = percent / 10 * 10;
                    if step > *last {
                        *last = step;
                        log::info!("{resource}: {step}%");
                    }
                }
                None => {
                    let step = downloaded / Self::UNKNOWN_STEP;
                    if step > *last {
                        *last = step;
                        log::info!("{resource}: {downloaded} bytes");
                    }
                }
            },
            ProgressEvent::Finished {
                resource,
                downloaded,
            } => log::info!("{resource}: done ({downloaded} bytes)"),
        }
    }
}

/// Draws an `indicatif` bar on stderr.
#[derive(Default)]
pub struct BarProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl Progress for BarProgress {
    fn report(&self, event: ProgressEvent<'_>) {
        let mut bar = match self.bar.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match event {
            ProgressEvent::Started { resource, total } => {
                let progress = match total {
                    Some(total) if total > 0 => {
                        let progress = ProgressBar::new(total);
                        if let Ok(style) = ProgressStyle::with_template(
                            "{msg} [{elapsed_precise}] [{wide_bar}] {bytes}/{total_bytes} ({bytes_per_sec})",
                        ) {
                            progress.set_style(style);
                        }
                        progress
                    }
                    _ => ProgressBar::new_spinner(),
                };
                let name = resource.rsplit('/').next().unwrap_or(resource);
                progress.set_message(name.to_string());
                *bar = Some(progress);
            }
            ProgressEvent::Advanced { downloaded, .. } => {
                if let Some(progress) = bar.as_ref() {
                    progress.set_position(downloaded);
                }
            }
            ProgressEvent::Finished { .. } => {
                if let Some(progress) = bar.take() {
                    progress.finish();
                }
            }
        }
    }
}
