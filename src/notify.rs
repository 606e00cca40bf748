//! Best-effort notifications about an analysis.
//!
//! The analysis core only ever calls [`Notifier::notify`]. Delivery is the
//! notifier's business and must never fail the run.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{info, warn};

/// What happened to an analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    /// The analysis started.
    Started {
        /// Broadcast title, or the directory name.
        title: String,
    },
    /// The analysis finished and marks were written.
    Finished {
        /// Broadcast title, or the directory name.
        title: String,
    },
    /// The analysis was cancelled or failed.
    Aborted {
        /// Broadcast title, or the directory name.
        title: String,
    },
}

impl Display for NotifyEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            NotifyEvent::Started { title } => write!(f, "starting cutmarks for {title}"),
            NotifyEvent::Finished { title } => write!(f, "cutmarks finished for {title}"),
            NotifyEvent::Aborted { title } => write!(f, "cutmarks aborted for {title}"),
        }
    }
}

/// Receives analysis notifications.
pub trait Notifier: Send + Sync {
    /// Deliver `event`; failures are the implementation's to swallow.
    fn notify(&self, event: NotifyEvent);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: NotifyEvent) {
        info!("{event}");
    }
}

/// Delivers through another notifier on a worker thread.
///
/// Only one delivery is in flight at a time: a new notification first
/// joins the previous one. The last delivery is joined on drop.
pub struct BackgroundNotifier<N> {
    inner: Arc<N>,
    pending: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<N: Notifier + 'static> BackgroundNotifier<N> {
    /// Wrap `inner`.
    pub fn new(inner: N) -> Self {
        Self {
            inner: Arc::new(inner),
            pending: std::sync::Mutex::new(None),
        }
    }

    fn join_pending(slot: &mut Option<JoinHandle<()>>) {
        if let Some(handle) = slot.take()
            && handle.join().is_err()
        {
            warn!("notification thread panicked");
        }
    }
}

impl<N: Notifier + 'static> Notifier for BackgroundNotifier<N> {
    fn notify(&self, event: NotifyEvent) {
        let Ok(mut slot) = self.pending.lock() else {
            return;
        };
        Self::join_pending(&mut slot);
        let inner = Arc::clone(&self.inner);
        match thread::Builder::new()
            .name("notify".to_string())
            .spawn(move || inner.notify(event))
        {
            Ok(handle) => *slot = Some(handle),
            Err(error) => warn!("cannot start notification thread: {error}"),
        }
    }
}

impl<N> Drop for BackgroundNotifier<N> {
    fn drop(&mut self) {
        if let Ok(slot) = self.pending.get_mut()
            && let Some(handle) = slot.take()
            && handle.join().is_err()
        {
            warn!("notification thread panicked");
        }
    }
}

impl<N> std::fmt::Debug for BackgroundNotifier<N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("BackgroundNotifier").finish_non_exhaustive()
    }
}
