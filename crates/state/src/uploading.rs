//! Process-wide tracker of inspections with an upload in progress.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Upload progress as a plain `(completed, total)` pair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}
impl Progress {
    pub fn new(total: usize) -> Self {
        Self { completed: 0, total }
    }

    /// One more item attempted. Saturates at `total`.
    pub fn advance(self) -> Self {
        Self { completed: (self.completed + 1).min(self.total), total: self.total }
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}
impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    token: CancellationToken,
    progress: watch::Sender<Progress>,
}

#[derive(Debug, Default)]
struct Entries {
    by_id: HashMap<String, Entry>,
    generation: u64,
}

/// Set of inspection ids currently undergoing upload.
///
/// Entering the set is an atomic check-and-insert ([`try_begin`]) that hands
/// out an [`UploadTicket`]; only the holder of the current ticket can
/// [`finish`] the entry, while anyone can [`cancel`] it. Clones share the same
/// set.
///
/// [`try_begin`]: Self::try_begin
/// [`finish`]: Self::finish
/// [`cancel`]: Self::cancel
///
/// # Examples
///
/// ```
/// use carcheck_state::UploadingSet;
///
/// let set = UploadingSet::default();
/// let ticket = set.try_begin("1").unwrap();
/// assert!(set.try_begin("1").is_none());
///
/// set.cancel("1");
/// assert!(ticket.is_cancelled());
/// assert!(!set.contains("1"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct UploadingSet {
    entries: Arc<Mutex<Entries>>,
}

impl UploadingSet {
    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `id` unless it is already present.
    pub fn try_begin(&self, id: &str) -> Option<UploadTicket> {
        let mut entries = self.lock();
        if entries.by_id.contains_key(id) {
            return None;
        }
        entries.generation += 1;
        let generation = entries.generation;
        let token = CancellationToken::new();
        let (progress, _) = watch::channel(Progress::default());
        entries.by_id.insert(id.to_string(), Entry { generation, token: token.clone(), progress: progress.clone() });
        Some(UploadTicket { id: id.to_string(), generation, token, progress })
    }

    /// Remove the entry belonging to `ticket`.
    ///
    /// Returns `false` if the entry was already removed (cancelled, deleted)
    /// or now belongs to a newer upload of the same inspection.
    pub fn finish(&self, ticket: &UploadTicket) -> bool {
        let mut entries = self.lock();
        match entries.by_id.get(&ticket.id) {
            Some(entry) if entry.generation == ticket.generation => {
                entries.by_id.remove(&ticket.id);
                true
            },
            _ => false,
        }
    }

    /// Remove `id` and signal cancellation to its upload.
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock().by_id.remove(id) {
            Some(entry) => {
                entry.token.cancel();
                true
            },
            None => false,
        }
    }

    /// Cancel and remove every entry.
    pub fn clear(&self) -> usize {
        let drained: Vec<Entry> = self.lock().by_id.drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.token.cancel();
        }
        drained.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().by_id.contains_key(id)
    }

    /// Sorted ids.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().by_id.is_empty()
    }

    /// Latest reported progress of the upload of `id`.
    pub fn progress(&self, id: &str) -> Option<Progress> {
        self.lock().by_id.get(id).map(|entry| *entry.progress.borrow())
    }

    /// Follow the progress of the upload of `id`. The receiver sees the
    /// channel close once the upload finishes.
    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<Progress>> {
        self.lock().by_id.get(id).map(|entry| entry.progress.subscribe())
    }
}

/// Proof of membership in an [`UploadingSet`], held by the running upload.
#[derive(Debug)]
pub struct UploadTicket {
    id: String,
    generation: u64,
    token: CancellationToken,
    progress: watch::Sender<Progress>,
}

impl UploadTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Publish progress to subscribers.
    pub fn report(&self, progress: Progress) {
        self.progress.send_replace(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_begin_is_exclusive_per_id() {
        let set = UploadingSet::default();
        let a = set.try_begin("a").unwrap();
        assert!(set.try_begin("a").is_none());
        let _b = set.try_begin("b").unwrap();
        assert_eq!(set.ids(), ["a", "b"]);
        assert!(set.finish(&a));
        assert!(!set.finish(&a));
        assert_eq!(set.ids(), ["b"]);
    }

    #[test]
    fn test_stale_ticket_cannot_finish_newer_upload() {
        let set = UploadingSet::default();
        let old = set.try_begin("a").unwrap();
        assert!(set.cancel("a"));
        assert!(old.is_cancelled());
        let new = set.try_begin("a").unwrap();
        assert!(!set.finish(&old));
        assert!(set.contains("a"));
        assert!(!new.is_cancelled());
        assert!(set.finish(&new));
    }

    #[test]
    fn test_progress_is_visible_to_subscribers() {
        let set = UploadingSet::default();
        let ticket = set.try_begin("a").unwrap();
        let mut rx = set.subscribe("a").unwrap();
        ticket.report(Progress { completed: 1, total: 3 });
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Progress { completed: 1, total: 3 });
        assert_eq!(set.progress("a"), Some(Progress { completed: 1, total: 3 }));
        assert_eq!(set.progress("b"), None);
    }

    #[test]
    fn test_clear_cancels_everything() {
        let set = UploadingSet::default();
        let a = set.try_begin("a").unwrap();
        let b = set.try_begin("b").unwrap();
        assert_eq!(set.clear(), 2);
        assert!(set.is_empty());
        assert!(a.is_cancelled() && b.is_cancelled());
    }

    #[test]
    fn test_progress_advance_saturates() {
        let progress = Progress::new(2).advance().advance().advance();
        assert_eq!(progress, Progress { completed: 2, total: 2 });
        assert!(progress.is_done());
        assert_eq!(progress.to_string(), "2/2");
    }
}
