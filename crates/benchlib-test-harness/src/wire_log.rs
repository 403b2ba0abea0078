//! Shared record of everything written to a test double.
//!
//! Transports are boxed and moved into a session, so tests keep a
//! [`WireLog`] handle (a cheap clone) to inspect traffic afterwards.

use std::sync::{Arc, Mutex, MutexGuard};

/// Ordered log of `send()` payloads, shared between a test double and the
/// test that created it.
#[derive(Debug, Clone, Default)]
pub struct WireLog {
    entries: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl WireLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn record(&self, data: &[u8]) {
        self.lock().push(data.to_vec());
    }

    /// Every payload, one entry per `send()` call.
    pub fn entries(&self) -> Vec<Vec<u8>> {
        self.lock().clone()
    }

    /// Every payload as text with trailing CR/LF removed.
    pub fn lines(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|e| {
                String::from_utf8_lossy(e)
                    .trim_end_matches(['\r', '\n'])
                    .to_string()
            })
            .collect()
    }

    /// Number of payloads whose text starts with `prefix`.
    pub fn count_starting_with(&self, prefix: &str) -> usize {
        self.lines().iter().filter(|l| l.starts_with(prefix)).count()
    }

    /// Number of payloads recorded.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been sent.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_between_clones() {
        let log = WireLog::new();
        let other = log.clone();
        other.record(b"++addr 5\n");
        other.record(b"VOLT 5\n");
        assert_eq!(log.len(), 2);
        assert_eq!(log.lines(), vec!["++addr 5", "VOLT 5"]);
        assert_eq!(log.count_starting_with("++addr"), 1);
        log.clear();
        assert!(other.is_empty());
    }
}
