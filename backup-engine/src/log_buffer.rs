// SPDX-License-Identifier: GPL-3.0-only

use std::sync::{Arc, Mutex};

use crate::lock;

/// Callback receiving the whole buffer after every append.
pub type LogObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Append-only, user-facing log of engine activity.
///
/// Safe to append from any thread. At most one observer is registered; a new
/// registration replaces the previous one.
#[derive(Default)]
pub struct LogBuffer {
    lines: Mutex<Vec<String>>,
    observer: Mutex<Option<LogObserver>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, line: impl Into<String>) {
        let line = line.into();
        let line = line.trim_end_matches(['\n', '\r']).to_string();

        let observer = lock(&self.observer).clone();
        let snapshot = {
            let mut lines = lock(&self.lines);
            lines.push(line);
            observer.as_ref().map(|_| lines.join("\n"))
        };

        if let (Some(observer), Some(contents)) = (observer, snapshot) {
            observer(&contents);
        }
    }

    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *lock(&self.observer) = Some(Arc::new(observer));
    }

    pub fn clear_observer(&self) {
        *lock(&self.observer) = None;
    }

    pub fn contents(&self) -> String {
        lock(&self.lines).join("\n")
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.lines).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.lines).is_empty()
    }
}

impl std::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBuffer")
            .field("lines", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn observer_receives_full_contents() {
        let log = LogBuffer::new();
        log.append("first\n");

        let seen = Arc::new(Mutex::new(String::new()));
        let sink = seen.clone();
        log.set_observer(move |contents| *sink.lock().unwrap() = contents.to_string());

        log.append("second");
        assert_eq!(*seen.lock().unwrap(), "first\nsecond");
        assert_eq!(log.lines(), vec!["first", "second"]);
    }

    #[test]
    fn last_registered_observer_wins() {
        let log = LogBuffer::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        log.set_observer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = second.clone();
        log.set_observer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        log.append("line");
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        log.clear_observer();
        log.append("another");
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn appends_from_many_threads() {
        let log = Arc::new(LogBuffer::new());
        let threads: Vec<_> = (0..4)
            .map(|n| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        log.append(format!("thread {} line {}", n, i));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(log.len(), 100);
    }
}
