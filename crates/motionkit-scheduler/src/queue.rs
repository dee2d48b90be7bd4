//! Command line FIFO
//!
//! Safe for concurrent producers and a single consumer. Every pushed line
//! gets a sequence number, used in logs and failure reports.

use motionkit_control::CommandLine;
use motionkit_core::{thread_safe_deque, ThreadSafeDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A line waiting in the queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedLine {
    /// Sequence number, starting at 1
    pub number: u64,
    /// The commands
    pub line: CommandLine,
}

/// FIFO of command lines
#[derive(Debug, Clone)]
pub struct CommandQueue {
    lines: ThreadSafeDeque<QueuedLine>,
    notify: Arc<Notify>,
    next_number: Arc<AtomicU64>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            lines: thread_safe_deque(),
            notify: Arc::new(Notify::new()),
            next_number: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Append a line and return its sequence number
    pub fn push(&self, line: CommandLine) -> u64 {
        let number = {
            let mut lines = self.lines.lock();
            let number = self.next_number.fetch_add(1, Ordering::SeqCst);
            lines.push_back(QueuedLine { number, line });
            number
        };
        self.notify.notify_one();
        number
    }

    /// Take the oldest line
    pub fn pop(&self) -> Option<QueuedLine> {
        self.lines.lock().pop_front()
    }

    /// Discard every waiting line, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut lines = self.lines.lock();
        let dropped = lines.len();
        lines.clear();
        dropped
    }

    /// Number of waiting lines
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Resolves after the next push, or immediately if a push happened since
    /// the last wakeup
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motionkit_control::Command;

    #[test]
    fn test_fifo_order_and_numbering() {
        let queue = CommandQueue::new();
        let a = queue.push(CommandLine::new().with(Command::move_absolute("x", 1.0)));
        let b = queue.push(CommandLine::new().with(Command::move_absolute("x", 2.0)));
        assert_eq!((a, b), (1, 2));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop().unwrap().number, 1);
        assert_eq!(queue.clear(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.push(CommandLine::new()), 3);
    }

    #[tokio::test]
    async fn test_concurrent_producers() {
        let queue = CommandQueue::new();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let queue = queue.clone();
            tasks.push(tokio::spawn(async move {
                for j in 0..25 {
                    queue.push(CommandLine::new().with(Command::wait("m", (i * 100 + j) as f64)));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(queue.len(), 200);
        let mut last = 0;
        while let Some(line) = queue.pop() {
            assert!(line.number > last);
            last = line.number;
        }
    }

    #[tokio::test]
    async fn test_push_wakes_waiter() {
        let queue = CommandQueue::new();
        queue.push(CommandLine::new());
        // The stored permit makes this resolve without a concurrent push.
        tokio::time::timeout(std::time::Duration::from_secs(1), queue.notified())
            .await
            .unwrap();
    }
}
