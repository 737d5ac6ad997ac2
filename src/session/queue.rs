//! Prompt queue (C4): a bounded per-session FIFO, drained whenever the
//! session transitions to `ready`.

use std::collections::VecDeque;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::prompt::QueuedMessage;
use crate::{AppError, Result};

/// Bounded FIFO of prompts awaiting submission to a session's agent.
pub struct PromptQueue {
    session_id: String,
    capacity: usize,
    items: Mutex<VecDeque<QueuedMessage>>,
}

impl PromptQueue {
    /// Construct an empty queue bounded at `capacity`.
    #[must_use]
    pub fn new(session_id: String, capacity: usize) -> Self {
        Self {
            session_id,
            capacity,
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueue a message. Fails with `AppError::QueueFull` at capacity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::QueueFull` if the queue is already at capacity.
    pub async fn add(
        &self,
        text: String,
        attachment_ids: Vec<String>,
        client_id_origin: String,
    ) -> Result<QueuedMessage> {
        let mut guard = self.items.lock().await;
        if guard.len() >= self.capacity {
            return Err(AppError::QueueFull);
        }
        let message = QueuedMessage::new(
            Uuid::new_v4().to_string(),
            self.session_id.clone(),
            text,
            attachment_ids,
            client_id_origin,
        );
        guard.push_back(message.clone());
        Ok(message)
    }

    /// List queued messages in FIFO order.
    pub async fn list(&self) -> Vec<QueuedMessage> {
        self.items.lock().await.iter().cloned().collect()
    }

    /// Fetch one queued message by id.
    pub async fn get(&self, id: &str) -> Option<QueuedMessage> {
        self.items.lock().await.iter().find(|m| m.id == id).cloned()
    }

    /// Remove one queued message by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no message with that id is queued.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut guard = self.items.lock().await;
        let before = guard.len();
        guard.retain(|m| m.id != id);
        if guard.len() == before {
            return Err(AppError::NotFound(format!("queued message {id}")));
        }
        Ok(())
    }

    /// Drop every queued message.
    pub async fn clear(&self) {
        self.items.lock().await.clear();
    }

    /// Pop the head of the queue, if any, for submission to the session.
    pub async fn pop_front(&self) -> Option<QueuedMessage> {
        self.items.lock().await.pop_front()
    }

    /// Apply a synthesised title to a still-queued message (C7 callback).
    ///
    /// Returns `true` if the message was still queued to receive it; `false`
    /// if it had already been drained or removed, so the caller knows not
    /// to broadcast a title for a message clients will never see queued.
    pub async fn set_title(&self, id: &str, title: String) -> bool {
        if let Some(message) = self.items.lock().await.iter_mut().find(|m| m.id == id) {
            message.auto_title = Some(title);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_ordering_is_preserved() {
        let queue = PromptQueue::new("s1".into(), 32);
        queue.add("x".into(), vec![], "c1".into()).await.unwrap();
        queue.add("y".into(), vec![], "c1".into()).await.unwrap();
        let listed = queue.list().await;
        assert_eq!(listed[0].text, "x");
        assert_eq!(listed[1].text, "y");
        let popped = queue.pop_front().await.unwrap();
        assert_eq!(popped.text, "x");
    }

    #[tokio::test]
    async fn add_fails_at_capacity() {
        let queue = PromptQueue::new("s1".into(), 1);
        queue.add("x".into(), vec![], "c1".into()).await.unwrap();
        let err = queue.add("y".into(), vec![], "c1".into()).await.unwrap_err();
        assert!(matches!(err, AppError::QueueFull));
    }
}
