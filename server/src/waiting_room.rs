//! Barrier queue that releases fixed-size groups of distinct tokens
//!
//! Shared by the rendezvous service (pairs of addresses) and the lobby
//! matchmaker (pairs of connections). Tokens wait in arrival order; once
//! `group_size` of them are present the oldest group is drained atomically.

use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

pub struct WaitingRoom<T> {
    queue: Mutex<VecDeque<T>>,
    arrivals: Notify,
    group_size: usize,
}

impl<T: PartialEq + Clone> WaitingRoom<T> {
    pub fn new(group_size: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            arrivals: Notify::new(),
            group_size: group_size.max(1),
        }
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Adds `token` unless it is already waiting; returns whether it was added
    pub async fn join(&self, token: T) -> bool {
        let mut queue = self.queue.lock().await;
        if queue.contains(&token) {
            return false;
        }
        queue.push_back(token);
        self.arrivals.notify_one();
        true
    }

    /// Removes `token`; returns whether it was waiting
    pub async fn leave(&self, token: &T) -> bool {
        let mut queue = self.queue.lock().await;
        match queue.iter().position(|t| t == token) {
            Some(index) => {
                queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Joins if absent, leaves if present; returns whether `token` is now waiting
    pub async fn toggle(&self, token: T) -> bool {
        let mut queue = self.queue.lock().await;
        if let Some(index) = queue.iter().position(|t| *t == token) {
            queue.remove(index);
            false
        } else {
            queue.push_back(token);
            self.arrivals.notify_one();
            true
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Drains the oldest full group if one is waiting
    pub async fn try_take(&self) -> Option<Vec<T>> {
        let mut queue = self.queue.lock().await;
        if queue.len() < self.group_size {
            return None;
        }
        Some(queue.drain(..self.group_size).collect())
    }

    /// Waits until a full group is present, then drains and returns it
    pub async fn take(&self) -> Vec<T> {
        loop {
            if let Some(group) = self.try_take().await {
                return group;
            }
            // notify_one leaves a permit when nobody waits, so a join that
            // lands between the check and this await is not lost
            self.arrivals.notified().await;
        }
    }
}
