//! Mailbox depth monitoring for the actor loops.
//!
//! | Loop           | Normal | Warning    | Critical |
//! |----------------|--------|------------|----------|
//! | Hub            | < 256  | 256-1024   | > 1024   |
//! | Session events | < 128  | 128-512    | > 512    |
//!
//! The depth is sampled from the receiver after every dequeue and exported
//! as `sig_actor_mailbox_depth{actor_type}`.

use crate::observability::metrics;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

pub const HUB_MAILBOX_NORMAL: usize = 256;
pub const HUB_MAILBOX_WARNING: usize = 1024;

pub const SESSION_EVENTS_MAILBOX_NORMAL: usize = 128;
pub const SESSION_EVENTS_MAILBOX_WARNING: usize = 512;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// The signaling hub loop (singleton).
    Hub,
    /// The session manager's engine event loop (singleton).
    SessionEvents,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Hub => "hub",
            ActorType::SessionEvents => "session_events",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Hub => HUB_MAILBOX_WARNING,
            ActorType::SessionEvents => SESSION_EVENTS_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Hub => HUB_MAILBOX_NORMAL,
            ActorType::SessionEvents => SESSION_EVENTS_MAILBOX_NORMAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType) -> Self {
        Self {
            actor_type,
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record one processed message with `remaining` still queued.
    pub fn record_dequeue(&self, remaining: usize) {
        let previous = self.depth.swap(remaining, Ordering::Relaxed);
        self.peak_depth.fetch_max(remaining, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), remaining);

        let level = self.level_for_depth(remaining);
        if level == MailboxLevel::Critical
            && self.level_for_depth(previous) != MailboxLevel::Critical
        {
            warn!(
                target: "sig.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                depth = remaining,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning
            && self.level_for_depth(previous) == MailboxLevel::Normal
        {
            debug!(
                target: "sig.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                depth = remaining,
                "Mailbox depth elevated"
            );
        }
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth >= self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}
