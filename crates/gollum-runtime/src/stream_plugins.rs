//! Built-in stream dispatch policies.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use gollum_core::{Dispatch, Message, StreamId, StreamPlugin};

/// Delivers to every subscribed producer.
#[derive(Default)]
pub struct Broadcast;

impl StreamPlugin for Broadcast {
    fn dispatch(&self, _msg: &mut Message, subscriber_count: usize) -> Dispatch {
        Dispatch::Targets((0..subscriber_count).collect())
    }
}

/// Reassigns the message onto a fixed target stream and lets the caller
/// re-resolve dispatch there.
pub struct Route {
    target: StreamId,
}

impl Route {
    pub fn new(target: StreamId) -> Self {
        Self { target }
    }
}

impl StreamPlugin for Route {
    fn dispatch(&self, msg: &mut Message, _subscriber_count: usize) -> Dispatch {
        msg.route(self.target);
        Dispatch::Rerouted
    }
}

/// Picks one subscriber uniformly at random per message.
#[derive(Default)]
pub struct Random;

impl StreamPlugin for Random {
    fn dispatch(&self, _msg: &mut Message, subscriber_count: usize) -> Dispatch {
        if subscriber_count == 0 {
            return Dispatch::Targets(Vec::new());
        }
        let idx = rand::thread_rng().gen_range(0..subscriber_count);
        Dispatch::Targets(vec![idx])
    }
}

/// Picks subscribers in rotation, one per message.
#[derive(Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl StreamPlugin for RoundRobin {
    fn dispatch(&self, _msg: &mut Message, subscriber_count: usize) -> Dispatch {
        if subscriber_count == 0 {
            return Dispatch::Targets(Vec::new());
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % subscriber_count;
        Dispatch::Targets(vec![idx])
    }
}
