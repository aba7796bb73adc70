#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bacnet_link::{Address, LinkError, LinkObserver};

/// One lifecycle notification, as seen by the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Add(Address),
    Del(Address),
    Error(Address, String),
}

/// Observer that records every notification with its arrival time.
#[derive(Default)]
pub struct Recorder {
    log: Mutex<Vec<(Instant, Event)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        let _ = simple_logger::init_with_level(log::Level::Debug);
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn timed(&self) -> Vec<(Instant, Event)> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    /// Poll until the recorded events satisfy `pred` or `limit` passes.
    pub async fn wait_for(&self, limit: Duration, pred: impl Fn(&[Event]) -> bool) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if pred(&self.events()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn push(&self, event: Event) {
        self.log.lock().unwrap().push((Instant::now(), event));
    }
}

impl LinkObserver for Recorder {
    fn add_actor(&self, peer: &Address) {
        self.push(Event::Add(*peer));
    }

    fn del_actor(&self, peer: &Address) {
        self.push(Event::Del(*peer));
    }

    fn actor_error(&self, peer: &Address, error: &LinkError) {
        self.push(Event::Error(*peer, error.to_string()));
    }
}
