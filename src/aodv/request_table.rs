//! Bookkeeping of in-flight route discoveries.
//!
//! Every route request seen by this node, originated locally or relayed, gets an entry keyed by
//! the requested destination. Entries start **Active** for the path discovery time, then move to
//! **Grace** where they still suppress duplicates but no longer resolve waiting clients, and are
//! finally removed. A time-ordered index lets the cleaner find the earliest deadline without
//! scanning the table.
use crate::aodv::interfaces::{RouteEventClient, RouteInfo, RouteToken};
use crate::common::Address;
use crate::{AodvError, AodvErrorKind};
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rand::Rng;
use slog::Logger;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

const CLEANER_THREAD_NAME: &str = "RequestTableCleaner";

/// Lifecycle state of a request entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Discovery in progress. Replies resolve the waiting client.
    Active,
    /// Discovery window elapsed. Kept only to recognise late duplicates.
    Grace,
}

#[derive(Debug, Clone)]
pub struct RequestEntry {
    key: u64,
    pub destination: Address,
    pub originator: Address,
    pub request_id: u16,
    pub expiry: DateTime<Utc>,
    pub state: RequestState,
    pub client: Option<Arc<dyn RouteEventClient>>,
    pub token: Option<RouteToken>,
}

impl RequestEntry {
    fn new(
        request_id: u16,
        destination: Address,
        originator: Address,
        expiry: DateTime<Utc>,
        client: Option<Arc<dyn RouteEventClient>>,
        token: Option<RouteToken>,
    ) -> Self {
        RequestEntry {
            key: 0,
            destination,
            originator,
            request_id,
            expiry,
            state: RequestState::Active,
            client,
            token,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == RequestState::Active
    }
}

/// A request taken out of the table because a reply resolved it.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub request_id: u16,
    pub client: Option<Arc<dyn RouteEventClient>>,
    pub token: Option<RouteToken>,
}

/// Outcome of one pass of the cleaner.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Entries moved from Active to Grace.
    pub expired: usize,
    /// Entries removed after their grace period.
    pub removed: usize,
    /// Local clients told that no route was found.
    pub notified: usize,
}

type TimeoutKey = (DateTime<Utc>, u64, Address);

#[derive(Debug, Default)]
struct Requests {
    by_destination: HashMap<Address, Vec<RequestEntry>>,
    timeouts: BTreeSet<TimeoutKey>,
    next_key: u64,
}

impl Requests {
    fn insert(&mut self, mut entry: RequestEntry) {
        entry.key = self.next_key;
        self.next_key += 1;
        self.timeouts
            .insert((entry.expiry, entry.key, entry.destination));
        self.by_destination
            .entry(entry.destination)
            .or_insert_with(Vec::new)
            .push(entry);
    }

    fn find<P>(&self, destination: Address, pred: P) -> Option<&RequestEntry>
    where
        P: Fn(&RequestEntry) -> bool,
    {
        self.by_destination
            .get(&destination)
            .and_then(|entries| entries.iter().find(|e| pred(e)))
    }

    /// Removes the first entry for `destination` matching `pred` from the table and the index.
    fn remove_first<P>(&mut self, destination: Address, pred: P) -> Option<RequestEntry>
    where
        P: Fn(&RequestEntry) -> bool,
    {
        let entries = self.by_destination.get_mut(&destination)?;
        let idx = entries.iter().position(|e| pred(e))?;
        let entry = entries.remove(idx);
        if entries.is_empty() {
            self.by_destination.remove(&destination);
        }
        self.timeouts
            .remove(&(entry.expiry, entry.key, entry.destination));
        Some(entry)
    }

    fn earliest(&self) -> Option<DateTime<Utc>> {
        self.timeouts.iter().next().map(|(expiry, _, _)| *expiry)
    }

    fn len(&self) -> usize {
        self.by_destination.values().map(Vec::len).sum()
    }
}

/// Table of pending route discoveries of one node.
#[derive(Debug)]
pub struct RequestTable {
    requests: Mutex<Requests>,
    local_address: Address,
    grace_period: Duration,
    expiry_time_delta: Duration,
    wakeup_tx: Sender<()>,
    wakeup_rx: Receiver<()>,
    timeouts_notified: AtomicU64,
    logger: Logger,
}

impl RequestTable {
    /// `grace_period` and `expiry_time_delta` are in milliseconds.
    pub fn new(
        local_address: Address,
        grace_period: i64,
        expiry_time_delta: i64,
        logger: Logger,
    ) -> Self {
        let (wakeup_tx, wakeup_rx) = bounded(1);
        RequestTable {
            requests: Mutex::new(Requests::default()),
            local_address,
            grace_period: Duration::milliseconds(grace_period),
            expiry_time_delta: Duration::milliseconds(expiry_time_delta),
            wakeup_tx,
            wakeup_rx,
            timeouts_notified: AtomicU64::new(0),
            logger: logger.new(o!("component" => "RequestTable")),
        }
    }

    /// Adds a new Active entry. Duplicate suppression is up to the caller (see `has_request`
    /// and `register_if_absent`).
    pub fn register(
        &self,
        request_id: u16,
        destination: Address,
        originator: Address,
        expiry: DateTime<Utc>,
        client: Option<Arc<dyn RouteEventClient>>,
        token: Option<RouteToken>,
    ) -> bool {
        let entry = RequestEntry::new(request_id, destination, originator, expiry, client, token);
        self.insert(entry, false)
    }

    /// Adds a new Active entry unless the exact request (destination, originator, request ID)
    /// is already known in any state. The check and the insert happen under one lock.
    pub fn register_if_absent(
        &self,
        request_id: u16,
        destination: Address,
        originator: Address,
        expiry: DateTime<Utc>,
    ) -> bool {
        let entry = RequestEntry::new(request_id, destination, originator, expiry, None, None);
        self.insert(entry, true)
    }

    fn insert(&self, entry: RequestEntry, unless_known: bool) -> bool {
        let (destination, originator, request_id, expiry) =
            (entry.destination, entry.originator, entry.request_id, entry.expiry);
        let new_earliest = {
            let mut requests = self.requests.lock().expect("Could not lock request table");
            if unless_known
                && requests
                    .find(destination, |e| {
                        e.originator == originator && e.request_id == request_id
                    })
                    .is_some()
            {
                return false;
            }
            let previous = requests.earliest();
            requests.insert(entry);
            previous.map_or(true, |p| expiry < p)
        };
        debug!(
            self.logger,
            "Request registered";
            "destination" => destination,
            "originator" => originator,
            "rreq_id" => request_id,
        );

        if new_earliest {
            self.wake_cleaner();
        }
        true
    }

    /// Whether the exact request (destination, originator, request ID) is known, in any state.
    pub fn has_request(&self, destination: Address, originator: Address, request_id: u16) -> bool {
        let requests = self.requests.lock().expect("Could not lock request table");
        requests
            .find(destination, |e| {
                e.originator == originator && e.request_id == request_id
            })
            .is_some()
    }

    /// Whether an Active entry exists for (destination, originator). With a request ID only
    /// that exact request is considered.
    pub fn has_active_request(
        &self,
        destination: Address,
        originator: Address,
        request_id: Option<u16>,
    ) -> bool {
        let requests = self.requests.lock().expect("Could not lock request table");
        requests
            .find(destination, |e| {
                e.is_active()
                    && e.originator == originator
                    && request_id.map_or(true, |id| e.request_id == id)
            })
            .is_some()
    }

    /// Client waiting on the first entry for (destination, originator), without removing it.
    pub fn callback_for(
        &self,
        destination: Address,
        originator: Address,
    ) -> Option<Arc<dyn RouteEventClient>> {
        let requests = self.requests.lock().expect("Could not lock request table");
        requests
            .find(destination, |e| e.originator == originator)
            .and_then(|e| e.client.clone())
    }

    /// Removes the first entry for (destination, originator) and returns its token.
    pub fn remove(&self, destination: Address, originator: Address) -> Option<RouteToken> {
        let mut requests = self.requests.lock().expect("Could not lock request table");
        requests
            .remove_first(destination, |e| e.originator == originator)
            .and_then(|e| e.token)
    }

    /// Removes the first Active entry for (destination, originator) and hands back what is
    /// needed to resolve it.
    pub fn take_active(&self, destination: Address, originator: Address) -> Option<ResolvedRequest> {
        let mut requests = self.requests.lock().expect("Could not lock request table");
        requests
            .remove_first(destination, |e| e.is_active() && e.originator == originator)
            .map(|e| ResolvedRequest {
                request_id: e.request_id,
                client: e.client,
                token: e.token,
            })
    }

    /// Deadline of the entry that expires first.
    pub fn next_expiry(&self) -> Option<DateTime<Utc>> {
        self.requests
            .lock()
            .expect("Could not lock request table")
            .earliest()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().expect("Could not lock request table").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry for `destination`.
    pub fn entries_for(&self, destination: Address) -> Vec<RequestEntry> {
        let requests = self.requests.lock().expect("Could not lock request table");
        requests
            .by_destination
            .get(&destination)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of local clients told so far that their discovery found no route.
    pub fn timeouts_notified(&self) -> u64 {
        self.timeouts_notified.load(Ordering::Relaxed)
    }

    pub fn sweep(&self) -> SweepOutcome {
        self.sweep_at(Utc::now())
    }

    /// Processes entries in expiry order until one is still in the future. Active entries move
    /// to Grace (local clients are told there's no route), Grace entries are removed.
    /// Clients are called after the table lock is released.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepOutcome {
        let cutoff = now + self.expiry_time_delta;
        let mut outcome = SweepOutcome::default();
        let mut notifications = Vec::new();
        {
            let mut guard = self.requests.lock().expect("Could not lock request table");
            let requests = &mut *guard;
            loop {
                let first = match requests.timeouts.iter().next() {
                    Some(first) if first.0 < cutoff => *first,
                    _ => break,
                };
                let (_expiry, key, destination) = first;
                requests.timeouts.remove(&first);

                let entries = match requests.by_destination.get_mut(&destination) {
                    Some(entries) => entries,
                    None => continue,
                };
                let idx = match entries.iter().position(|e| e.key == key) {
                    Some(idx) => idx,
                    None => continue,
                };

                if entries[idx].is_active() {
                    let entry = &mut entries[idx];
                    entry.state = RequestState::Grace;
                    entry.expiry = now + self.grace_period;
                    let new_key = (entry.expiry, entry.key, entry.destination);
                    outcome.expired += 1;
                    if entry.originator == self.local_address {
                        if let Some(ref client) = entry.client {
                            notifications.push((Arc::clone(client), destination, entry.token));
                        }
                    }
                    requests.timeouts.insert(new_key);
                } else {
                    entries.remove(idx);
                    if entries.is_empty() {
                        requests.by_destination.remove(&destination);
                    }
                    outcome.removed += 1;
                }
            }
        }

        for (client, destination, token) in notifications {
            info!(self.logger, "Route discovery timed out"; "destination" => destination);
            client.route_found(RouteInfo::no_route(destination), token);
            outcome.notified += 1;
        }
        self.timeouts_notified
            .fetch_add(outcome.notified as u64, Ordering::Relaxed);

        if outcome.expired > 0 || outcome.removed > 0 {
            debug!(
                self.logger,
                "Request table swept";
                "expired" => outcome.expired,
                "removed" => outcome.removed,
            );
        }
        outcome
    }

    fn wake_cleaner(&self) {
        //A full channel means a wakeup is already pending.
        let _ = self.wakeup_tx.try_send(());
    }

    /// Starts the background thread that sweeps the table whenever its earliest deadline
    /// arrives or a registration produces a new earliest deadline.
    pub fn start_cleaner(table: &Arc<RequestTable>) -> Result<RequestTableCleaner, AodvError> {
        let keep_running = Arc::new(AtomicBool::new(true));
        let thread_table = Arc::clone(table);
        let thread_flag = Arc::clone(&keep_running);
        let wakeup_rx = table.wakeup_rx.clone();

        let handle = thread::Builder::new()
            .name(String::from(CLEANER_THREAD_NAME))
            .spawn(move || {
                RequestTable::cleaner_loop(&thread_table, &thread_flag, &wakeup_rx);
            })
            .map_err(|e| {
                let msg = String::from("Could not start the request table cleaner");
                AodvError::with_cause(AodvErrorKind::Contention(msg), e)
            })?;

        Ok(RequestTableCleaner {
            keep_running,
            wakeup_tx: table.wakeup_tx.clone(),
            handle: Some(handle),
        })
    }

    fn cleaner_loop(table: &RequestTable, keep_running: &AtomicBool, wakeup_rx: &Receiver<()>) {
        info!(table.logger, "Cleaner started");
        while keep_running.load(Ordering::SeqCst) {
            let signal = match table.next_expiry() {
                Some(deadline) => {
                    let wait = (deadline - Utc::now())
                        .to_std()
                        .unwrap_or_else(|_| std::time::Duration::from_millis(0));
                    wakeup_rx.recv_timeout(wait)
                }
                None => wakeup_rx
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };

            if let Err(RecvTimeoutError::Disconnected) = signal {
                break;
            }
            if !keep_running.load(Ordering::SeqCst) {
                break;
            }
            let _ = table.sweep();
        }
        info!(table.logger, "Cleaner stopped");
    }
}

/// Handle to the running cleaner thread.
#[derive(Debug)]
pub struct RequestTableCleaner {
    keep_running: Arc<AtomicBool>,
    wakeup_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl RequestTableCleaner {
    /// Signals the cleaner to finish and waits for it.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        let _ = self.wakeup_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Node-wide generator of route request IDs. IDs are 16 bits, wrap from 65535 back to 1 and
/// never take the value 0.
#[derive(Debug)]
pub struct RequestIdGenerator {
    current: AtomicU16,
}

impl RequestIdGenerator {
    pub fn new(start: u16) -> Self {
        RequestIdGenerator {
            current: AtomicU16::new(start),
        }
    }

    /// Starts the sequence at a random point.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        RequestIdGenerator::new(rng.gen_range(0..u16::MAX))
    }

    pub fn next_id(&self) -> u16 {
        let previous = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(successor(c)))
            .unwrap_or_else(|c| c);
        successor(previous)
    }
}

fn successor(id: u16) -> u16 {
    if id == u16::MAX {
        1
    } else {
        id + 1
    }
}
