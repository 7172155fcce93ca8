//! Implementation of the AODV route discovery engine.
//!
//! Packets handed over by the link layer are decoded and admitted on the caller's thread, then
//! processed one at a time, in arrival order, by a single worker. The worker drives the route
//! table and the request table and sends through the external [`Transport`].
pub mod interfaces;
pub mod messages;
pub mod request_table;
pub mod route_table;
pub mod stats;

use self::interfaces::*;
use self::messages::*;
use self::request_table::{RequestIdGenerator, RequestTable, RequestTableCleaner};
use self::route_table::RouteTable;
use self::stats::{AodvStats, StatsSnapshot};
use crate::common::{self, Address};
use crate::config::Config;
use crate::logging::{self, MessageStatus};
use crate::{AodvError, AodvErrorKind};
use chrono::{Duration, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use slog::Logger;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Protocol number the engine registers under with the link layer.
pub const AODV_PROTOCOL_NUMBER: u8 = 110;
const RECEIVER_THREAD_NAME: &str = "AODVReceiver";

#[derive(Debug)]
enum QueueItem {
    Packet(AodvMessage, ArrivalInfo),
    Shutdown,
}

#[derive(Debug)]
struct Workers {
    receiver: JoinHandle<()>,
    cleaner: RequestTableCleaner,
}

/// Routing engine of one node.
#[derive(Debug)]
pub struct AODV {
    config: Config,
    route_table: RouteTable,
    request_table: Arc<RequestTable>,
    rreq_ids: RequestIdGenerator,
    sequence_number: AtomicU32,
    queue_tx: Sender<QueueItem>,
    queue_rx: Receiver<QueueItem>,
    listeners: Mutex<Vec<Arc<dyn RouteEventListener>>>,
    transport: Arc<dyn Transport>,
    stats: AodvStats,
    keep_running: AtomicBool,
    workers: Mutex<Option<Workers>>,
    logger: Logger,
}

impl AODV {
    /// Creates the engine and its tables. Nothing runs until [`AODV::start`] is called, or
    /// the host steps the engine with [`AODV::run_pending`].
    pub fn new(config: Config, transport: Arc<dyn Transport>, logger: Logger) -> Self {
        let logger = logger.new(o!("node" => config.local_address));
        let mut rng = common::rng_from_seed(config.random_seed);
        let (queue_tx, queue_rx) = unbounded();
        let request_table = RequestTable::new(
            config.local_address,
            config.request_grace_period,
            config.expiry_time_delta,
            logger.clone(),
        );

        AODV {
            config,
            route_table: RouteTable::new(logger.clone()),
            request_table: Arc::new(request_table),
            rreq_ids: RequestIdGenerator::random(&mut rng),
            sequence_number: AtomicU32::new(1),
            queue_tx,
            queue_rx,
            listeners: Mutex::new(Vec::new()),
            transport,
            stats: AodvStats::default(),
            keep_running: AtomicBool::new(false),
            workers: Mutex::new(None),
            logger,
        }
    }

    /// Registers the engine with the link layer and starts the worker and cleaner threads.
    pub fn start(engine: &Arc<AODV>, link: &dyn LinkLayer) -> Result<(), AodvError> {
        let mut workers = engine.workers.lock().expect("Could not lock worker handles");
        if workers.is_some() {
            let msg = String::from("The AODV engine is already running");
            return Err(AodvErrorKind::Contention(msg).into());
        }

        let handler: Arc<dyn ProtocolHandler> = Arc::clone(engine) as Arc<dyn ProtocolHandler>;
        link.register_protocol(AODV_PROTOCOL_NUMBER, handler)?;

        let cleaner = RequestTable::start_cleaner(&engine.request_table)?;
        engine.keep_running.store(true, Ordering::SeqCst);
        let thread_engine = Arc::clone(engine);
        let receiver = thread::Builder::new()
            .name(String::from(RECEIVER_THREAD_NAME))
            .spawn(move || thread_engine.receiver_loop());
        let receiver = match receiver {
            Ok(handle) => handle,
            Err(e) => {
                cleaner.stop();
                engine.keep_running.store(false, Ordering::SeqCst);
                let msg = String::from("Could not start the AODV receiver");
                return Err(AodvError::with_cause(AodvErrorKind::Contention(msg), e));
            }
        };

        *workers = Some(Workers { receiver, cleaner });
        info!(engine.logger, "Protocol initialized"; "protocol_number" => AODV_PROTOCOL_NUMBER);
        Ok(())
    }

    /// Stops the worker and cleaner threads and waits for them. Messages still queued stay
    /// queued and can be processed with [`AODV::run_pending`].
    pub fn stop(&self) {
        let workers = self
            .workers
            .lock()
            .expect("Could not lock worker handles")
            .take();
        if let Some(workers) = workers {
            self.keep_running.store(false, Ordering::SeqCst);
            let _ = self.queue_tx.send(QueueItem::Shutdown);
            let _ = workers.receiver.join();
            workers.cleaner.stop();
            info!(self.logger, "Protocol stopped"; self.stats());
        }
    }

    fn receiver_loop(&self) {
        while self.keep_running.load(Ordering::SeqCst) {
            match self.queue_rx.recv() {
                Ok(QueueItem::Packet(msg, info)) => self.handle_message(msg, &info),
                Ok(QueueItem::Shutdown) | Err(_) => break,
            }
        }
        debug!(self.logger, "Receiver finished");
    }

    /// Processes every queued message on the calling thread. Returns how many were handled.
    pub fn run_pending(&self) -> usize {
        let mut handled = 0;
        while let Ok(item) = self.queue_rx.try_recv() {
            if let QueueItem::Packet(msg, info) = item {
                self.handle_message(msg, &info);
                handled += 1;
            }
        }
        handled
    }

    /// Asks for a route to `destination`. The client is answered through
    /// [`RouteEventClient::route_found`], right away when the route is already known, or once
    /// the discovery completes or times out. Returns the ID of the route request sent, if any.
    pub fn request_route(
        &self,
        destination: Address,
        client: Arc<dyn RouteEventClient>,
        token: Option<RouteToken>,
    ) -> Option<u16> {
        let me = self.config.local_address;
        let known = if destination == me {
            RouteInfo::new(me, me, 0)
        } else {
            self.route_table.lookup(destination)
        };
        if known.is_valid() {
            debug!(self.logger, "Obtained route to {}", destination);
            self.stats.inc_routes_resolved();
            client.route_found(known, token);
            return None;
        }

        let request_id = self.rreq_ids.next_id();
        let expiry = Utc::now() + Duration::milliseconds(self.config.path_discovery_time);
        self.request_table
            .register(request_id, destination, me, expiry, Some(client), token);

        let request = RouteRequestMessage {
            originator: me,
            destination,
            request_id,
            hop_count: 0,
            dest_seq_num: self.route_table.sequence_number_for(destination),
            orig_seq_num: Some(self.next_sequence_number()),
        };
        info!(
            self.logger,
            "Initiated RREQ";
            "rreq_id" => request_id,
            "destination" => destination,
        );
        if self.forward(AodvMessage::RREQ(request)) {
            self.stats.inc_requests_forwarded();
        }
        Some(request_id)
    }

    /// Invalidates every route through `neighbor` after the link layer failed to reach it.
    /// Returns the destinations that became unreachable.
    pub fn report_link_failure(&self, neighbor: Address) -> Vec<Address> {
        let affected = self.route_table.deactivate_all_via(neighbor);
        warn!(
            self.logger,
            "Link to neighbour lost";
            "neighbor" => neighbor,
            "routes_lost" => affected.len(),
        );
        affected
    }

    pub fn lookup(&self, destination: Address) -> RouteInfo {
        self.route_table.lookup(destination)
    }

    pub fn add_listener(&self, listener: Arc<dyn RouteEventListener>) {
        self.listeners
            .lock()
            .expect("Could not lock listeners")
            .push(listener);
    }

    pub fn remove_listeners(&self) {
        self.listeners
            .lock()
            .expect("Could not lock listeners")
            .clear();
    }

    /// Current value of every counter.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            routes_not_found: self.request_table.timeouts_notified(),
            ..self.stats.snapshot()
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_address(&self) -> Address {
        self.config.local_address
    }

    pub fn route_table(&self) -> &RouteTable {
        &self.route_table
    }

    pub fn request_table(&self) -> &RequestTable {
        &self.request_table
    }

    /// Bumps this node's own sequence number, skipping the "unknown" value on wrap.
    fn next_sequence_number(&self) -> u32 {
        let previous = self
            .sequence_number
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                Some(s.checked_add(1).unwrap_or(1))
            })
            .unwrap_or_else(|s| s);
        previous.checked_add(1).unwrap_or(1)
    }

    fn notify_listeners<F>(&self, f: F)
    where
        F: Fn(&dyn RouteEventListener),
    {
        let listeners = self
            .listeners
            .lock()
            .expect("Could not lock listeners")
            .clone();
        for listener in listeners.iter() {
            f(listener.as_ref());
        }
    }

    fn forward(&self, msg: AodvMessage) -> bool {
        match self.transport.forward(msg) {
            Ok(()) => true,
            Err(e) => {
                error!(self.logger, "Failed to forward message"; "reason" => e.to_string());
                false
            }
        }
    }

    fn reply(&self, msg: AodvMessage) -> bool {
        match self.transport.reply(msg) {
            Ok(()) => true,
            Err(e) => {
                error!(self.logger, "Failed to send reply"; "reason" => e.to_string());
                false
            }
        }
    }

    fn handle_message(&self, msg: AodvMessage, info: &ArrivalInfo) {
        match msg {
            AodvMessage::RREQ(m) => self.process_route_request_msg(m, info.sender),
            AodvMessage::RREP(m) => self.process_route_response_msg(m, info.sender),
            AodvMessage::RERR(m) => self.process_route_err_msg(m, info.sender),
        }
    }

    fn process_route_request_msg(&self, mut msg: RouteRequestMessage, sender: Address) {
        self.notify_listeners(|l| l.on_request(msg.originator, msg.destination, msg.hop_count));
        let me = self.config.local_address;
        if msg.originator == me {
            logging::log_handle_message(
                &self.logger,
                sender,
                MessageStatus::DROPPED,
                Some("OWN_REQUEST"),
                None,
                &AodvMessage::RREQ(msg),
            );
            return;
        }

        let hop_count = match msg.hop_count.checked_add(1) {
            Some(hops) if hops <= self.config.net_diameter => hops,
            _ => {
                self.stats.inc_requests_ttl_expired();
                logging::log_handle_message(
                    &self.logger,
                    sender,
                    MessageStatus::DROPPED,
                    Some("NET_DIAMETER_EXCEEDED"),
                    None,
                    &AodvMessage::RREQ(msg),
                );
                return;
            }
        };
        msg.hop_count = hop_count;

        self.route_table.install_from_hop(sender, 1, None);
        self.route_table
            .install(msg.originator, sender, msg.hop_count, msg.orig_seq_num);

        //A fresher locally known sequence number replaces the carried one.
        let known = self.route_table.sequence_number_for(msg.destination);
        if known > msg.dest_seq_num {
            msg.dest_seq_num = known;
        }

        if msg.destination == me {
            let active =
                self.request_table
                    .has_active_request(msg.destination, msg.originator, Some(msg.request_id));
            if !active {
                logging::log_handle_message(
                    &self.logger,
                    sender,
                    MessageStatus::DROPPED,
                    Some("REQUEST_EXPIRED"),
                    None,
                    &AodvMessage::RREQ(msg),
                );
                return;
            }

            let own = self.sequence_number.load(Ordering::SeqCst);
            let dest_seq_num = std::cmp::max(Some(own), msg.dest_seq_num);
            if let Some(seq) = dest_seq_num {
                self.sequence_number.fetch_max(seq, Ordering::SeqCst);
            }
            let response = AodvMessage::RREP(RouteReplyMessage::from_request(&msg, dest_seq_num));
            logging::log_handle_message(
                &self.logger,
                sender,
                MessageStatus::ACCEPTED,
                Some("RREQ reached its destination"),
                Some("Route response process will be initiated"),
                &AodvMessage::RREQ(msg),
            );
            if self.reply(response) {
                self.stats.inc_replies_sent();
            }
            return;
        }

        if self.config.end_node {
            logging::log_handle_message(
                &self.logger,
                sender,
                MessageStatus::DROPPED,
                Some("END_NODE"),
                None,
                &AodvMessage::RREQ(msg),
            );
            return;
        }

        let msg = AodvMessage::RREQ(msg);
        logging::log_handle_message(
            &self.logger,
            sender,
            MessageStatus::FORWARDING,
            Some("No route to destination"),
            None,
            &msg,
        );
        if self.forward(msg) {
            self.stats.inc_requests_forwarded();
        }
    }

    fn process_route_response_msg(&self, mut msg: RouteReplyMessage, sender: Address) {
        self.notify_listeners(|l| l.on_reply(msg.originator, msg.destination, msg.hop_count));
        msg.hop_count = msg.hop_count.saturating_add(1);
        let me = self.config.local_address;

        if msg.is_neighbor_advertisement() {
            let msg = AodvMessage::RREP(msg);
            let installed = self.route_table.install_if_absent(sender, &msg);
            let reason = if installed {
                "Neighbour advertisement installed"
            } else {
                "Route already known"
            };
            logging::log_handle_message(
                &self.logger,
                sender,
                MessageStatus::ACCEPTED,
                Some(reason),
                None,
                &msg,
            );
            return;
        }

        if msg.originator == me {
            self.route_table.install_from_hop(sender, 1, None);
            let destination = msg.destination;
            let route = RouteInfo::new(destination, sender, msg.hop_count);
            let msg = AodvMessage::RREP(msg);
            if self.request_table.has_active_request(destination, me, None) {
                self.route_table.install_from_message(sender, &msg);
            }
            logging::log_handle_message(
                &self.logger,
                sender,
                MessageStatus::ACCEPTED,
                Some("RREP reached its originator"),
                None,
                &msg,
            );

            while let Some(resolved) = self.request_table.take_active(destination, me) {
                match resolved.client {
                    Some(client) => {
                        debug!(
                            self.logger,
                            "Route to {} resolved", destination;
                            "rreq_id" => resolved.request_id,
                        );
                        self.stats.inc_routes_resolved();
                        client.route_found(route, resolved.token);
                    }
                    None => {
                        warn!(
                            self.logger,
                            "Resolved request has no client";
                            "destination" => destination,
                            "originator" => me,
                            "rreq_id" => resolved.request_id,
                        );
                    }
                }
            }
            return;
        }

        let msg = AodvMessage::RREP(msg);
        if self.config.end_node {
            logging::log_handle_message(
                &self.logger,
                sender,
                MessageStatus::DROPPED,
                Some("END_NODE"),
                None,
                &msg,
            );
            return;
        }

        self.route_table.install_from_hop(sender, 1, None);
        self.route_table.install_from_message(sender, &msg);
        logging::log_handle_message(
            &self.logger,
            sender,
            MessageStatus::FORWARDING,
            None,
            None,
            &msg,
        );
        if self.forward(msg) {
            self.stats.inc_replies_forwarded();
        }
    }

    fn process_route_err_msg(&self, msg: RouteErrorMessage, sender: Address) {
        self.notify_listeners(|l| l.on_error(msg.originator, msg.destination));
        let me = self.config.local_address;
        self.route_table.deactivate(me, msg.destination);

        let mut msg = AodvMessage::RERR(msg);
        if msg.originator() == me {
            logging::log_handle_message(
                &self.logger,
                sender,
                MessageStatus::ACCEPTED,
                Some("RERR reached its originator"),
                None,
                &msg,
            );
            return;
        }

        self.route_table.deactivate(msg.originator(), msg.destination());
        msg.increment_hop_count();
        logging::log_handle_message(
            &self.logger,
            sender,
            MessageStatus::FORWARDING,
            None,
            None,
            &msg,
        );
        if self.forward(msg) {
            self.stats.inc_errors_forwarded();
        }
    }

    fn enqueue(&self, msg: AodvMessage, info: &ArrivalInfo) {
        debug!(
            self.logger,
            "Message queued";
            &msg,
            "source" => info.sender,
            "status" => MessageStatus::QUEUED,
        );
        //The receiving end lives as long as the engine.
        let _ = self.queue_tx.send(QueueItem::Packet(msg, *info));
    }
}

impl ProtocolHandler for AODV {
    fn on_incoming(&self, payload: &[u8], info: &ArrivalInfo) {
        let msg = match AodvMessage::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                self.stats.inc_malformed_packets();
                warn!(
                    self.logger,
                    "Bad packet";
                    "source" => info.sender,
                    "reason" => e.to_string(),
                );
                return;
            }
        };

        match msg {
            AodvMessage::RREQ(ref m) => {
                if self
                    .request_table
                    .has_request(m.destination, m.originator, m.request_id)
                {
                    self.stats.inc_requests_duplicate();
                    logging::log_handle_message(
                        &self.logger,
                        info.sender,
                        MessageStatus::DROPPED,
                        Some("DUPLICATE"),
                        None,
                        &msg,
                    );
                    return;
                }
                if self.queue_tx.len() >= self.config.max_requests_outstanding {
                    self.stats.inc_requests_queue_full();
                    logging::log_handle_message(
                        &self.logger,
                        info.sender,
                        MessageStatus::DROPPED,
                        Some("QUEUE_FULL"),
                        None,
                        &msg,
                    );
                    return;
                }
                let expiry = Utc::now() + Duration::milliseconds(self.config.path_discovery_time);
                //Another delivery thread may have admitted the same request meanwhile.
                if !self.request_table.register_if_absent(
                    m.request_id,
                    m.destination,
                    m.originator,
                    expiry,
                ) {
                    self.stats.inc_requests_duplicate();
                    logging::log_handle_message(
                        &self.logger,
                        info.sender,
                        MessageStatus::DROPPED,
                        Some("DUPLICATE"),
                        None,
                        &msg,
                    );
                    return;
                }
                self.stats.inc_requests_received();
            }
            AodvMessage::RREP(_) => self.stats.inc_replies_received(),
            AodvMessage::RERR(_) => self.stats.inc_errors_received(),
        }
        self.enqueue(msg, info);
    }
}
