//! The protocol state machine for one live data connection.
//!
//! All processing for a connection happens in a single task: inbound frames, timer ticks for
//!  ACKNACKs, gap persistence and gap expiration, the heartbeat timeout and shutdown requests are
//!  multiplexed in one `select!` loop. The station's [GapList] is only ever touched from inside
//!  that loop. Work that may take a while (sending with retries, persisting with retries) runs in
//!  background tasks that operate on snapshots, and that are aborted when the connection terminates.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio::{pin, select};
use tracing::{debug, info, instrument, trace, warn, Instrument, Span};

use crate::cd11::acknack::Acknack;
use crate::cd11::frame::{Cd11Frame, Cd11Payload, MalformedFrame};
use crate::cd11::frame_factory::{FrameFactory, DEFAULT_FRAME_SET};
use crate::cd11::option_exchange::OptionExchange;
use crate::config::ReceiverConfig;
use crate::dataman::connection::{FrameSender, InboundFrame};
use crate::dataman::rsdf::RawStationDataFrame;
use crate::dataman::sinks::{MalformedFrameSink, RsdfSink};
use crate::gaps::gap_list::GapList;
use crate::gaps::gap_store::GapPersistence;

/// upper bound for the final ALERT, the peer may not be reading any more
const ALERT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// The collaborators shared by all of a station's connections
#[derive(Clone)]
pub struct StationServices {
    pub config: Arc<ReceiverConfig>,
    pub rsdf_sink: Arc<dyn RsdfSink>,
    pub malformed_sink: Arc<dyn MalformedFrameSink>,
    pub gap_persistence: Arc<dyn GapPersistence>,
}

/// Why a data connection ended
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Termination {
    ConnectionLost,
    AlertReceived,
    ResetReceived,
    SequenceReset,
    ProtocolViolation,
    SendFailure,
    HeartbeatTimeout,
    Shutdown,
}
impl Termination {
    /// The peer is notified unless it initiated the termination or the connection is gone
    fn sends_alert(&self) -> bool {
        !matches!(self, Termination::ConnectionLost | Termination::AlertReceived | Termination::ResetReceived)
    }
}

/// Requests termination of a running [StationFrameHandler] from the outside
#[derive(Clone, Debug)]
pub struct StationFrameHandlerHandle {
    shutdown: mpsc::Sender<()>,
}
impl StationFrameHandlerHandle {
    /// Safe to call any number of times, also after the handler terminated
    pub fn shutdown(&self) {
        let _ = self.shutdown.try_send(());
    }
}

pub struct StationFrameHandler {
    station_name: String,
    port: u16,
    services: StationServices,
    frame_factory: FrameFactory,
    connection: Arc<dyn FrameSender>,
    inbound: mpsc::Receiver<InboundFrame>,
    shutdown: mpsc::Receiver<()>,
    /// the peer's frame set, latched from the first ACKNACK it sends
    frame_set: String,
    frame_set_latched: bool,
    background: JoinSet<()>,
}

impl StationFrameHandler {
    pub fn new(
        station_name: &str,
        port: u16,
        services: StationServices,
        connection: Arc<dyn FrameSender>,
        inbound: mpsc::Receiver<InboundFrame>,
    ) -> (StationFrameHandler, StationFrameHandlerHandle) {
        let (shutdown_send, shutdown_recv) = mpsc::channel(1);
        let frame_factory = FrameFactory::new(&services.config.responder_name, station_name);

        let handler = StationFrameHandler {
            station_name: station_name.to_string(),
            port,
            services,
            frame_factory,
            connection,
            inbound,
            shutdown: shutdown_recv,
            frame_set: DEFAULT_FRAME_SET.to_string(),
            frame_set_latched: false,
            background: JoinSet::new(),
        };
        (handler, StationFrameHandlerHandle { shutdown: shutdown_send })
    }

    /// Processes the connection until it terminates. The gap list is borrowed for the connection's
    ///  lifetime and stays with the caller afterwards, to be used for the station's next connection.
    #[instrument(name = "data_connection", skip_all, fields(station = %self.station_name, port = self.port))]
    pub async fn run(mut self, gap_list: &mut GapList) -> Termination {
        info!("data connection established");

        let config = self.services.config.clone();
        let heartbeat_duration = config.heartbeat_duration();
        let gap_expiration = config.gap_expiration();
        let expiration_period = gap_expiration.unwrap_or(Duration::from_secs(24 * 60 * 60));

        let start = Instant::now();
        let mut acknack_ticks = time::interval_at(start + config.acknack_interval(), config.acknack_interval());
        let mut persistence_ticks = time::interval_at(start + config.gap_storage_interval(), config.gap_storage_interval());
        let mut expiration_ticks = time::interval_at(start + expiration_period, expiration_period);

        let heartbeat_timeout = time::sleep(heartbeat_duration);
        pin!(heartbeat_timeout);

        let termination = loop {
            select! {
                inbound = self.inbound.recv() => {
                    let Some(inbound) = inbound else {
                        info!("connection closed");
                        break Termination::ConnectionLost;
                    };
                    heartbeat_timeout.as_mut().reset(Instant::now() + heartbeat_duration);
                    if let Some(termination) = self.on_inbound(inbound, gap_list).await {
                        break termination;
                    }
                }
                _ = acknack_ticks.tick() => {
                    self.send_acknack(gap_list);
                }
                _ = persistence_ticks.tick() => {
                    self.persist(gap_list);
                }
                _ = expiration_ticks.tick(), if gap_expiration.is_some() => {
                    gap_list.remove_expired_gaps(expiration_period);
                }
                _ = &mut heartbeat_timeout => {
                    warn!("no frames received for {:?}", heartbeat_duration);
                    break Termination::HeartbeatTimeout;
                }
                Some(()) = self.shutdown.recv() => {
                    info!("shutdown requested");
                    break Termination::Shutdown;
                }
                Some(_) = self.background.join_next() => {
                }
            }
        };

        self.terminate(termination).await;
        termination
    }

    async fn on_inbound(&mut self, inbound: InboundFrame, gap_list: &mut GapList) -> Option<Termination> {
        match inbound {
            Ok(frame) => self.on_frame(frame, gap_list).await,
            Err(malformed) => {
                self.on_malformed(malformed);
                None
            }
        }
    }

    async fn on_frame(&mut self, frame: Cd11Frame, gap_list: &mut GapList) -> Option<Termination> {
        let sequence_number = frame.sequence_number();
        trace!(sequence = sequence_number, "received {:?} frame", frame.frame_type());

        match &frame.payload {
            Cd11Payload::Reset(_) => {
                warn!("received RESET frame");
                self.reset_gap_state(gap_list).await;
                Some(Termination::ResetReceived)
            }
            Cd11Payload::Alert(alert) => {
                info!("received ALERT: {}", alert.message);
                Some(Termination::AlertReceived)
            }
            Cd11Payload::Acknack(acknack) => {
                self.on_acknack(acknack, gap_list).await
            }
            Cd11Payload::OptionRequest(request) => {
                self.on_option_request(request).await
            }
            Cd11Payload::CommandResponse(_) => {
                gap_list.process_sequence_number(sequence_number);
                None
            }
            Cd11Payload::Data(_) | Cd11Payload::CdOneEncapsulation(_) => {
                self.on_data(&frame, gap_list)
            }
            Cd11Payload::ConnectionRequest(_) | Cd11Payload::ConnectionResponse(_) | Cd11Payload::OptionResponse(_) => {
                warn!(sequence = sequence_number, "unexpected {:?} frame on a data connection", frame.frame_type());
                Some(Termination::ProtocolViolation)
            }
        }
    }

    async fn on_acknack(&mut self, acknack: &Acknack, gap_list: &mut GapList) -> Option<Termination> {
        if !self.frame_set_latched {
            debug!("using frame set {}", acknack.frame_set_acked);
            self.frame_set = acknack.frame_set_acked.clone();
            self.frame_set_latched = true;
        }

        if let Err(e) = gap_list.check_for_reset(acknack) {
            warn!("{}", e);
            self.reset_gap_state(gap_list).await;
            return Some(Termination::SequenceReset);
        }
        None
    }

    async fn on_option_request(&mut self, request: &OptionExchange) -> Option<Termination> {
        let response = self.frame_factory.option_response(request);
        let send_timeout = self.services.config.send_timeout();
        match time::timeout(send_timeout, self.connection.send(&response)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                warn!("error sending OPTION_RESPONSE: {}", e);
                Some(Termination::SendFailure)
            }
            Err(_) => {
                warn!("sending OPTION_RESPONSE did not complete within {:?}", send_timeout);
                Some(Termination::SendFailure)
            }
        }
    }

    fn on_data(&mut self, frame: &Cd11Frame, gap_list: &mut GapList) -> Option<Termination> {
        let sequence_number = frame.sequence_number();
        if frame.creator() != self.station_name {
            warn!(sequence = sequence_number, "data frame was created by {}", frame.creator());
            return Some(Termination::ProtocolViolation);
        }

        match RawStationDataFrame::from_frame(&self.station_name, frame, SystemTime::now()) {
            Ok(rsdf) => self.services.rsdf_sink.emit(rsdf, sequence_number),
            Err(e) => warn!(sequence = sequence_number, "error parsing data frame: {}", e),
        }
        gap_list.process_sequence_number(sequence_number);
        None
    }

    fn on_malformed(&self, mut malformed: MalformedFrame) {
        warn!("{}", malformed);

        let station = malformed.station.get_or_insert_with(|| self.station_name.clone());
        if *station != self.station_name {
            warn!("malformed frame on the connection of {} claims to be from {}", self.station_name, station);
        }
        self.services.malformed_sink.emit(malformed);
    }

    /// Clears persisted and in-memory gap state. Failing to clear the persisted state is logged
    ///  but does not prevent the in-memory reset.
    async fn reset_gap_state(&mut self, gap_list: &mut GapList) {
        // a persistence task still in flight would write back the old state
        self.background.abort_all();

        let persistence = self.services.gap_persistence.as_ref();
        let station_name = self.station_name.as_str();
        let policy = self.services.config.periodic_retry_policy();
        if let Err(e) = policy.retry("clearing gap state", move || persistence.clear(station_name)).await {
            warn!("{:#}", e);
        }

        gap_list.reset_gaps_list();
    }

    fn send_acknack(&mut self, gap_list: &GapList) {
        let acknack = self.frame_factory.acknack(&self.frame_set, gap_list);
        let connection = self.connection.clone();
        let policy = self.services.config.periodic_retry_policy();

        self.background.spawn(async move {
            // the heartbeat timeout takes care of connections that are really dead
            if let Err(e) = policy.retry("sending ACKNACK", || connection.send(&acknack)).await {
                warn!("{:#}", e);
            }
        }.instrument(Span::current()));
    }

    fn persist(&mut self, gap_list: &GapList) {
        let snapshot = gap_list.get_gap_list();
        let persistence = self.services.gap_persistence.clone();
        let station_name = self.station_name.clone();
        let policy = self.services.config.periodic_retry_policy();

        self.background.spawn(async move {
            if let Err(e) = policy.retry("persisting gap state", || persistence.persist(&station_name, &snapshot)).await {
                warn!("{:#} - trying again at the next interval", e);
            }
        }.instrument(Span::current()));
    }

    async fn terminate(&mut self, termination: Termination) {
        self.background.shutdown().await;

        if termination.sends_alert() {
            let alert = self.frame_factory.alert(&format!("Shutdown triggered for station {}", self.station_name));
            match time::timeout(ALERT_SEND_TIMEOUT, self.connection.send(&alert)).await {
                Ok(Ok(())) => debug!("sent ALERT"),
                Ok(Err(e)) => debug!("sending ALERT failed, the connection is likely severed already: {}", e),
                Err(_) => debug!("sending ALERT timed out"),
            }
        }

        self.connection.close().await;
        info!("data connection terminated: {:?}", termination);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use anyhow::anyhow;
    use crate::cd11::acknack::NO_SEQUENCE_NUMBER;
    use crate::cd11::frame_type::FrameType;
    use crate::dataman::connection::MockFrameSender;
    use crate::dataman::rsdf::SequencedRsdf;
    use crate::dataman::sinks::BoundedSink;
    use crate::gaps::gap_store::MockGapPersistence;
    use crate::test_util::frames::*;
    use crate::test_util::sender::TrackingFrameSender;
    use super::*;

    struct Fixture {
        inbound: mpsc::Sender<InboundFrame>,
        rsdf: mpsc::Receiver<SequencedRsdf>,
        malformed: mpsc::Receiver<MalformedFrame>,
    }

    fn test_config() -> ReceiverConfig {
        ReceiverConfig::default()
    }

    fn tolerant_persistence() -> MockGapPersistence {
        let mut persistence = MockGapPersistence::new();
        persistence.expect_persist().returning(|_, _| Ok(()));
        persistence.expect_clear().returning(|_| Ok(()));
        persistence
    }

    fn new_handler(config: ReceiverConfig, persistence: MockGapPersistence, sender: Arc<dyn FrameSender>) -> (StationFrameHandler, StationFrameHandlerHandle, Fixture) {
        let (rsdf_sink, rsdf) = BoundedSink::new("data frame", 16);
        let (malformed_sink, malformed) = BoundedSink::new("malformed frame", 16);
        let services = StationServices {
            config: Arc::new(config),
            rsdf_sink: Arc::new(rsdf_sink),
            malformed_sink: Arc::new(malformed_sink),
            gap_persistence: Arc::new(persistence),
        };
        let (inbound, inbound_recv) = mpsc::channel(16);
        let (handler, handle) = StationFrameHandler::new(TEST_STATION, 8100, services, sender, inbound_recv);
        (handler, handle, Fixture { inbound, rsdf, malformed })
    }

    fn spawn_handler(handler: StationFrameHandler, mut gap_list: GapList) -> tokio::task::JoinHandle<(Termination, GapList)> {
        tokio::spawn(async move {
            let termination = handler.run(&mut gap_list).await;
            (termination, gap_list)
        })
    }

    fn acknack_payload(frame: &Cd11Frame) -> Acknack {
        match &frame.payload {
            Cd11Payload::Acknack(acknack) => acknack.clone(),
            p => panic!("expected ACKNACK, was {:?}", p),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_dispatch() {
        let sender = TrackingFrameSender::new();
        let (handler, handle, mut fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let join = spawn_handler(handler, GapList::new());

        fixture.inbound.send(Ok(acknack_frame(0, "H04N:0", NO_SEQUENCE_NUMBER))).await.unwrap();
        fixture.inbound.send(Ok(option_request_frame(0))).await.unwrap();
        fixture.inbound.send(Ok(data_frame(0))).await.unwrap();
        fixture.inbound.send(Err(malformed_frame(None))).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(sender.num_sent(FrameType::OptionResponse), 1);
        assert_eq!(sender.num_sent(FrameType::Alert), 0);
        assert_eq!(sender.close_count(), 0);

        let emitted = fixture.rsdf.try_recv().unwrap();
        assert_eq!(emitted.sequence_number, 0);
        assert_eq!(emitted.rsdf.station_name, TEST_STATION);
        assert_eq!(emitted.rsdf.channel_names, vec!["H04N BHZ00".to_string()]);
        assert!(fixture.rsdf.try_recv().is_err());

        let malformed = fixture.malformed.try_recv().unwrap();
        assert_eq!(malformed.station.as_deref(), Some(TEST_STATION));
        assert!(fixture.malformed.try_recv().is_err());
        assert!(!join.is_finished());

        handle.shutdown();
        let (termination, gap_list) = join.await.unwrap();
        assert_eq!(termination, Termination::Shutdown);
        assert_eq!(gap_list.high_water_mark(), 1);
        assert_eq!(sender.num_sent(FrameType::Alert), 1);
        assert_eq!(sender.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_option_response_mirrors_request() {
        let sender = TrackingFrameSender::new();
        let (handler, handle, fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let join = spawn_handler(handler, GapList::new());

        let request = option_request_frame(3);
        fixture.inbound.send(Ok(request.clone())).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;

        let sent = sender.sent_frames();
        assert_eq!(sent.len(), 1);
        match (&sent[0].payload, &request.payload) {
            (Cd11Payload::OptionResponse(response), Cd11Payload::OptionRequest(request)) => assert_eq!(response, request),
            p => panic!("unexpected payloads {:?}", p),
        }
        assert_eq!(sent[0].header.frame_destination, TEST_STATION);

        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_sends_single_alert() {
        let sender = TrackingFrameSender::new();
        let (handler, _handle, _fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let start = Instant::now();

        let (termination, _) = spawn_handler(handler, GapList::new()).await.unwrap();

        assert_eq!(termination, Termination::HeartbeatTimeout);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
        assert_eq!(sender.num_sent(FrameType::Alert), 1);
        assert!(sender.num_sent(FrameType::Acknack) >= 1);
        assert_eq!(sender.close_count(), 1);

        match &sender.sent_frames().last().unwrap().payload {
            Cd11Payload::Alert(alert) => assert_eq!(alert.message, "Shutdown triggered for station H04N"),
            p => panic!("expected the ALERT to be sent last, was {:?}", p),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_traffic_postpones_heartbeat_timeout() {
        let sender = TrackingFrameSender::new();
        let (handler, _handle, fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let start = Instant::now();
        let join = spawn_handler(handler, GapList::new());

        time::sleep(Duration::from_secs(100)).await;
        fixture.inbound.send(Ok(command_response_frame(0))).await.unwrap();

        let (termination, gap_list) = join.await.unwrap();
        assert_eq!(termination, Termination::HeartbeatTimeout);
        assert_eq!(start.elapsed(), Duration::from_secs(220));
        assert_eq!(gap_list.high_water_mark(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_acknack_uses_latched_frame_set() {
        let sender = TrackingFrameSender::new();
        let (handler, handle, fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let join = spawn_handler(handler, GapList::new());

        fixture.inbound.send(Ok(data_frame(0))).await.unwrap();
        fixture.inbound.send(Ok(data_frame(4))).await.unwrap();
        fixture.inbound.send(Ok(acknack_frame(5, "H04N:1", 4))).await.unwrap();
        fixture.inbound.send(Ok(acknack_frame(6, "OTHER:2", 4))).await.unwrap();
        time::sleep(Duration::from_secs(56)).await;

        let acknacks = sender.sent_frames().iter()
            .filter(|f| f.frame_type() == FrameType::Acknack)
            .map(acknack_payload)
            .collect::<Vec<_>>();
        assert_eq!(acknacks.len(), 1);
        assert_eq!(acknacks[0].frame_set_acked, "H04N:1");
        assert_eq!(acknacks[0].lowest_seq_num, 0);
        assert_eq!(acknacks[0].highest_seq_num, 4);
        assert_eq!(acknacks[0].gaps, vec![(1, 4)]);

        handle.shutdown();
        join.await.unwrap();
    }

    #[rstest]
    #[case::without_gaps(vec![0, 1, 2], 0, 2)]
    #[case::with_gap(vec![2, 3, 7], 2, 7)]
    #[tokio::test(start_paused = true)]
    async fn test_periodic_acknack_reports_received_range(#[case] received: Vec<u64>, #[case] expected_lowest: u64, #[case] expected_highest: u64) {
        let sender = TrackingFrameSender::new();
        let (handler, handle, fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let join = spawn_handler(handler, GapList::new());

        for &seq in &received {
            fixture.inbound.send(Ok(data_frame(seq))).await.unwrap();
        }
        time::sleep(Duration::from_secs(56)).await;

        let acknack = sender.sent_frames().iter()
            .filter(|f| f.frame_type() == FrameType::Acknack)
            .map(acknack_payload)
            .last()
            .unwrap();
        assert_eq!(acknack.lowest_seq_num, expected_lowest);
        assert_eq!(acknack.highest_seq_num, expected_highest);
        assert!(acknack.lowest_seq_num <= acknack.highest_seq_num);
        assert!(received.contains(&acknack.lowest_seq_num));

        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknack_before_latching_uses_default_frame_set() {
        let sender = TrackingFrameSender::new();
        let (handler, handle, _fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let join = spawn_handler(handler, GapList::new());

        time::sleep(Duration::from_secs(56)).await;
        let acknack = acknack_payload(&sender.sent_frames()[0]);
        assert_eq!(acknack.frame_set_acked, DEFAULT_FRAME_SET);

        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_acknack_does_not_end_connection() {
        let mut sender = MockFrameSender::new();
        sender.expect_send()
            .withf(|frame| frame.frame_type() == FrameType::Acknack)
            .returning(|_| Err(anyhow!("broken pipe")));
        sender.expect_send()
            .withf(|frame| frame.frame_type() == FrameType::Alert)
            .times(1)
            .returning(|_| Ok(()));
        sender.expect_close()
            .times(1)
            .returning(|| ());

        let config = ReceiverConfig {
            heartbeat_secs: 3600,
            ..test_config()
        };
        let (handler, handle, fixture) = new_handler(config, tolerant_persistence(), Arc::new(sender));
        let join = spawn_handler(handler, GapList::new());

        time::sleep(Duration::from_secs(300)).await;
        fixture.inbound.send(Ok(data_frame(0))).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;
        assert!(!join.is_finished());

        handle.shutdown();
        let (termination, gap_list) = join.await.unwrap();
        assert_eq!(termination, Termination::Shutdown);
        assert_eq!(gap_list.high_water_mark(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_option_response_terminates() {
        let sender = TrackingFrameSender::new();
        sender.set_failing(true);
        let (handler, _handle, fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let join = spawn_handler(handler, GapList::new());

        fixture.inbound.send(Ok(option_request_frame(0))).await.unwrap();
        let (termination, _) = join.await.unwrap();

        assert_eq!(termination, Termination::SendFailure);
        // the OPTION_RESPONSE and the final ALERT
        assert_eq!(sender.send_attempts(), 2);
        assert_eq!(sender.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_option_response_terminates() {
        let sender = TrackingFrameSender::new();
        sender.set_stalled(true);
        let (handler, handle, fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let start = Instant::now();
        let join = spawn_handler(handler, GapList::new());

        fixture.inbound.send(Ok(option_request_frame(0))).await.unwrap();
        handle.shutdown();
        let (termination, _) = join.await.unwrap();

        assert_eq!(termination, Termination::SendFailure);
        // send timeout for the OPTION_RESPONSE plus the ALERT timeout
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert_eq!(sender.send_attempts(), 2);
        assert_eq!(sender.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_alert_terminates_without_reply() {
        let sender = TrackingFrameSender::new();
        let (handler, _handle, fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let join = spawn_handler(handler, GapList::new());

        fixture.inbound.send(Ok(alert_frame(0))).await.unwrap();
        let (termination, _) = join.await.unwrap();

        assert_eq!(termination, Termination::AlertReceived);
        assert!(sender.sent_frames().is_empty());
        assert_eq!(sender.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_gap_state() {
        let mut persistence = MockGapPersistence::new();
        persistence.expect_clear()
            .withf(|station| station == TEST_STATION)
            .times(1)
            .returning(|_| Ok(()));

        let sender = TrackingFrameSender::new();
        let (handler, _handle, fixture) = new_handler(test_config(), persistence, sender.clone());

        let mut gap_list = GapList::new();
        gap_list.process_sequence_number(0);
        gap_list.process_sequence_number(9);
        let join = spawn_handler(handler, gap_list);

        fixture.inbound.send(Ok(reset_frame(10))).await.unwrap();
        let (termination, gap_list) = join.await.unwrap();

        assert_eq!(termination, Termination::ResetReceived);
        assert_eq!(gap_list, GapList::new());
        assert!(sender.sent_frames().is_empty());
        assert_eq!(sender.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_proceeds_when_clearing_fails() {
        let mut persistence = MockGapPersistence::new();
        persistence.expect_clear()
            .times(10)
            .returning(|_| Err(anyhow!("store unavailable")));

        let sender = TrackingFrameSender::new();
        let (handler, _handle, fixture) = new_handler(test_config(), persistence, sender.clone());

        let mut gap_list = GapList::new();
        gap_list.process_sequence_number(5);
        let join = spawn_handler(handler, gap_list);

        fixture.inbound.send(Ok(reset_frame(6))).await.unwrap();
        let (termination, gap_list) = join.await.unwrap();

        assert_eq!(termination, Termination::ResetReceived);
        assert_eq!(gap_list, GapList::new());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_sequence_reset_terminates() {
        let mut persistence = MockGapPersistence::new();
        persistence.expect_clear()
            .times(1)
            .returning(|_| Ok(()));

        let sender = TrackingFrameSender::new();
        let (handler, _handle, fixture) = new_handler(test_config(), persistence, sender.clone());

        let mut gap_list = GapList::new();
        gap_list.process_sequence_number(100);
        let join = spawn_handler(handler, gap_list);

        fixture.inbound.send(Ok(acknack_frame(3, "H04N:0", 3))).await.unwrap();
        let (termination, gap_list) = join.await.unwrap();

        assert_eq!(termination, Termination::SequenceReset);
        assert!(gap_list.is_empty());
        assert_eq!(sender.num_sent(FrameType::Alert), 1);
        assert_eq!(sender.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_from_other_station_is_a_protocol_violation() {
        let sender = TrackingFrameSender::new();
        let (handler, _handle, mut fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let join = spawn_handler(handler, GapList::new());

        let mut frame = data_frame(0);
        frame.header.frame_creator = "H04S".to_string();
        fixture.inbound.send(Ok(frame)).await.unwrap();
        let (termination, gap_list) = join.await.unwrap();

        assert_eq!(termination, Termination::ProtocolViolation);
        assert!(gap_list.is_empty());
        assert!(fixture.rsdf.try_recv().is_err());
        assert_eq!(sender.num_sent(FrameType::Alert), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_keeps_reported_station() {
        let sender = TrackingFrameSender::new();
        let (handler, handle, mut fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let join = spawn_handler(handler, GapList::new());

        fixture.inbound.send(Err(malformed_frame(Some("H04S")))).await.unwrap();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fixture.malformed.try_recv().unwrap().station.as_deref(), Some("H04S"));

        handle.shutdown();
        handle.shutdown();
        let (termination, _) = join.await.unwrap();
        assert_eq!(termination, Termination::Shutdown);
        assert_eq!(sender.num_sent(FrameType::Alert), 1);
        handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_lost() {
        let sender = TrackingFrameSender::new();
        let (handler, _handle, fixture) = new_handler(test_config(), tolerant_persistence(), sender.clone());
        let join = spawn_handler(handler, GapList::new());

        fixture.inbound.send(Ok(data_frame(0))).await.unwrap();
        drop(fixture);
        let (termination, gap_list) = join.await.unwrap();

        assert_eq!(termination, Termination::ConnectionLost);
        assert_eq!(gap_list.high_water_mark(), 1);
        assert!(sender.sent_frames().is_empty());
        assert_eq!(sender.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_state_is_persisted_periodically() {
        let mut persistence = MockGapPersistence::new();
        persistence.expect_persist()
            .withf(|station, gap_list| station == TEST_STATION && gap_list.gap_ranges() == vec![(1, 3)])
            .times(2)
            .returning(|_, _| Ok(()));

        let config = ReceiverConfig {
            heartbeat_secs: 3600,
            ..test_config()
        };
        let (handler, handle, fixture) = new_handler(config, persistence, TrackingFrameSender::new());
        let join = spawn_handler(handler, GapList::new());

        fixture.inbound.send(Ok(data_frame(0))).await.unwrap();
        fixture.inbound.send(Ok(data_frame(3))).await.unwrap();
        time::sleep(Duration::from_secs(10 * 60 + 30)).await;

        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_gaps_expire_periodically() {
        let config = ReceiverConfig {
            heartbeat_secs: 10 * 24 * 60 * 60,
            gap_storage_interval_minutes: 24 * 60,
            gap_expiration_days: 1,
            ..test_config()
        };
        let (handler, handle, _fixture) = new_handler(config, tolerant_persistence(), TrackingFrameSender::new());

        let two_days_ago = SystemTime::now() - Duration::from_secs(2 * 24 * 60 * 60);
        let mut gap_list = GapList::new();
        gap_list.process_sequence_number_at(0, two_days_ago);
        gap_list.process_sequence_number_at(5, two_days_ago);
        let join = spawn_handler(handler, gap_list);

        time::sleep(Duration::from_secs(24 * 60 * 60 + 1)).await;
        handle.shutdown();
        let (_, gap_list) = join.await.unwrap();

        assert_eq!(gap_list.num_gaps(), 0);
        assert_eq!(gap_list.abandoned(), 4);
    }
}
