use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::time::{Duration, Instant};

use super::channel::Channel;
use super::channel_map::ChannelMap;
use super::channel_state::{ChannelState, RateUpdate};
use super::config::{today, Config};
use super::constants::SNAPSHOT_QUEUE_DEPTH;
use super::error::{LogWriterError, PacketError, PipelineError};
use super::log_writer::{records_from_packet, EventLogWriter, EventSink};
use super::packet::{decode_packet, DecodeMode, RawDatagram};
use super::snapshot::{AcquisitionSnapshot, ChannelSnapshot, ChannelSummary, RunSummary};

/// What the collector did with one datagram
#[derive(Debug, Clone, PartialEq)]
pub enum DatagramOutcome {
    /// Dropped by a strict decoder
    Rejected(PacketError),
    /// The source address is not bound to any channel
    Unattributed(SocketAddr),
    /// The packet carried no events
    Empty(Channel),
    /// Events were aggregated and persisted
    Processed {
        channel: Channel,
        records: usize,
        rate: RateUpdate,
    },
}

/// The processing half of the pipeline: decode, route, aggregate, persist.
///
/// Owns the state and the event sink of every channel. It never touches the network, so it
/// can be fed datagrams directly.
pub struct Collector {
    decode_mode: DecodeMode,
    channel_map: ChannelMap,
    states: Vec<ChannelState>,
    sinks: Vec<Box<dyn EventSink>>,
    subscribers: Vec<SyncSender<AcquisitionSnapshot>>,
    datagrams_total: u64,
    unattributed_total: u64,
    anomalies_total: u64,
}

impl Collector {
    /// Create a new Collector.
    ///
    /// `make_sink` is called once per channel, in [`Channel::ALL`] order, to open where
    /// that channel's events go.
    pub fn new<F>(config: &Config, mut make_sink: F) -> Result<Self, PipelineError>
    where
        F: FnMut(Channel) -> Result<Box<dyn EventSink>, LogWriterError>,
    {
        let channel_map = config.create_channel_map()?;
        let mut states = Vec::with_capacity(Channel::COUNT);
        let mut sinks = Vec::with_capacity(Channel::COUNT);
        for channel in Channel::ALL {
            states.push(ChannelState::new(channel, config.create_histogram(channel)));
            sinks.push(make_sink(channel)?);
        }
        Ok(Self {
            decode_mode: config.decode_mode,
            channel_map,
            states,
            sinks,
            subscribers: Vec::new(),
            datagrams_total: 0,
            unattributed_total: 0,
            anomalies_total: 0,
        })
    }

    /// Run one datagram through the pipeline.
    ///
    /// The source is checked before the payload, so a datagram from an unknown sender is
    /// counted as unattributed whatever it contains. Only a failure to persist events is an
    /// error; everything else is reported and the datagram is dropped.
    pub fn process_datagram(
        &mut self,
        datagram: &RawDatagram,
    ) -> Result<DatagramOutcome, PipelineError> {
        if self.datagrams_total == 0 {
            spdlog::info!("Server has begun receiving packets");
        }
        self.datagrams_total += 1;

        let channel = match self.channel_map.get_channel(&datagram.source) {
            Some(channel) => channel,
            None => {
                self.unattributed_total += 1;
                spdlog::warn!("Received datagram from unknown address {}", datagram.source);
                return Ok(DatagramOutcome::Unattributed(datagram.source));
            }
        };

        let packet = match decode_packet(datagram.payload, self.decode_mode) {
            Ok(packet) => packet,
            Err(e) => {
                self.anomalies_total += 1;
                spdlog::warn!("Dropped packet from {}: {}", datagram.source, e);
                return Ok(DatagramOutcome::Rejected(e));
            }
        };
        if packet.has_anomalies() {
            self.anomalies_total += packet.anomalies.len() as u64;
            for anomaly in packet.anomalies.iter() {
                spdlog::warn!(
                    "Packet {} from {}: {}",
                    packet.packet_number,
                    datagram.source,
                    anomaly
                );
            }
        }

        if packet.is_empty() {
            return Ok(DatagramOutcome::Empty(channel));
        }

        let state = &mut self.states[channel.index()];
        let outcome = state.aggregate(&packet, datagram.arrival_time);
        if let RateUpdate::DegenerateInterval(interval) = outcome.rate {
            spdlog::warn!(
                "{} packet {} arrived {} s after the previous one; rate not updated",
                channel,
                packet.packet_number,
                interval
            );
        }
        if outcome.out_of_domain > 0 {
            spdlog::debug!(
                "{} packet {} had {} events outside the histogram",
                channel,
                packet.packet_number,
                outcome.out_of_domain
            );
        }

        let records = records_from_packet(&packet, datagram.arrival_time);
        self.sinks[channel.index()]
            .append(&records)
            .map_err(|e| PipelineError::PersistError(channel, e))?;
        state.record_written(records.len());

        Ok(DatagramOutcome::Processed {
            channel,
            records: records.len(),
            rate: outcome.rate,
        })
    }

    /// Register a new snapshot subscriber.
    ///
    /// At most [`SNAPSHOT_QUEUE_DEPTH`] snapshots wait for a subscriber; while its queue is
    /// full, newer snapshots are skipped for it.
    pub fn subscribe(&mut self) -> Receiver<AcquisitionSnapshot> {
        let (tx, rx) = mpsc::sync_channel::<AcquisitionSnapshot>(SNAPSHOT_QUEUE_DEPTH);
        self.subscribers.push(tx);
        rx
    }

    /// Copy the current state of every channel
    pub fn snapshot(&self, elapsed: f64) -> AcquisitionSnapshot {
        AcquisitionSnapshot {
            elapsed,
            datagrams_total: self.datagrams_total,
            unattributed_total: self.unattributed_total,
            anomalies_total: self.anomalies_total,
            channels: self.states.iter().map(ChannelSnapshot::from).collect(),
        }
    }

    /// Send a snapshot to every subscriber. Subscribers that hung up are forgotten.
    pub fn publish(&mut self, elapsed: f64) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.snapshot(elapsed);
        self.subscribers.retain(|tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => {
                spdlog::info!("Snapshot subscriber disconnected");
                false
            }
        });
    }

    pub fn get_state(&self, channel: Channel) -> &ChannelState {
        &self.states[channel.index()]
    }

    pub fn summary(&self, elapsed: f64) -> RunSummary {
        RunSummary {
            elapsed,
            datagrams_total: self.datagrams_total,
            unattributed_total: self.unattributed_total,
            anomalies_total: self.anomalies_total,
            channels: self
                .states
                .iter()
                .zip(self.sinks.iter())
                .map(|(state, sink)| ChannelSummary {
                    channel: state.channel(),
                    destination: sink.describe(),
                    packets_total: state.packets_total(),
                    events_written_total: state.events_written_total(),
                    bytes_written: sink.bytes_written(),
                    last_rate: state.last_rate(),
                    histogram_total: state.histogram().total(),
                    out_of_domain: state.histogram().overflow(),
                    degenerate_intervals: state.degenerate_intervals(),
                })
                .collect(),
        }
    }
}

/// The acquisition loop.
///
/// Owns the socket and the [`Collector`]. All resources are released when the Pipeline is
/// dropped, whichever way [`Pipeline::run`] exits.
pub struct Pipeline {
    socket: UdpSocket,
    collector: Collector,
    buffer: Vec<u8>,
    start: Instant,
    snapshot_interval: Duration,
}

impl Pipeline {
    /// Bind the socket and open the three channel logs for run identifier `modifier`.
    pub fn new(config: &Config, modifier: &str) -> Result<Self, PipelineError> {
        config.validate()?;

        let socket = UdpSocket::bind(config.bind_address)
            .map_err(|e| PipelineError::BindError(config.bind_address, e))?;
        socket
            .set_read_timeout(Some(config.recv_timeout()))
            .map_err(PipelineError::SocketError)?;
        spdlog::info!("Socket created for {}", socket.local_addr()?);

        let date = today();
        std::fs::create_dir_all(config.get_log_directory(date))?;
        spdlog::info!(
            "Writing events with delimiter {:?} ({:?} for existing logs)",
            config.delimiter,
            config.existing_logs
        );
        let collector = Collector::new(config, |channel| {
            let path = config.get_log_path(channel, modifier, date);
            let writer = EventLogWriter::open(
                &path,
                config.delimiter,
                config.existing_logs,
                config.sync_to_disk,
            )?;
            spdlog::info!("{} events go to {}", channel, writer.path().to_string_lossy());
            Ok(Box::new(writer) as Box<dyn EventSink>)
        })?;
        for channel in Channel::ALL {
            if let Some(address) = collector.channel_map.get_address(&channel) {
                spdlog::info!("{} is bound to source {}", channel, address);
            }
        }

        Ok(Self {
            socket,
            collector,
            buffer: vec![0; config.recv_buffer_size],
            start: Instant::now(),
            snapshot_interval: config.snapshot_interval(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, PipelineError> {
        Ok(self.socket.local_addr()?)
    }

    /// Register a new snapshot subscriber
    pub fn subscribe(&mut self) -> Receiver<AcquisitionSnapshot> {
        self.collector.subscribe()
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Receive and process datagrams until `shutdown` is set.
    ///
    /// Snapshots are published every snapshot interval whether or not data is arriving.
    /// Returns the run summary, or the first fatal error.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<RunSummary, PipelineError> {
        self.start = Instant::now();
        let mut last_snapshot = self.start;
        spdlog::info!("Server is listening on {}", self.local_addr()?);

        while !shutdown.load(Ordering::Relaxed) {
            match self.socket.recv_from(&mut self.buffer) {
                Ok((size, source)) => {
                    let datagram = RawDatagram {
                        payload: &self.buffer[..size],
                        source,
                        arrival_time: self.start.elapsed().as_secs_f64(),
                    };
                    self.collector.process_datagram(&datagram)?;
                }
                // Read timeout; platforms disagree on the kind
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => (),
                Err(e)
                    if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::ConnectionReset) =>
                {
                    spdlog::warn!("Receive was interrupted: {}", e);
                }
                Err(e) => return Err(PipelineError::SocketError(e)),
            }

            if last_snapshot.elapsed() >= self.snapshot_interval {
                self.collector.publish(self.start.elapsed().as_secs_f64());
                last_snapshot = Instant::now();
            }
        }

        spdlog::info!("Shutdown requested, stopping acquisition");
        let elapsed = self.start.elapsed().as_secs_f64();
        self.collector.publish(elapsed);
        let summary = self.collector.summary(elapsed);
        for line in summary.to_string().lines() {
            spdlog::info!("{}", line);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_writer::{read_log, OutputRecord};
    use crate::packet::{encode_packet, PhotonEvent};
    use std::sync::{Arc, Mutex};

    /// Keeps records in memory, shared with the test
    struct MemorySink {
        records: Arc<Mutex<Vec<OutputRecord>>>,
        fail: bool,
    }

    impl EventSink for MemorySink {
        fn append(&mut self, records: &[OutputRecord]) -> Result<(), LogWriterError> {
            if self.fail {
                return Err(LogWriterError::IOError(std::io::Error::new(
                    ErrorKind::Other,
                    "disk full",
                )));
            }
            self.records.lock().unwrap().extend_from_slice(records);
            Ok(())
        }

        fn bytes_written(&self) -> u64 {
            0
        }

        fn describe(&self) -> String {
            String::from("memory")
        }
    }

    type SharedRecords = Vec<Arc<Mutex<Vec<OutputRecord>>>>;

    fn make_collector(config: &Config, fail: bool) -> (Collector, SharedRecords) {
        let mut shared: SharedRecords = Vec::new();
        let collector = Collector::new(config, |_| {
            let records = Arc::new(Mutex::new(Vec::new()));
            shared.push(records.clone());
            Ok(Box::new(MemorySink { records, fail }) as Box<dyn EventSink>)
        })
        .unwrap();
        (collector, shared)
    }

    fn events(coords: &[(u32, u32)]) -> Vec<PhotonEvent> {
        coords
            .iter()
            .map(|(x, y)| PhotonEvent {
                x: *x,
                y: *y,
                pulse_height: 42,
            })
            .collect()
    }

    fn address(channel: Channel) -> SocketAddr {
        Config::default().get_channel_config(channel).address
    }

    fn feed(
        collector: &mut Collector,
        source: SocketAddr,
        payload: &[u8],
        arrival_time: f64,
    ) -> DatagramOutcome {
        collector
            .process_datagram(&RawDatagram {
                payload,
                source,
                arrival_time,
            })
            .unwrap()
    }

    #[test]
    fn test_three_packet_scenario() {
        let mut config = Config::default();
        // Cover the whole detector so every coordinate lands in the histogram
        for channel in [
            &mut config.zero_order,
            &mut config.plus_one_order,
            &mut config.minus_one_order,
        ] {
            channel.x_range = crate::histogram::AxisRange::new(0.0, 16383.0);
            channel.y_range = crate::histogram::AxisRange::new(0.0, 16383.0);
        }
        let (mut collector, shared) = make_collector(&config, false);

        let zero = address(Channel::Zero);
        feed(
            &mut collector,
            zero,
            &encode_packet(1, &events(&[(100, 50), (200, 60)])),
            0.5,
        );
        feed(
            &mut collector,
            address(Channel::PlusOne),
            &encode_packet(1, &events(&[(300, 70)])),
            0.6,
        );
        let outcome = feed(
            &mut collector,
            zero,
            &encode_packet(2, &events(&[(150, 55)])),
            1.1,
        );

        match outcome {
            DatagramOutcome::Processed {
                channel: Channel::Zero,
                records: 1,
                rate: RateUpdate::Rate(rate),
            } => assert!((rate - 1.0 / 0.6).abs() < 1e-9),
            other => panic!("Unexpected outcome {other:?}"),
        }

        let zero_records = shared[Channel::Zero.index()].lock().unwrap();
        assert_eq!(zero_records.len(), 3);
        assert_eq!(zero_records[2].x, 150);
        assert_eq!(zero_records[2].timestamp, 1.1);
        assert_eq!(shared[Channel::PlusOne.index()].lock().unwrap().len(), 1);
        assert!(shared[Channel::MinusOne.index()].lock().unwrap().is_empty());

        let zero_state = collector.get_state(Channel::Zero);
        assert_eq!(zero_state.histogram().total(), 3);
        assert_eq!(
            zero_state.histogram().counts().iter().filter(|c| **c > 0).count(),
            3
        );
        assert_eq!(zero_state.events_written_total(), 3);
        assert_eq!(collector.get_state(Channel::MinusOne).packets_total(), 0);
    }

    #[test]
    fn test_unattributed_datagram_is_dropped() {
        let (mut collector, shared) = make_collector(&Config::default(), false);
        let stranger: SocketAddr = "192.168.1.99:62510".parse().unwrap();
        let outcome = feed(
            &mut collector,
            stranger,
            &encode_packet(5, &events(&[(5000, 5000)])),
            1.0,
        );
        assert_eq!(outcome, DatagramOutcome::Unattributed(stranger));
        for records in shared.iter() {
            assert!(records.lock().unwrap().is_empty());
        }
        for channel in Channel::ALL {
            let state = collector.get_state(channel);
            assert_eq!(state.previous_arrival(), None);
            assert_eq!(state.histogram().total(), 0);
        }
        assert_eq!(collector.summary(1.0).unattributed_total, 1);
    }

    #[test]
    fn test_malformed_datagram_from_unknown_sender() {
        let mut config = Config::default();
        config.decode_mode = DecodeMode::Strict;
        let (mut collector, _) = make_collector(&config, false);
        let stranger: SocketAddr = "10.0.0.7:62510".parse().unwrap();
        let outcome = feed(&mut collector, stranger, &[1, 0, 0], 1.0);
        assert_eq!(outcome, DatagramOutcome::Unattributed(stranger));
        let summary = collector.summary(1.0);
        assert_eq!(summary.unattributed_total, 1);
        assert_eq!(summary.anomalies_total, 0);
    }

    #[test]
    fn test_slow_subscriber_queue_is_bounded() {
        let (mut collector, _) = make_collector(&Config::default(), false);
        let rx = collector.subscribe();
        for i in 0..100 {
            collector.publish(i as f64);
        }
        // Still subscribed, but only the oldest snapshots were kept
        assert_eq!(collector.subscribers.len(), 1);
        let queued: Vec<AcquisitionSnapshot> = rx.try_iter().collect();
        assert_eq!(queued.len(), SNAPSHOT_QUEUE_DEPTH);
        assert_eq!(queued[0].elapsed, 0.0);

        // Draining makes room again
        collector.publish(100.0);
        assert_eq!(rx.try_recv().unwrap().elapsed, 100.0);
    }

    #[test]
    fn test_empty_packet_is_not_written() {
        let (mut collector, shared) = make_collector(&Config::default(), false);
        let outcome = feed(
            &mut collector,
            address(Channel::MinusOne),
            &encode_packet(5, &[]),
            1.0,
        );
        assert_eq!(outcome, DatagramOutcome::Empty(Channel::MinusOne));
        assert!(shared[Channel::MinusOne.index()].lock().unwrap().is_empty());
        assert_eq!(
            collector.get_state(Channel::MinusOne).previous_arrival(),
            None
        );
    }

    #[test]
    fn test_strict_mode_rejects_bad_packet() {
        let mut config = Config::default();
        config.decode_mode = DecodeMode::Strict;
        let (mut collector, shared) = make_collector(&config, false);
        let outcome = feed(&mut collector, address(Channel::Zero), &[1, 0, 0], 1.0);
        assert_eq!(outcome, DatagramOutcome::Rejected(PacketError::OddLength(3)));
        assert!(shared[Channel::Zero.index()].lock().unwrap().is_empty());
    }

    #[test]
    fn test_persist_failure_is_fatal() {
        let (mut collector, _) = make_collector(&Config::default(), true);
        let result = collector.process_datagram(&RawDatagram {
            payload: &encode_packet(1, &events(&[(5000, 5000)])),
            source: address(Channel::PlusOne),
            arrival_time: 1.0,
        });
        assert!(matches!(
            result,
            Err(PipelineError::PersistError(Channel::PlusOne, _))
        ));
    }

    #[test]
    fn test_snapshots_are_copies() {
        let (mut collector, _) = make_collector(&Config::default(), false);
        let rx = collector.subscribe();
        let dropped = collector.subscribe();
        drop(dropped);

        feed(
            &mut collector,
            address(Channel::Zero),
            &encode_packet(1, &events(&[(5000, 5000), (6000, 6000)])),
            2.0,
        );
        collector.publish(2.1);
        feed(
            &mut collector,
            address(Channel::Zero),
            &encode_packet(2, &events(&[(5000, 5000)])),
            3.0,
        );

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.elapsed, 2.1);
        assert_eq!(collector.subscribers.len(), 1);
        let zero = snapshot.get_channel(Channel::Zero).unwrap();
        assert_eq!(zero.rate, Some(1.0));
        assert_eq!(zero.events_total, 2);
        // Later packets do not reach an already published snapshot
        assert_eq!(zero.histogram.sum(), 2);
        assert_eq!(collector.get_state(Channel::Zero).histogram().total(), 3);
    }

    #[test]
    fn test_loopback_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

        let mut config = Config::default();
        config.bind_address = "127.0.0.1:0".parse().unwrap();
        config.output_path = dir.path().to_path_buf();
        config.date_folder = false;
        config.recv_timeout_secs = 0.05;
        config.snapshot_interval_secs = 0.05;
        config.sync_to_disk = false;
        config.zero_order.address = sender.local_addr().unwrap();

        let mut pipeline = Pipeline::new(&config, "loopback").unwrap();
        let target = pipeline.local_addr().unwrap();
        let snapshots = pipeline.subscribe();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = std::thread::spawn(move || pipeline.run(&flag));

        sender
            .send_to(&encode_packet(1, &events(&[(5000, 6000), (7000, 8000)])), target)
            .unwrap();
        sender.send_to(&encode_packet(2, &[]), target).unwrap();
        sender
            .send_to(&encode_packet(3, &events(&[(9000, 9000)])), target)
            .unwrap();

        let log_path = dir.path().join("Zero_loopback.csv");
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut records = Vec::new();
        while Instant::now() < deadline {
            if let Ok(read) = read_log(&log_path, config.delimiter) {
                records = read;
                if records.len() >= 3 {
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        shutdown.store(true, Ordering::Relaxed);
        let summary = handle.join().unwrap().unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].packet_number, 1);
        assert_eq!(records[1].y, 8000);
        assert_eq!(records[2].packet_number, 3);
        assert_eq!(summary.datagrams_total, 3);
        assert_eq!(summary.channels[Channel::Zero.index()].events_written_total, 3);
        assert!(dir.path().join("Pos1_loopback.csv").exists());
        assert!(dir.path().join("Neg1_loopback.csv").exists());
        // At least the final snapshot is always published
        assert!(snapshots.try_iter().count() >= 1);
    }
}
