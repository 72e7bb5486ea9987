use super::channel::Channel;
use super::histogram::Histogram2D;
use super::packet::DecodedPacket;

/// What happened to the rate estimate for one packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateUpdate {
    /// The packet had no events; nothing was touched
    NoEvents,
    /// A new instantaneous rate in counts/s
    Rate(f64),
    /// The time since the previous packet was zero or negative, so no rate was computed
    DegenerateInterval(f64),
}

/// Result of aggregating one packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateOutcome {
    pub rate: RateUpdate,
    pub binned: usize,
    pub out_of_domain: usize,
}

/// Accumulated state of one spectral order for the whole run.
///
/// Owned by the pipeline. Snapshots are taken by copying out of it.
#[derive(Debug, Clone)]
pub struct ChannelState {
    channel: Channel,
    previous_arrival: Option<f64>,
    last_rate: Option<f64>,
    histogram: Histogram2D,
    packets_total: u64,
    events_total: u64,
    events_written_total: u64,
    degenerate_intervals: u64,
}

impl ChannelState {
    pub fn new(channel: Channel, histogram: Histogram2D) -> Self {
        Self {
            channel,
            previous_arrival: None,
            last_rate: None,
            histogram,
            packets_total: 0,
            events_total: 0,
            events_written_total: 0,
            degenerate_intervals: 0,
        }
    }

    /// Update the rate estimate and the histogram with a packet that arrived at
    /// `arrival_time` seconds after the start of acquisition.
    ///
    /// The rate is the number of events over the time since this channel's previous
    /// packet, or since the start of acquisition for the first packet. An empty packet
    /// leaves everything untouched. A non-positive interval skips the rate but still bins
    /// the events.
    pub fn aggregate(&mut self, packet: &DecodedPacket, arrival_time: f64) -> AggregateOutcome {
        if packet.is_empty() {
            return AggregateOutcome {
                rate: RateUpdate::NoEvents,
                binned: 0,
                out_of_domain: 0,
            };
        }

        let interval = match self.previous_arrival {
            Some(previous) => arrival_time - previous,
            None => arrival_time,
        };
        let n_events = packet.events.len();
        let rate = if interval > 0.0 {
            let rate = n_events as f64 / interval;
            self.last_rate = Some(rate);
            RateUpdate::Rate(rate)
        } else {
            self.degenerate_intervals += 1;
            RateUpdate::DegenerateInterval(interval)
        };
        // Never move backwards in time, even for a reordered packet
        self.previous_arrival = Some(match self.previous_arrival {
            Some(previous) => previous.max(arrival_time),
            None => arrival_time,
        });

        let mut binned = 0;
        for event in packet.events.iter() {
            if self.histogram.fill(event.x as f64, event.y as f64) {
                binned += 1;
            }
        }

        self.packets_total += 1;
        self.events_total += n_events as u64;

        AggregateOutcome {
            rate,
            binned,
            out_of_domain: n_events - binned,
        }
    }

    /// Record that `n_records` events were persisted to the channel log
    pub fn record_written(&mut self, n_records: usize) {
        self.events_written_total += n_records as u64;
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn previous_arrival(&self) -> Option<f64> {
        self.previous_arrival
    }

    /// The most recent valid instantaneous rate
    pub fn last_rate(&self) -> Option<f64> {
        self.last_rate
    }

    pub fn histogram(&self) -> &Histogram2D {
        &self.histogram
    }

    pub fn packets_total(&self) -> u64 {
        self.packets_total
    }

    pub fn events_total(&self) -> u64 {
        self.events_total
    }

    pub fn events_written_total(&self) -> u64 {
        self.events_written_total
    }

    pub fn degenerate_intervals(&self) -> u64 {
        self.degenerate_intervals
    }
}
