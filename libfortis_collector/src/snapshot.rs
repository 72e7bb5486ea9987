use ndarray::Array2;
use std::fmt::Display;

use super::channel::Channel;
use super::channel_state::ChannelState;

/// Point-in-time copy of one channel's accumulated state.
///
/// Holds its own copy of the histogram, so it can be handed to another thread while the
/// pipeline keeps filling the live one.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub channel: Channel,
    pub rate: Option<f64>,
    pub last_arrival: Option<f64>,
    pub packets_total: u64,
    pub events_total: u64,
    pub events_written_total: u64,
    pub degenerate_intervals: u64,
    pub histogram: Array2<u64>,
    pub x_edges: Vec<f64>,
    pub y_edges: Vec<f64>,
}

impl From<&ChannelState> for ChannelSnapshot {
    fn from(state: &ChannelState) -> Self {
        Self {
            channel: state.channel(),
            rate: state.last_rate(),
            last_arrival: state.previous_arrival(),
            packets_total: state.packets_total(),
            events_total: state.events_total(),
            events_written_total: state.events_written_total(),
            degenerate_intervals: state.degenerate_intervals(),
            histogram: state.histogram().counts().clone(),
            x_edges: state.histogram().x_edges(),
            y_edges: state.histogram().y_edges(),
        }
    }
}

/// Snapshot of the whole acquisition, published on a fixed cadence
#[derive(Debug, Clone)]
pub struct AcquisitionSnapshot {
    /// Seconds since the start of acquisition
    pub elapsed: f64,
    pub datagrams_total: u64,
    pub unattributed_total: u64,
    pub anomalies_total: u64,
    pub channels: Vec<ChannelSnapshot>,
}

impl AcquisitionSnapshot {
    pub fn get_channel(&self, channel: Channel) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| c.channel == channel)
    }
}

/// Final accounting of one channel at the end of a run
#[derive(Debug, Clone)]
pub struct ChannelSummary {
    pub channel: Channel,
    pub destination: String,
    pub packets_total: u64,
    pub events_written_total: u64,
    pub bytes_written: u64,
    pub last_rate: Option<f64>,
    pub histogram_total: u64,
    pub out_of_domain: u64,
    pub degenerate_intervals: u64,
}

/// Final accounting of a run, reported when the pipeline stops
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elapsed: f64,
    pub datagrams_total: u64,
    pub unattributed_total: u64,
    pub anomalies_total: u64,
    pub channels: Vec<ChannelSummary>,
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Run lasted {:.1} seconds: {} datagrams, {} unattributed, {} decode anomalies",
            self.elapsed, self.datagrams_total, self.unattributed_total, self.anomalies_total
        )?;
        for channel in self.channels.iter() {
            let rate = match channel.last_rate {
                Some(rate) => format!("{rate:.0} counts/s"),
                None => String::from("no rate"),
            };
            writeln!(
                f,
                "{}: {} packets, {} events ({}) written to {}, last rate {}, {} in histogram, {} out of range",
                channel.channel,
                channel.packets_total,
                channel.events_written_total,
                human_bytes::human_bytes(channel.bytes_written as f64),
                channel.destination,
                rate,
                channel.histogram_total,
                channel.out_of_domain,
            )?;
        }
        Ok(())
    }
}
