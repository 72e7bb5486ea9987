use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::channel::Channel;
use super::channel_map::ChannelMap;
use super::constants::*;
use super::error::ConfigError;
use super::histogram::{AxisRange, Histogram2D};
use super::log_writer::{Delimiter, ExistingLogPolicy};
use super::packet::DecodeMode;

/// Source address and histogram binning of one spectral order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub address: SocketAddr,
    pub x_range: AxisRange,
    pub y_range: AxisRange,
    pub x_bins: usize,
    pub y_bins: usize,
}

impl ChannelConfig {
    fn new(ip: [u8; 4], x_range: (f64, f64), y_range: (f64, f64)) -> Self {
        Self {
            address: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(ip), TDC_SOURCE_PORT)),
            x_range: AxisRange::new(x_range.0, x_range.1),
            y_range: AxisRange::new(y_range.0, y_range.1),
            x_bins: DEFAULT_HISTOGRAM_BINS,
            y_bins: DEFAULT_HISTOGRAM_BINS,
        }
    }

    fn validate(&self, channel: Channel) -> Result<(), ConfigError> {
        for (name, range) in [("x", &self.x_range), ("y", &self.y_range)] {
            if !(range.min.is_finite() && range.max.is_finite() && range.width() > 0.0) {
                return Err(ConfigError::BadHistogram(
                    channel,
                    format!("{name} range [{}, {}] is empty", range.min, range.max),
                ));
            }
            if range.min < 0.0 || range.max > DETECTOR_MAX_COORDINATE {
                spdlog::warn!(
                    "{channel} {name} range [{}, {}] extends past the detector",
                    range.min,
                    range.max
                );
            }
        }
        if self.x_bins == 0 || self.y_bins == 0 {
            return Err(ConfigError::BadHistogram(
                channel,
                String::from("bin counts must be nonzero"),
            ));
        }
        Ok(())
    }
}

/// Structure representing the application configuration. Contains networking, output and
/// histogram information.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub recv_buffer_size: usize,
    pub recv_timeout_secs: f64,
    pub snapshot_interval_secs: f64,
    pub output_path: PathBuf,
    pub date_folder: bool,
    pub delimiter: Delimiter,
    pub decode_mode: DecodeMode,
    pub existing_logs: ExistingLogPolicy,
    pub sync_to_disk: bool,
    pub zero_order: ChannelConfig,
    pub plus_one_order: ChannelConfig,
    pub minus_one_order: ChannelConfig,
}

impl Default for Config {
    /// Generate the configuration of the flight hardware
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                DEFAULT_BIND_PORT,
            )),
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            recv_timeout_secs: DEFAULT_RECV_TIMEOUT_SECS,
            snapshot_interval_secs: DEFAULT_SNAPSHOT_INTERVAL_SECS,
            output_path: PathBuf::from("."),
            date_folder: true,
            delimiter: Delimiter::Comma,
            decode_mode: DecodeMode::BestEffort,
            existing_logs: ExistingLogPolicy::Append,
            sync_to_disk: true,
            zero_order: ChannelConfig::new(
                ZERO_ORDER_SOURCE_IP,
                (1300.0, 13500.0),
                (1750.0, 13090.0),
            ),
            plus_one_order: ChannelConfig::new(
                PLUS_ONE_ORDER_SOURCE_IP,
                (1700.0, 13800.0),
                (2100.0, 13090.0),
            ),
            minus_one_order: ChannelConfig::new(
                MINUS_ONE_ORDER_SOURCE_IP,
                (1900.0, 13400.0),
                (2100.0, 13090.0),
            ),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Check that the configuration describes a usable acquisition
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recv_buffer_size < NOMINAL_PACKET_SIZE_BYTES {
            return Err(ConfigError::BadBufferSize(
                self.recv_buffer_size,
                NOMINAL_PACKET_SIZE_BYTES,
            ));
        }
        for (name, value) in [
            ("recv_timeout_secs", self.recv_timeout_secs),
            ("snapshot_interval_secs", self.snapshot_interval_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::BadInterval(name, value));
            }
        }
        for channel in Channel::ALL {
            self.get_channel_config(channel).validate(channel)?;
        }
        self.create_channel_map()?;
        Ok(())
    }

    pub fn get_channel_config(&self, channel: Channel) -> &ChannelConfig {
        match channel {
            Channel::Zero => &self.zero_order,
            Channel::PlusOne => &self.plus_one_order,
            Channel::MinusOne => &self.minus_one_order,
        }
    }

    /// Build the address to channel lookup
    pub fn create_channel_map(&self) -> Result<ChannelMap, ConfigError> {
        let bindings: Vec<(SocketAddr, Channel)> = Channel::ALL
            .iter()
            .map(|channel| (self.get_channel_config(*channel).address, *channel))
            .collect();
        Ok(ChannelMap::new(&bindings)?)
    }

    /// Build an empty histogram with the binning of a channel
    pub fn create_histogram(&self, channel: Channel) -> Histogram2D {
        let conf = self.get_channel_config(channel);
        Histogram2D::new(conf.x_range, conf.x_bins, conf.y_range, conf.y_bins)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.recv_timeout_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs_f64(self.snapshot_interval_secs)
    }

    /// Get the directory the channel logs go in, using the date folder format YYYY-MM-DD
    pub fn get_log_directory(&self, date: time::Date) -> PathBuf {
        if self.date_folder {
            self.output_path.join(date.to_string())
        } else {
            self.output_path.clone()
        }
    }

    /// Get the path to the log of a channel for a given run identifier
    pub fn get_log_path(&self, channel: Channel, modifier: &str, date: time::Date) -> PathBuf {
        self.get_log_directory(date).join(format!(
            "{}_{}.{}",
            channel.file_prefix(),
            modifier,
            LOG_FILE_EXTENSION
        ))
    }
}

/// The local date, falling back to UTC if the local offset can't be determined
pub fn today() -> time::Date {
    time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .date()
}
