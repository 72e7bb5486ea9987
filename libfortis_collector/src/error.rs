use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use super::channel::Channel;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PacketError {
    #[error("Packet of {0} bytes is too small to hold a header")]
    Undersized(usize),
    #[error("Packet of {0} bytes is larger than the TDC packet format")]
    Oversized(usize),
    #[error("Packet has an odd length of {0} bytes")]
    OddLength(usize),
    #[error("Packet contains {0} invalid code units")]
    InvalidCodeUnits(usize),
    #[error("Packet contains {0} surrogate pairs decoded as single values")]
    SurrogatePairs(usize),
    #[error("Packet claims {0} events but only has room for {1}")]
    TooManyEvents(u32, usize),
}

#[derive(Debug, Error)]
pub enum ChannelMapError {
    #[error("ChannelMap was given address {0} for more than one channel")]
    DuplicateAddress(SocketAddr),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has a receive buffer of {0} bytes; packets are {1} bytes")]
    BadBufferSize(usize, usize),
    #[error("Config has an invalid histogram for {0}: {1}")]
    BadHistogram(Channel, String),
    #[error("Config has an invalid timing value for {0}: {1}")]
    BadInterval(&'static str, f64),
    #[error("Config failed due to ChannelMap error: {0}")]
    MapError(#[from] ChannelMapError),
}

#[derive(Debug, Error)]
pub enum LogWriterError {
    #[error("LogWriter failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("LogWriter refused to append to existing non-empty log {0:?}")]
    ExistingLog(PathBuf),
    #[error("LogWriter could not parse record {0:?}")]
    BadRecord(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline failed to bind socket to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),
    #[error("Pipeline failed due to socket IO error: {0}")]
    SocketError(std::io::Error),
    #[error("Pipeline failed to persist events for {0}: {1}")]
    PersistError(Channel, LogWriterError),
    #[error("Pipeline failed due to LogWriter error: {0}")]
    LogWriterError(#[from] LogWriterError),
    #[error("Pipeline failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Pipeline failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}
