// Wire format of the TDC boards. See the TDC manual for the byte layout:
// [n_events, packet_number, 0, x0, y0, p0, x1, y1, p1, ...] as little endian u16
pub const NOMINAL_PACKET_SIZE_BYTES: usize = 1458;
pub const CODE_UNIT_SIZE_BYTES: usize = 2;
pub const HEADER_CODE_UNITS: usize = 3;
pub const CODE_UNITS_PER_EVENT: usize = 3;
pub const MAX_EVENTS_PER_PACKET: usize = 242;

/// Value substituted for code units that do not form a valid UTF-16 sequence
pub const REPLACEMENT_VALUE: u32 = 0xFFFD;

// Receiving side
pub const DEFAULT_BIND_PORT: u16 = 60000;
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_RECV_TIMEOUT_SECS: f64 = 0.25;
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: f64 = 0.75;
/// Snapshots held for a subscriber that is not keeping up
pub const SNAPSHOT_QUEUE_DEPTH: usize = 4;

// The TDCs all transmit from the same port
pub const TDC_SOURCE_PORT: u16 = 62510;
pub const ZERO_ORDER_SOURCE_IP: [u8; 4] = [192, 168, 1, 10];
pub const PLUS_ONE_ORDER_SOURCE_IP: [u8; 4] = [192, 168, 1, 11];
pub const MINUS_ONE_ORDER_SOURCE_IP: [u8; 4] = [192, 168, 1, 12];

/// The detector digitizes positions to 14 bits
pub const DETECTOR_MAX_COORDINATE: f64 = 16383.0;
pub const DEFAULT_HISTOGRAM_BINS: usize = 355;

pub const LOG_FILE_EXTENSION: &str = "csv";
