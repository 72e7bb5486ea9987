//! # fortis_collector
//!
//! fortis_collector is the ground-side data acquisition for the OAxFORTIS sounding rocket
//! spectrograph, written in Rust. It listens for the UDP packets streamed by the three
//! time-to-digital converter (TDC) boards, one per spectral order (zero, +1 and -1),
//! decodes them into photon events, and writes every event to a per-order log file as it
//! arrives. While running it keeps a 2D position histogram and an instantaneous count rate
//! for each order, published as snapshots for live displays.
//!
//! ## Building & Install
//!
//! To build and install the CLI use `cargo install --path ./fortis_collector_cli` from
//! the top level repository. See the `fortis_collector_cli` crate for usage.
//!
//! ## Running
//!
//! The TDC boards and the network switch must already be powered and connected, or the
//! socket will have nothing to listen to. The switch takes ~15 s to boot after power up.
//! Once the socket is created the log will say the server is listening; the first packet
//! is announced with "Server has begun receiving packets". Ctrl+C stops acquisition and
//! closes all files.
//!
//! ## Configuration
//!
//! Configurations are YAML files (see [`config::Config`]). A template with the flight
//! defaults can be generated with the CLI `new` command. The format is:
//!
//! ```yml
//! bind_address: 0.0.0.0:60000
//! recv_buffer_size: 4096
//! recv_timeout_secs: 0.25
//! snapshot_interval_secs: 0.75
//! output_path: .
//! date_folder: true
//! delimiter: comma
//! decode_mode: best_effort
//! existing_logs: append
//! sync_to_disk: true
//! zero_order:
//!   address: 192.168.1.10:62510
//!   x_range:
//!     min: 1300.0
//!     max: 13500.0
//!   y_range:
//!     min: 1750.0
//!     max: 13090.0
//!   x_bins: 355
//!   y_bins: 355
//! plus_one_order:
//!   ...
//! minus_one_order:
//!   ...
//! ```
//!
//! - `delimiter`: `comma` or `tab`. Fixed for a run. Do not concatenate logs written with
//! different delimiters.
//! - `decode_mode`: `best_effort` substitutes 65533 for code units that do not decode, as
//! the TDC stream has always been read; `strict` drops such packets instead.
//! - `existing_logs`: `append` keeps writing into logs left by an earlier run with the same
//! identifier (a warning is logged, the runs interleave in one file); `refuse` stops at
//! startup instead.
//!
//! ## Packet Format
//!
//! Each TDC packet is 1458 bytes, read as 729 little endian 16-bit values:
//!
//! ```text
//! n_events, packet_number, 0, x0, y0, p0, x1, y1, p1, ...
//! ```
//!
//! A packet holds at most 242 events. Packets are sent at least about once a second even
//! when no photons arrive, and every packet is the same size; the values after the first
//! `n_events` triples are filler and are discarded.
//!
//! ## Output
//!
//! Three logs are written, optionally inside a `YYYY-MM-DD` folder:
//!
//! ```text
//! Zero_<modifier>.csv
//! Pos1_<modifier>.csv
//! Neg1_<modifier>.csv
//! ```
//!
//! with one row per photon and no header:
//!
//! ```text
//! packet_number, time_since_start_s, x, y, pulse_height, n_events_in_packet
//! ```
//!
//! Logs are flushed after every packet, so they can be watched with `tail -f` during a run.
pub mod channel;
pub mod channel_map;
pub mod channel_state;
pub mod config;
pub mod constants;
pub mod error;
pub mod histogram;
pub mod log_writer;
pub mod packet;
pub mod pipeline;
pub mod snapshot;
