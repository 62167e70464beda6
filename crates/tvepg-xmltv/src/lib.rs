//! XMLTV processing library for tvepg.
//!
//! Provides a lossless-enough XML tree, an XMLTV view over it, the
//! timestamp parser, the programme repair engine (rollover and `24:00:00`
//! fixes plus midnight split merging), multi-source merging and
//! UTC offset conversion.

mod error;
/// XMLTV document view (channels and programmes).
pub mod model;
/// Programme repair and midnight split merging.
pub mod repair;
/// `YYYYMMDDHHMMSS` timestamp validation and parsing.
pub mod timestamp;
/// UTC offset conversion of programme times.
pub mod tz;
/// Merging of several XMLTV sources into one document.
pub mod unify;
/// Generic XML element tree reader/writer.
pub mod xml;

pub use error::XmltvError;
pub use model::{Channel, ChannelDirectory, ChannelStats, Programme, XmltvDocument};
pub use repair::{RepairError, RepairOptions, RepairReport, repair_document};
pub use timestamp::{Timestamp, TimestampError, is_valid_timestamp, parse_timestamp};
