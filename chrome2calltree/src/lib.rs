//! Convert V8 CPU profiles to Callgrind format.
//!
//! The output can be opened in KCachegrind, QCachegrind and other Callgrind
//! viewers.
//!
//! # Pipeline
//!
//! - [`profile`] - Decode nested, flat and trace-shaped profiles
//! - [`normalize`] - Compute per-node self and total timings
//! - [`aggregate`] - Merge nodes into one record per call identity
//! - [`emit`] - Write the call graph as Callgrind text
//!
//! [`convert()`] runs the three stages in order.
//!
//! # Example
//!
//! ```no_run
//! use chrome2calltree::{Converter, ConverterConfig};
//! use chrome2calltree::profile::TimeUnit;
//! use std::fs::File;
//! use std::io::{BufReader, BufWriter};
//!
//! let input = BufReader::new(File::open("app.cpuprofile").unwrap());
//! let output = BufWriter::new(File::create("app.callgrind").unwrap());
//!
//! let converter = Converter::with_config(ConverterConfig {
//!     time_unit: TimeUnit::Microseconds,
//!     ..ConverterConfig::default()
//! });
//! converter.convert_reader(input, output).unwrap();
//! ```

pub mod aggregate;
pub mod convert;
pub mod emit;
mod error;
pub mod input;
pub mod normalize;
pub mod profile;

pub use convert::{Converter, ConverterConfig, convert};
pub use error::{ConvertError, Result};

// Re-export callgrind_parse for convenience
pub use callgrind_parse;
