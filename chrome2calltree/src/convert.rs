//! The conversion pipeline: normalize, aggregate, emit.

use crate::aggregate::aggregate;
use crate::emit::emit;
use crate::error::Result;
use crate::normalize::normalize;
use crate::profile::{Profile, ProfileShape, TimeUnit};
use std::io::{Read, Write};

/// Converter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterConfig {
    /// Unit of the raw `startTime` / `endTime` fields.
    pub time_unit: TimeUnit,
    /// Normalize a clone and leave the caller's profile untouched.
    pub copy_input: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            time_unit: TimeUnit::Seconds,
            copy_input: true,
        }
    }
}

/// Converter from CPU profiles to Callgrind format.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    config: ConverterConfig,
}

impl Converter {
    /// Create a converter with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ConverterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Decode a profile of any supported shape.
    pub fn parse<R: Read>(&self, reader: R) -> Result<Profile> {
        Profile::from_json(reader, self.config.time_unit)
    }

    /// Decode a profile and report which input shape it had.
    pub fn parse_detected<R: Read>(&self, reader: R) -> Result<(ProfileShape, Profile)> {
        Profile::from_json_detected(reader, self.config.time_unit)
    }

    /// Convert `profile` and write Callgrind text to `sink`.
    pub fn convert<W: Write>(&self, profile: &mut Profile, sink: W) -> Result<()> {
        convert(profile, sink, self.config.copy_input)
    }

    /// Decode a JSON profile from `reader` and write it to `sink`.
    pub fn convert_reader<R: Read, W: Write>(&self, reader: R, sink: W) -> Result<()> {
        let mut profile = self.parse(reader)?;
        // The decoded profile is ours, no need to copy it
        convert(&mut profile, sink, false)
    }
}

/// Convert `profile` and write Callgrind text to `sink`.
///
/// With `copy_input` the pipeline runs on a clone and `profile` is left as
/// it was; without it, `profile` keeps the node timings and totals computed
/// during normalization.
pub fn convert<W: Write>(profile: &mut Profile, sink: W, copy_input: bool) -> Result<()> {
    if copy_input {
        let mut timed = profile.clone();
        run(&mut timed, sink)
    } else {
        run(profile, sink)
    }
}

fn run<W: Write>(profile: &mut Profile, sink: W) -> Result<()> {
    normalize(profile)?;
    let graph = aggregate(profile)?;
    emit(&graph, profile.totals(), sink)
}
