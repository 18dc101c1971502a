//! Callgrind profile format reader and writer.
//!
//! This library writes the line-oriented Callgrind text format consumed by
//! KCachegrind and QCachegrind, and parses it back from any `Read`-able
//! source for validation.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use callgrind_parse::CallgrindFile;
//!
//! let file = File::open("callgrind.out").unwrap();
//! let profile = CallgrindFile::parse(file).unwrap();
//!
//! println!("Events: {}", profile.header.events.join(" "));
//! println!("Functions: {}", profile.functions.len());
//! ```

use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use thiserror::Error;

/// Errors that can occur during Callgrind parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing 'events:' line")]
    MissingEvents,

    #[error("invalid number '{value}' at line {line}")]
    InvalidNumber { line: usize, value: String },

    #[error("line {line} has {found} costs but {expected} events are declared")]
    CostCountMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("cost line outside of a function at line {0}")]
    CostWithoutFunction(usize),

    #[error("'calls=' without a preceding 'cfn=' at line {0}")]
    CallWithoutTarget(usize),

    #[error("'calls=' at line {0} is not followed by a cost line")]
    MissingCallCost(usize),

    #[error("unrecognized line {line}: '{content}'")]
    UnknownLine { line: usize, content: String },
}

/// Result type for Callgrind parsing operations.
pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors that can occur during Callgrind writing.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Callgrind writing operations.
pub type WriteResult<T> = std::result::Result<T, WriteError>;

// ============================================================================
// Header types
// ============================================================================

/// Callgrind file header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    /// Event names, in cost column order.
    pub events: Vec<String>,
    /// Whole-profile totals, one per event.
    pub summary: Option<Vec<f64>>,
    /// Other `key: value` header lines (`version`, `creator`, `cmd`, ...).
    pub properties: Vec<(String, String)>,
}

// ============================================================================
// Cost and call types
// ============================================================================

/// A position followed by one cost per event.
#[derive(Debug, Clone, PartialEq)]
pub struct CostLine {
    pub line: u64,
    pub costs: Vec<f64>,
}

impl CostLine {
    pub fn new(line: u64, costs: Vec<f64>) -> Self {
        Self { line, costs }
    }
}

/// A costed call from the enclosing function to a callee.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Callee file (`cfi=`).
    pub file: String,
    /// Callee name (`cfn=`).
    pub name: String,
    /// Call count from `calls=`.
    pub count: u64,
    /// Callee target position from `calls=`.
    pub target_line: u64,
    /// Inclusive cost of the call, at the caller's position.
    pub cost: CostLine,
}

/// A function block (`fl=` / `fn=`) with its self costs and outgoing calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub file: String,
    pub name: String,
    pub costs: Vec<CostLine>,
    pub calls: Vec<Call>,
}

impl Function {
    /// Sum of the self costs recorded for event column `event`.
    pub fn self_cost(&self, event: usize) -> f64 {
        self.costs
            .iter()
            .filter_map(|c| c.costs.get(event))
            .sum()
    }

    /// Find the outgoing call to `name`, if any.
    pub fn call_to(&self, name: &str) -> Option<&Call> {
        self.calls.iter().find(|c| c.name == name)
    }
}

// ============================================================================
// Main CallgrindFile type
// ============================================================================

/// A parsed Callgrind file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallgrindFile {
    /// File header with event definitions and totals.
    pub header: Header,
    /// Function blocks in file order.
    pub functions: Vec<Function>,
}

/// A `calls=` line waiting for its cost line.
struct PendingCall {
    file: String,
    name: String,
    count: u64,
    target_line: u64,
    line_num: usize,
}

impl CallgrindFile {
    /// Parse a Callgrind file from any `Read`-able source.
    ///
    /// Only absolute positions are supported; name compression and relative
    /// position lines are reported as [`ParseError::UnknownLine`].
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let buf_reader = BufReader::new(reader);
        let mut header = Header::default();
        let mut functions: Vec<Function> = Vec::new();
        let mut current: Option<Function> = None;
        let mut current_file = String::new();
        let mut call_file: Option<String> = None;
        let mut call_name: Option<String> = None;
        let mut pending: Option<PendingCall> = None;

        for (line_num, line_result) in buf_reader.lines().enumerate() {
            let line_num = line_num + 1; // 1-indexed for error messages
            let line = line_result?;
            // Trailing spaces are part of names
            let trimmed = line.trim_end_matches('\r');

            if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                continue;
            }

            // A calls= line must be followed directly by its cost line
            if let Some(call) = pending.take() {
                let cost = Self::parse_cost_line(trimmed, line_num, &header.events)
                    .map_err(|e| match e {
                        ParseError::UnknownLine { .. } => ParseError::MissingCallCost(call.line_num),
                        other => other,
                    })?;
                let function = current
                    .as_mut()
                    .ok_or(ParseError::CostWithoutFunction(line_num))?;
                function.calls.push(Call {
                    file: call.file,
                    name: call.name,
                    count: call.count,
                    target_line: call.target_line,
                    cost,
                });
                continue;
            }

            if let Some(value) = trimmed.strip_prefix("fl=") {
                current_file = value.to_string();
            } else if trimmed.starts_with("fi=") || trimmed.starts_with("fe=") {
                // Inlined file switches do not change function identity
            } else if let Some(value) = trimmed.strip_prefix("fn=") {
                if let Some(function) = current.take() {
                    functions.push(function);
                }
                call_file = None;
                call_name = None;
                current = Some(Function {
                    file: current_file.clone(),
                    name: value.to_string(),
                    costs: Vec::new(),
                    calls: Vec::new(),
                });
            } else if let Some(value) = trimmed
                .strip_prefix("cfi=")
                .or_else(|| trimmed.strip_prefix("cfl="))
            {
                call_file = Some(value.to_string());
            } else if let Some(value) = trimmed.strip_prefix("cfn=") {
                call_name = Some(value.to_string());
            } else if let Some(value) = trimmed.strip_prefix("calls=") {
                let name = call_name
                    .take()
                    .ok_or(ParseError::CallWithoutTarget(line_num))?;
                let mut parts = value.split_whitespace();
                let count = Self::parse_u64(parts.next().unwrap_or(""), line_num)?;
                let target_line = match parts.next() {
                    Some(token) => Self::parse_u64(token, line_num)?,
                    None => 0,
                };
                let file = call_file.take().unwrap_or_else(|| current_file.clone());
                pending = Some(PendingCall {
                    file,
                    name,
                    count,
                    target_line,
                    line_num,
                });
            } else if let Some(value) = trimmed.strip_prefix("events:") {
                header.events = value.split_whitespace().map(str::to_string).collect();
            } else if let Some(value) = trimmed
                .strip_prefix("summary:")
                .or_else(|| trimmed.strip_prefix("totals:"))
            {
                let summary = value
                    .split_whitespace()
                    .map(|token| Self::parse_cost(token, line_num))
                    .collect::<Result<Vec<_>>>()?;
                header.summary = Some(summary);
            } else if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
                let cost = Self::parse_cost_line(trimmed, line_num, &header.events)?;
                current
                    .as_mut()
                    .ok_or(ParseError::CostWithoutFunction(line_num))?
                    .costs
                    .push(cost);
            } else if let Some((key, value)) = Self::split_property(trimmed) {
                header.properties.push((key.to_string(), value.to_string()));
            } else {
                return Err(ParseError::UnknownLine {
                    line: line_num,
                    content: line.clone(),
                });
            }
        }

        if let Some(call) = pending {
            return Err(ParseError::MissingCallCost(call.line_num));
        }
        if let Some(function) = current {
            functions.push(function);
        }
        if header.events.is_empty() {
            return Err(ParseError::MissingEvents);
        }

        Ok(CallgrindFile { header, functions })
    }

    fn parse_cost_line(trimmed: &str, line_num: usize, events: &[String]) -> Result<CostLine> {
        if !trimmed.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(ParseError::UnknownLine {
                line: line_num,
                content: trimmed.to_string(),
            });
        }
        if events.is_empty() {
            return Err(ParseError::MissingEvents);
        }

        let mut tokens = trimmed.split_whitespace();
        let line = Self::parse_u64(tokens.next().unwrap_or(""), line_num)?;
        let mut costs = tokens
            .map(|token| Self::parse_cost(token, line_num))
            .collect::<Result<Vec<_>>>()?;

        if costs.len() > events.len() {
            return Err(ParseError::CostCountMismatch {
                line: line_num,
                expected: events.len(),
                found: costs.len(),
            });
        }
        // Missing trailing costs are zero
        costs.resize(events.len(), 0.0);

        Ok(CostLine { line, costs })
    }

    /// A cost is an unsigned integer, or `NaN` as written by [`CostDisplay`].
    fn parse_cost(token: &str, line_num: usize) -> Result<f64> {
        if token == "NaN" {
            return Ok(f64::NAN);
        }
        Self::parse_u64(token, line_num).map(|v| v as f64)
    }

    fn parse_u64(token: &str, line_num: usize) -> Result<u64> {
        token.parse().map_err(|_| ParseError::InvalidNumber {
            line: line_num,
            value: token.to_string(),
        })
    }

    fn split_property(line: &str) -> Option<(&str, &str)> {
        let (key, value) = line.split_once(':')?;
        let is_key = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        is_key.then(|| (key, value.trim()))
    }

    /// Find the first function block with the given `fn=` name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Total number of call records across all functions.
    pub fn call_count(&self) -> usize {
        self.functions.iter().map(|f| f.calls.len()).sum()
    }

    /// Sum of the self costs of every function for event column `event`.
    pub fn total_self_cost(&self, event: usize) -> f64 {
        self.functions.iter().map(|f| f.self_cost(event)).sum()
    }

    /// Write this file back out in Callgrind text format.
    pub fn write<W: Write>(&self, writer: W) -> WriteResult<()> {
        let mut cg_writer = CallgrindWriter::new(writer);
        cg_writer.write_header(&self.header)?;

        for function in &self.functions {
            cg_writer.begin_function(&function.file, &function.name)?;
            for cost in &function.costs {
                cg_writer.write_cost(cost)?;
            }
            for call in &function.calls {
                cg_writer.write_call(call)?;
            }
            cg_writer.end_function()?;
        }

        Ok(())
    }
}

// ============================================================================
// Writer types
// ============================================================================

/// Renders a cost as an integer, truncating toward zero.
///
/// Non-finite costs are written as `NaN`.
#[derive(Debug, Clone, Copy)]
pub struct CostDisplay(pub f64);

impl fmt::Display for CostDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_finite() {
            write!(f, "{}", self.0.trunc() as i64)
        } else {
            f.write_str("NaN")
        }
    }
}

/// Writer for creating Callgrind files incrementally.
///
/// Every method writes its lines immediately and in call order.
///
/// # Example
///
/// ```no_run
/// use callgrind_parse::{CallgrindWriter, CostLine, Header};
/// use std::fs::File;
///
/// let file = File::create("callgrind.out").unwrap();
/// let mut writer = CallgrindWriter::new(file);
///
/// let header = Header {
///     events: vec!["ms".into(), "hits".into()],
///     summary: Some(vec![10.0, 10.0]),
///     properties: Vec::new(),
/// };
/// writer.write_header(&header).unwrap();
///
/// writer.begin_function("app.js", "main app.js:1").unwrap();
/// writer.write_cost(&CostLine::new(1, vec![10.0, 10.0])).unwrap();
/// writer.end_function().unwrap();
/// ```
pub struct CallgrindWriter<W: Write> {
    writer: W,
}

impl<W: Write> CallgrindWriter<W> {
    /// Create a new Callgrind writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write the header lines. This should be called first.
    pub fn write_header(&mut self, header: &Header) -> WriteResult<()> {
        for (key, value) in &header.properties {
            writeln!(self.writer, "{}: {}", key, value)?;
        }
        writeln!(self.writer, "events: {}", header.events.join(" "))?;
        if let Some(summary) = &header.summary {
            write!(self.writer, "summary:")?;
            self.write_costs(summary)?;
            writeln!(self.writer)?;
        }
        Ok(())
    }

    /// Start a function block.
    pub fn begin_function(&mut self, file: &str, name: &str) -> WriteResult<()> {
        writeln!(self.writer, "fl={}", file)?;
        writeln!(self.writer, "fn={}", name)?;
        Ok(())
    }

    /// Write a self cost line for the current function.
    pub fn write_cost(&mut self, cost: &CostLine) -> WriteResult<()> {
        write!(self.writer, "{}", cost.line)?;
        self.write_costs(&cost.costs)?;
        writeln!(self.writer)?;
        Ok(())
    }

    /// Write a call record for the current function.
    pub fn write_call(&mut self, call: &Call) -> WriteResult<()> {
        writeln!(self.writer, "cfi={}", call.file)?;
        writeln!(self.writer, "cfn={}", call.name)?;
        writeln!(self.writer, "calls={} {}", call.count, call.target_line)?;
        self.write_cost(&call.cost)
    }

    /// Terminate the current function block with a blank line.
    pub fn end_function(&mut self) -> WriteResult<()> {
        writeln!(self.writer)?;
        Ok(())
    }

    fn write_costs(&mut self, costs: &[f64]) -> WriteResult<()> {
        for &cost in costs {
            write!(self.writer, " {}", CostDisplay(cost))?;
        }
        Ok(())
    }

    /// Get a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Get a mutable reference to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Consume this writer and return the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
