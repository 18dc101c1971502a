//! Callgrind serialization of an aggregated call graph.
//!
//! Output layout:
//!
//! ```text
//! events: ms hits
//! summary: <total ms> <total hits>
//! fl=<url>
//! fn=<name> <file>:<line>
//! <line> <self ms> <self hits>
//! cfi=<callee url>
//! cfn=<callee name> <callee file>:<callee line>
//! calls=0 <callee line>
//! <line> <callee total ms> <callee total hits>
//!
//! ```
//!
//! Callgrind rejects negative positions, so unknown (negative) line numbers
//! are written as `0` on numeric lines and dropped from descriptors.

use crate::aggregate::CallGraph;
use crate::error::Result;
use crate::profile::{CallFrame, ProfileTotals};
use callgrind_parse::{Call, CallgrindWriter, CostLine, Header};
use std::io::Write;

/// Event columns written for every cost line.
pub const EVENTS: [&str; 2] = ["ms", "hits"];

/// Write `graph` as Callgrind text to `sink`.
///
/// Lines are written in order as they are produced; a failed write aborts
/// the remaining output and is returned unchanged.
pub fn emit<W: Write>(graph: &CallGraph, totals: ProfileTotals, sink: W) -> Result<()> {
    let mut writer = CallgrindWriter::new(sink);

    writer.write_header(&Header {
        events: EVENTS.iter().map(|e| e.to_string()).collect(),
        summary: Some(vec![totals.total_time, totals.total_hit_count as f64]),
        properties: Vec::new(),
    })?;

    for (_, call) in graph.calls() {
        let line = clamp_line(call.frame.line_number);
        writer.begin_function(&call.frame.url, &function_descriptor(&call.frame))?;
        writer.write_cost(&CostLine::new(
            line,
            vec![call.self_time, call.self_hit_count as f64],
        ))?;

        for edge in call.child_calls.values() {
            writer.write_call(&Call {
                file: edge.frame.url.clone(),
                name: function_descriptor(&edge.frame),
                count: 0,
                target_line: clamp_line(edge.frame.line_number),
                cost: CostLine::new(line, vec![edge.total_time, edge.total_hit_count as f64]),
            })?;
        }

        writer.end_function()?;
    }

    Ok(())
}

/// `"<name> <file>"` plus `":<line>"` when the line number is known.
pub fn function_descriptor(frame: &CallFrame) -> String {
    let file = base_url(&frame.url);
    if frame.line_number < 0 {
        format!("{} {}", frame.function_name, file)
    } else {
        format!("{} {}:{}", frame.function_name, file, frame.line_number)
    }
}

/// Last path segment of `url`, without any query string.
pub fn base_url(url: &str) -> &str {
    let path = url.split('?').next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

fn clamp_line(line_number: i64) -> u64 {
    line_number.max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::normalize::normalize;
    use crate::profile::{Profile, ProfileNode};
    use std::io;

    #[test]
    fn descriptor_strips_query_and_path() {
        let frame = CallFrame::new("load", "http://x/a/b.js?foo=1", 42);
        assert_eq!(function_descriptor(&frame), "load b.js:42");
    }

    #[test]
    fn descriptor_omits_negative_line() {
        let frame = CallFrame::new("load", "http://x/a/b.js?foo=1", -1);
        assert_eq!(function_descriptor(&frame), "load b.js");
    }

    #[test]
    fn descriptor_keeps_line_zero() {
        let frame = CallFrame::new("main", "app.js", 0);
        assert_eq!(function_descriptor(&frame), "main app.js:0");
    }

    #[test]
    fn descriptor_with_empty_url() {
        let frame = CallFrame::new("(program)", "", -1);
        assert_eq!(function_descriptor(&frame), "(program) ");
    }

    #[test]
    fn base_url_variants() {
        assert_eq!(base_url("http://x/a/b.js?foo=1"), "b.js");
        assert_eq!(base_url("file:///srv/app/index.js"), "index.js");
        assert_eq!(base_url("plain.js"), "plain.js");
        assert_eq!(base_url("http://x/dir/"), "");
        assert_eq!(base_url("b.js?x=/y/z"), "b.js");
        assert_eq!(base_url(""), "");
    }

    fn graph_for(nodes: Vec<ProfileNode>, end_time: f64) -> (CallGraph, ProfileTotals) {
        let mut profile = Profile::new(nodes, 0.0, end_time).unwrap();
        normalize(&mut profile).unwrap();
        (aggregate(&profile).unwrap(), profile.totals())
    }

    fn emit_to_string(graph: &CallGraph, totals: ProfileTotals) -> String {
        let mut output = Vec::new();
        emit(graph, totals, &mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn negative_line_is_clamped_in_statistics() {
        let nodes = vec![
            ProfileNode::new(1, CallFrame::new("(root)", "", -1), 1).with_children(vec![2]),
            ProfileNode::new(2, CallFrame::new("load", "http://x/a/b.js?foo=1", -1), 3),
        ];
        let (graph, totals) = graph_for(nodes, 4.0);
        let output = emit_to_string(&graph, totals);

        assert_eq!(
            output,
            "events: ms hits\n\
             summary: 4000 4\n\
             fl=\n\
             fn=(root) \n\
             0 1000 1\n\
             cfi=http://x/a/b.js?foo=1\n\
             cfn=load b.js\n\
             calls=0 0\n\
             0 3000 3\n\
             \n\
             fl=http://x/a/b.js?foo=1\n\
             fn=load b.js\n\
             0 3000 3\n\
             \n"
        );
        assert!(!output.contains('-'));
    }

    #[test]
    fn fractional_times_are_truncated() {
        let nodes = vec![
            ProfileNode::new(1, CallFrame::new("main", "app.js", 1), 1).with_children(vec![2]),
            ProfileNode::new(2, CallFrame::new("work", "app.js", 5), 2),
        ];
        // 10ms over 3 hits
        let (graph, totals) = graph_for(nodes, 0.01);
        let output = emit_to_string(&graph, totals);

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[1], "summary: 10 3");
        assert_eq!(lines[4], "1 3 1");
        assert_eq!(lines[8], "1 6 2");
        assert_eq!(lines[12], "5 6 2");
    }

    #[test]
    fn zero_hit_profile_renders_nan() {
        let nodes = vec![ProfileNode::new(1, CallFrame::new("idle", "app.js", 3), 0)];
        let (graph, totals) = graph_for(nodes, 1.0);
        let output = emit_to_string(&graph, totals);

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[1], "summary: 1000 0");
        assert_eq!(lines[4], "3 NaN 0");
    }

    #[test]
    fn empty_graph_writes_only_header() {
        let output = emit_to_string(
            &CallGraph::default(),
            ProfileTotals {
                total_time: 0.0,
                total_hit_count: 0,
            },
        );
        assert_eq!(output, "events: ms hits\nsummary: 0 0\n");
    }

    struct FailingSink {
        writes_left: usize,
        written: Vec<u8>,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.writes_left == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
            }
            self.writes_left -= 1;
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sink_failure_propagates_and_keeps_partial_output() {
        let nodes = vec![ProfileNode::new(1, CallFrame::new("main", "app.js", 1), 1)];
        let (graph, totals) = graph_for(nodes, 0.001);

        let mut sink = FailingSink {
            writes_left: 5,
            written: Vec::new(),
        };
        let result = emit(&graph, totals, &mut sink);

        match result {
            Err(crate::error::ConvertError::Io(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::BrokenPipe)
            }
            other => panic!("expected IO error, got {:?}", other),
        }
        assert!(!sink.written.is_empty());
        assert!(String::from_utf8(sink.written).unwrap().starts_with("events: ms hits\n"));
    }
}
