use serde::Serialize;
use std::backtrace::Backtrace;
use std::str::FromStr;

/// Controls when call-site stacks are captured onto spans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StackTraceMode {
    /// Never capture stacks.
    None,
    /// Capture a stack only when a span finishes with an error.
    #[default]
    ErrorOnly,
    /// Capture a stack for every span at start, replaced by the failure-site
    /// stack if the span finishes with an error.
    All,
}

impl FromStr for StackTraceMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(StackTraceMode::None),
            "error-only" => Ok(StackTraceMode::ErrorOnly),
            "all" => Ok(StackTraceMode::All),
            _ => Err(()),
        }
    }
}

/// One frame of a captured call-site stack.
///
/// Always structured; raw stack strings never appear on spans.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    /// The function or method name.
    #[serde(rename = "m")]
    pub method: String,
    /// The source file, when the symbol could be resolved.
    #[serde(rename = "c", skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// The line number, when the symbol could be resolved.
    #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Captures the current call stack as structured frames, skipping the
/// capture machinery itself and truncating to `limit` frames.
pub(crate) fn capture(limit: usize) -> Vec<StackFrame> {
    if limit == 0 {
        return Vec::new();
    }
    parse_backtrace(&Backtrace::force_capture().to_string(), limit)
}

/// Parses the display form of [`Backtrace`] into frames.
///
/// The format is one `N: symbol` line per frame, optionally followed by an
/// indented `at file:line:col` line.
fn parse_backtrace(rendered: &str, limit: usize) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();
    for line in rendered.lines() {
        let trimmed = line.trim_start();
        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                if frame.file.is_none() {
                    let mut parts = location.rsplitn(3, ':');
                    let _column = parts.next();
                    let line_number = parts.next().and_then(|n| n.parse::<u32>().ok());
                    if let Some(file) = parts.next() {
                        frame.file = Some(file.to_owned());
                        frame.line = line_number;
                    }
                }
            }
        } else if let Some((index, symbol)) = trimmed.split_once(':') {
            if index.trim().parse::<usize>().is_ok() {
                frames.push(StackFrame {
                    method: symbol.trim().to_owned(),
                    file: None,
                    line: None,
                });
            }
        }
    }
    frames.retain(|frame| !is_internal_frame(&frame.method));
    frames.truncate(limit);
    frames
}

fn is_internal_frame(method: &str) -> bool {
    method.contains("backtrace::") || method.contains("tracekit::trace::stack")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERED: &str = "\
   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/lib/backtrace/src/backtrace/libunwind.rs:116:5
   1: tracekit::trace::stack::capture
             at ./src/trace/stack.rs:52:19
   2: myapp::handlers::create_order
             at ./src/handlers.rs:87:9
   3: myapp::main
             at ./src/main.rs:12:5
   4: core::ops::function::FnOnce::call_once
";

    #[test]
    fn parses_frames_with_locations() {
        let frames = parse_backtrace(RENDERED, 10);
        assert_eq!(frames[0].method, "myapp::handlers::create_order");
        assert_eq!(frames[0].file.as_deref(), Some("./src/handlers.rs"));
        assert_eq!(frames[0].line, Some(87));
        assert_eq!(frames[2].method, "core::ops::function::FnOnce::call_once");
        assert_eq!(frames[2].file, None);
    }

    #[test]
    fn drops_capture_machinery_frames() {
        let frames = parse_backtrace(RENDERED, 10);
        assert!(frames
            .iter()
            .all(|frame| !frame.method.contains("tracekit::trace::stack")));
        assert!(frames
            .iter()
            .all(|frame| !frame.method.contains("backtrace::")));
    }

    #[test]
    fn truncates_to_limit() {
        assert_eq!(parse_backtrace(RENDERED, 1).len(), 1);
        assert!(capture(3).len() <= 3);
        assert!(capture(0).is_empty());
    }

    #[test]
    fn mode_parses_from_config_values() {
        assert_eq!("none".parse(), Ok(StackTraceMode::None));
        assert_eq!("error-only".parse(), Ok(StackTraceMode::ErrorOnly));
        assert_eq!("all".parse(), Ok(StackTraceMode::All));
        assert!("sometimes".parse::<StackTraceMode>().is_err());
    }
}
