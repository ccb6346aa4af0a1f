//! Framing markers and error lines of the SSYNC response stream

/// Exact byte strings delimiting the two protocol phases. These are part
/// of the wire contract and must not change.
pub const MISSING_CHECK_START: &str = ":MISSING_CHECK: START";
pub const MISSING_CHECK_END: &str = ":MISSING_CHECK: END";
pub const UPDATES_START: &str = ":UPDATES: START";
pub const UPDATES_END: &str = ":UPDATES: END";

/// An in-band protocol error line. The code is diagnostic only: peers
/// treat any `:ERROR:` line as a full-session failure.
pub fn error_line(code: u64, message: &str) -> String {
	format!(":ERROR: {} '{}'\r\n", code, message)
}

/// A framing marker line with its terminator
pub fn marker_line(marker: &str) -> String {
	format!("{}\r\n", marker)
}

/// Strip ASCII whitespace from both ends of a wire line
pub fn trim_line(line: &[u8]) -> &[u8] {
	let is_space = |b: &u8| matches!(b, b' ' | b'\t' | b'\r' | b'\n');
	let start = line.iter().position(|b| !is_space(b)).unwrap_or(line.len());
	let end = line.iter().rposition(|b| !is_space(b)).map(|p| p + 1).unwrap_or(start);
	&line[start..end]
}
