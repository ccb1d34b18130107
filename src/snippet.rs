// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Marker-delimited block surgery on the user-owned nginx server snippet.
//!
//! The operator owns at most one block inside the snippet, bounded by
//! [`START_MARKER`] and [`END_MARKER`]. Everything outside the block belongs to
//! the user and is preserved byte for byte.
use regex::{NoExpand, Regex};
use thiserror::Error;

/// Includes the trailing newline; the block body starts on the next line.
pub const START_MARKER: &str = "# kube-botblocker.github.io operator: Configuration start\n";
pub const END_MARKER: &str = "# kube-botblocker.github.io operator: Configuration end";

/// Blank line placed between user content and an appended block.
const BLOCK_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error(
        "mismatched or wrong number of start and end markers for kube-botblocker config. \
         Expected 1 start and end markers, got {start} start and {end} end markers. Manual action required"
    )]
    AmbiguousMarkerState { start: usize, end: usize },
    #[error("desired content is not a single marker-delimited block")]
    MalformedBlock,
    #[error("markers do not form a valid pattern: {0}")]
    InvalidMarker(String),
}

/// Inserts, replaces or removes (when `desired` is empty) the single block
/// delimited by `start_marker` and `end_marker` inside `current`.
pub fn merge_block(
    current: &str,
    desired: &str,
    start_marker: &str,
    end_marker: &str,
) -> Result<String, MergeError> {
    let start = current.matches(start_marker).count();
    let end = current.matches(end_marker).count();
    if start != end || (start > 1 && end > 1) {
        return Err(MergeError::AmbiguousMarkerState { start, end });
    }

    let pattern = block_pattern(start_marker, end_marker)?;
    let span = pattern.find(current);
    if start == 1 && span.is_none() {
        // One of each marker, but in an order that does not delimit a block.
        return Err(MergeError::AmbiguousMarkerState { start, end });
    }

    if desired.is_empty() {
        let merged = match span {
            Some(m) => join_around_removed_block(&current[..m.start()], &current[m.end()..]),
            None => current.to_string(),
        };
        return check_marker_count(merged, 0, start_marker, end_marker);
    }

    if !is_single_block(desired, &pattern, start_marker, end_marker) {
        return Err(MergeError::MalformedBlock);
    }

    let merged = match span {
        Some(_) => pattern.replacen(current, 1, NoExpand(desired)).into_owned(),
        None if current.is_empty() => desired.to_string(),
        None => format!("{current}{BLOCK_SEPARATOR}{desired}"),
    };
    check_marker_count(merged, 1, start_marker, end_marker)
}

/// [`merge_block`] with the operator's own markers.
pub fn update_server_snippet(current: &str, desired: &str) -> Result<String, MergeError> {
    merge_block(current, desired, START_MARKER, END_MARKER)
}

/// Renders the block rejecting every listed user agent.
/// No agents means no block at all: an empty alternation would match every client.
pub fn build_nginx_config(user_agents: &[String]) -> String {
    if user_agents.is_empty() {
        return String::new();
    }
    let mut block = String::new();
    block.push_str(START_MARKER);
    block.push_str(
        "# Configuration added by kube-botblocker operator. Do not edit any of this manually\n",
    );
    block.push_str(&format!(
        "if ($http_user_agent ~* \"({})\") {{\n",
        user_agents.join("|")
    ));
    block.push_str("  return 403;\n");
    block.push_str("}\n");
    block.push_str(END_MARKER);
    block
}

fn block_pattern(start_marker: &str, end_marker: &str) -> Result<Regex, MergeError> {
    Regex::new(&format!(
        "(?sm)^{}.*?{}$",
        regex::escape(start_marker),
        regex::escape(end_marker)
    ))
    .map_err(|e| MergeError::InvalidMarker(e.to_string()))
}

/// User text next to the block can complete a marker once the two are joined
/// (e.g. a trailing start marker without its newline). Such a result would not
/// merge again, so it is rejected instead of written.
fn check_marker_count(
    merged: String,
    expected: usize,
    start_marker: &str,
    end_marker: &str,
) -> Result<String, MergeError> {
    let start = merged.matches(start_marker).count();
    let end = merged.matches(end_marker).count();
    if start != expected || end != expected {
        return Err(MergeError::AmbiguousMarkerState { start, end });
    }
    Ok(merged)
}

fn is_single_block(desired: &str, pattern: &Regex, start_marker: &str, end_marker: &str) -> bool {
    desired.matches(start_marker).count() == 1
        && desired.matches(end_marker).count() == 1
        && pattern
            .find(desired)
            .map_or(false, |m| m.start() == 0 && m.end() == desired.len())
}

fn join_around_removed_block(before: &str, after: &str) -> String {
    if let Some(before) = before.strip_suffix(BLOCK_SEPARATOR) {
        return format!("{before}{after}");
    }
    if before.is_empty() {
        let after = after
            .strip_prefix(BLOCK_SEPARATOR)
            .or_else(|| after.strip_prefix('\n'))
            .unwrap_or(after);
        return after.to_string();
    }
    // The block is preceded by a single line break.
    match after.strip_prefix('\n') {
        Some(after) => format!("{before}{after}"),
        None => format!("{}{after}", before.strip_suffix('\n').unwrap_or(before)),
    }
}
