//! Naming conventions for index files.
//!
//! Generations and segment numbers are written in lower-case base 36, so
//! `snapshot_z.json` (35) is followed by `snapshot_10.json` (36). Ordering
//! must always go through [`extract_gen`], never through string comparison.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::Result;
use crate::storage::Folder;

/// Prefix of snapshot files.
pub const SNAPSHOT_PREFIX: &str = "snapshot_";

/// Extension of snapshot files.
pub const SNAPSHOT_EXT: &str = ".json";

/// Prefix of segment directories.
pub const SEGMENT_PREFIX: &str = "segment_";

/// Name of the merge data file.
pub const MERGE_DATA_FILE: &str = "merge.json";

/// Suffix of files that are not yet published.
pub const TEMP_SUFFIX: &str = ".temp";

lazy_static! {
    static ref SNAPSHOT_NAME: Regex = Regex::new(r"^snapshot_([0-9a-z]+)\.json$").unwrap();
    static ref SEGMENT_NAME: Regex = Regex::new(r"^segment_([0-9a-z]+)$").unwrap();
}

/// Encode a number in lower-case base 36.
pub fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(13);
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    String::from_utf8_lossy(&buf).into_owned()
}

/// Decode a lower-case base 36 number.
pub fn from_base36(text: &str) -> Option<u64> {
    if text.is_empty() {
        return None;
    }
    u64::from_str_radix(text, 36).ok()
}

/// Extract the generation encoded after the last `_` of a file name.
///
/// Anything from the first `.` after the underscore on is ignored. Names
/// without a decodable generation yield 0.
pub fn extract_gen(name: &str) -> u64 {
    let Some(pos) = name.rfind('_') else {
        return 0;
    };
    let digits = &name[pos + 1..];
    let digits = digits.split('.').next().unwrap_or_default();
    from_base36(digits).unwrap_or(0)
}

/// Name of the segment directory for a segment number.
pub fn segment_name(number: u64) -> String {
    format!("{SEGMENT_PREFIX}{}", to_base36(number))
}

/// Number of a segment directory, or `None` if the name is not a segment.
pub fn segment_number(name: &str) -> Option<u64> {
    SEGMENT_NAME
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| from_base36(m.as_str()))
}

/// Whether the name is a published snapshot file.
pub fn is_snapshot_file(name: &str) -> bool {
    SNAPSHOT_NAME.is_match(name)
}

/// Snapshot file name for a generation.
pub fn snapshot_name(generation: u64) -> String {
    format!("{SNAPSHOT_PREFIX}{}{SNAPSHOT_EXT}", to_base36(generation))
}

/// All published snapshot files in the folder root, oldest first.
pub fn snapshot_files(folder: &dyn Folder) -> Result<Vec<String>> {
    let mut files: Vec<String> = folder
        .list("")?
        .into_iter()
        .filter(|name| is_snapshot_file(name))
        .collect();
    files.sort_by_key(|name| extract_gen(name));
    Ok(files)
}

/// The snapshot file with the highest generation, if any.
pub fn latest_snapshot(folder: &dyn Folder) -> Result<Option<String>> {
    Ok(snapshot_files(folder)?.pop())
}
