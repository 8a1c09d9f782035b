//! Application log discovery for q processes and log file display.
//!
//! A q process announces its log file on stdout (`Logging to file: <path>`)
//! and leaves a `log continues in <path>` breadcrumb at the end of each
//! rolled file. Discovery follows that chain reading only the trailing
//! bytes of each file.
use std::{
    fs::File,
    io::{BufRead, BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use regex::Regex;

use crate::sys;

/// How many trailing bytes of a rolled log are searched for a breadcrumb.
const ROLL_LOOKUP_LENGTH: u64 = 512;

/// How many trailing bytes of stderr are searched for a wsfull diagnostic.
const WSFULL_LOOKUP_LENGTH: u64 = 16;

fn log_file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Logging to file\s*:\s*(.+)$").unwrap())
}

fn rolled_log_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)log continues in\s*(.+)$").unwrap())
}

fn tail(path: &Path, length: u64) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    if size > length {
        file.seek(SeekFrom::Start(size - length))?;
    }
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Returns true when the trailing bytes of a stderr file carry a
/// workspace-full diagnostic (`wsfull` or `-w abort`).
pub fn has_wsfull_marker(stderr: &Path) -> bool {
    if sys::is_empty(stderr) {
        return false;
    }
    match tail(stderr, WSFULL_LOOKUP_LENGTH) {
        Ok(content) => {
            let trimmed = content.trim_end();
            trimmed.ends_with("wsfull") || trimmed.ends_with("-w abort")
        }
        Err(_) => false,
    }
}

/// Scans a stdout capture for the initial `Logging to file` announcement.
fn locate_log_file(stdout: &Path) -> Option<PathBuf> {
    let file = File::open(stdout).ok()?;
    for line in BufReader::new(file).lines() {
        let line = line.ok()?;
        if let Some(caps) = log_file_pattern().captures(&line) {
            return Some(PathBuf::from(caps[1].trim()));
        }
    }
    None
}

/// Follows `log continues in` breadcrumbs until a terminal file is found.
fn find_rolled_log(start: PathBuf) -> PathBuf {
    let mut path = start;
    loop {
        if sys::is_empty(&path) {
            return path;
        }
        let Ok(content) = tail(&path, ROLL_LOOKUP_LENGTH) else {
            return path;
        };
        match rolled_log_pattern()
            .captures_iter(&content)
            .last()
            .map(|caps| PathBuf::from(caps[1].trim()))
        {
            Some(next) => path = next,
            None => return path,
        }
    }
}

/// Resolves the current application log for a q process.
///
/// `cached` short-circuits the stdout scan but the roll chain is always
/// re-followed, so a freshly rolled file is picked up on the next read.
pub fn resolve_log(stdout: Option<&Path>, cached: Option<&Path>) -> Option<PathBuf> {
    let seed = match cached {
        Some(path) => path.to_path_buf(),
        None => locate_log_file(stdout?)?,
    };
    Some(find_rolled_log(seed))
}

/// Prints a file to stdout framed with `[BEGIN]`/`[END]` markers. Returns
/// false when the file is missing or empty.
pub fn show_file(path: &Path) -> std::io::Result<bool> {
    if sys::is_empty(path) {
        return Ok(false);
    }
    let file = File::open(path)?;
    println!("\n[BEGIN]");
    for line in BufReader::new(file).lines() {
        println!("{}", line?);
    }
    println!("[END]\n");
    Ok(true)
}
