//! Per-scenario log files holding backend transcripts, mixed with commentary
//! from mutate4swift.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};

use crate::Result;

/// Text inserted in log files to make important sections more visible.
pub const LOG_MARKER: &str = "***";

#[derive(Debug)]
pub struct LogFile {
    path: Utf8PathBuf,
    write_to: File,
}

impl LogFile {
    pub fn create_in(log_dir: &Utf8Path, scenario_name: &str) -> Result<LogFile> {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("create log directory {log_dir}"))?;
        let basename = clean_filename(scenario_name);
        for i in 0..1000 {
            let name = if i == 0 {
                format!("{basename}.log")
            } else {
                format!("{basename}_{i:03}.log")
            };
            let path = log_dir.join(name);
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(write_to) => return Ok(LogFile { path, write_to }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(anyhow::Error::from(e).context("create scenario log file")),
            }
        }
        unreachable!("couldn't create any log in {log_dir:?} for {scenario_name:?}");
    }

    /// Write a marked message. Logging never fails the run.
    pub fn message(&mut self, message: &str) {
        let _ = writeln!(self.write_to, "{LOG_MARKER} {message}");
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Encode a scenario name (usually a tree-relative path) into a file name.
///
/// Only a small portable set passes through unchanged; path separators and
/// every other byte are percent-escaped, so distinct scenario names can
/// never collide after sanitization.
fn clean_filename(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => out.push(c),
            other => {
                let mut buf = [0u8; 4];
                for byte in other.encode_utf8(&mut buf).bytes() {
                    let _ = write!(out, "%{byte:02X}");
                }
            }
        }
    }
    out
}
