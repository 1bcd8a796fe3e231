//! Event source for replaying recorded streams.
//!
//! Events are newline-delimited JSON. A source is a single file, every
//! `*.jsonl`/`*.ndjson` file below a directory (replayed in path order), or
//! stdin.

use crate::models::Event;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File extensions picked up when the input is a directory.
const EVENT_EXTENSIONS: &[&str] = &["jsonl", "ndjson"];

/// Where events are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Stdin,
    Files(Vec<PathBuf>),
}

impl SourceSpec {
    /// Resolve a CLI input argument.
    pub fn resolve(input: &str) -> Result<Self> {
        if input == "-" {
            return Ok(SourceSpec::Stdin);
        }

        let path = Path::new(input);
        if path.is_dir() {
            Ok(SourceSpec::Files(discover(path)?))
        } else if path.is_file() {
            Ok(SourceSpec::Files(vec![path.to_path_buf()]))
        } else {
            Err(anyhow::anyhow!("Input path not found: {}", input))
        }
    }
}

/// Find event files under `root`, sorted by path. Hidden entries are skipped.
pub fn discover(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name().to_str().unwrap_or("")));

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        if EVENT_EXTENSIONS.contains(&ext) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    debug!("Discovered {} event files under {}", files.len(), root.display());
    Ok(files)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// One parsed line, or why it could not be used.
#[derive(Debug)]
pub enum SourceItem {
    Event(Event),
    /// Line that is not a valid event. Logged and skipped by the caller.
    Malformed { origin: String, line: usize },
}

type Lines = Box<dyn BufRead + Send>;

/// Line-by-line reader over a [`SourceSpec`].
pub struct EventReader {
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<(String, Lines)>,
    line_no: usize,
}

impl EventReader {
    pub fn open(spec: SourceSpec) -> Self {
        match spec {
            SourceSpec::Stdin => Self {
                pending: Vec::new().into_iter(),
                current: Some((
                    "<stdin>".to_string(),
                    Box::new(BufReader::new(io::stdin())) as Lines,
                )),
                line_no: 0,
            },
            SourceSpec::Files(files) => Self {
                pending: files.into_iter(),
                current: None,
                line_no: 0,
            },
        }
    }

    /// Read from an in-memory buffer; used for tests.
    #[cfg(test)]
    pub fn from_reader(origin: &str, reader: impl BufRead + Send + 'static) -> Self {
        Self {
            pending: Vec::new().into_iter(),
            current: Some((origin.to_string(), Box::new(reader) as Lines)),
            line_no: 0,
        }
    }

    fn advance_file(&mut self) -> Result<bool> {
        match self.pending.next() {
            Some(path) => {
                let file = File::open(&path)
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                debug!("Replaying {}", path.display());
                let lines: Lines = Box::new(BufReader::new(file));
                self.current = Some((path.display().to_string(), lines));
                self.line_no = 0;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Iterator for EventReader {
    type Item = Result<SourceItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                match self.advance_file() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return Some(Err(e)),
                }
            }

            let (origin, reader) = self.current.as_mut()?;
            let mut line = Vec::new();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    self.current = None;
                    continue;
                }
                Ok(_) => {
                    self.line_no += 1;
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Some(Ok(match parse_line(&line) {
                        Ok(event) => SourceItem::Event(event),
                        Err(reason) => {
                            warn!("Skipping malformed event at {}:{}: {}", origin, self.line_no, reason);
                            SourceItem::Malformed {
                                origin: origin.clone(),
                                line: self.line_no,
                            }
                        }
                    }));
                }
                Err(e) => {
                    let origin = origin.clone();
                    self.current = None;
                    return Some(
                        Err::<SourceItem, _>(e).with_context(|| format!("Failed to read {}", origin)),
                    );
                }
            }
        }
    }
}

/// Decode one raw line. Invalid UTF-8 and invalid JSON are both malformed.
fn parse_line(raw: &[u8]) -> Result<Event, String> {
    let text = std::str::from_utf8(raw).map_err(|e| format!("invalid UTF-8: {}", e))?;
    serde_json::from_str(text.trim()).map_err(|e| e.to_string())
}
