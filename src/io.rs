use std::fmt::{self, Write as _};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::*;
use crate::memory::{FrameEntry, LayoutBuilder, LayoutError, MemoryLayout, PagingMode, Process, Record};
use crate::translation::{
    Derivation, LogicalAddress, ProcessTranslation, Scheme, TranslationError, TranslationResult,
};

const LINE_ROLES: [&str; LAYOUT_LINES] = [
    "number of processes",
    "base/limit registers",
    "SDT windows",
    "segment descriptors",
    "page size",
    "paging mode",
    "PMT windows",
    "page frames",
];

fn line_role(line: usize) -> &'static str {
    LINE_ROLES.get(line.wrapping_sub(1)).copied().unwrap_or("end of file")
}

/// Problems reading a layout file
#[derive(Debug)]
pub enum LoadError {
    Io(io::Error),
    MissingLine(usize),
    InvalidNumber { line: usize, token: String },
    ValueCount { line: usize, expected: u64, found: usize },
    InvalidValue { line: usize, value: i64 },
    TrailingData(usize),
    Layout(LayoutError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to read layout file: {e}"),
            Self::MissingLine(line) => {
                write!(f, "Line {line} ({}) is missing", line_role(*line))
            }
            Self::InvalidNumber { line, token } => write!(
                f,
                "Line {line} ({}): '{token}' is not an integer",
                line_role(*line)
            ),
            Self::ValueCount {
                line,
                expected,
                found,
            } => write!(
                f,
                "Line {line} ({}): expected {expected} values, found {found}",
                line_role(*line)
            ),
            Self::InvalidValue { line, value } => {
                write!(f, "Line {line} ({}): invalid value {value}", line_role(*line))
            }
            Self::TrailingData(line) => write!(f, "Unexpected data on line {line}"),
            Self::Layout(e) => write!(f, "Invalid layout - {e}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<io::Error> for LoadError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<LayoutError> for LoadError {
    fn from(value: LayoutError) -> Self {
        Self::Layout(value)
    }
}

/// Raw contents of a layout file, one field per line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutFile {
    pub partitions: Vec<Record>,
    pub segment_windows: Vec<Record>,
    pub segments: Vec<Record>,
    pub page_size: NonZeroU32,
    pub mode: PagingMode,
    pub page_windows: Vec<Record>,
    pub frames: Vec<FrameEntry>,
}

impl LayoutFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, LoadError> {
        let lines: Vec<&str> = content.lines().collect();

        let count = single_value(&lines, 1)?;
        if count < 1 || count > MAX_PROCESSES as i64 {
            return Err(LoadError::InvalidValue {
                line: 1,
                value: count,
            });
        }
        let n = count as u64;

        let partitions = records(&lines, 2, n)?;
        let segment_windows = records(&lines, 3, n)?;
        let segments = records(&lines, 4, total_count(&segment_windows))?;

        let size = single_value(&lines, 5)?;
        let page_size = u32::try_from(size)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or(LoadError::InvalidValue {
                line: 5,
                value: size,
            })?;

        let code = single_value(&lines, 6)?;
        let mode = PagingMode::from_code(code).ok_or(LoadError::InvalidValue {
            line: 6,
            value: code,
        })?;

        let page_windows = records(&lines, 7, n)?;
        let frames = values(&lines, 8, total_count(&page_windows))?
            .into_iter()
            .map(|raw| FrameEntry::from_raw(raw).ok_or(LoadError::InvalidValue { line: 8, value: raw }))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(extra) = lines
            .iter()
            .enumerate()
            .skip(LAYOUT_LINES)
            .find(|(_, line)| !line.trim().is_empty())
        {
            return Err(LoadError::TrailingData(extra.0 + 1));
        }

        Ok(LayoutFile {
            partitions,
            segment_windows,
            segments,
            page_size,
            mode,
            page_windows,
            frames,
        })
    }

    /// Hand each process its share of the SDT and PMT entries, in file order
    pub fn build(&self) -> Result<MemoryLayout, LayoutError> {
        let mut builder = LayoutBuilder::new(self.page_size, self.mode);
        let mut segments = self.segments.as_slice();
        let mut frames = self.frames.as_slice();

        for ((partition, segment_window), page_window) in self
            .partitions
            .iter()
            .zip(&self.segment_windows)
            .zip(&self.page_windows)
        {
            // A short slice is reported by the builder as an entry count mismatch
            let take = (segment_window.count() as usize).min(segments.len());
            let (own_segments, rest) = segments.split_at(take);
            segments = rest;
            let take = (page_window.count() as usize).min(frames.len());
            let (own_frames, rest) = frames.split_at(take);
            frames = rest;

            builder.add_process(
                Process {
                    partition: *partition,
                    segment_window: *segment_window,
                    page_window: *page_window,
                },
                own_segments,
                own_frames,
            )?;
        }

        builder.build()
    }
}

/// Read, validate and assemble a layout file
pub fn load_layout<P: AsRef<Path>>(path: P) -> Result<MemoryLayout, LoadError> {
    Ok(LayoutFile::from_file(path)?.build()?)
}

fn total_count(windows: &[Record]) -> u64 {
    windows.iter().map(Record::count).sum()
}

fn values(lines: &[&str], line: usize, expected: u64) -> Result<Vec<i64>, LoadError> {
    let text = lines.get(line - 1).ok_or(LoadError::MissingLine(line))?;
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() && expected > 0 {
        return Err(LoadError::MissingLine(line));
    }
    if tokens.len() as u64 != expected {
        return Err(LoadError::ValueCount {
            line,
            expected,
            found: tokens.len(),
        });
    }

    tokens
        .iter()
        .map(|token| {
            token.parse::<i64>().map_err(|_| LoadError::InvalidNumber {
                line,
                token: token.to_string(),
            })
        })
        .collect()
}

fn single_value(lines: &[&str], line: usize) -> Result<i64, LoadError> {
    Ok(values(lines, line, 1)?[0])
}

/// Parse `count` (base, limit) pairs from a line
fn records(lines: &[&str], line: usize, count: u64) -> Result<Vec<Record>, LoadError> {
    let register = |value: i64| u32::try_from(value).map_err(|_| LoadError::InvalidValue { line, value });

    values(lines, line, count * 2)?
        .chunks(2)
        .map(|pair| -> Result<Record, LoadError> {
            Ok(Record::new(register(pair[0])?, register(pair[1])?))
        })
        .collect()
}

// Logical address syntax: "306", "2,46" or "(2,46)"
static LINEAR_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([0-9]+)\s*$").unwrap());

static PAIR_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\(\s*([0-9]+)\s*,\s*([0-9]+)\s*\)|([0-9]+)\s*,\s*([0-9]+))\s*$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    Malformed(String),
    OutOfRange(String),
}

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(s) => write!(
                f,
                "'{s}' is not a logical address (expected e.g. 306 or (2,46))"
            ),
            Self::OutOfRange(s) => write!(f, "'{s}' is out of range"),
        }
    }
}

impl std::error::Error for AddressParseError {}

pub fn parse_address(input: &str) -> Result<LogicalAddress, AddressParseError> {
    let number = |digits: &str| {
        digits
            .parse::<u32>()
            .map_err(|_| AddressParseError::OutOfRange(digits.to_string()))
    };

    if let Some(caps) = LINEAR_ADDRESS_REGEX.captures(input) {
        return Ok(LogicalAddress::Linear(number(&caps[1])?));
    }

    if let Some(caps) = PAIR_ADDRESS_REGEX.captures(input) {
        let first = caps.get(1).or_else(|| caps.get(3));
        let second = caps.get(2).or_else(|| caps.get(4));
        if let (Some(a), Some(b)) = (first, second) {
            return Ok(LogicalAddress::Pair(number(a.as_str())?, number(b.as_str())?));
        }
    }

    Err(AddressParseError::Malformed(input.trim().to_string()))
}

/// Results file path for a layout file: `output_<name>` next to it
pub fn output_path_for<P: AsRef<Path>>(layout_path: P) -> PathBuf {
    let path = layout_path.as_ref();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{OUTPUT_PREFIX}{name}"))
}

/// Dump of every table in a layout
pub fn describe_layout(source: &str, layout: &MemoryLayout) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_layout(&mut out, source, layout);
    out
}

fn write_layout(out: &mut String, source: &str, layout: &MemoryLayout) -> fmt::Result {
    writeln!(out, "Processed file \"{source}\" with the following information:\n")?;
    writeln!(out, "Total number of processes: {}", layout.num_processes())?;

    writeln!(out, "\n\nBase/limit registers of each process:\n")?;
    for (i, p) in layout.processes().iter().enumerate() {
        writeln!(out, "\tProcess {i}: Base = {}, Limit = {}", p.partition.base, p.partition.limit)?;
    }

    writeln!(out, "\n\nSegmentation registers of each process:\n")?;
    for (i, p) in layout.processes().iter().enumerate() {
        writeln!(
            out,
            "\tProcess {i}: RBTS = {}, RLTS = {}",
            p.segment_window.base, p.segment_window.limit
        )?;
    }

    writeln!(out, "\n\nSegment descriptors of each process:\n")?;
    for (i, p) in layout.processes().iter().enumerate() {
        writeln!(out, "SDT entries of process {i}:")?;
        for index in p.segment_window.indices() {
            if let Some(segment) = layout.segment_table().get(index) {
                writeln!(out, "\t[{index}] {segment}")?;
            }
        }
    }

    writeln!(out, "\n\nPage size: {}", layout.page_size())?;

    writeln!(out, "\nPaging registers of each process:\n")?;
    for (i, p) in layout.processes().iter().enumerate() {
        writeln!(
            out,
            "\tProcess {i}: RBTP = {}, RLTP = {}",
            p.page_window.base, p.page_window.limit
        )?;
    }

    writeln!(out, "\n\nFrame of each page of each process:\n")?;
    for (i, p) in layout.processes().iter().enumerate() {
        match layout.paging_mode() {
            PagingMode::Global => writeln!(out, "Entries of process {i} in the global PMT:")?,
            PagingMode::PerProcess => writeln!(out, "Entries in the PMT of process {i}:")?,
        }
        for (index, frame) in layout.page_map_table().process_entries(i, p.page_window) {
            writeln!(out, "\t[{index}] {frame}")?;
        }
    }

    writeln!(out)
}

/// Report for one query across every process and scheme
pub fn render_query(
    layout: &MemoryLayout,
    address: LogicalAddress,
    results: &[ProcessTranslation],
) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_query(&mut out, layout, address, results);
    out
}

fn write_query(
    out: &mut String,
    layout: &MemoryLayout,
    address: LogicalAddress,
    results: &[ProcessTranslation],
) -> fmt::Result {
    let rule = "*".repeat(65);
    writeln!(out, "{rule}\n{rule}")?;
    writeln!(out, "\t\tLogical address: {address}\n\n")?;

    for result in results {
        let Some(process) = layout.process(result.process) else {
            continue;
        };

        writeln!(out, "\t\t----------------------------------")?;
        writeln!(out, "\t\tPhysical addresses of process {}", result.process)?;
        writeln!(out, "\t\t----------------------------------\n")?;

        for scheme in Scheme::ALL {
            let title = scheme.to_string();
            let stars = "*".repeat(title.len());
            writeln!(out, "{stars}\n{title}\n{stars}\n")?;

            let outcome = result.get(scheme);
            let incompatible = matches!(outcome, Err(TranslationError::IncompatibleFormat { .. }));
            if !incompatible {
                write_context(out, layout, process, scheme, address, outcome)?;
            }

            match (outcome, address) {
                (Ok(t), _) => write!(out, "\tPhysical address: {t}")?,
                (Err(e @ TranslationError::IncompatibleFormat { .. }), _) => write!(out, "\t{e}")?,
                (Err(TranslationError::InvalidPage { page, count }), LogicalAddress::Linear(d)) => {
                    write!(
                        out,
                        "\tError. Invalid page ({d}/{} = {page} > {})",
                        layout.page_size(),
                        count - 1
                    )?
                }
                (Err(e), _) => write!(out, "\tError. {e}")?,
            }
            writeln!(out, "\n\n")?;
        }
        writeln!(out, "\n\n")?;
    }

    Ok(())
}

/// Registers and table entries that explain a scheme's outcome
fn write_context(
    out: &mut String,
    layout: &MemoryLayout,
    process: &Process,
    scheme: Scheme,
    address: LogicalAddress,
    outcome: &TranslationResult,
) -> fmt::Result {
    match scheme {
        Scheme::BaseLimit => {
            let r = process.partition;
            writeln!(
                out,
                "\tBase: {}\tLimit: {}\t(Last address: {})\n",
                r.base,
                r.limit,
                r.last()
            )
        }
        Scheme::Segmentation => {
            let w = process.segment_window;
            writeln!(
                out,
                "\tNumber of segments of the process: {} (from {} to {})\n",
                w.count(),
                w.base,
                w.last()
            )?;
            if let LogicalAddress::Pair(segment, _) = address {
                if (segment as u64) < w.count() {
                    if let Some(descriptor) = layout.segment_table().get(w.base as u64 + segment as u64) {
                        writeln!(
                            out,
                            "\tSegment base: {}\tSegment limit: {}\n",
                            descriptor.base, descriptor.limit
                        )?;
                    }
                }
            }
            Ok(())
        }
        Scheme::Paging => {
            let size = layout.page_size().get();
            let w = process.page_window;
            writeln!(out, "\tPage size: {size} (from 0 to {})\n", size - 1)?;
            writeln!(
                out,
                "\tNumber of pages of the process: {} (from {} to {})\n",
                w.count(),
                w.base,
                w.last()
            )?;

            let resolved = match outcome {
                Ok(t) => match t.derivation {
                    Derivation::Frame { page, frame, .. } => Some((page, FrameEntry::Mapped(frame))),
                    Derivation::Offset { .. } => None,
                },
                Err(TranslationError::UnmappedFrame { page }) => Some((*page, FrameEntry::Unmapped)),
                Err(_) => None,
            };
            if let Some((page, frame)) = resolved {
                write!(out, "\tFrame holding page ")?;
                if let LogicalAddress::Linear(d) = address {
                    write!(out, "({d}/{size} = ) ")?;
                }
                writeln!(out, "{page}: {frame}\n")?;
            }
            Ok(())
        }
    }
}

/// Results file that every rendered query is appended to
pub struct ReportWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl ReportWriter {
    /// Create (or truncate) the results file
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let out = BufWriter::new(File::create(&path)?);
        Ok(ReportWriter { path, out })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, report: &str) -> io::Result<()> {
        self.out.write_all(report.as_bytes())?;
        self.out.flush()
    }
}
