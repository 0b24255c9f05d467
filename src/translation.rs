use std::fmt;
use std::num::NonZeroU32;

use crate::memory::{FrameEntry, MemoryLayout, PageMapTable, Process, Record, SegmentTable};

pub type PhysicalAddress = u64;

/// A logical address in one of the two accepted shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalAddress {
    /// Single offset, e.g. `306`
    Linear(u32),
    /// Segment or page number plus offset, e.g. `(2,46)`
    Pair(u32, u32),
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalAddress::Linear(d) => write!(f, "{}", d),
            LogicalAddress::Pair(n, d) => write!(f, "({},{})", n, d),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    BaseLimit,
    Segmentation,
    Paging,
}

impl Scheme {
    pub const ALL: [Scheme; 3] = [Scheme::BaseLimit, Scheme::Segmentation, Scheme::Paging];
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::BaseLimit => write!(f, "Base/Limit"),
            Scheme::Segmentation => write!(f, "Segmentation"),
            Scheme::Paging => write!(f, "Paging"),
        }
    }
}

/// The operands that produced a physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    /// `base + offset`, used by base/limit and segmentation
    Offset { base: u32, offset: u32 },
    /// `frame * page_size + offset`
    Frame {
        page: u32,
        frame: u32,
        page_size: u32,
        offset: u32,
    },
}

impl fmt::Display for Derivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Derivation::Offset { base, offset } => write!(f, "({} + {})", base, offset),
            Derivation::Frame {
                frame,
                page_size,
                offset,
                ..
            } => write!(f, "({}*{} + {})", frame, page_size, offset),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub physical: PhysicalAddress,
    pub derivation: Derivation,
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.physical, self.derivation)
    }
}

/// Why a single scheme could not translate an address. None of these are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationError {
    /// The address shape does not apply to this scheme
    IncompatibleFormat { scheme: Scheme },
    InvalidSegment { segment: u32, count: u64 },
    InvalidPage { page: u32, count: u64 },
    /// Offset past the partition/segment limit, or past the last word of a page
    OutOfBounds { offset: u32, limit: u32 },
    UnmappedFrame { page: u32 },
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompatibleFormat { scheme } => {
                write!(f, "Incompatible address format for {scheme}")
            }
            Self::InvalidSegment { segment, count } => {
                write!(f, "Invalid segment ({segment} > {})", count - 1)
            }
            Self::InvalidPage { page, count } => {
                write!(f, "Invalid page ({page} > {})", count - 1)
            }
            Self::OutOfBounds { offset, limit } => {
                write!(f, "Address out of bounds ({offset} > {limit})")
            }
            Self::UnmappedFrame { page } => write!(f, "Page {page} has no valid frame"),
        }
    }
}

impl std::error::Error for TranslationError {}

pub type TranslationResult = Result<Translation, TranslationError>;

/// Base/limit: `base + offset` as long as `offset <= limit`
pub fn translate_base_limit(record: Record, offset: u32) -> TranslationResult {
    if offset > record.limit {
        return Err(TranslationError::OutOfBounds {
            offset,
            limit: record.limit,
        });
    }

    Ok(Translation {
        physical: record.base as u64 + offset as u64,
        derivation: Derivation::Offset {
            base: record.base,
            offset,
        },
    })
}

/// Segmentation: select the descriptor `window.base + segment` from the SDT,
/// then apply it as a base/limit pair
pub fn translate_segment(
    sdt: &SegmentTable,
    window: Record,
    segment: u32,
    offset: u32,
) -> TranslationResult {
    let count = window.count();
    if segment as u64 >= count {
        return Err(TranslationError::InvalidSegment { segment, count });
    }

    // An empty slot inside a window cannot come out of LayoutBuilder
    let descriptor = sdt
        .get(window.base as u64 + segment as u64)
        .ok_or(TranslationError::InvalidSegment { segment, count })?;

    translate_base_limit(descriptor, offset)
}

/// Split a single-offset address into (page, offset)
#[inline]
pub fn split_linear(address: u32, page_size: NonZeroU32) -> (u32, u32) {
    (address / page_size, address % page_size)
}

/// Paging: `frame * page_size + offset` for the frame holding `page`
pub fn translate_page(
    pmt: &PageMapTable,
    process: usize,
    window: Record,
    page_size: NonZeroU32,
    page: u32,
    offset: u32,
) -> TranslationResult {
    let count = window.count();
    if page as u64 >= count {
        return Err(TranslationError::InvalidPage { page, count });
    }

    if offset >= page_size.get() {
        return Err(TranslationError::OutOfBounds {
            offset,
            limit: page_size.get() - 1,
        });
    }

    match pmt.resolve_frame(process, window, page) {
        FrameEntry::Unmapped => Err(TranslationError::UnmappedFrame { page }),
        FrameEntry::Mapped(frame) => Ok(Translation {
            physical: frame as u64 * page_size.get() as u64 + offset as u64,
            derivation: Derivation::Frame {
                page,
                frame,
                page_size: page_size.get(),
                offset,
            },
        }),
    }
}

fn translate_with(
    layout: &MemoryLayout,
    id: usize,
    process: &Process,
    scheme: Scheme,
    address: LogicalAddress,
) -> TranslationResult {
    match (scheme, address) {
        (Scheme::BaseLimit, LogicalAddress::Linear(d)) => {
            translate_base_limit(process.partition, d)
        }
        (Scheme::Segmentation, LogicalAddress::Pair(s, d)) => {
            translate_segment(layout.segment_table(), process.segment_window, s, d)
        }
        (Scheme::Paging, address) => {
            let page_size = layout.page_size();
            let (page, offset) = match address {
                LogicalAddress::Linear(d) => split_linear(d, page_size),
                LogicalAddress::Pair(p, d) => (p, d),
            };
            translate_page(
                layout.page_map_table(),
                id,
                process.page_window,
                page_size,
                page,
                offset,
            )
        }
        (scheme, _) => Err(TranslationError::IncompatibleFormat { scheme }),
    }
}

/// Translate an address for one process under one scheme.
/// Returns `None` if the process does not exist.
pub fn translate(
    layout: &MemoryLayout,
    process: usize,
    scheme: Scheme,
    address: LogicalAddress,
) -> Option<TranslationResult> {
    let p = layout.process(process)?;
    Some(translate_with(layout, process, p, scheme, address))
}

/// Outcome of one query for one process, one result per scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTranslation {
    pub process: usize,
    pub base_limit: TranslationResult,
    pub segmentation: TranslationResult,
    pub paging: TranslationResult,
}

impl ProcessTranslation {
    pub fn get(&self, scheme: Scheme) -> &TranslationResult {
        match scheme {
            Scheme::BaseLimit => &self.base_limit,
            Scheme::Segmentation => &self.segmentation,
            Scheme::Paging => &self.paging,
        }
    }

    /// Physical address for a scheme, if it translated
    pub fn physical(&self, scheme: Scheme) -> Option<PhysicalAddress> {
        self.get(scheme).as_ref().ok().map(|t| t.physical)
    }

    pub fn successes(&self) -> usize {
        Scheme::ALL
            .iter()
            .filter(|&&scheme| self.get(scheme).is_ok())
            .count()
    }
}

pub fn translate_process(
    layout: &MemoryLayout,
    process: usize,
    address: LogicalAddress,
) -> Option<ProcessTranslation> {
    let p = layout.process(process)?;
    Some(ProcessTranslation {
        process,
        base_limit: translate_with(layout, process, p, Scheme::BaseLimit, address),
        segmentation: translate_with(layout, process, p, Scheme::Segmentation, address),
        paging: translate_with(layout, process, p, Scheme::Paging, address),
    })
}

/// Translate an address for every process in the layout
pub fn translate_all(layout: &MemoryLayout, address: LogicalAddress) -> Vec<ProcessTranslation> {
    (0..layout.num_processes())
        .filter_map(|id| translate_process(layout, id, address))
        .collect()
}
