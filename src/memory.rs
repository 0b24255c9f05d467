use std::fmt;
use std::num::NonZeroU32;

use crate::constants::*;

/// A (base, limit) pair. The indices it covers are `base..=base + limit`,
/// so `limit` is a count minus one rather than a length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Record {
    pub base: u32,
    pub limit: u32,
}

impl Record {
    pub const fn new(base: u32, limit: u32) -> Self {
        Record { base, limit }
    }

    /// Number of entries covered by this record
    #[inline]
    pub fn count(&self) -> u64 {
        self.limit as u64 + 1
    }

    /// Last index covered by this record (inclusive)
    #[inline]
    pub fn last(&self) -> u64 {
        self.base as u64 + self.limit as u64
    }

    #[inline]
    pub fn contains(&self, index: u64) -> bool {
        index >= self.base as u64 && index <= self.last()
    }

    pub fn overlaps(&self, other: &Record) -> bool {
        self.base as u64 <= other.last() && other.base as u64 <= self.last()
    }

    /// Iterate over the table indices covered by this record
    pub fn indices(&self) -> impl Iterator<Item = u64> {
        self.base as u64..=self.last()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.base, self.limit)
    }
}

/// One slot of a page map table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEntry {
    Mapped(u32),
    Unmapped,
}

impl FrameEntry {
    /// Convert a raw table value, where `-1` marks an unmapped page.
    /// Returns `None` for any other negative value or one that does not fit a frame number.
    pub fn from_raw(raw: i64) -> Option<Self> {
        if raw == UNMAPPED_FRAME {
            Some(FrameEntry::Unmapped)
        } else {
            u32::try_from(raw).ok().map(FrameEntry::Mapped)
        }
    }

    pub fn to_raw(&self) -> i64 {
        match self {
            FrameEntry::Mapped(frame) => *frame as i64,
            FrameEntry::Unmapped => UNMAPPED_FRAME,
        }
    }
}

impl fmt::Display for FrameEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_raw())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingMode {
    /// One PMT shared by every process, indexed through each page window
    Global,
    /// One private PMT per process, indexed from 0
    PerProcess,
}

impl PagingMode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            PAGING_MODE_GLOBAL => Some(PagingMode::Global),
            PAGING_MODE_PER_PROCESS => Some(PagingMode::PerProcess),
            _ => None,
        }
    }
}

impl fmt::Display for PagingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagingMode::Global => write!(f, "global PMT"),
            PagingMode::PerProcess => write!(f, "PMT per process"),
        }
    }
}

/// Segment Descriptor Table shared by all processes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentTable {
    entries: Vec<Option<Record>>,
}

impl SegmentTable {
    /// Build a fully populated table, with entry `i` at index `i`
    pub fn from_records(records: Vec<Record>) -> Self {
        SegmentTable {
            entries: records.into_iter().map(Some).collect(),
        }
    }

    /// Get a segment descriptor. Slots between process windows are empty.
    #[inline]
    pub fn get(&self, index: u64) -> Option<Record> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(i).copied().flatten())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fill(&mut self, window: Record, segments: &[Record]) {
        let needed = window.last() as usize + 1;
        if self.entries.len() < needed {
            self.entries.resize(needed, None);
        }
        for (index, segment) in window.indices().zip(segments) {
            self.entries[index as usize] = Some(*segment);
        }
    }
}

/// Page Map Table in either of its two storage modes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageMapTable {
    Global(Vec<FrameEntry>),
    PerProcess(Vec<Vec<FrameEntry>>),
}

impl PageMapTable {
    pub fn empty(mode: PagingMode) -> Self {
        match mode {
            PagingMode::Global => PageMapTable::Global(Vec::new()),
            PagingMode::PerProcess => PageMapTable::PerProcess(Vec::new()),
        }
    }

    pub fn mode(&self) -> PagingMode {
        match self {
            PageMapTable::Global(_) => PagingMode::Global,
            PageMapTable::PerProcess(_) => PagingMode::PerProcess,
        }
    }

    /// Look up the frame holding `page` of `process`.
    ///
    /// The global table is indexed through the window base, a private table
    /// directly by page number. The caller is expected to have checked `page`
    /// against the window already; anything outside the stored table reads
    /// as unmapped.
    pub fn resolve_frame(&self, process: usize, window: Record, page: u32) -> FrameEntry {
        let entry = match self {
            PageMapTable::Global(entries) => {
                let index = window.base as u64 + page as u64;
                usize::try_from(index).ok().and_then(|i| entries.get(i))
            }
            PageMapTable::PerProcess(tables) => tables
                .get(process)
                .and_then(|table| table.get(page as usize)),
        };
        entry.copied().unwrap_or(FrameEntry::Unmapped)
    }

    /// The entries owned by a process, paired with the index they are stored at
    pub fn process_entries(&self, process: usize, window: Record) -> Vec<(u64, FrameEntry)> {
        match self {
            PageMapTable::Global(_) => window
                .indices()
                .map(|index| {
                    let page = (index - window.base as u64) as u32;
                    (index, self.resolve_frame(process, window, page))
                })
                .collect(),
            PageMapTable::PerProcess(tables) => tables
                .get(process)
                .map(|table| {
                    table
                        .iter()
                        .enumerate()
                        .map(|(page, frame)| (page as u64, *frame))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Which shared table a window belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Sdt,
    Pmt,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Sdt => write!(f, "SDT"),
            TableKind::Pmt => write!(f, "PMT"),
        }
    }
}

/// Structural problems found while assembling a layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    NoProcesses,
    TooManyProcesses(usize),
    OverlappingWindows {
        table: TableKind,
        first: usize,
        second: usize,
    },
    TableTooLarge {
        table: TableKind,
        process: usize,
        index: u64,
    },
    EntryCount {
        table: TableKind,
        process: usize,
        expected: u64,
        found: usize,
    },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProcesses => write!(f, "Layout has no processes"),
            Self::TooManyProcesses(n) => {
                write!(f, "Too many processes: {n} (max {MAX_PROCESSES})")
            }
            Self::OverlappingWindows {
                table,
                first,
                second,
            } => write!(
                f,
                "{table} windows of processes {first} and {second} overlap in the shared table"
            ),
            Self::TableTooLarge {
                table,
                process,
                index,
            } => {
                let max = match table {
                    TableKind::Sdt => MAX_SEGMENTS,
                    TableKind::Pmt => MAX_PAGES,
                };
                write!(
                    f,
                    "{table} window of process {process} reaches index {index} (max {})",
                    max - 1
                )
            }
            Self::EntryCount {
                table,
                process,
                expected,
                found,
            } => write!(
                f,
                "Process {process} needs {expected} {table} entries, got {found}"
            ),
        }
    }
}

impl std::error::Error for LayoutError {}

/// The registers a single process owns under each scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Process {
    /// Base/limit partition
    pub partition: Record,
    /// Window into the SDT (RBTS/RLTS)
    pub segment_window: Record,
    /// Window into the PMT (RBTP/RLTP)
    pub page_window: Record,
}

/// Every table the translator reads. Only `LayoutBuilder` creates one,
/// so process windows into the shared tables are always disjoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    processes: Vec<Process>,
    sdt: SegmentTable,
    pmt: PageMapTable,
    page_size: NonZeroU32,
}

impl MemoryLayout {
    pub fn num_processes(&self) -> usize {
        self.processes.len()
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn process(&self, id: usize) -> Option<&Process> {
        self.processes.get(id)
    }

    pub fn segment_table(&self) -> &SegmentTable {
        &self.sdt
    }

    pub fn page_map_table(&self) -> &PageMapTable {
        &self.pmt
    }

    pub fn page_size(&self) -> NonZeroU32 {
        self.page_size
    }

    pub fn paging_mode(&self) -> PagingMode {
        self.pmt.mode()
    }
}

pub struct LayoutBuilder {
    processes: Vec<Process>,
    sdt: SegmentTable,
    pmt: PageMapTable,
    page_size: NonZeroU32,
}

impl LayoutBuilder {
    pub fn new(page_size: NonZeroU32, mode: PagingMode) -> Self {
        LayoutBuilder {
            processes: Vec::new(),
            sdt: SegmentTable::default(),
            pmt: PageMapTable::empty(mode),
            page_size,
        }
    }

    /// Add the next process along with the SDT entries and PMT entries its
    /// windows cover. Returns the new process index.
    ///
    /// Nothing is modified when an error is returned.
    pub fn add_process(
        &mut self,
        process: Process,
        segments: &[Record],
        frames: &[FrameEntry],
    ) -> Result<usize, LayoutError> {
        let id = self.processes.len();
        if id >= MAX_PROCESSES {
            return Err(LayoutError::TooManyProcesses(id + 1));
        }

        // Segment window checks
        let window = process.segment_window;
        if window.count() != segments.len() as u64 {
            return Err(LayoutError::EntryCount {
                table: TableKind::Sdt,
                process: id,
                expected: window.count(),
                found: segments.len(),
            });
        }
        if window.last() >= MAX_SEGMENTS as u64 {
            return Err(LayoutError::TableTooLarge {
                table: TableKind::Sdt,
                process: id,
                index: window.last(),
            });
        }
        if let Some(other) = self
            .processes
            .iter()
            .position(|p| p.segment_window.overlaps(&window))
        {
            return Err(LayoutError::OverlappingWindows {
                table: TableKind::Sdt,
                first: other,
                second: id,
            });
        }

        // Page window checks
        let window = process.page_window;
        if window.count() != frames.len() as u64 {
            return Err(LayoutError::EntryCount {
                table: TableKind::Pmt,
                process: id,
                expected: window.count(),
                found: frames.len(),
            });
        }
        match self.pmt.mode() {
            PagingMode::Global => {
                if window.last() >= MAX_PAGES as u64 {
                    return Err(LayoutError::TableTooLarge {
                        table: TableKind::Pmt,
                        process: id,
                        index: window.last(),
                    });
                }
                if let Some(other) = self
                    .processes
                    .iter()
                    .position(|p| p.page_window.overlaps(&window))
                {
                    return Err(LayoutError::OverlappingWindows {
                        table: TableKind::Pmt,
                        first: other,
                        second: id,
                    });
                }
            }
            PagingMode::PerProcess => {
                if window.count() > MAX_PAGES as u64 {
                    return Err(LayoutError::TableTooLarge {
                        table: TableKind::Pmt,
                        process: id,
                        index: window.limit as u64,
                    });
                }
            }
        }

        self.sdt.fill(process.segment_window, segments);
        match &mut self.pmt {
            PageMapTable::Global(entries) => {
                let needed = window.last() as usize + 1;
                if entries.len() < needed {
                    entries.resize(needed, FrameEntry::Unmapped);
                }
                for (index, frame) in window.indices().zip(frames) {
                    entries[index as usize] = *frame;
                }
            }
            PageMapTable::PerProcess(tables) => tables.push(frames.to_vec()),
        }
        self.processes.push(process);

        Ok(id)
    }

    pub fn build(self) -> Result<MemoryLayout, LayoutError> {
        if self.processes.is_empty() {
            return Err(LayoutError::NoProcesses);
        }

        Ok(MemoryLayout {
            processes: self.processes,
            sdt: self.sdt,
            pmt: self.pmt,
            page_size: self.page_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_size(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    fn mapped(frames: &[u32]) -> Vec<FrameEntry> {
        frames.iter().map(|&f| FrameEntry::Mapped(f)).collect()
    }

    #[test]
    fn test_record_ranges() {
        let r = Record::new(27, 105);
        assert_eq!(r.count(), 106);
        assert_eq!(r.last(), 132);
        assert!(r.contains(27));
        assert!(r.contains(132));
        assert!(!r.contains(133));
        assert!(!r.contains(26));

        // limit 0 still covers one slot
        let single = Record::new(4, 0);
        assert_eq!(single.count(), 1);
        assert_eq!(single.indices().collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_record_overlap() {
        let a = Record::new(0, 3); // 0..=3
        let b = Record::new(4, 3); // 4..=7
        let c = Record::new(3, 0); // 3..=3
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&a));
        assert!(!b.overlaps(&c));
    }

    #[test]
    fn test_record_no_overflow_at_max() {
        let r = Record::new(u32::MAX, u32::MAX);
        assert_eq!(r.count(), u32::MAX as u64 + 1);
        assert_eq!(r.last(), 2 * u32::MAX as u64);
    }

    #[test]
    fn test_frame_entry_raw_conversion() {
        assert_eq!(FrameEntry::from_raw(-1), Some(FrameEntry::Unmapped));
        assert_eq!(FrameEntry::from_raw(0), Some(FrameEntry::Mapped(0)));
        assert_eq!(FrameEntry::from_raw(7), Some(FrameEntry::Mapped(7)));
        assert_eq!(FrameEntry::from_raw(-2), None);
        assert_eq!(FrameEntry::Unmapped.to_raw(), -1);
        assert_eq!(FrameEntry::Mapped(9).to_string(), "9");
    }

    #[test]
    fn test_paging_mode_codes() {
        assert_eq!(PagingMode::from_code(0), Some(PagingMode::Global));
        assert_eq!(PagingMode::from_code(1), Some(PagingMode::PerProcess));
        assert_eq!(PagingMode::from_code(2), None);
        assert_eq!(PagingMode::from_code(-1), None);
    }

    #[test]
    fn test_segment_table_lookup() {
        let sdt = SegmentTable::from_records(vec![Record::new(1500, 408), Record::new(500, 85)]);
        assert_eq!(sdt.len(), 2);
        assert_eq!(sdt.get(1), Some(Record::new(500, 85)));
        assert_eq!(sdt.get(2), None);
    }

    #[test]
    fn test_global_pmt_resolves_through_window_base() {
        let pmt = PageMapTable::Global(mapped(&[0, 1, 3, 7, 10, 2, 4]));
        let window = Record::new(4, 2);
        assert_eq!(pmt.resolve_frame(1, window, 0), FrameEntry::Mapped(10));
        assert_eq!(pmt.resolve_frame(1, window, 2), FrameEntry::Mapped(4));
        // Past the end of storage reads as unmapped
        assert_eq!(pmt.resolve_frame(1, window, 5), FrameEntry::Unmapped);
    }

    #[test]
    fn test_per_process_pmt_ignores_window_base() {
        let pmt = PageMapTable::PerProcess(vec![mapped(&[0, 1, 3, 7]), mapped(&[5, 6])]);
        let window = Record::new(40, 1);
        assert_eq!(pmt.resolve_frame(1, window, 0), FrameEntry::Mapped(5));
        assert_eq!(pmt.resolve_frame(1, window, 1), FrameEntry::Mapped(6));
        assert_eq!(pmt.resolve_frame(2, window, 0), FrameEntry::Unmapped);
    }

    #[test]
    fn test_builder_fills_shared_tables() {
        let mut builder = LayoutBuilder::new(page_size(100), PagingMode::Global);
        let p0 = Process {
            partition: Record::new(27, 105),
            segment_window: Record::new(4, 3),
            page_window: Record::new(0, 3),
        };
        let p1 = Process {
            partition: Record::new(550, 1401),
            segment_window: Record::new(0, 3),
            page_window: Record::new(4, 6),
        };
        let seg0 = [
            Record::new(1500, 408),
            Record::new(500, 85),
            Record::new(746, 103),
            Record::new(234, 40),
        ];
        let seg1 = [
            Record::new(101, 300),
            Record::new(599, 700),
            Record::new(2000, 670),
            Record::new(3690, 210),
        ];
        assert_eq!(builder.add_process(p0, &seg0, &mapped(&[0, 1, 3, 7])), Ok(0));
        assert_eq!(
            builder.add_process(p1, &seg1, &mapped(&[10, 2, 4, 6, 9, 5, 8])),
            Ok(1)
        );

        let layout = builder.build().unwrap();
        assert_eq!(layout.num_processes(), 2);
        assert_eq!(layout.paging_mode(), PagingMode::Global);
        assert_eq!(layout.segment_table().len(), 8);
        assert_eq!(layout.segment_table().get(4), Some(Record::new(1500, 408)));
        assert_eq!(layout.segment_table().get(0), Some(Record::new(101, 300)));
        assert_eq!(
            layout.page_map_table(),
            &PageMapTable::Global(mapped(&[0, 1, 3, 7, 10, 2, 4, 6, 9, 5, 8]))
        );
    }

    #[test]
    fn test_builder_leaves_gaps_empty() {
        let mut builder = LayoutBuilder::new(page_size(10), PagingMode::Global);
        let p = Process {
            partition: Record::new(0, 10),
            segment_window: Record::new(2, 0),
            page_window: Record::new(3, 0),
        };
        builder.add_process(p, &[Record::new(5, 5)], &mapped(&[8])).unwrap();
        let layout = builder.build().unwrap();

        assert_eq!(layout.segment_table().get(0), None);
        assert_eq!(layout.segment_table().get(2), Some(Record::new(5, 5)));
        assert_eq!(
            layout.page_map_table(),
            &PageMapTable::Global(vec![
                FrameEntry::Unmapped,
                FrameEntry::Unmapped,
                FrameEntry::Unmapped,
                FrameEntry::Mapped(8),
            ])
        );
    }

    #[test]
    fn test_builder_rejects_overlapping_segment_windows() {
        let mut builder = LayoutBuilder::new(page_size(100), PagingMode::PerProcess);
        let p0 = Process {
            partition: Record::new(0, 1),
            segment_window: Record::new(0, 2),
            page_window: Record::new(0, 0),
        };
        let p1 = Process {
            segment_window: Record::new(2, 1),
            ..p0
        };
        let segs = [Record::new(1, 1); 3];
        builder.add_process(p0, &segs, &mapped(&[1])).unwrap();

        let err = builder.add_process(p1, &segs[..2], &mapped(&[1])).unwrap_err();
        assert_eq!(
            err,
            LayoutError::OverlappingWindows {
                table: TableKind::Sdt,
                first: 0,
                second: 1
            }
        );

        // The failed process was not recorded
        assert_eq!(builder.build().unwrap().num_processes(), 1);
    }

    #[test]
    fn test_builder_page_overlap_only_matters_for_global_pmt() {
        let p0 = Process {
            partition: Record::new(0, 1),
            segment_window: Record::new(0, 0),
            page_window: Record::new(0, 3),
        };
        let p1 = Process {
            segment_window: Record::new(1, 0),
            ..p0
        };
        let seg = [Record::new(0, 0)];
        let frames = mapped(&[0, 1, 3, 7]);

        let mut global = LayoutBuilder::new(page_size(100), PagingMode::Global);
        global.add_process(p0, &seg, &frames).unwrap();
        assert_eq!(
            global.add_process(p1, &seg, &frames),
            Err(LayoutError::OverlappingWindows {
                table: TableKind::Pmt,
                first: 0,
                second: 1
            })
        );

        let mut private = LayoutBuilder::new(page_size(100), PagingMode::PerProcess);
        private.add_process(p0, &seg, &frames).unwrap();
        assert_eq!(private.add_process(p1, &seg, &frames), Ok(1));
    }

    #[test]
    fn test_builder_checks_entry_counts() {
        let mut builder = LayoutBuilder::new(page_size(100), PagingMode::Global);
        let p = Process {
            partition: Record::new(0, 1),
            segment_window: Record::new(0, 1),
            page_window: Record::new(0, 1),
        };
        assert_eq!(
            builder.add_process(p, &[Record::new(0, 0)], &mapped(&[1, 2])),
            Err(LayoutError::EntryCount {
                table: TableKind::Sdt,
                process: 0,
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            builder.add_process(p, &[Record::new(0, 0); 2], &mapped(&[1])),
            Err(LayoutError::EntryCount {
                table: TableKind::Pmt,
                process: 0,
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_builder_enforces_table_limits() {
        let mut builder = LayoutBuilder::new(page_size(100), PagingMode::Global);
        let p = Process {
            partition: Record::new(0, 1),
            segment_window: Record::new(MAX_SEGMENTS as u32, 0),
            page_window: Record::new(0, 0),
        };
        assert!(matches!(
            builder.add_process(p, &[Record::new(0, 0)], &mapped(&[1])),
            Err(LayoutError::TableTooLarge {
                table: TableKind::Sdt,
                ..
            })
        ));
    }

    #[test]
    fn test_build_requires_a_process() {
        let builder = LayoutBuilder::new(page_size(100), PagingMode::Global);
        assert_eq!(builder.build(), Err(LayoutError::NoProcesses));
    }
}
