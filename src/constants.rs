pub const MAX_PROCESSES: usize = 100;
pub const MAX_SEGMENTS: usize = 100;
pub const MAX_PAGES: usize = 100;

/// Raw frame value used by layout files for a page with no frame
pub const UNMAPPED_FRAME: i64 = -1;

pub const PAGING_MODE_GLOBAL: i64 = 0;
pub const PAGING_MODE_PER_PROCESS: i64 = 1;

pub const LAYOUT_LINES: usize = 8;
pub const OUTPUT_PREFIX: &str = "output_";
