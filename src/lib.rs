pub mod constants;
pub mod io;
pub mod memory;
pub mod translation;

// Re-export commonly used items for convenience
pub use memory::{FrameEntry, LayoutBuilder, MemoryLayout, PagingMode, Process, Record};
pub use translation::{
    LogicalAddress, ProcessTranslation, Scheme, TranslationError, TranslationResult,
};
