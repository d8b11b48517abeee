//! The module resolver serving the stack walker.

use std::collections::HashMap;
use std::path::Path;

use log::warn;

use talus_common::ByteView;
use talus_debuginfo::breakpad::SymbolFile;
use talus_unwind::{
    CfiFrameInfo, StackFrame, SymbolProvider, WindowsFrameInfo, WindowsFrameInfoType,
};

use crate::cache::SymCache;
use crate::raw;
use crate::writer::SymCacheConverter;

/// A loaded module's cache bytes, guaranteed to be 8-byte aligned.
enum ModuleData {
    /// A memory mapping, which is page aligned.
    View(ByteView<'static>),
    /// An owned buffer with forced alignment.
    Owned(Vec<u64>, usize),
}

impl ModuleData {
    fn from_bytes(bytes: &[u8]) -> Self {
        let words = bytes.len().div_ceil(8);
        let mut storage = vec![0u64; words];
        // SAFETY: u64 storage reinterpreted as bytes is always valid.
        let target = unsafe {
            std::slice::from_raw_parts_mut(storage.as_mut_ptr() as *mut u8, bytes.len())
        };
        target.copy_from_slice(bytes);
        ModuleData::Owned(storage, bytes.len())
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            ModuleData::View(view) => view.as_slice(),
            ModuleData::Owned(storage, len) => {
                // SAFETY: the storage was sized to hold at least `len` bytes.
                unsafe { std::slice::from_raw_parts(storage.as_ptr() as *const u8, *len) }
            }
        }
    }
}

enum ModuleEntry {
    Loaded(ModuleData),
    Corrupt,
}

/// A symbol resolver over memory-mapped binary caches.
///
/// The resolver accepts both binary caches and symbol file text; text is
/// converted on load. Loaded modules are immutable, so a resolver can be
/// shared read-only across any number of walker threads.
///
/// Lookup fills the frame with the function physically containing the
/// address, appends synthetic frames for inlined calls innermost first, and
/// falls back to the public symbol table when no function record covers the
/// address.
#[derive(Default)]
pub struct FastResolver {
    modules: HashMap<String, ModuleEntry>,
}

impl FastResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads symbols for `module_id` from a file.
    ///
    /// The file may contain either the binary cache format, which is memory
    /// mapped, or symbol file text, which is converted in memory. Returns
    /// `false` if the file cannot be read or parsed; an unparsable file is
    /// remembered as corrupt.
    pub fn load_module(&mut self, module_id: &str, path: impl AsRef<Path>) -> bool {
        let view = match ByteView::open(path.as_ref()) {
            Ok(view) => view,
            Err(err) => {
                warn!("failed to read symbols for {}: {}", module_id, err);
                return false;
            }
        };

        if SymCache::test(&view) && raw::align_to_eight(view.as_slice().as_ptr() as usize) == 0 {
            return self.insert(module_id, ModuleData::View(view));
        }

        self.load_module_from_buffer(module_id, &view)
    }

    /// Loads symbols for `module_id` from an in-memory buffer.
    pub fn load_module_from_buffer(&mut self, module_id: &str, buffer: &[u8]) -> bool {
        if SymCache::test(buffer) {
            return self.insert(module_id, ModuleData::from_bytes(buffer));
        }

        if SymbolFile::test(buffer) {
            let symbol_file = match SymbolFile::parse(buffer) {
                Ok(symbol_file) => symbol_file,
                Err(err) => {
                    warn!("failed to parse symbols for {}: {}", module_id, err);
                    self.modules
                        .insert(module_id.to_string(), ModuleEntry::Corrupt);
                    return false;
                }
            };

            let (module, skipped) = match symbol_file.to_module() {
                Ok(result) => result,
                Err(err) => {
                    warn!("failed to parse symbols for {}: {}", module_id, err);
                    self.modules
                        .insert(module_id.to_string(), ModuleEntry::Corrupt);
                    return false;
                }
            };
            if skipped > 0 {
                warn!("skipped {} unknown records in symbols for {}", skipped, module_id);
            }

            let bytes = SymCacheConverter::serialize_module(&module);
            return self.insert(module_id, ModuleData::from_bytes(&bytes));
        }

        warn!("symbols for {} are in an unknown format", module_id);
        self.modules
            .insert(module_id.to_string(), ModuleEntry::Corrupt);
        false
    }

    fn insert(&mut self, module_id: &str, data: ModuleData) -> bool {
        match SymCache::parse(data.as_slice()) {
            Ok(_) => {
                self.modules
                    .insert(module_id.to_string(), ModuleEntry::Loaded(data));
                true
            }
            Err(err) => {
                warn!("corrupt symbol cache for {}: {}", module_id, err);
                self.modules
                    .insert(module_id.to_string(), ModuleEntry::Corrupt);
                false
            }
        }
    }

    /// Returns true if symbols for `module_id` are loaded.
    pub fn has_module(&self, module_id: &str) -> bool {
        matches!(self.modules.get(module_id), Some(ModuleEntry::Loaded(_)))
    }

    /// Returns true if loading symbols for `module_id` failed on corrupt
    /// data.
    pub fn is_module_corrupt(&self, module_id: &str) -> bool {
        matches!(self.modules.get(module_id), Some(ModuleEntry::Corrupt))
    }

    /// Removes the symbols loaded for `module_id`.
    pub fn unload_module(&mut self, module_id: &str) {
        self.modules.remove(module_id);
    }

    fn cache(&self, module_id: &str) -> Option<SymCache<'_>> {
        match self.modules.get(module_id)? {
            // The parse is cheap: header checks and slice casts only.
            ModuleEntry::Loaded(data) => SymCache::parse(data.as_slice()).ok(),
            ModuleEntry::Corrupt => None,
        }
    }
}

impl SymbolProvider for FastResolver {
    fn find_cfi_frame_info(&self, module: &str, address: u64) -> Option<CfiFrameInfo> {
        let cache = self.cache(module)?;
        let rules = cache.cfi_rules_for_address(address)?;
        Some(CfiFrameInfo::new(rules))
    }

    fn find_windows_frame_info(&self, module: &str, address: u64) -> Option<WindowsFrameInfo> {
        let cache = self.cache(module)?;
        let record = cache.stack_win_for_address(address)?;

        Some(WindowsFrameInfo {
            ty: if record.flags & raw::STACK_WIN_FRAME_DATA != 0 {
                WindowsFrameInfoType::FrameData
            } else {
                WindowsFrameInfoType::Fpo
            },
            prolog_size: record.prolog_size,
            epilog_size: record.epilog_size,
            parameter_size: record.parameter_size,
            saved_register_size: record.saved_register_size,
            local_size: record.local_size,
            max_stack_size: record.max_stack_size,
            allocates_base_pointer: record.flags & raw::STACK_WIN_ALLOCATES_BASE_POINTER != 0,
            program_string: cache.get_string(record.program_idx).map(str::to_string),
        })
    }

    fn fill_source_line_info(
        &self,
        module: &str,
        address: u64,
        frame: &mut StackFrame,
        inline_frames: &mut Vec<StackFrame>,
    ) {
        let cache = match self.cache(module) {
            Some(cache) => cache,
            None => return,
        };

        let chain: Vec<_> = cache.lookup(address).collect();

        match chain.last() {
            Some(outer) => {
                frame.function_name = outer.function_name.map(str::to_string);
                frame.function_base = outer.function_entry.unwrap_or(0);
                frame.source_file_name = outer.file.map(str::to_string);
                frame.source_line = outer.line as u64;
                frame.source_line_base = outer.range_start;
                frame.is_multiple = outer.function_flags & raw::FUNCTION_MULTIPLE != 0;

                for inner in &chain[..chain.len() - 1] {
                    let mut inline_frame = StackFrame::inline_frame(frame.instruction);
                    inline_frame.function_name = inner.function_name.map(str::to_string);
                    inline_frame.function_base = inner.range_start;
                    inline_frame.source_file_name = inner.file.map(str::to_string);
                    inline_frame.source_line = inner.line as u64;
                    inline_frame.source_line_base = inner.range_start;
                    inline_frames.push(inline_frame);
                }
            }
            None => {
                // No function covers the address; fall back to the public
                // symbol table.
                if let Some(public) = cache.public_for_address(address) {
                    frame.function_name = cache.get_string(public.name_idx).map(str::to_string);
                    frame.function_base = public.addr;
                    frame.is_multiple = public.flags & raw::FUNCTION_MULTIPLE != 0;
                }
            }
        }
    }
}
