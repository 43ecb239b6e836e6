//! Memory usage helpers for a VM's isolate.

use std::fmt;

use rquickjs::Runtime;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub malloc_size: u64,
    pub malloc_limit: u64,
    pub memory_used_size: u64,
    pub object_count: u64,
    pub string_count: u64,
    pub atom_count: u64,
    pub function_count: u64,
    pub array_count: u64,
}

fn clamp<T: TryInto<u64>>(value: T) -> u64 {
    value.try_into().unwrap_or(0)
}

pub(crate) fn runtime_memory_stats(runtime: &Runtime) -> MemoryStats {
    let usage = runtime.memory_usage();
    MemoryStats {
        malloc_size: clamp(usage.malloc_size),
        malloc_limit: clamp(usage.malloc_limit),
        memory_used_size: clamp(usage.memory_used_size),
        object_count: clamp(usage.obj_count),
        string_count: clamp(usage.str_count),
        atom_count: clamp(usage.atom_count),
        function_count: clamp(usage.js_func_count),
        array_count: clamp(usage.array_count),
    }
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "malloc_size: {}", self.malloc_size)?;
        writeln!(f, "malloc_limit: {}", self.malloc_limit)?;
        writeln!(f, "memory_used_size: {}", self.memory_used_size)?;
        writeln!(f, "objects: {}", self.object_count)?;
        writeln!(f, "strings: {}", self.string_count)?;
        writeln!(f, "atoms: {}", self.atom_count)?;
        writeln!(f, "functions: {}", self.function_count)?;
        write!(f, "arrays: {}", self.array_count)
    }
}
