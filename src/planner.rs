/// Resources below this size are fetched as a single chunk by default.
pub const SINGLE_CHUNK_THRESHOLD: u64 = 100 * 1024 * 1024;

/// One contiguous byte range of the resource, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Decides the chunk count for a resource of `total_size` bytes and splits
/// it into ranges. Small resources are never split; a non-positive
/// `parallelism` means one chunk per logical CPU.
pub fn plan_ranges(total_size: u64, parallelism: i32, single_chunk_threshold: u64) -> Vec<ByteRange> {
    let chunk_count = if total_size < single_chunk_threshold {
        1
    } else if parallelism <= 0 {
        num_cpus::get()
    } else {
        parallelism as usize
    };
    split_ranges(total_size, chunk_count)
}

/// Splits `[0, total_size)` into `chunk_count` contiguous ranges: the first
/// `n - 1` are `total_size / n` bytes each, the last absorbs the remainder.
/// The count is clamped so no range is ever empty.
pub fn split_ranges(total_size: u64, chunk_count: usize) -> Vec<ByteRange> {
    let n = (chunk_count as u64).clamp(1, total_size.max(1));
    let part = total_size / n;

    let mut ranges = Vec::with_capacity(n as usize);
    for i in 0..n - 1 {
        ranges.push(ByteRange {
            start: i * part,
            end: (i + 1) * part - 1,
        });
    }

    let start = ranges.last().map_or(0, |r| r.end + 1);
    ranges.push(ByteRange {
        start,
        end: total_size.saturating_sub(1),
    });
    ranges
}
