#![forbid(unsafe_code)]
//! Single-page zstd codec with an adaptive level policy.
//!
//! Pages compress individually; the level for the next page is chosen from
//! how well the previous one compressed (ratio feedback). Passing level `0`
//! instead derives the level from the Shannon entropy of the input.

use pagecore_error::{PcError, Result};
use pagecore_types::PAGE_SIZE;
use tracing::trace;

/// Worst-case compressed size for an input of `len` bytes.
#[must_use]
pub fn compress_bound(len: usize) -> usize {
    zstd::zstd_safe::compress_bound(len)
}

/// Compress one page at `level`.
///
/// Level `0` selects the level from the input's entropy (see
/// [`entropy_level`]); any other value is passed to the codec as-is.
pub fn compress_page(page: &[u8], level: i32) -> Result<Vec<u8>> {
    let level = if level == 0 {
        entropy_level(page)
    } else {
        level
    };
    let out =
        zstd::bulk::compress(page, level).map_err(|err| PcError::Compress(err.to_string()))?;
    trace!(
        target: "pagecore::compress",
        event = "page_compressed",
        in_len = page.len(),
        out_len = out.len(),
        level
    );
    Ok(out)
}

/// Decompress `bytes` into a full page, returning the byte count written.
///
/// Fails if the payload does not decode or decodes to more than
/// `out.len()` bytes.
pub fn decompress_page(bytes: &[u8], out: &mut [u8]) -> Result<usize> {
    let decoded = zstd::bulk::decompress(bytes, out.len())
        .map_err(|err| PcError::Decompress(err.to_string()))?;
    out[..decoded.len()].copy_from_slice(&decoded);
    Ok(decoded.len())
}

/// Shannon entropy of `data` in bits per byte, within `[0, 8]`.
#[must_use]
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0_u64; 256];
    for byte in data {
        counts[usize::from(*byte)] += 1;
    }
    let len = data.len() as f64;
    let mut entropy = 0.0;
    for count in counts {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}

/// Entropy-driven level: cheap for low-entropy pages, harder for noise.
#[must_use]
pub fn entropy_level(data: &[u8]) -> i32 {
    let h = shannon_entropy(data);
    if h < 4.0 {
        1
    } else if h < 6.0 {
        3
    } else {
        5
    }
}

/// Ratio-feedback level selection.
///
/// Remembers the previous compressed size; a ratio above the threshold
/// means the data compressed poorly, so the next page gets the maximum
/// level, otherwise the minimum. Seeded with a full page so the very first
/// pick is the maximum.
#[derive(Debug, Clone)]
pub struct AdaptiveLevel {
    last_compressed: usize,
    min_level: i32,
    max_level: i32,
    threshold: f64,
}

impl AdaptiveLevel {
    #[must_use]
    pub fn new(min_level: i32, max_level: i32, threshold: f64) -> Self {
        Self {
            last_compressed: PAGE_SIZE,
            min_level,
            max_level,
            threshold,
        }
    }

    /// Level to use for the next page.
    #[must_use]
    pub fn level(&self) -> i32 {
        let ratio = self.last_compressed as f64 / PAGE_SIZE as f64;
        if ratio > self.threshold {
            self.max_level
        } else {
            self.min_level
        }
    }

    /// Record the compressed size of the page just written.
    pub fn record(&mut self, compressed_len: usize) {
        self.last_compressed = compressed_len;
    }
}

impl Default for AdaptiveLevel {
    fn default() -> Self {
        Self::new(
            pagecore_types::COMPRESSION_MIN_LVL,
            pagecore_types::COMPRESSION_MAX_LVL,
            pagecore_types::COMPRESSION_ADAPTIVE_THRESHOLD,
        )
    }
}
