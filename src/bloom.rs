//! Probabilistic skip list: a Bloom filter over already-rejected candidates.
//!
//! Membership answers are one-sided: `contains` returning `false` means the
//! candidate was never inserted, `true` means it probably was. The filter is
//! sized from an estimated item count and a target false-positive rate, and
//! persists to a small binary file so a later run can skip everything this
//! run already rejected.

use std::f64::consts::LN_2;
use std::fs::File;
use std::hash::Hasher;
use std::io::{self, Read, Write};
use std::path::Path;

use fnv::FnvHasher;
use thiserror::Error;

const MAGIC: u32 = 0xBF10_F17E;
const VERSION: u16 = 1;
/// magic (4) + version (2) + bits (8) + hashes (4) + items (8) + rate (8)
const HEADER_LEN: usize = 34;

const MIN_BITS: u64 = 8;
const MIN_HASHES: u32 = 1;
const MAX_HASHES: u32 = 20;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("estimated item count must be positive and the rate inside (0, 1)")]
    InvalidParameters,

    #[error("allocation of {0} bytes for the bit vector failed")]
    Allocation(usize),

    #[error("not a skip-list file (bad magic)")]
    BadMagic,

    #[error("unsupported skip-list version {0}")]
    BadVersion(u16),

    #[error("corrupt skip-list header")]
    CorruptHeader,

    #[error("corrupt skip-list payload")]
    CorruptPayload,
}

/// Fixed-capacity bit set with double hashing.
pub struct SkipFilter {
    /// Packed bits: bit `i` lives at byte `i / 8`, mask `1 << (i % 8)`.
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
    estimated_items: u64,
    fp_rate: f64,
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Two independent base hashes; position `i` is `(h1 + i*h2) mod num_bits`.
fn hash_pair(item: &str) -> (u64, u64) {
    let h1 = fnv1a(item.as_bytes());
    let h2 = fnv1a(&h1.to_le_bytes());
    (h1, h2)
}

impl SkipFilter {
    /// Bit count the sizing formula yields for `(estimated_items, fp_rate)`.
    /// Exposed so callers can refuse an oversized filter before allocating.
    pub fn optimal_bits(estimated_items: u64, fp_rate: f64) -> u64 {
        let exact = -(estimated_items as f64) * fp_rate.ln() / (LN_2 * LN_2);
        (exact.ceil() as u64).max(MIN_BITS)
    }

    /// Sizes and allocates a filter for roughly `estimated_items` entries at
    /// the given false-positive rate. Allocation is fallible so an oversized
    /// request degrades into a disabled filter rather than an abort.
    pub fn with_capacity(estimated_items: u64, fp_rate: f64) -> Result<Self, FilterError> {
        if estimated_items == 0 || !(fp_rate > 0.0 && fp_rate < 1.0) {
            return Err(FilterError::InvalidParameters);
        }
        let num_bits = Self::optimal_bits(estimated_items, fp_rate);
        let k_exact = (num_bits as f64 / estimated_items as f64) * LN_2;
        let num_hashes = (k_exact.ceil() as u32).clamp(MIN_HASHES, MAX_HASHES);
        let bits = alloc_bytes(num_bits)?;
        Ok(Self {
            bits,
            num_bits,
            num_hashes,
            estimated_items,
            fp_rate,
        })
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn estimated_items(&self) -> u64 {
        self.estimated_items
    }

    pub fn fp_rate(&self) -> f64 {
        self.fp_rate
    }

    pub fn insert(&mut self, item: &str) {
        let (h1, h2) = hash_pair(item);
        for i in 0..u64::from(self.num_hashes) {
            let pos = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            self.bits[(pos / 8) as usize] |= 1 << (pos % 8);
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        let (h1, h2) = hash_pair(item);
        (0..u64::from(self.num_hashes)).all(|i| {
            let pos = h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            self.bits[(pos / 8) as usize] & (1 << (pos % 8)) != 0
        })
    }

    /// Writes the filter to `path`, truncating any previous content.
    pub fn save(&self, path: &Path) -> Result<(), FilterError> {
        let mut file = File::create(path)?;
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(&MAGIC.to_le_bytes());
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&self.num_bits.to_le_bytes());
        header.extend_from_slice(&self.num_hashes.to_le_bytes());
        header.extend_from_slice(&self.estimated_items.to_le_bytes());
        header.extend_from_slice(&self.fp_rate.to_le_bytes());
        file.write_all(&header)?;
        file.write_all(&self.bits)?;
        Ok(())
    }

    /// Reads a filter back from `path`. Any mismatch in magic, version,
    /// parameters, or payload size is a rejection; callers treat a rejected
    /// file as absent and build a fresh filter.
    pub fn load(path: &Path) -> Result<Self, FilterError> {
        let mut file = File::open(path)?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|_| FilterError::CorruptHeader)?;

        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(FilterError::BadMagic);
        }
        let version = u16::from_le_bytes(header[4..6].try_into().unwrap());
        if version != VERSION {
            return Err(FilterError::BadVersion(version));
        }
        let num_bits = u64::from_le_bytes(header[6..14].try_into().unwrap());
        let num_hashes = u32::from_le_bytes(header[14..18].try_into().unwrap());
        let estimated_items = u64::from_le_bytes(header[18..26].try_into().unwrap());
        let fp_rate = f64::from_le_bytes(header[26..34].try_into().unwrap());
        if num_bits == 0 || num_hashes == 0 {
            return Err(FilterError::CorruptHeader);
        }

        let mut bits = alloc_bytes(num_bits)?;
        file.read_exact(&mut bits)
            .map_err(|_| FilterError::CorruptPayload)?;
        let mut probe = [0u8; 1];
        if file.read(&mut probe)? != 0 {
            return Err(FilterError::CorruptPayload);
        }

        Ok(Self {
            bits,
            num_bits,
            num_hashes,
            estimated_items,
            fp_rate,
        })
    }
}

fn alloc_bytes(num_bits: u64) -> Result<Vec<u8>, FilterError> {
    let num_bytes =
        usize::try_from(num_bits.div_ceil(8)).map_err(|_| FilterError::Allocation(usize::MAX))?;
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(num_bytes)
        .map_err(|_| FilterError::Allocation(num_bytes))?;
    bytes.resize(num_bytes, 0);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn sizing_follows_the_formula() {
        let filter = SkipFilter::with_capacity(1000, 0.01).unwrap();
        // m = ceil(-1000 * ln(0.01) / ln(2)^2) = 9586, k = ceil(m/n * ln 2) = 7
        assert_eq!(filter.num_bits(), 9586);
        assert_eq!(filter.num_hashes(), 7);
    }

    #[test]
    fn tiny_filters_are_clamped() {
        let filter = SkipFilter::with_capacity(1, 0.9).unwrap();
        assert!(filter.num_bits() >= 8);
        assert!(filter.num_hashes() >= 1);
        let huge = SkipFilter::with_capacity(2, 1e-30).unwrap();
        assert!(huge.num_hashes() <= 20);
    }

    #[test]
    fn rejects_degenerate_parameters() {
        assert!(matches!(
            SkipFilter::with_capacity(0, 0.01),
            Err(FilterError::InvalidParameters)
        ));
        assert!(matches!(
            SkipFilter::with_capacity(10, 0.0),
            Err(FilterError::InvalidParameters)
        ));
        assert!(matches!(
            SkipFilter::with_capacity(10, 1.0),
            Err(FilterError::InvalidParameters)
        ));
    }

    #[test]
    fn no_false_negatives() {
        let mut filter = SkipFilter::with_capacity(500, 0.01).unwrap();
        for i in 0..500 {
            filter.insert(&format!("candidate-{i}"));
        }
        for i in 0..500 {
            assert!(filter.contains(&format!("candidate-{i}")));
        }
    }

    #[test]
    fn false_positive_rate_stays_near_target() {
        let n = 10_000u64;
        let mut filter = SkipFilter::with_capacity(n, 0.01).unwrap();
        for i in 0..n {
            filter.insert(&format!("in-{i}"));
        }
        let probes = 20_000u64;
        let hits = (0..probes)
            .filter(|i| filter.contains(&format!("out-{i}")))
            .count();
        // Twice the target rate leaves room for the clamps and hash quality.
        assert!(
            hits as f64 / probes as f64 <= 0.02,
            "observed fp rate {} over {probes} probes",
            hits as f64 / probes as f64
        );
    }

    #[test]
    fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skip.bloom");
        let mut filter = SkipFilter::with_capacity(128, 0.05).unwrap();
        for word in ["alpha", "beta", "gamma"] {
            filter.insert(word);
        }
        filter.save(&path).unwrap();

        let loaded = SkipFilter::load(&path).unwrap();
        assert_eq!(loaded.num_bits(), filter.num_bits());
        assert_eq!(loaded.num_hashes(), filter.num_hashes());
        assert_eq!(loaded.estimated_items(), 128);
        assert_eq!(loaded.fp_rate(), 0.05);
        assert_eq!(loaded.bits, filter.bits);
        for word in ["alpha", "beta", "gamma"] {
            assert!(loaded.contains(word));
        }
    }

    #[test]
    fn load_rejects_bad_magic_and_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skip.bloom");
        let filter = SkipFilter::with_capacity(16, 0.1).unwrap();
        filter.save(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            SkipFilter::load(&path),
            Err(FilterError::BadMagic)
        ));

        bytes[0] ^= 0xFF;
        bytes[4] = 9;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            SkipFilter::load(&path),
            Err(FilterError::BadVersion(_))
        ));
    }

    #[test]
    fn load_rejects_truncated_and_padded_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skip.bloom");
        let filter = SkipFilter::with_capacity(16, 0.1).unwrap();
        filter.save(&path).unwrap();
        let bytes = fs::read(&path).unwrap();

        fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
        assert!(matches!(
            SkipFilter::load(&path),
            Err(FilterError::CorruptPayload)
        ));

        let mut padded = bytes.clone();
        padded.push(0);
        fs::write(&path, &padded).unwrap();
        assert!(matches!(
            SkipFilter::load(&path),
            Err(FilterError::CorruptPayload)
        ));

        fs::write(&path, &bytes[..10]).unwrap();
        assert!(matches!(
            SkipFilter::load(&path),
            Err(FilterError::CorruptHeader)
        ));
    }

    #[test]
    fn load_reports_missing_files_as_io() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            SkipFilter::load(&dir.path().join("absent.bloom")),
            Err(FilterError::Io(_))
        ));
    }
}
