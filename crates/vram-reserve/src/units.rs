/// One gibibyte in bytes. All `*_gb` quantities in this crate are GiB.
pub const GB: u64 = 1024 * 1024 * 1024;
/// One mebibyte in bytes.
pub const MB: u64 = 1024 * 1024;

/// Convert a GB quantity into whole bytes.
///
/// This is the single rounding rule used for every reservation: the fractional byte
/// remainder is truncated (floor of `gb * 2^30`). Non-finite and negative inputs map to
/// `0`; values beyond `u64::MAX` saturate.
pub fn gb_to_bytes(gb: f64) -> u64 {
    if !gb.is_finite() || gb <= 0.0 {
        return 0;
    }
    // `as` saturates for out-of-range floats.
    (gb * GB as f64).floor() as u64
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / GB as f64
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / MB as f64
}
