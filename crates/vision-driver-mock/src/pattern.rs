//! Test pattern written by the simulated camera.

/// glibc-style LCG, cheap and reproducible per frame.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Fills `buf` with a diagonal ramp shifted by `frame_num`, plus low-amplitude
/// noise. Byte 0..8 carries the frame number (little endian) so consumers can
/// identify which capture they received.
pub fn fill_test_pattern(buf: &mut [u8], frame_num: u64) {
    let frame_seed = frame_num.wrapping_mul(2654435761);
    for (i, byte) in buf.iter_mut().enumerate() {
        let noise = (prng(frame_seed ^ i as u64) & 0x7) as u8;
        *byte = (i as u64).wrapping_add(frame_num) as u8 ^ noise;
    }
    let tag = frame_num.to_le_bytes();
    let n = tag.len().min(buf.len());
    buf[..n].copy_from_slice(&tag[..n]);
}

/// Frame number stamped by [`fill_test_pattern`].
pub fn frame_tag(buf: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = buf.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_carries_frame_tag() {
        let mut buf = vec![0u8; 256];
        fill_test_pattern(&mut buf, 42);
        assert_eq!(frame_tag(&buf), Some(42));

        let mut other = vec![0u8; 256];
        fill_test_pattern(&mut other, 43);
        assert_ne!(buf[8..], other[8..]);
    }

    #[test]
    fn short_buffers_are_tolerated() {
        let mut buf = vec![0u8; 3];
        fill_test_pattern(&mut buf, 7);
        assert_eq!(buf[0], 7);
        assert_eq!(frame_tag(&buf), None);
    }
}
