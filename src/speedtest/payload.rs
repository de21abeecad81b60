use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::settings::MAX_PROVIDER_ARRAY;

/// Builds the upload body shared by every upload worker of a run.
///
/// The OS random source is drained through a fixed scratch block of at most
/// `MAX_PROVIDER_ARRAY` bytes, refilled and copied until `size` bytes exist.
pub fn random_payload(size: usize) -> Result<Bytes> {
    let mut scratch = vec![0u8; MAX_PROVIDER_ARRAY.min(size.max(1))];
    let mut data = BytesMut::with_capacity(size);

    while data.len() < size {
        OsRng
            .try_fill_bytes(&mut scratch)
            .context("random source failed")?;
        let take = (size - data.len()).min(scratch.len());
        data.extend_from_slice(&scratch[..take]);
    }

    Ok(data.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_has_exact_size() {
        for size in [0, 1, MAX_PROVIDER_ARRAY - 1, MAX_PROVIDER_ARRAY, MAX_PROVIDER_ARRAY * 3 + 17] {
            assert_eq!(random_payload(size).unwrap().len(), size);
        }
    }

    #[test]
    fn payload_is_not_a_repeated_block() {
        let data = random_payload(MAX_PROVIDER_ARRAY * 2).unwrap();
        assert_ne!(&data[..MAX_PROVIDER_ARRAY], &data[MAX_PROVIDER_ARRAY..]);
    }

    #[test]
    fn clones_share_the_buffer() {
        let data = random_payload(1024).unwrap();
        let copy = data.clone();
        assert_eq!(data.as_ptr(), copy.as_ptr());
    }
}
