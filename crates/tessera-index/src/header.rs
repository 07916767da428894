//! Header page accessors.
//!
//! The header page is the index's only well-known page. It stores the
//! current root page ID at a fixed offset so that root swaps never
//! invalidate external references to the index; every operation starts
//! by latching the header, and only writers that may change the root
//! hold its write latch.

use tessera_common::page::PageId;

const ROOT_OFFSET: usize = 0;

/// Reads the root page ID (INVALID when the tree is empty).
#[inline]
pub fn root_page_id(data: &[u8]) -> PageId {
    PageId(u32::from_le_bytes([
        data[ROOT_OFFSET],
        data[ROOT_OFFSET + 1],
        data[ROOT_OFFSET + 2],
        data[ROOT_OFFSET + 3],
    ]))
}

/// Writes the root page ID.
#[inline]
pub fn set_root_page_id(data: &mut [u8], root: PageId) {
    data[ROOT_OFFSET..ROOT_OFFSET + 4].copy_from_slice(&root.0.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut data = vec![0u8; 64];

        set_root_page_id(&mut data, PageId::new(17));
        assert_eq!(root_page_id(&data), PageId::new(17));

        set_root_page_id(&mut data, PageId::INVALID);
        assert_eq!(root_page_id(&data), PageId::INVALID);
    }

    #[test]
    fn test_header_zeroed_page_is_page_zero() {
        // A zeroed header names page 0; creation must write INVALID
        // explicitly before first use.
        let data = vec![0u8; 64];
        assert_eq!(root_page_id(&data), PageId::new(0));
    }
}
