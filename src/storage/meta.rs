//! # Meta Page Codec
//!
//! Pages 0 and 1 are the two meta pages. Each names a complete database
//! state: the transaction id that produced it, the root of the top-level
//! bucket index tree, the next-page allocation watermark, and the freelist.
//! Commits alternate between the two slots and the live meta is the valid
//! one with the higher transaction id, which is what makes a torn commit
//! recoverable: the previous meta and every page it references are still
//! intact.
//!
//! ## Layout (`LDB3`)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -------------------------------
//! 0       4     Magic "LDB3"
//! 4       4     Page size (u32 LE)
//! 8       8     TxID
//! 16      8     Root page id (top-level bucket index)
//! 24      8     Next page id (watermark)
//! 32      8     Freelist head page (0 = fully inline)
//! 40      4     Inline free count
//! 44      8*N   Inline free page ids
//! ```
//!
//! The legacy `LDB2` layout is accepted on read: it has no freelist head
//! field, so the inline count sits at offset 32 and the ids at 36. Writes
//! always produce `LDB3`.

use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::{PageId, TxId};
use crate::error::{Error, Result};

pub const META_MAGIC: &[u8; 4] = b"LDB3";
pub const LEGACY_META_MAGIC: &[u8; 4] = b"LDB2";

pub const META_HEADER_SIZE: usize = 44;
const LEGACY_META_HEADER_SIZE: usize = 36;

/// Maximum number of free page ids stored inline in a meta page; the rest
/// spills into chained freelist pages.
pub fn inline_capacity(page_size: usize) -> usize {
    (page_size - META_HEADER_SIZE) / 8
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct MetaHeader {
    magic: [u8; 4],
    page_size: U32,
    txid: U64,
    root: U64,
    next_page: U64,
    freelist_page: U64,
    free_count: U32,
}

const _: () = assert!(size_of::<MetaHeader>() == META_HEADER_SIZE);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout, Unaligned)]
struct LegacyMetaHeader {
    magic: [u8; 4],
    page_size: U32,
    txid: U64,
    root: U64,
    next_page: U64,
    free_count: U32,
}

const _: () = assert!(size_of::<LegacyMetaHeader>() == LEGACY_META_HEADER_SIZE);

/// Decoded meta state. The snapshot every transaction is bound to at begin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub txid: TxId,
    pub root: PageId,
    pub next_page: PageId,
    /// First page of the overflow freelist chain, 0 when the freelist is
    /// fully inline.
    pub freelist_page: PageId,
    /// Inline portion of the freelist.
    pub freelist: Vec<PageId>,
}

/// Decodes one meta page. Any validation failure is reported as
/// `Corruption`; the caller decides whether the other slot can rescue it.
pub fn decode(page: &[u8], page_size: usize) -> Result<Meta> {
    if page.len() < META_HEADER_SIZE {
        return Err(Error::Corruption("short meta page"));
    }

    let magic: [u8; 4] = page[..4].try_into().unwrap();
    let (txid, root, next_page, freelist_page, free_count, ids_offset, recorded_page_size) =
        if &magic == META_MAGIC {
            let header = MetaHeader::ref_from_bytes(&page[..META_HEADER_SIZE])
                .map_err(|_| Error::Corruption("unreadable meta header"))?;
            (
                header.txid.get(),
                header.root.get(),
                header.next_page.get(),
                header.freelist_page.get(),
                header.free_count.get() as usize,
                META_HEADER_SIZE,
                header.page_size.get(),
            )
        } else if &magic == LEGACY_META_MAGIC {
            let header = LegacyMetaHeader::ref_from_bytes(&page[..LEGACY_META_HEADER_SIZE])
                .map_err(|_| Error::Corruption("unreadable meta header"))?;
            (
                header.txid.get(),
                header.root.get(),
                header.next_page.get(),
                0,
                header.free_count.get() as usize,
                LEGACY_META_HEADER_SIZE,
                header.page_size.get(),
            )
        } else {
            return Err(Error::Corruption("invalid meta magic"));
        };

    if recorded_page_size as usize != page_size {
        return Err(Error::Corruption("page size mismatch"));
    }
    if free_count > (page_size - ids_offset) / 8 {
        return Err(Error::Corruption("freelist exceeds meta capacity"));
    }

    let mut freelist = Vec::with_capacity(free_count);
    let mut off = ids_offset;
    for _ in 0..free_count {
        freelist.push(u64::from_le_bytes(page[off..off + 8].try_into().unwrap()));
        off += 8;
    }

    Ok(Meta {
        txid,
        root,
        next_page,
        freelist_page,
        freelist,
    })
}

/// Serializes `meta` into a meta page slot, zeroing the remainder.
pub fn encode(page: &mut [u8], meta: &Meta, page_size: usize) -> Result<()> {
    if meta.freelist.len() > inline_capacity(page_size) {
        return Err(Error::Corruption("inline freelist too large for meta page"));
    }

    page.fill(0);
    let header = MetaHeader {
        magic: *META_MAGIC,
        page_size: U32::new(page_size as u32),
        txid: U64::new(meta.txid),
        root: U64::new(meta.root),
        next_page: U64::new(meta.next_page),
        freelist_page: U64::new(meta.freelist_page),
        free_count: U32::new(meta.freelist.len() as u32),
    };
    page[..META_HEADER_SIZE].copy_from_slice(header.as_bytes());

    let mut off = META_HEADER_SIZE;
    for id in &meta.freelist {
        page[off..off + 8].copy_from_slice(&id.to_le_bytes());
        off += 8;
    }
    Ok(())
}

/// Selects the live meta from the two slots: valid magic, higher TxID wins.
/// Returns the meta together with the slot it came from.
pub fn pick_live(page0: &[u8], page1: &[u8], page_size: usize) -> Result<(Meta, PageId)> {
    let m0 = decode(page0, page_size);
    let m1 = decode(page1, page_size);

    match (m0, m1) {
        (Ok(a), Ok(b)) => {
            if b.txid > a.txid {
                Ok((b, super::META_PAGE_1))
            } else {
                Ok((a, super::META_PAGE_0))
            }
        }
        (Ok(a), Err(_)) => {
            tracing::warn!(txid = a.txid, "meta page 1 invalid, recovering from meta page 0");
            Ok((a, super::META_PAGE_0))
        }
        (Err(_), Ok(b)) => {
            tracing::warn!(txid = b.txid, "meta page 0 invalid, recovering from meta page 1");
            Ok((b, super::META_PAGE_1))
        }
        (Err(e), Err(_)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{META_PAGE_0, META_PAGE_1};

    const PAGE_SIZE: usize = 4096;

    fn sample_meta() -> Meta {
        Meta {
            txid: 7,
            root: 12,
            next_page: 40,
            freelist_page: 0,
            freelist: vec![9, 3, 25],
        }
    }

    #[test]
    fn meta_header_size_is_44() {
        assert_eq!(size_of::<MetaHeader>(), 44);
    }

    #[test]
    fn meta_roundtrip() {
        let meta = sample_meta();
        let mut page = vec![0u8; PAGE_SIZE];

        encode(&mut page, &meta, PAGE_SIZE).unwrap();
        let decoded = decode(&page, PAGE_SIZE).unwrap();

        assert_eq!(decoded, meta);
    }

    #[test]
    fn decode_rejects_invalid_magic() {
        let mut page = vec![0u8; PAGE_SIZE];
        page[..4].copy_from_slice(b"XXXX");

        assert!(matches!(
            decode(&page, PAGE_SIZE),
            Err(Error::Corruption("invalid meta magic"))
        ));
    }

    #[test]
    fn decode_rejects_page_size_mismatch() {
        let meta = sample_meta();
        let mut page = vec![0u8; PAGE_SIZE];
        encode(&mut page, &meta, PAGE_SIZE).unwrap();

        assert!(matches!(
            decode(&page, 8192),
            Err(Error::Corruption("page size mismatch"))
        ));
    }

    #[test]
    fn decode_rejects_oversized_freelist_count() {
        let meta = sample_meta();
        let mut page = vec![0u8; PAGE_SIZE];
        encode(&mut page, &meta, PAGE_SIZE).unwrap();
        page[40..44].copy_from_slice(&u32::MAX.to_le_bytes());

        assert!(matches!(
            decode(&page, PAGE_SIZE),
            Err(Error::Corruption("freelist exceeds meta capacity"))
        ));
    }

    #[test]
    fn decode_legacy_layout() {
        let mut page = vec![0u8; PAGE_SIZE];
        page[..4].copy_from_slice(LEGACY_META_MAGIC);
        page[4..8].copy_from_slice(&(PAGE_SIZE as u32).to_le_bytes());
        page[8..16].copy_from_slice(&3u64.to_le_bytes());
        page[16..24].copy_from_slice(&5u64.to_le_bytes());
        page[24..32].copy_from_slice(&9u64.to_le_bytes());
        page[32..36].copy_from_slice(&2u32.to_le_bytes());
        page[36..44].copy_from_slice(&77u64.to_le_bytes());
        page[44..52].copy_from_slice(&78u64.to_le_bytes());

        let meta = decode(&page, PAGE_SIZE).unwrap();

        assert_eq!(meta.txid, 3);
        assert_eq!(meta.root, 5);
        assert_eq!(meta.next_page, 9);
        assert_eq!(meta.freelist_page, 0);
        assert_eq!(meta.freelist, vec![77, 78]);
    }

    #[test]
    fn pick_live_prefers_higher_txid() {
        let mut page0 = vec![0u8; PAGE_SIZE];
        let mut page1 = vec![0u8; PAGE_SIZE];
        let mut meta = sample_meta();
        meta.txid = 4;
        encode(&mut page0, &meta, PAGE_SIZE).unwrap();
        meta.txid = 9;
        encode(&mut page1, &meta, PAGE_SIZE).unwrap();

        let (live, slot) = pick_live(&page0, &page1, PAGE_SIZE).unwrap();

        assert_eq!(live.txid, 9);
        assert_eq!(slot, META_PAGE_1);
    }

    #[test]
    fn pick_live_skips_invalid_slot() {
        let mut page0 = vec![0u8; PAGE_SIZE];
        let page1 = vec![0u8; PAGE_SIZE];
        let mut meta = sample_meta();
        meta.txid = 4;
        encode(&mut page0, &meta, PAGE_SIZE).unwrap();

        let (live, slot) = pick_live(&page0, &page1, PAGE_SIZE).unwrap();

        assert_eq!(live.txid, 4);
        assert_eq!(slot, META_PAGE_0);
    }

    #[test]
    fn pick_live_fails_when_both_invalid() {
        let page0 = vec![0u8; PAGE_SIZE];
        let page1 = vec![0u8; PAGE_SIZE];

        assert!(matches!(
            pick_live(&page0, &page1, PAGE_SIZE),
            Err(Error::Corruption(_))
        ));
    }
}
