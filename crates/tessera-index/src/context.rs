//! Crab-latching context for write descents.
//!
//! A write operation descends from the header page toward a leaf while
//! holding exclusive latches. The context owns that chain: the header
//! guard (while the root may still change), plus one entry per latched
//! page recording which child slot the descent took. When a freshly
//! latched child turns out to be operation-safe, the whole ancestor
//! chain is released at once; otherwise it is retained so a split or
//! merge can propagate into it.

use tessera_buffer::WritePageGuard;
use tessera_common::page::PageId;

/// One latched page on the descent path.
pub(crate) struct PathStep<'a> {
    /// The page's write guard.
    pub guard: WritePageGuard<'a>,
    /// Child slot taken out of this page during the descent.
    /// Meaningful for internal pages only; the leaf step leaves it 0.
    pub child_idx: usize,
}

/// Latch chain for one insert or remove descent.
pub(crate) struct Context<'a> {
    /// Header page guard, held while the root may still change.
    pub header: Option<WritePageGuard<'a>>,
    /// Root page ID read under the header latch.
    pub root_page_id: PageId,
    /// Latched pages from the root (front) down to the leaf (back).
    pub path: Vec<PathStep<'a>>,
    /// Level whose routing key must be rewritten after a slot-0 erase,
    /// as an index into `path`, with the routing slot in that page.
    pub pending_key_fix: Option<(usize, usize)>,
}

impl<'a> Context<'a> {
    /// Creates a context rooted at the given header guard.
    pub fn new(header: WritePageGuard<'a>, root_page_id: PageId) -> Self {
        Self {
            header: Some(header),
            root_page_id,
            path: Vec::new(),
            pending_key_fix: None,
        }
    }

    /// True when `page_id` is the root this descent started from.
    pub fn is_root(&self, page_id: PageId) -> bool {
        page_id == self.root_page_id
    }

    /// Drops the header guard and every latched ancestor.
    ///
    /// Called when a newly latched child is operation-safe and no
    /// retained level still has bookkeeping pending.
    pub fn release_ancestors(&mut self) {
        self.header = None;
        self.path.clear();
    }

    /// True when the chain may be released upon reaching a safe child.
    pub fn can_release(&self) -> bool {
        self.pending_key_fix.is_none()
    }
}
