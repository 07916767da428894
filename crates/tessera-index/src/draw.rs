//! Tree pretty-printer for tests and debugging.
//!
//! Renders the tree breadth-first, one level per line, each node as
//! `(k1,k2,…)` centered over its children:
//!
//! ```text
//!                               (25)
//!                 (9,17,19)                          (33)
//!  (1,5)    (9,13)    (17,18)    (19,20,21)    (25,29)    (33,37)
//! ```
//!
//! An empty tree renders as `()`. Intended for quiescent trees only.

use std::fmt::Display;
use std::fmt::Write as _;

use tessera_common::page::PageId;
use tessera_common::{Result, TesseraError};

use crate::key::{KeyComparator, SlotData};
use crate::page::{page_kind, InternalPage, LeafPage, PageKind};
use crate::tree::BPlusTree;

struct PrintableNode {
    /// Rendered width reserved for this node (including child widths).
    width: usize,
    keys: String,
    children: Vec<PrintableNode>,
}

impl PrintableNode {
    fn print(&self, out: &mut String) {
        let mut level: Vec<&PrintableNode> = vec![self];
        while !level.is_empty() {
            let mut next_level = Vec::new();
            for node in &level {
                let padding = node.width.saturating_sub(node.keys.len()) / 2;
                for _ in 0..padding {
                    out.push(' ');
                }
                out.push_str(&node.keys);
                for _ in 0..padding {
                    out.push(' ');
                }
                for child in &node.children {
                    next_level.push(child);
                }
            }
            out.push('\n');
            level = next_level;
        }
    }
}

impl<K, V, C> BPlusTree<K, V, C>
where
    K: SlotData + Display,
    V: SlotData,
    C: KeyComparator<K>,
{
    /// Renders the tree as a multi-line string.
    pub fn draw(&self) -> Result<String> {
        let root = self.root_page_id()?;
        if !root.is_valid() {
            return Ok("()".to_string());
        }

        let printable = self.to_printable(root)?;
        let mut out = String::new();
        printable.print(&mut out);
        Ok(out)
    }

    fn to_printable(&self, page_id: PageId) -> Result<PrintableNode> {
        let (keys, children_ids) = {
            let guard = self.bpm.fetch_read(page_id)?;
            match page_kind(guard.data()) {
                Some(PageKind::Leaf) => {
                    let leaf = LeafPage::<K, V>::new(guard.data());
                    let mut keys = String::from("(");
                    for i in 0..leaf.size() {
                        if i > 0 {
                            keys.push(',');
                        }
                        let _ = write!(keys, "{}", leaf.key_at(i));
                    }
                    keys.push(')');
                    (keys, Vec::new())
                }
                Some(PageKind::Internal) => {
                    let internal = InternalPage::<K>::new(guard.data());
                    let mut keys = String::from("(");
                    for i in 1..internal.size() {
                        if i > 1 {
                            keys.push(',');
                        }
                        let _ = write!(keys, "{}", internal.key_at(i));
                    }
                    keys.push(')');
                    let children = (0..internal.size()).map(|i| internal.child_at(i)).collect();
                    (keys, children)
                }
                _ => {
                    return Err(TesseraError::corrupted(
                        page_id,
                        "unknown page kind while drawing",
                    ))
                }
            }
        };

        if children_ids.is_empty() {
            // Leaf widths get a little breathing room between siblings.
            let width = keys.len() + 4;
            return Ok(PrintableNode {
                width,
                keys,
                children: Vec::new(),
            });
        }

        let mut children = Vec::with_capacity(children_ids.len());
        let mut width = 0;
        for child_id in children_ids {
            let child = self.to_printable(child_id)?;
            width += child.width;
            children.push(child);
        }

        Ok(PrintableNode {
            width,
            keys,
            children,
        })
    }
}
