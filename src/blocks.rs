//! Flattened block iteration across all block maps
//!
//! Blkx entries and their blocks are walked in `(entry, block)` ascending
//! order; concatenating the reconstructed payloads of every non-excluded
//! block in this order reproduces the logical volume byte stream. Both
//! stream modes and the whole-image size metrics run on this one cursor.

use crate::format::{Block, BlockType};
use crate::resource::BlkxEntry;

/// Blocks skipped by every consumer: they carry no payload
pub const MARKER_EXCLUDE: &[BlockType] = &[BlockType::Comment, BlockType::Terminator];

/// Blocks skipped by sparse consumers: markers plus implicit zero runs
pub const SPARSE_EXCLUDE: &[BlockType] = &[
    BlockType::Comment,
    BlockType::Terminator,
    BlockType::ZeroFill,
    BlockType::Free,
];

/// Position within the flattened `(entry, block)` order
///
/// Advanced monotonically, never reset except on construction.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BlockCursor {
    entry: usize,
    block: usize,
}

impl BlockCursor {
    /// Move forward to the first non-excluded block at or after the
    /// current position and return it without consuming it.
    pub(crate) fn seek_included<'a>(
        &mut self,
        blkx: &'a [BlkxEntry],
        exclude: &[BlockType],
    ) -> Option<(&'a BlkxEntry, &'a Block)> {
        while let Some(entry) = blkx.get(self.entry) {
            match entry.map.blocks.get(self.block) {
                None => {
                    self.entry += 1;
                    self.block = 0;
                }
                Some(block) if exclude.contains(&block.kind) => self.block += 1,
                Some(block) => return Some((entry, block)),
            }
        }
        None
    }

    /// Step past the block last returned by `seek_included`
    pub(crate) fn advance(&mut self) {
        self.block += 1;
    }
}

/// Lazy iterator over `(entry, block)` pairs with an exclusion set
pub struct BlockIter<'a> {
    blkx: &'a [BlkxEntry],
    exclude: &'a [BlockType],
    cursor: BlockCursor,
}

impl<'a> BlockIter<'a> {
    pub(crate) fn new(blkx: &'a [BlkxEntry], exclude: &'a [BlockType]) -> Self {
        BlockIter {
            blkx,
            exclude,
            cursor: BlockCursor::default(),
        }
    }
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = (&'a BlkxEntry, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.cursor.seek_included(self.blkx, self.exclude);
        if item.is_some() {
            self.cursor.advance();
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::entry_with_blocks;

    fn block(kind: BlockType, sector_number: u64) -> Block {
        Block {
            kind,
            comment: String::new(),
            sector_number,
            sector_count: 1,
            compressed_offset: 0,
            compressed_length: 0,
        }
    }

    #[test]
    fn flattens_entries_in_order() {
        let blkx = vec![
            entry_with_blocks(
                0,
                0,
                vec![
                    block(BlockType::Raw, 0),
                    block(BlockType::Terminator, 1),
                ],
            ),
            entry_with_blocks(
                1,
                1,
                vec![
                    block(BlockType::ZeroFill, 0),
                    block(BlockType::Comment, 1),
                    block(BlockType::Udzo, 1),
                    block(BlockType::Terminator, 2),
                ],
            ),
        ];

        let kinds: Vec<BlockType> = BlockIter::new(&blkx, MARKER_EXCLUDE)
            .map(|(_, b)| b.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![BlockType::Raw, BlockType::ZeroFill, BlockType::Udzo]
        );

        let sparse: Vec<BlockType> = BlockIter::new(&blkx, SPARSE_EXCLUDE)
            .map(|(_, b)| b.kind)
            .collect();
        assert_eq!(sparse, vec![BlockType::Raw, BlockType::Udzo]);
    }

    #[test]
    fn iteration_is_restartable() {
        let blkx = vec![entry_with_blocks(0, 0, vec![block(BlockType::Raw, 0)])];
        assert_eq!(BlockIter::new(&blkx, MARKER_EXCLUDE).count(), 1);
        assert_eq!(BlockIter::new(&blkx, MARKER_EXCLUDE).count(), 1);
    }

    #[test]
    fn empty_maps_are_skipped() {
        let blkx = vec![
            entry_with_blocks(0, 0, vec![]),
            entry_with_blocks(1, 4, vec![block(BlockType::Raw, 0)]),
        ];
        let items: Vec<_> = BlockIter::new(&blkx, MARKER_EXCLUDE).collect();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0.id, 1);
    }
}
