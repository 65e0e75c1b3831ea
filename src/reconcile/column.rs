//! Column-store leaf reconciliation. Column leaves are keyed by record
//! number rather than an arbitrary byte string, and carry far less
//! per-cell MVCC bookkeeping than row leaves: `ColFixLeaf` appends bypass
//! the update-chain path entirely, and `ColVarLeaf` keeps one chain per
//! *new* recno rather than per on-page cell. Both still need the same
//! disk-choice/saved split as row leaves for recnos that do carry a chain.

use crate::block::BlockAddr;
use crate::btree::page::{ColFixLeaf, ColVarLeaf};
use crate::common::TxnId;
use crate::error::Result;
use crate::storage::page::{Cell, PageImage, PageKind};

use super::boundary::{Boundary, BoundaryImage, SavedUpdate};
use super::{assert_not_transient, classify_chain, ReconcileFlags, ReconcileResult, VisibilityCtx};

pub fn reconcile_var(
    leaf: &ColVarLeaf,
    flags: &ReconcileFlags,
    ctx: &VisibilityCtx,
    write_block: &dyn Fn(&[u8]) -> Result<BlockAddr>,
) -> Result<ReconcileResult> {
    // Flatten existing runs into per-recno values; a run is already a
    // reconciled disk value with no chain of its own, so it only changes
    // if an insert-list entry overrides that recno.
    let mut by_recno: std::collections::BTreeMap<u64, Option<Vec<u8>>> = std::collections::BTreeMap::new();
    for run in &leaf.cells {
        for r in run.start_recno..run.start_recno + run.count {
            by_recno.insert(r, run.value.clone());
        }
    }

    let mut saved = Vec::new();
    for (recno, chain) in leaf.inserts.iter() {
        let entries = chain.entries();
        let (disk_value, mut chain_saved) = classify_chain(&entries, ctx);
        match disk_value {
            Some((_, value)) => {
                by_recno.insert(*recno, value);
            }
            None if entries.is_empty() => {
                // A recno present in the insert list with an empty chain
                // shouldn't occur, but tolerate it defensively.
            }
            None => {
                // Every entry was either aborted or still active with
                // nothing committed yet: nothing to carry onto disk, but
                // still-active entries must be saved below.
            }
        }
        for (txn_id, value) in chain_saved.drain(..) {
            saved.push(SavedUpdate {
                key: recno.to_be_bytes().to_vec(),
                txn_id,
                value,
            });
        }
    }

    // Re-encode as run-length cells, merging consecutive equal values.
    let mut image = PageImage::new(PageKind::ColVarLeaf, by_recno.keys().next().copied().unwrap_or(0), 0);
    let mut boundaries = Vec::new();
    let mut run_start: Option<u64> = None;
    let mut run_value: Option<Option<Vec<u8>>> = None;
    let mut run_count: u64 = 0;
    let mut boundary_first_recno: Option<u64> = None;

    // A run whose value is `None` (deleted recnos) is a gap: omitted from
    // the image entirely rather than encoded as a cell, since recno
    // position — not an explicit key — is what locates column-store data.
    let mut flush_run = |image: &mut PageImage, start: u64, count: u64, value: &Option<Vec<u8>>| {
        let _ = start;
        if let Some(bytes) = value {
            let cell = Cell::run_length(count, bytes);
            assert_not_transient(cell.cell_type);
            image.push_cell(&cell);
        }
    };

    let mut entries: Vec<(u64, Option<Vec<u8>>)> = by_recno.into_iter().collect();
    entries.sort_by_key(|(r, _)| *r);

    for (recno, value) in entries {
        if boundary_first_recno.is_none() {
            boundary_first_recno = Some(recno);
        }
        match (&run_value, run_start) {
            (Some(v), Some(start)) if *v == value && start + run_count == recno => {
                run_count += 1;
            }
            _ => {
                if let (Some(start), Some(v)) = (run_start, run_value.take()) {
                    flush_run(&mut image, start, run_count, &v);
                }
                run_start = Some(recno);
                run_value = Some(value);
                run_count = 1;
            }
        }

        if !flags.salvage && image.len() > ctx.max_page_size {
            if let (Some(start), Some(v)) = (run_start, run_value.take()) {
                flush_run(&mut image, start, run_count, &v);
            }
            boundaries.push(finalize(
                image,
                boundary_first_recno.take().unwrap(),
                Vec::new(),
                write_block,
            )?);
            image = PageImage::new(PageKind::ColVarLeaf, recno, 0);
            run_start = None;
            run_value = None;
            run_count = 0;
        }
    }
    if let (Some(start), Some(v)) = (run_start, run_value.take()) {
        flush_run(&mut image, start, run_count, &v);
    }
    if boundary_first_recno.is_some() || boundaries.is_empty() {
        boundaries.push(finalize(
            image,
            boundary_first_recno.unwrap_or(0),
            saved,
            write_block,
        )?);
    }

    let all_visible = boundaries.iter().all(|b| b.is_clean());
    Ok(ReconcileResult { boundaries, all_visible })
}

/// `ColFixLeaf` appends bypass MVCC entirely, so the bitmap itself is
/// already the reconciled truth; only `updates` (modifications to existing
/// recnos) carry a chain that needs the usual disk-choice/saved split.
pub fn reconcile_fix(
    leaf: &ColFixLeaf,
    _flags: &ReconcileFlags,
    ctx: &VisibilityCtx,
    write_block: &dyn Fn(&[u8]) -> Result<BlockAddr>,
) -> Result<ReconcileResult> {
    let mut bits = leaf.bits.clone();
    let mut saved = Vec::new();

    for (recno, chain) in leaf.updates.iter() {
        let entries = chain.entries();
        let (disk_value, chain_saved) = classify_chain(&entries, ctx);
        if let Some((_, Some(value))) = disk_value {
            if let Some(byte) = value.first() {
                write_bits(&mut bits, leaf.bit_width, *recno, *byte);
            }
        }
        for (txn_id, value) in chain_saved {
            saved.push(SavedUpdate {
                key: recno.to_be_bytes().to_vec(),
                txn_id,
                value,
            });
        }
    }

    let mut image = PageImage::new(PageKind::ColFixLeaf, leaf.base_recno, 0);
    let cell = Cell::key_value(&[leaf.bit_width], &bits);
    assert_not_transient(cell.cell_type);
    image.push_cell(&cell);

    let boundary = finalize(image, leaf.base_recno, saved, write_block)?;
    let all_visible = boundary.is_clean();
    Ok(ReconcileResult {
        boundaries: vec![boundary],
        all_visible,
    })
}

fn write_bits(bits: &mut Vec<u8>, bit_width: u8, recno: u64, value: u8) {
    let bit_width = bit_width.max(1) as usize;
    let bit_offset = recno as usize * bit_width;
    let needed_bytes = (bit_offset + bit_width).div_ceil(8);
    if bits.len() < needed_bytes {
        bits.resize(needed_bytes, 0);
    }
    for b in 0..bit_width {
        let bit = (value >> b) & 1;
        let pos = bit_offset + b;
        if bit == 1 {
            bits[pos / 8] |= 1 << (pos % 8);
        } else {
            bits[pos / 8] &= !(1 << (pos % 8));
        }
    }
}

fn finalize(
    image: PageImage,
    first_recno: u64,
    saved: Vec<SavedUpdate>,
    write_block: &dyn Fn(&[u8]) -> Result<BlockAddr>,
) -> Result<Boundary> {
    let first_key = first_recno.to_be_bytes().to_vec();
    if saved.is_empty() {
        let addr = write_block(&image.finish())?;
        Ok(Boundary {
            image: BoundaryImage::Written(addr),
            first_key,
            saved,
        })
    } else {
        Ok(Boundary {
            image: BoundaryImage::InMemory(Box::new(image)),
            first_key,
            saved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::page::RunCell;
    use std::sync::Mutex;

    fn always_committed(t: TxnId) -> bool {
        t.0 > 0
    }
    fn never_aborted(_: TxnId) -> bool {
        false
    }
    fn visible_below_100(t: TxnId) -> bool {
        t.0 < 100
    }

    fn ctx() -> VisibilityCtx<'static> {
        VisibilityCtx {
            is_committed: &always_committed,
            is_aborted: &never_aborted,
            visible_all: &visible_below_100,
            max_page_size: 1_000_000,
            overflow_threshold: 1_000_000,
        }
    }

    fn fake_writer() -> (impl Fn(&[u8]) -> Result<BlockAddr>, std::sync::Arc<Mutex<Vec<Vec<u8>>>>) {
        let written = std::sync::Arc::new(Mutex::new(Vec::new()));
        let clone = written.clone();
        let writer = move |bytes: &[u8]| {
            clone.lock().unwrap().push(bytes.to_vec());
            Ok(BlockAddr {
                offset: clone.lock().unwrap().len() as u64 * 4096,
                size: bytes.len() as u32,
                checksum: 0,
            })
        };
        (writer, written)
    }

    #[test]
    fn clean_runs_merge_consecutive_equal_values() {
        let mut leaf = ColVarLeaf::default();
        leaf.cells.push(RunCell { start_recno: 0, count: 3, value: Some(b"x".to_vec()) });
        leaf.cells.push(RunCell { start_recno: 3, count: 2, value: Some(b"x".to_vec()) });

        let (writer, written) = fake_writer();
        let result = reconcile_var(&leaf, &ReconcileFlags::eviction(), &ctx(), &writer).unwrap();
        assert!(result.all_visible);
        assert_eq!(written.lock().unwrap().len(), 1);
        let (_, cells) = PageImage::parse(&written.lock().unwrap()[0]).unwrap();
        assert_eq!(cells.len(), 1);
        let (count, value) = cells[0].split_run_length().unwrap();
        assert_eq!(count, 5);
        assert_eq!(value, b"x");
    }

    #[test]
    fn uncommitted_insert_is_saved() {
        let mut leaf = ColVarLeaf::default();
        let chain = leaf.inserts.chain_or_insert(10);
        chain.prepend(TxnId::new(50), Some(b"new".to_vec()));

        let uncommitted_ctx = VisibilityCtx {
            is_committed: &|_| false,
            is_aborted: &|_| false,
            visible_all: &|_| false,
            max_page_size: 1_000_000,
            overflow_threshold: 1_000_000,
        };
        let (writer, _) = fake_writer();
        let result = reconcile_var(&leaf, &ReconcileFlags::eviction(), &uncommitted_ctx, &writer).unwrap();
        assert!(!result.all_visible);
        assert_eq!(result.boundaries[0].saved.len(), 1);
    }

    #[test]
    fn fixed_leaf_bits_pass_through_unchanged() {
        let leaf = ColFixLeaf {
            base_recno: 0,
            bit_width: 4,
            bits: vec![0b0101_1010],
            updates: Default::default(),
        };
        let (writer, written) = fake_writer();
        let result = reconcile_fix(&leaf, &ReconcileFlags::eviction(), &ctx(), &writer).unwrap();
        assert!(result.all_visible);
        assert_eq!(written.lock().unwrap().len(), 1);
    }

    #[test]
    fn fixed_leaf_applies_committed_update() {
        let leaf = ColFixLeaf {
            base_recno: 0,
            bit_width: 8,
            bits: vec![0, 0],
            updates: Default::default(),
        };
        let leaf = {
            let mut l = leaf;
            l.updates.chain_or_insert(1).prepend(TxnId::new(5), Some(vec![0xFF]));
            l
        };
        let (writer, written) = fake_writer();
        let result = reconcile_fix(&leaf, &ReconcileFlags::eviction(), &ctx(), &writer).unwrap();
        assert!(result.all_visible);
        let (_, cells) = PageImage::parse(&written.lock().unwrap()[0]).unwrap();
        let (_, bits) = cells[0].split_key_value().unwrap();
        assert_eq!(bits.unwrap()[1], 0xFF);
    }
}
