use tracing::instrument;

use crate::Region;

/// Default vertical tolerance, in pixels, for two regions to share a row.
pub const DEFAULT_ROW_THRESHOLD: i32 = 30;

/// Orders regions top-to-bottom, left-to-right.
///
/// Items are sorted by the top edge, then greedily grouped into rows: an item
/// joins the current row while its top edge is within `row_threshold` of the
/// previous member's. Each row is then sorted by its left edge. Both sorts are
/// stable.
#[instrument(level = "debug", skip(items), fields(count = items.len()))]
pub fn sequence<T: AsRef<Region>>(mut items: Vec<T>, row_threshold: i32) -> Vec<T> {
    items.sort_by_key(|item| {
        let region = item.as_ref();
        (region.min_y(), region.min_x())
    });

    let mut ordered = Vec::with_capacity(items.len());
    let mut row: Vec<T> = Vec::new();
    for item in items {
        let top = item.as_ref().min_y();
        let threshold = row_threshold.max(0) as u32;
        let joins_row = row
            .last()
            .is_some_and(|last| top.abs_diff(last.as_ref().min_y()) < threshold);
        if !joins_row && !row.is_empty() {
            flush_row(&mut row, &mut ordered);
        }
        row.push(item);
    }
    flush_row(&mut row, &mut ordered);

    log::trace!("Sequenced {} regions", ordered.len());
    ordered
}

fn flush_row<T: AsRef<Region>>(row: &mut Vec<T>, ordered: &mut Vec<T>) {
    row.sort_by_key(|item| item.as_ref().min_x());
    ordered.append(row);
}
