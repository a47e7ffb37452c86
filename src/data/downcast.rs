//! Memory downcasting of numeric columns.

use tracing::{debug, info, warn};

use super::table::{Column, RawTable};

/// Integer columns reaching this value are never narrowed.
pub const NARROW_LIMIT: i64 = 1 << 32;

/// Narrows a column in place. Returns `false` when an integer column had to
/// stay 64-bit.
pub fn downcast_column(column: &mut Column) -> bool {
    match column {
        Column::Float64(values) => {
            let narrowed = values.iter().map(|v| v.map(|x| x as f32)).collect();
            *column = Column::Float32(narrowed);
            true
        }
        Column::Int64(values) => {
            let (min, max) = values
                .iter()
                .flatten()
                .fold((i64::MAX, i64::MIN), |(lo, hi), &x| (lo.min(x), hi.max(x)));
            if values.iter().all(Option::is_none) {
                *column = Column::Int32(vec![None; values.len()]);
                return true;
            }
            if max >= NARROW_LIMIT {
                return false;
            }
            if min >= i64::from(i32::MIN) && max <= i64::from(i32::MAX) {
                let narrowed = values.iter().map(|v| v.map(|x| x as i32)).collect();
                *column = Column::Int32(narrowed);
                true
            } else if min >= 0 {
                let narrowed = values.iter().map(|v| v.map(|x| x as u32)).collect();
                *column = Column::UInt32(narrowed);
                true
            } else {
                false
            }
        }
        _ => true,
    }
}

/// Downcasts every numeric column of `table`, logging the footprint change.
pub fn downcast_table(table: &mut RawTable) {
    let before = table.byte_size();
    let name = table.name().to_string();
    for (header, column) in table.columns_mut() {
        let dtype = column.dtype();
        if !downcast_column(column) {
            warn!("{}.{}: values exceed the 32-bit range, keeping {}", name, header, dtype);
        } else if dtype != column.dtype() {
            debug!("{}.{}: {} -> {}", name, header, dtype, column.dtype());
        }
    }
    info!(
        "Downcast {}: {:.2} MB -> {:.2} MB",
        name,
        before as f64 / 1_048_576.0,
        table.byte_size() as f64 / 1_048_576.0
    );
}
