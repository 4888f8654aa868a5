//! Human-readable byte sizes

use byte_unit::{Byte, UnitType};

/// Format a byte count with binary units, e.g. `1.50 MiB`
pub fn format_bytes(bytes: u64) -> String {
    let adjusted = Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary);
    format!("{adjusted:.2}")
}
