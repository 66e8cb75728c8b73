//! ID-column policy (§4.6 common concerns): a fixed, hidden column carries
//! Source-A record ids so row identity survives a full-grid rewrite
//! without shifting the user's visible columns.

use std::collections::{BTreeMap, HashMap};

use sync_core::mapping::SheetValue;

pub const ID_COLUMN_HEADER: &str = "Record ID";

/// Spreadsheet column letter for a zero-based index, used to build A1-style
/// ranges (`AA`, `B`, ...).
pub fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// Builds the header row: field names at their mapped column, `Record ID`
/// at `id_column_index`, blank elsewhere.
pub fn header_row(field_names_by_column: &BTreeMap<usize, String>, id_column_index: usize) -> Vec<SheetValue> {
    let width = id_column_index + 1;
    let mut row = vec![SheetValue::Empty; width];
    for (&column, name) in field_names_by_column {
        if column < width {
            row[column] = SheetValue::String(name.clone());
        }
    }
    row[id_column_index] = SheetValue::String(ID_COLUMN_HEADER.to_string());
    row
}

/// Places mapped field values into a row of `width` columns (the id column
/// itself is left blank here; it's written separately by `id_column_values`
/// so the two writes can be scheduled independently, as in §4.6.1 steps 6
/// and 8).
pub fn data_row(values_by_column: &BTreeMap<usize, SheetValue>, width: usize) -> Vec<SheetValue> {
    let mut row = vec![SheetValue::Empty; width];
    for (&column, value) in values_by_column {
        if column < width {
            row[column] = value.clone();
        }
    }
    row
}

/// Scans already-written sheet rows (header excluded) for ids in
/// `id_column_index`, returning record id -> zero-based data-row index.
pub fn index_existing_ids(rows: &[Vec<SheetValue>], id_column_index: usize) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (row_index, row) in rows.iter().enumerate() {
        if let Some(SheetValue::String(id)) = row.get(id_column_index) {
            if !id.is_empty() {
                index.insert(id.clone(), row_index);
            }
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letter_for_default_id_index() {
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(25), "Z");
    }

    #[test]
    fn header_row_places_names_and_id_header() {
        let mut names = BTreeMap::new();
        names.insert(0, "Name".to_string());
        names.insert(1, "Owner".to_string());
        let row = header_row(&names, 2);
        assert_eq!(row[0], SheetValue::String("Name".into()));
        assert_eq!(row[1], SheetValue::String("Owner".into()));
        assert_eq!(row[2], SheetValue::String(ID_COLUMN_HEADER.into()));
    }

    #[test]
    fn index_existing_ids_skips_blank_cells() {
        let rows = vec![
            vec![SheetValue::Empty, SheetValue::String("rec1".into())],
            vec![SheetValue::Empty, SheetValue::Empty],
        ];
        let index = index_existing_ids(&rows, 1);
        assert_eq!(index.get("rec1"), Some(&0));
        assert_eq!(index.len(), 1);
    }
}
