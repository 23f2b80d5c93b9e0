use std::hash::{Hash, Hasher};

use serde::Serialize;

/// One column value of a result row.
///
/// Equality follows SQL value semantics rather than storage class: an integer and a real with
/// the same numeric value compare equal (and hash equally), so `1` and `1.0` are the same row
/// member when result sets are compared.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

pub type Row = Vec<Cell>;

#[derive(PartialEq, Eq, Hash)]
enum CellKey<'a> {
    Null,
    Int(i64),
    RealBits(u64),
    Text(&'a str),
    Blob(&'a [u8]),
}

// i64::MIN as f64 is exact; i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
const I64_LOWER_F64: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER_F64: f64 = 9_223_372_036_854_775_808.0;

impl Cell {
    fn key(&self) -> CellKey<'_> {
        match self {
            Cell::Null => CellKey::Null,
            Cell::Integer(v) => CellKey::Int(*v),
            Cell::Real(v) => {
                if v.fract() == 0.0 && *v >= I64_LOWER_F64 && *v < I64_UPPER_F64 {
                    CellKey::Int(*v as i64)
                } else {
                    CellKey::RealBits(v.to_bits())
                }
            }
            Cell::Text(s) => CellKey::Text(s),
            Cell::Blob(b) => CellKey::Blob(b),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Cell {}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn integral_reals_equal_integers() {
        assert_eq!(Cell::Integer(3), Cell::Real(3.0));
        assert_eq!(Cell::Real(-0.0), Cell::Integer(0));
        assert_ne!(Cell::Integer(3), Cell::Real(3.5));
        assert_ne!(Cell::Text("3".into()), Cell::Integer(3));

        let set: HashSet<Cell> = [Cell::Integer(1), Cell::Real(1.0), Cell::Null]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn serializes_as_plain_json_values() {
        let row = vec![
            Cell::Null,
            Cell::Integer(7),
            Cell::Real(1.5),
            Cell::Text("x".into()),
        ];
        let v = serde_json::to_value(&row).unwrap();
        assert_eq!(v, serde_json::json!([null, 7, 1.5, "x"]));
    }
}
