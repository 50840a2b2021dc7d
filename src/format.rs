//! The array format: the schema describing how to interpret a vertex buffer's raw bytes.
//!
//! An [`ArrayFormat`] is owned by whatever collaborator defines vertex layouts (out of scope for
//! this crate); the cache only needs to intern it once per buffer and consult its `stride` and
//! per-column component widths when serializing across endiannesses.

use {
    serde::{Deserialize, Serialize},
    std::collections::HashMap,
};

/// One numeric column within a row: where it starts, how many components it has, and the byte
/// width of each component (1, 2, 4, or 8 for the usual scalar types).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Column {
    /// Byte offset of this column's first component within the row.
    pub offset: u32,
    /// Number of components (e.g. 3 for a `vec3`).
    pub component_count: u32,
    /// Byte width of a single component (e.g. 4 for `f32`).
    pub component_size: u32,
}

impl Column {
    /// Total bytes occupied by this column within a row.
    pub fn size(&self) -> u32 {
        self.component_count * self.component_size
    }
}

/// The schema of one row of a vertex array: ordered columns plus the row's total byte width.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct ArrayFormat {
    columns: Vec<Column>,
    stride: u32,
}

impl ArrayFormat {
    /// Builds a format from an explicit stride and column list.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if any column would read past `stride` bytes.
    pub fn new(stride: u32, columns: Vec<Column>) -> Self {
        for column in &columns {
            debug_assert!(
                column.offset + column.size() <= stride,
                "column reads past the end of the row"
            );
        }

        Self { columns, stride }
    }

    /// The byte width of one row.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// The ordered columns of one row.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
}

/// An opaque, interning-table-assigned identifier for an [`ArrayFormat`].
///
/// Two buffers constructed with `==` formats are guaranteed the same `FormatId` only once both
/// have gone through [`FormatTable::intern`] — this is what lets the durable-format reader
/// substitute a canonical equivalent for a format it has seen before (see
/// [`crate::serialize`]).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub struct FormatId(u32);

impl FormatId {
    /// The raw interning-table index, for writing to the durable format's pointer field.
    pub(crate) fn raw(self) -> u32 {
        self.0
    }

    /// Reconstructs an id from a raw index read back from the durable format. The caller is
    /// responsible for resolving it against the destination process's own [`FormatTable`].
    pub(crate) fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
impl FormatId {
    /// Builds an arbitrary id for tests that exercise buffer/residency logic without needing a
    /// real [`FormatTable`].
    pub(crate) fn for_tests(raw: u32) -> Self {
        Self(raw)
    }
}

/// Interns [`ArrayFormat`] values so that buffers can cheaply compare and refer to them by id.
///
/// A buffer must be interned here before it is usable — see `VertexBuffer::Invariants` in the
/// design: "The array format must be interned/registered before the buffer becomes usable."
#[derive(Debug, Default)]
pub struct FormatTable {
    formats: Vec<ArrayFormat>,
    by_value: HashMap<ArrayFormat, FormatId>,
}

impl FormatTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `format`, returning its canonical id. If an equal format was already interned, the
    /// existing id is returned and the input format is dropped.
    pub fn intern(&mut self, format: ArrayFormat) -> FormatId {
        if let Some(id) = self.by_value.get(&format) {
            return *id;
        }

        let id = FormatId(self.formats.len() as u32);
        self.formats.push(format.clone());
        self.by_value.insert(format, id);

        id
    }

    /// Looks up a previously interned format.
    pub fn get(&self, id: FormatId) -> Option<&ArrayFormat> {
        self.formats.get(id.0 as usize)
    }

    /// Whether `id` refers to a format known to this table.
    pub fn contains(&self, id: FormatId) -> bool {
        (id.0 as usize) < self.formats.len()
    }
}

// `ArrayFormat` needs `Hash` to be a `HashMap` key; columns are plain-old-data so this is a
// straightforward structural hash matching `PartialEq`/`Eq`.
impl std::hash::Hash for ArrayFormat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.stride.hash(state);
        for column in &self.columns {
            column.offset.hash(state);
            column.component_count.hash(state);
            column.component_size.hash(state);
        }
    }
}

impl std::hash::Hash for Column {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.offset.hash(state);
        self.component_count.hash(state);
        self.component_size.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_uv() -> ArrayFormat {
        ArrayFormat::new(
            20,
            vec![
                Column {
                    offset: 0,
                    component_count: 3,
                    component_size: 4,
                },
                Column {
                    offset: 12,
                    component_count: 2,
                    component_size: 4,
                },
            ],
        )
    }

    #[test]
    fn interning_is_idempotent() {
        let mut table = FormatTable::new();

        let a = table.intern(position_uv());
        let b = table.intern(position_uv());

        assert_eq!(a, b);
        assert_eq!(table.formats.len(), 1);
    }

    #[test]
    fn distinct_formats_get_distinct_ids() {
        let mut table = FormatTable::new();

        let a = table.intern(position_uv());
        let b = table.intern(ArrayFormat::new(
            8,
            vec![Column {
                offset: 0,
                component_count: 2,
                component_size: 4,
            }],
        ));

        assert_ne!(a, b);
    }

    #[test]
    fn unknown_id_is_not_contained() {
        let table = FormatTable::new();

        assert!(!table.contains(FormatId(0)));
    }
}
