//! String lookup by content

use std::collections::BTreeMap;

use hbc_bytecode::StringTable;

/// Text of a string id
pub trait StringSource {
    /// Decoded text, if the id exists
    fn text(&self, id: u32) -> Option<&str>;
}

impl StringSource for StringTable {
    fn text(&self, id: u32) -> Option<&str> {
        self.get(id)
    }
}

/// A string table followed by strings not yet merged into it
#[derive(Debug, Clone, Copy)]
pub struct PendingStrings<'a> {
    /// Merged strings
    pub table: &'a StringTable,
    /// Appended strings; the first takes id `table.len()`
    pub pending: &'a [String],
}

impl<'a> PendingStrings<'a> {
    /// Decoded text, borrowed for the lifetime of the underlying tables
    pub fn text_of(self, id: u32) -> Option<&'a str> {
        match (id as usize).checked_sub(self.table.len()) {
            Some(at) => self.pending.get(at).map(String::as_str),
            None => self.table.get(id),
        }
    }
}

impl StringSource for PendingStrings<'_> {
    fn text(&self, id: u32) -> Option<&str> {
        self.text_of(id)
    }
}

/// String ids bucketed by decoded length
///
/// Exact lookups scan one bucket. Substring lookups walk buckets from the
/// needle's length upwards, so the shortest containing string wins.
#[derive(Debug, Clone, Default)]
pub struct StringIndex {
    by_len: BTreeMap<usize, Vec<u32>>,
}

impl StringIndex {
    /// Index every string of a table
    pub fn new(table: &StringTable) -> Self {
        let mut index = Self::default();
        for (id, text) in table.iter() {
            index.insert(id, text);
        }
        tracing::debug!(strings = table.len(), buckets = index.by_len.len(), "built string index");
        index
    }

    /// Add a string appended after the index was built
    pub fn insert(&mut self, id: u32, text: &str) {
        self.by_len.entry(text.len()).or_default().push(id);
    }

    /// Lowest id whose text equals `text`
    pub fn find(&self, table: &impl StringSource, text: &str) -> Option<u32> {
        self.by_len
            .get(&text.len())?
            .iter()
            .copied()
            .find(|&id| table.text(id) == Some(text))
    }

    /// Shortest string containing `needle`, lowest id among equals
    pub fn find_partial(&self, table: &impl StringSource, needle: &str) -> Option<u32> {
        self.by_len.range(needle.len()..).find_map(|(_, ids)| {
            ids.iter()
                .copied()
                .find(|&id| table.text(id).is_some_and(|s| s.contains(needle)))
        })
    }

    /// Exact match first, then the shortest containing string
    pub fn resolve(&self, table: &impl StringSource, text: &str) -> Option<u32> {
        self.find(table, text).or_else(|| self.find_partial(table, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hbc_bytecode::StringKind;

    fn table() -> StringTable {
        let mut table = StringTable::default();
        for s in ["isDeveloperMode", "get", "isDeveloper", "target", "get"] {
            table.push(s, StringKind::String);
        }
        table
    }

    #[test]
    fn test_exact_prefers_lowest_id() {
        let table = table();
        let index = StringIndex::new(&table);
        assert_eq!(index.find(&table, "get"), Some(1));
        assert_eq!(index.find(&table, "isDev"), None);
    }

    #[test]
    fn test_partial_prefers_shortest() {
        let table = table();
        let index = StringIndex::new(&table);
        assert_eq!(index.find_partial(&table, "Developer"), Some(2));
        assert_eq!(index.find_partial(&table, "arg"), Some(3));
        assert_eq!(index.find_partial(&table, "nope"), None);
        assert_eq!(index.resolve(&table, "et"), Some(1));
    }

    #[test]
    fn test_insert_after_build() {
        let mut table = table();
        let mut index = StringIndex::new(&table);
        let id = table.push("fresh", StringKind::String);
        index.insert(id, "fresh");
        assert_eq!(index.find(&table, "fresh"), Some(id));
    }

    #[test]
    fn test_pending_ids_follow_the_table() {
        let table = table();
        let pending = vec!["later".to_owned()];
        let view = PendingStrings { table: &table, pending: &pending };
        let mut index = StringIndex::new(&table);
        index.insert(5, "later");
        assert_eq!(view.text(4), Some("get"));
        assert_eq!(view.text(5), Some("later"));
        assert_eq!(view.text(6), None);
        assert_eq!(index.find(&view, "later"), Some(5));
        assert_eq!(index.find(&table, "later"), None);
    }
}
