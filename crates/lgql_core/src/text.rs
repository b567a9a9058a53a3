//! String interning for names produced by the lexer.

use rustc_hash::FxHashMap;
use std::cell::RefCell;

/// An interned name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Text(u32);

impl Text {
    #[must_use]
    pub const fn from_raw(index: u32) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

/// Deduplicates names seen while parsing one document.
///
/// The interner is single-threaded; create one per parse and convert the
/// resulting AST into owned strings before sharing it across tasks.
#[derive(Debug)]
pub struct Interner {
    map: RefCell<FxHashMap<String, Text>>,
    strings: RefCell<Vec<String>>,
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl Interner {
    /// Creates an interner with the built-in scalars and keywords registered.
    #[must_use]
    pub fn new() -> Self {
        let interner = Self {
            map: RefCell::new(FxHashMap::default()),
            strings: RefCell::new(Vec::new()),
        };

        for keyword in [
            "Int",
            "Float",
            "String",
            "Boolean",
            "ID",
            "type",
            "interface",
            "union",
            "enum",
            "input",
            "scalar",
            "schema",
            "extend",
            "implements",
            "directive",
            "repeatable",
            "query",
            "mutation",
            "subscription",
            "fragment",
            "on",
            "true",
            "false",
            "null",
            "cursor",
        ] {
            interner.intern(keyword);
        }

        interner
    }

    /// Interns a string, returning its identifier.
    pub fn intern(&self, s: &str) -> Text {
        if let Some(&id) = self.map.borrow().get(s) {
            return id;
        }

        let mut strings = self.strings.borrow_mut();
        let id = Text(u32::try_from(strings.len()).unwrap_or(u32::MAX));
        strings.push(s.to_string());
        self.map.borrow_mut().insert(s.to_string(), id);
        id
    }

    /// Resolves an identifier back to its string.
    #[must_use]
    pub fn get(&self, id: Text) -> String {
        self.strings
            .borrow()
            .get(id.0 as usize)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns true if `id` resolves to `s`, without allocating.
    #[must_use]
    pub fn is(&self, id: Text, s: &str) -> bool {
        self.strings
            .borrow()
            .get(id.0 as usize)
            .is_some_and(|stored| stored == s)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_dedupes() {
        let interner = Interner::new();
        let a = interner.intern("allFruits");
        let b = interner.intern("allFruits");
        let c = interner.intern("selectedFruits");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.get(c), "selectedFruits");
    }

    #[test]
    fn test_keywords_preregistered() {
        let interner = Interner::new();
        let before = interner.len();
        let cursor = interner.intern("cursor");
        assert_eq!(interner.len(), before);
        assert!(interner.is(cursor, "cursor"));
        assert!(!interner.is(cursor, "Cursor"));
    }
}
