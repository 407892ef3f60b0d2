//! The configured-architecture table.
//!
//! Architectures are interned once and referenced by index from package
//! records. The priority drives candidate selection: 0 means the
//! architecture is not installable on this host.

/// Handle into the [`ArchTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchId(pub(crate) usize);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArchTable {
    archs: Vec<(String, u32)>,
}

impl ArchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from `(name, priority)` pairs. An empty list gets
    /// the conventional fallback of `all` and `noarch` at priority 1, which
    /// is what arch-independent feeds ship.
    pub fn from_priorities<'a>(archs: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        let mut table = Self::new();
        for (name, priority) in archs {
            table.insert(name, priority);
        }
        if table.archs.is_empty() {
            table.insert("all", 1);
            table.insert("noarch", 1);
        }
        table
    }

    /// Registers an architecture, updating the priority if already present.
    pub fn insert(&mut self, name: &str, priority: u32) -> ArchId {
        match self.lookup(name) {
            Some(id) => {
                self.archs[id.0].1 = priority;
                id
            }
            None => {
                self.archs.push((name.to_string(), priority));
                ArchId(self.archs.len() - 1)
            }
        }
    }

    /// Interns an architecture name. Names absent from the configuration
    /// are kept at priority 0 so diagnostics can still print them.
    pub fn intern(&mut self, name: &str) -> ArchId {
        match self.lookup(name) {
            Some(id) => id,
            None => {
                self.archs.push((name.to_string(), 0));
                ArchId(self.archs.len() - 1)
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<ArchId> {
        self.archs.iter().position(|(n, _)| n == name).map(ArchId)
    }

    pub fn name(&self, id: ArchId) -> &str {
        &self.archs[id.0].0
    }

    pub fn priority(&self, id: ArchId) -> u32 {
        self.archs[id.0].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_names_are_stable() {
        let mut table = ArchTable::from_priorities([("x86_64", 10), ("all", 1)]);
        let id = table.lookup("x86_64").unwrap();
        assert_eq!(table.intern("x86_64"), id);
        assert_eq!(table.priority(id), 10);
        assert_eq!(table.name(id), "x86_64");
    }

    #[test]
    fn unknown_arch_gets_zero_priority() {
        let mut table = ArchTable::from_priorities([("all", 1)]);
        let id = table.intern("mips_24kc");
        assert_eq!(table.priority(id), 0);
    }

    #[test]
    fn empty_config_seeds_noarch() {
        let table = ArchTable::from_priorities([]);
        assert_eq!(table.priority(table.lookup("all").unwrap()), 1);
        assert_eq!(table.priority(table.lookup("noarch").unwrap()), 1);
    }
}
