use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::error::ChatError;
use crate::types::ConnId;

/// Display name → owning connection, for currently connected clients.
///
/// The registry refers to connections by `ConnId`; the server's arena owns
/// them. Every method takes `&self` or `&mut self`, so the borrow checker
/// already enforces exclusive access for mutation. A design with several
/// threads would put the whole registry behind one mutex.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, ConnId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-then-insert in one step. An existing entry is never replaced.
    pub fn register(&mut self, name: &str, conn: ConnId) -> Result<(), ChatError> {
        match self.sessions.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ChatError::NameConflict(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(conn);
                Ok(())
            }
        }
    }

    /// Remove `name` if present. Removing an absent name is not an error.
    pub fn unregister(&mut self, name: &str) -> Option<ConnId> {
        self.sessions.remove(name)
    }

    pub fn lookup(&self, name: &str) -> Option<ConnId> {
        self.sessions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup() {
        let mut registry = SessionRegistry::new();
        registry.register("alice", ConnId::new(3)).unwrap();

        assert_eq!(registry.lookup("alice"), Some(ConnId::new(3)));
        assert_eq!(registry.lookup("bob"), None);
        assert!(registry.contains("alice"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_name_is_rejected_without_mutation() {
        let mut registry = SessionRegistry::new();
        registry.register("alice", ConnId::new(0)).unwrap();

        let err = registry.register("alice", ConnId::new(1)).unwrap_err();
        assert!(matches!(err, ChatError::NameConflict(ref name) if name == "alice"));
        assert_eq!(registry.lookup("alice"), Some(ConnId::new(0)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = SessionRegistry::new();
        registry.register("alice", ConnId::new(0)).unwrap();

        assert_eq!(registry.unregister("alice"), Some(ConnId::new(0)));
        assert_eq!(registry.unregister("alice"), None);
        assert!(registry.is_empty());

        // The name is free again.
        registry.register("alice", ConnId::new(5)).unwrap();
        assert_eq!(registry.lookup("alice"), Some(ConnId::new(5)));
    }

    #[test]
    fn names_lists_every_session() {
        let mut registry = SessionRegistry::new();
        for (i, name) in ["carol", "alice", "bob"].into_iter().enumerate() {
            registry.register(name, ConnId::new(i)).unwrap();
        }

        let mut names: Vec<&str> = registry.names().collect();
        names.sort_unstable();
        assert_eq!(names, ["alice", "bob", "carol"]);
    }
}
