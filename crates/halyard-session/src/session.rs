//! The replicated session object.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::value::{AttributeValue, SessionValue};

/// A user session with typed attributes and change tracking.
///
/// Attribute writes that change nothing (same type, equal value) are not
/// recorded. Removing an attribute or changing the principal marks the whole
/// session dirty.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    creation_time: DateTime<Utc>,
    last_accessed_time: DateTime<Utc>,
    max_inactive_secs: u64,
    is_new: bool,
    valid: bool,
    principal: Option<String>,
    attributes: BTreeMap<String, Box<dyn AttributeValue>>,
    dirty: bool,
    changed: BTreeSet<String>,
}

impl Session {
    /// A fresh, valid, new session.
    pub fn new(id: impl Into<String>, max_inactive_secs: u64) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            creation_time: now,
            last_accessed_time: now,
            max_inactive_secs,
            is_new: true,
            valid: true,
            principal: None,
            attributes: BTreeMap::new(),
            dirty: false,
            changed: BTreeSet::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: String,
        creation_time: DateTime<Utc>,
        last_accessed_time: DateTime<Utc>,
        max_inactive_secs: u64,
        is_new: bool,
        valid: bool,
        principal: Option<String>,
        attributes: BTreeMap<String, Box<dyn AttributeValue>>,
    ) -> Self {
        Self {
            id,
            creation_time,
            last_accessed_time,
            max_inactive_secs,
            is_new,
            valid,
            principal,
            attributes,
            dirty: false,
            changed: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn last_accessed_time(&self) -> DateTime<Utc> {
        self.last_accessed_time
    }

    /// Record an access now.
    pub fn access(&mut self) {
        self.last_accessed_time = Utc::now();
    }

    pub fn max_inactive_secs(&self) -> u64 {
        self.max_inactive_secs
    }

    pub fn set_max_inactive_secs(&mut self, secs: u64) {
        self.max_inactive_secs = secs;
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub(crate) fn set_new(&mut self, is_new: bool) {
        self.is_new = is_new;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    /// Mark the session for removal at the end of the request.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn set_principal(&mut self, principal: Option<String>) {
        self.principal = principal;
        self.dirty = true;
    }

    /// Typed attribute lookup. `None` if absent or of another type.
    pub fn attribute<V: SessionValue>(&self, name: &str) -> Option<&V> {
        self.attributes
            .get(name)
            .and_then(|v| v.as_any().downcast_ref::<V>())
    }

    /// Type-erased attribute lookup.
    pub fn attribute_value(&self, name: &str) -> Option<&dyn AttributeValue> {
        self.attributes.get(name).map(|v| v.as_ref())
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub(crate) fn attributes(&self) -> &BTreeMap<String, Box<dyn AttributeValue>> {
        &self.attributes
    }

    /// Set an attribute. Returns whether the stored value changed.
    pub fn set_attribute<V: SessionValue>(&mut self, name: impl Into<String>, value: V) -> bool {
        self.set_attribute_boxed(name, Box::new(value))
    }

    /// Set a type-erased attribute. Returns whether the stored value changed.
    pub fn set_attribute_boxed(
        &mut self,
        name: impl Into<String>,
        value: Box<dyn AttributeValue>,
    ) -> bool {
        let name = name.into();
        let unchanged = self
            .attributes
            .get(&name)
            .is_some_and(|old| old.dyn_eq(value.as_ref()));
        if unchanged {
            return false;
        }
        self.changed.insert(name.clone());
        self.attributes.insert(name, value);
        true
    }

    /// Remove an attribute. Returns whether it was present.
    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.dirty = true;
        self.changed.remove(name);
        self.attributes.remove(name).is_some()
    }

    /// Whether anything changed since tracking was last reset.
    pub fn is_dirty(&self) -> bool {
        self.dirty || !self.changed.is_empty()
    }

    /// Force the next save to write.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Names of attributes set since tracking was last reset.
    pub fn changed_attributes(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    pub fn reset_dirty_tracking(&mut self) {
        self.dirty = false;
        self.changed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_clean() {
        let session = Session::new("ABC", 1800);
        assert!(session.is_new());
        assert!(session.is_valid());
        assert!(!session.is_dirty());
        assert_eq!(session.creation_time(), session.last_accessed_time());
    }

    #[test]
    fn test_equal_value_is_not_a_change() {
        let mut session = Session::new("ABC", 1800);
        assert!(session.set_attribute("user", "alice".to_string()));
        session.reset_dirty_tracking();

        assert!(!session.set_attribute("user", "alice".to_string()));
        assert!(!session.is_dirty());

        assert!(session.set_attribute("user", "bob".to_string()));
        assert!(session.is_dirty());
        assert_eq!(session.changed_attributes().collect::<Vec<_>>(), vec!["user"]);
    }

    #[test]
    fn test_type_change_is_a_change() {
        let mut session = Session::new("ABC", 1800);
        session.set_attribute("n", 1i64);
        session.reset_dirty_tracking();
        assert!(session.set_attribute("n", 1u64));
        assert_eq!(session.attribute::<u64>("n"), Some(&1));
        assert_eq!(session.attribute::<i64>("n"), None);
    }

    #[test]
    fn test_remove_and_principal_mark_dirty() {
        let mut session = Session::new("ABC", 1800);
        session.set_attribute("k", true);
        session.reset_dirty_tracking();

        assert!(session.remove_attribute("k"));
        assert!(session.is_dirty());
        session.reset_dirty_tracking();

        assert!(!session.remove_attribute("k"));
        assert!(session.is_dirty());
        session.reset_dirty_tracking();

        session.set_principal(Some("alice".to_string()));
        assert!(session.is_dirty());
        assert_eq!(session.principal(), Some("alice"));
    }

    #[test]
    fn test_invalidate() {
        let mut session = Session::new("ABC", 1800);
        session.invalidate();
        assert!(!session.is_valid());
    }
}
