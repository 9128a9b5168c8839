//! A caller's session properties and the ownership record kept inside them.

use std::collections::BTreeMap;

/// Session property prefix marking an owned share key.
pub const KEY_SESSION_PREFIX: &str = "key:";

/// Opaque per-user key/value properties. Share ownership is stored as
/// `key:<metadata key>` → display name.
///
/// Writes are also recorded as changes, so a save only touches the
/// properties this copy modified and leaves concurrent writers' alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Session {
    properties: BTreeMap<String, String>,
    /// `Some` sets the property, `None` removes it.
    changes: BTreeMap<String, Option<String>>,
}

impl Session {
    pub fn from_properties(properties: BTreeMap<String, String>) -> Self {
        Self {
            properties,
            changes: BTreeMap::new(),
        }
    }

    /// Whether anything changed since the session was loaded.
    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Property writes since load, last write per property wins.
    pub fn changes(&self) -> &BTreeMap<String, Option<String>> {
        &self.changes
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        self.changes.insert(key.clone(), Some(value.clone()));
        self.properties.insert(key, value);
    }

    /// Record that this session owns `share_key`.
    pub fn grant(&mut self, share_key: &str, name: &str) {
        self.set(format!("{}{}", KEY_SESSION_PREFIX, share_key), name);
    }

    /// Drop `share_key` from the session. The removal is recorded even when
    /// this copy never saw the key, since another request may have granted it.
    pub fn revoke(&mut self, share_key: &str) -> bool {
        let key = format!("{}{}", KEY_SESSION_PREFIX, share_key);
        let removed = self.properties.remove(&key).is_some();
        self.changes.insert(key, None);
        removed
    }

    #[cfg(test)]
    pub fn owns(&self, share_key: &str) -> bool {
        self.properties
            .contains_key(&format!("{}{}", KEY_SESSION_PREFIX, share_key))
    }

    /// Owned share keys with the display name captured at registration.
    pub fn owned(&self) -> Vec<(String, String)> {
        self.properties
            .iter()
            .filter_map(|(k, name)| {
                k.strip_prefix(KEY_SESSION_PREFIX)
                    .map(|key| (key.to_string(), name.clone()))
            })
            .collect()
    }
}
