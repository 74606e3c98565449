//! Read-only token menus (coded vocabularies).
//!
//! A [`TokenMenuStore`] is loaded once before a batch and shared by
//! reference across workers. The engine never mutates it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix marking a criteria value that expands to a whole menu.
pub const MENU_REFERENCE_PREFIX: &str = "@menu:";

/// One entry of a token menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub order: u32,
    pub label: String,
    pub value: String,
}

/// Menu key → ordered items.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenMenuStore {
    menus: BTreeMap<String, Vec<MenuItem>>,
}

impl TokenMenuStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `{ menuKey: [{order, label, value}] }` document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut store: Self = serde_json::from_str(json)?;
        for items in store.menus.values_mut() {
            items.sort_by_key(|item| item.order);
        }
        Ok(store)
    }

    /// Adds or replaces a menu. Items are kept sorted by `order`.
    pub fn insert(&mut self, key: impl Into<String>, mut items: Vec<MenuItem>) {
        items.sort_by_key(|item| item.order);
        self.menus.insert(key.into(), items);
    }

    pub fn items(&self, key: &str) -> Option<&[MenuItem]> {
        self.menus.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.menus.contains_key(key)
    }

    /// Resolves a token against a menu: a label maps to its value, a value
    /// maps to itself, anything else is `None`.
    pub fn resolve(&self, key: &str, token: &str) -> Option<&str> {
        self.menus.get(key)?.iter().find_map(|item| {
            (item.label == token || item.value == token).then_some(item.value.as_str())
        })
    }

    /// Expands a list of criteria tokens into concrete values.
    ///
    /// `@menu:<key>` expands to every value in that menu. When `menu` is
    /// given, other tokens are resolved through it and kept verbatim if
    /// they are not found.
    pub fn expand_tokens(&self, menu: Option<&str>, tokens: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(tokens.len());
        for token in tokens {
            if let Some(key) = token.strip_prefix(MENU_REFERENCE_PREFIX) {
                if let Some(items) = self.items(key) {
                    out.extend(items.iter().map(|item| item.value.clone()));
                }
                continue;
            }
            let resolved = menu
                .and_then(|key| self.resolve(key, token))
                .unwrap_or(token.as_str());
            out.push(resolved.to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TokenMenuStore {
        TokenMenuStore::from_json(
            r#"{
                "separation": [
                    {"order": 2, "label": "career", "value": "02"},
                    {"order": 1, "label": "general", "value": "01"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_items_sorted_by_order() {
        let store = store();
        let items = store.items("separation").unwrap();
        assert_eq!(items[0].value, "01");
        assert_eq!(items[1].value, "02");
    }

    #[test]
    fn test_resolve_label_and_value() {
        let store = store();
        assert_eq!(store.resolve("separation", "career"), Some("02"));
        assert_eq!(store.resolve("separation", "01"), Some("01"));
        assert_eq!(store.resolve("separation", "arts"), None);
        assert_eq!(store.resolve("missing", "01"), None);
    }

    #[test]
    fn test_expand_tokens() {
        let store = store();
        let expanded = store.expand_tokens(
            Some("separation"),
            &["general".to_string(), "99".to_string()],
        );
        assert_eq!(expanded, vec!["01".to_string(), "99".to_string()]);

        let all = store.expand_tokens(None, &["@menu:separation".to_string()]);
        assert_eq!(all, vec!["01".to_string(), "02".to_string()]);
    }
}
