// Copyright 2026 Ragbench Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Name → item lookup with aliases, shared by the chunker, embedding and
//! vector store registries.

use std::collections::BTreeMap;

use crate::error::BenchError;

#[derive(Debug)]
struct Entry<T> {
    aliases: Vec<String>,
    item: T,
}

#[derive(Debug)]
pub struct Registry<T> {
    kind: &'static str,
    entries: BTreeMap<String, Entry<T>>,
    aliases: BTreeMap<String, String>,
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }

    /// Registers `item` under `key` and `aliases`. Every name is checked
    /// before anything is inserted, so a conflict leaves the registry as it was.
    pub fn register(&mut self, key: &str, aliases: &[&str], item: T) -> Result<(), BenchError> {
        let key = normalize(key);
        let aliases: Vec<String> = aliases.iter().map(|a| normalize(a)).collect();

        let mut seen = vec![key.clone()];
        for name in std::iter::once(&key).chain(aliases.iter()) {
            if self.entries.contains_key(name) || self.aliases.contains_key(name) {
                return Err(BenchError::AlreadyRegistered { name: name.clone() });
            }
        }
        for alias in &aliases {
            if seen.contains(alias) {
                return Err(BenchError::AlreadyRegistered {
                    name: alias.clone(),
                });
            }
            seen.push(alias.clone());
        }

        for alias in &aliases {
            self.aliases.insert(alias.clone(), key.clone());
        }
        self.entries.insert(key, Entry { aliases, item });
        Ok(())
    }

    /// Returns the primary key for a key or alias.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        let name = normalize(name);
        if let Some((key, _)) = self.entries.get_key_value(&name) {
            return Some(key.as_str());
        }
        self.aliases.get(&name).map(|key| key.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        let key = self.resolve(name)?.to_string();
        self.entries.get(&key).map(|entry| &entry.item)
    }

    /// Like [`Registry::get`] but reports the known names on a miss.
    pub fn lookup(&self, name: &str) -> Result<&T, BenchError> {
        self.get(name).ok_or_else(|| BenchError::UnknownName {
            kind: self.kind,
            name: name.to_string(),
            available: self.keys().collect::<Vec<_>>().join(", "),
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|key| key.as_str())
    }

    pub fn aliases_of(&self, key: &str) -> &[String] {
        self.entries
            .get(&normalize(key))
            .map(|entry| entry.aliases.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.aliases.clear();
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_aliases_to_primary_key() {
        let mut registry = Registry::new("chunker");
        registry
            .register("fixed", &["fixed-size", "character"], 1)
            .expect("register");
        assert_eq!(registry.get("fixed"), Some(&1));
        assert_eq!(registry.get("Fixed-Size"), Some(&1));
        assert_eq!(registry.resolve("character"), Some("fixed"));
        assert_eq!(registry.aliases_of("fixed"), ["fixed-size", "character"]);
    }

    #[test]
    fn conflicting_registration_leaves_existing_entry_untouched() {
        let mut registry = Registry::new("chunker");
        registry.register("fixed", &["window"], 1).expect("register");

        let err = registry.register("fixed", &[], 2).unwrap_err();
        assert_eq!(
            err,
            BenchError::AlreadyRegistered {
                name: "fixed".into()
            }
        );
        let err = registry.register("other", &["window"], 3).unwrap_err();
        assert_eq!(
            err,
            BenchError::AlreadyRegistered {
                name: "window".into()
            }
        );
        assert!(registry.register("window", &[], 4).is_err());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("fixed"), Some(&1));
        assert_eq!(registry.get("window"), Some(&1));
        assert_eq!(registry.get("other"), None);
    }

    #[test]
    fn duplicate_alias_within_one_registration_is_rejected() {
        let mut registry = Registry::new("store");
        assert!(registry.register("memory", &["mem", "mem"], 1).is_err());
        assert!(registry.register("memory", &["memory"], 1).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn lookup_lists_available_names() {
        let mut registry = Registry::new("embedding provider");
        registry.register("hash", &[], ()).expect("register");
        let err = registry.lookup("nope").unwrap_err();
        assert!(err.to_string().contains("available: hash"));
    }

    #[test]
    fn reset_clears_everything() {
        let mut registry = Registry::new("store");
        registry.register("memory", &["mem"], 1).expect("register");
        registry.reset();
        assert!(registry.is_empty());
        assert_eq!(registry.get("mem"), None);
        registry.register("memory", &["mem"], 2).expect("re-register");
        assert_eq!(registry.get("mem"), Some(&2));
    }
}
