/*
 * Copyright (c) 2026. Busbar contributors
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use dashmap::DashMap;

/// Named system settings backing `GetSystemSetting`/`SetSystemSetting`.
///
/// The host answers an unknown name (a `None` from [`get`](Self::get), a
/// `false` from [`set`](Self::set)) with the invalid-parameters canned
/// error; the store itself decides which names exist.
pub trait SettingsStore: Send + Sync {
    /// Current value of `name`, or `None` when the store does not know it.
    fn get(&self, name: &str) -> Option<String>;

    /// Stores `value` under `name`. Returning `false` rejects the write.
    fn set(&self, name: &str, value: String) -> bool;
}

/// In-memory [`SettingsStore`], the default for tests and demos.
///
/// Accepts writes to any name; reads of names never written return `None`.
#[derive(Debug, Default)]
pub struct MemorySettings {
    entries: DashMap<String, String>,
}

impl MemorySettings {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates `name` before the store is handed to a host.
    pub fn seed(&self, name: &str, value: &str) {
        self.entries.insert(name.to_owned(), value.to_owned());
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, name: &str) -> Option<String> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    fn set(&self, name: &str, value: String) -> bool {
        self.entries.insert(name.to_owned(), value);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemorySettings::new();
        assert_eq!(store.get("tz"), None);
        assert!(store.set("tz", "UTC".into()));
        assert_eq!(store.get("tz").as_deref(), Some("UTC"));
    }

    #[test]
    fn seeded_values_are_visible() {
        let store = MemorySettings::new();
        store.seed("model", "mk3");
        assert_eq!(store.get("model").as_deref(), Some("mk3"));
    }
}
