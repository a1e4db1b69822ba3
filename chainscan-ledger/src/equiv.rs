use std::collections::{BTreeSet, HashMap};

use crate::record::{AddressKey, AddressRecord};

// Bounds the unwrap walk so a malformed store with a wrap cycle cannot hang us.
const MAX_WRAP_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FamilyKey {
    Pubkey(u32),
    Single(AddressKey),
}

impl FamilyKey {
    fn of(key: AddressKey) -> Self {
        if key.address_type.is_pubkey_family() {
            FamilyKey::Pubkey(key.num)
        } else {
            FamilyKey::Single(key)
        }
    }
}

/// Lookup tables for address equivalence classes.
///
/// Built once from the address table when an accessor is opened and owned by
/// that accessor.
#[derive(Debug, Default)]
pub struct EquivIndex {
    members: HashMap<FamilyKey, BTreeSet<AddressKey>>,
    wrapped_by: HashMap<FamilyKey, BTreeSet<AddressKey>>,
}

impl EquivIndex {
    pub fn build(addresses: &HashMap<AddressKey, AddressRecord>) -> Self {
        let mut index = EquivIndex::default();
        for key in addresses.keys() {
            index
                .members
                .entry(FamilyKey::of(*key))
                .or_default()
                .insert(*key);
        }
        for record in addresses.values() {
            if record.address_type.is_script_hash() && record.wraps.is_some() {
                let base = base_of(addresses, record.key());
                index
                    .wrapped_by
                    .entry(FamilyKey::of(base))
                    .or_default()
                    .insert(record.key());
            }
        }
        index
    }

    /// Sorted members of the class of `key`.
    ///
    /// Without script equivalence the class is the pubkey family of `key` (or
    /// `key` alone). With it, the class is rooted at the innermost wrapped
    /// address and also holds every script-hash address wrapping a member.
    pub fn class_of(
        &self,
        addresses: &HashMap<AddressKey, AddressRecord>,
        key: AddressKey,
        script_equiv: bool,
    ) -> Option<Vec<AddressKey>> {
        if !addresses.contains_key(&key) {
            return None;
        }
        let root = if script_equiv {
            FamilyKey::of(base_of(addresses, key))
        } else {
            FamilyKey::of(key)
        };

        let mut class: BTreeSet<AddressKey> = self.members.get(&root).cloned().unwrap_or_default();
        if script_equiv {
            if let Some(wrappers) = self.wrapped_by.get(&root) {
                class.extend(wrappers.iter().copied());
            }
        }
        Some(class.into_iter().collect())
    }
}

fn base_of(addresses: &HashMap<AddressKey, AddressRecord>, key: AddressKey) -> AddressKey {
    let mut current = key;
    for _ in 0..MAX_WRAP_DEPTH {
        match addresses.get(&current) {
            Some(AddressRecord {
                wraps: Some(inner),
                address_type,
                ..
            }) if address_type.is_script_hash() && addresses.contains_key(inner) => {
                current = *inner;
            }
            _ => break,
        }
    }
    current
}
