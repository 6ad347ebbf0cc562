/// Bidirectional map between 64-bit dump addresses and the dense 32-bit id
/// space assigned in sorted address order. An address the dump never
/// mentioned has no id (`id32_of` returns `None`). Class addresses live in
/// the same id space but are flagged so iteration can exclude them.
///
/// Built once after the first parser pass, then read-only.
pub struct AddressMap {
    addresses: Vec<u64>,
    class_flags: Vec<bool>,
    class_count: u32,
}

impl AddressMap {
    pub fn build(object_addresses: Vec<u64>, class_addresses: Vec<u64>) -> AddressMap {
        let mut addresses = object_addresses;
        addresses.extend_from_slice(&class_addresses);
        addresses.sort_unstable();
        addresses.dedup();

        let mut class_flags = vec![false; addresses.len()];
        let mut class_count = 0;
        for class_address in &class_addresses {
            if let Ok(i) = addresses.binary_search(class_address) {
                if !class_flags[i] {
                    class_flags[i] = true;
                    class_count += 1;
                }
            }
        }
        AddressMap {
            addresses,
            class_flags,
            class_count,
        }
    }

    /// Total number of ids, class objects included.
    pub fn len(&self) -> u32 {
        self.addresses.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn id32_of(&self, address: u64) -> Option<u32> {
        self.addresses.binary_search(&address).ok().map(|i| i as u32)
    }

    pub fn address_of(&self, id32: u32) -> Option<u64> {
        self.addresses.get(id32 as usize).copied()
    }

    pub fn is_class(&self, id32: u32) -> bool {
        self.class_flags.get(id32 as usize).copied().unwrap_or(false)
    }

    pub fn class_count(&self) -> u32 {
        self.class_count
    }

    /// Number of heap objects, class objects excluded.
    pub fn object_count(&self) -> u64 {
        u64::from(self.len()) - u64::from(self.class_count)
    }

    pub fn addresses(&self) -> &[u64] {
        &self.addresses
    }
}
