//! A deterministic [`Delegator`] for tests: identity translation (unless
//! an address is explicitly marked faulted), a byte-addressable backing
//! store, and a caller-supplied bank-mapping function.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use stream_engine_types::{BankId, Delegator, PAddr, Tier, Ticks, VAddr};

#[derive(Clone)]
pub struct TestDelegator {
    line_size: u64,
    cpu_id: u32,
    bank_of: fn(PAddr) -> BankId,
    cycle: Arc<AtomicU64>,
    memory: Arc<Mutex<HashMap<VAddr, u8>>>,
    faulted: Arc<Mutex<HashSet<VAddr>>>,
}

impl TestDelegator {
    pub fn new(line_size: u64, bank_of: fn(PAddr) -> BankId) -> Self {
        Self {
            line_size,
            cpu_id: 0,
            bank_of,
            cycle: Arc::new(AtomicU64::new(0)),
            memory: Arc::new(Mutex::new(HashMap::new())),
            faulted: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn advance_cycle(&self, to: u64) {
        self.cycle.store(to, Ordering::Relaxed);
    }

    /// Seeds `len` bytes of little-endian `value` starting at `vaddr`, for
    /// scenarios to assert the round-trip property against.
    pub fn write_u32(&self, vaddr: VAddr, value: u32) {
        let bytes = value.to_le_bytes();
        let mut mem = self.memory.lock().expect("backing store poisoned");
        for (i, byte) in bytes.iter().enumerate() {
            mem.insert(vaddr + i as u64, *byte);
        }
    }

    pub fn read_u32(&self, vaddr: VAddr) -> u32 {
        let mem = self.memory.lock().expect("backing store poisoned");
        let mut bytes = [0u8; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = mem.get(&(vaddr + i as u64)).copied().unwrap_or(0);
        }
        u32::from_le_bytes(bytes)
    }

    /// Marks `vaddr` as permanently unresolvable, exercising the
    /// translation-fault path (spec.md §7).
    pub fn inject_fault(&self, vaddr: VAddr) {
        self.faulted.lock().expect("faulted set poisoned").insert(vaddr);
    }
}

impl Delegator for TestDelegator {
    fn cur_cycle(&self) -> u64 {
        self.cycle.load(Ordering::Relaxed)
    }

    fn cycles_to_ticks(&self, cycles: u64) -> Ticks {
        cycles
    }

    fn cache_line_size(&self) -> u64 {
        self.line_size
    }

    fn cpu_id(&self) -> u32 {
        self.cpu_id
    }

    fn translate(&self, vaddr: VAddr) -> Option<PAddr> {
        if self.faulted.lock().expect("faulted set poisoned").contains(&vaddr) {
            None
        } else {
            Some(vaddr)
        }
    }

    fn read_from_mem(&self, vaddr: VAddr, len: u32, out: &mut [u8]) -> bool {
        let mem = self.memory.lock().expect("backing store poisoned");
        for (i, slot) in out.iter_mut().take(len as usize).enumerate() {
            *slot = mem.get(&(vaddr + i as u64)).copied().unwrap_or(0);
        }
        true
    }

    fn map_address_to_llc(&self, paddr: PAddr, _tier: Tier) -> BankId {
        (self.bank_of)(paddr)
    }
}
