use crate::ids::{BankId, Cycle, PAddr, Ticks, Tier, VAddr};

/// The narrow capability set the CPU pipeline / coherence substrate
/// provides to every SE tier (spec.md §4.6 and §1's "out of scope"
/// collaborators), fixed here as one trait following
/// `gem_forge_cpu_delegator.hh`.
///
/// Tiers are generic over `D: Delegator` rather than holding a trait
/// object, matching the teacher's preference for static dispatch at
/// module seams.
pub trait Delegator {
    /// The current simulated cycle.
    fn cur_cycle(&self) -> Cycle;

    /// Converts a cycle delta into the host pipeline's tick unit.
    fn cycles_to_ticks(&self, cycles: Cycle) -> Ticks;

    /// The cache line size in bytes; every slice is aligned to this.
    fn cache_line_size(&self) -> u64;

    /// The owning CPU's id, used to tag outbound requests.
    fn cpu_id(&self) -> u32;

    /// Translates a virtual address to a physical one. `None` models a
    /// translation fault (spec.md §7).
    fn translate(&self, vaddr: VAddr) -> Option<PAddr>;

    /// Reads `len` bytes starting at `vaddr` into `out`. Returns `false`
    /// if the read could not be serviced (e.g. translation fault).
    fn read_from_mem(&self, vaddr: VAddr, len: u32, out: &mut [u8]) -> bool;

    /// Deterministic bank hash: which LLC bank owns the line containing
    /// `paddr`, as seen from tier `tier`.
    fn map_address_to_llc(&self, paddr: PAddr, tier: Tier) -> BankId;
}
