// src/memory/pte.rs
//
// Page-table entry: one bit-packed 64-bit word shared by both table
// layouts. Flag bits live at the top of the word; the packed fields
// (FPN, swap type, swap offset) occupy disjoint low ranges, so a
// resident entry keeps its swap provenance.
//
// Writers clear a field with AND-NOT of its mask, then OR in the
// shifted value. Field constants come in mask + low-bit pairs.

use bitflags::bitflags;

use super::{Fpn, MemError};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        /// The entry has been initialised (resident or swapped).
        const PRESENT = 1 << 63;
        /// The page lives on a swap device, not in RAM.
        const SWAPPED = 1 << 62;
        /// The page was written while resident.
        const DIRTY = 1 << 61;
        /// The swap-type/offset fields hold a valid slot.
        const BACKED = 1 << 60;
    }
}

/// Frame page number of a resident entry.
pub const PTE_FPN_MASK: u64 = 0x000F_FFFF;
pub const PTE_FPN_LOBIT: u32 = 0;
/// Swap device index.
pub const PTE_SWPTYP_MASK: u64 = 0x1F << 20;
pub const PTE_SWPTYP_LOBIT: u32 = 20;
/// Frame page number on the swap device.
pub const PTE_SWPOFF_MASK: u64 = 0xFFFF_FFFF << 25;
pub const PTE_SWPOFF_LOBIT: u32 = 25;

/// A page-table entry word. The zero word is "never mapped".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pte(pub u64);

impl Pte {
    pub const EMPTY: Pte = Pte(0);

    /// Canonical constructor.
    ///
    /// `present = false` yields the zero word. A resident entry with
    /// FPN 0 is rejected (FPN zero is reserved for this constructor).
    pub fn init(
        present: bool,
        fpn: Fpn,
        swapped: bool,
        swap_type: u32,
        swap_off: u64,
    ) -> Result<Pte, MemError> {
        if !present {
            return Ok(Pte::EMPTY);
        }
        let mut pte = Pte::EMPTY;
        if swapped {
            pte.set_swap(swap_type, swap_off);
        } else {
            if fpn == 0 {
                return Err(MemError::InvalidPte);
            }
            pte.set_fpn(fpn);
        }
        Ok(pte)
    }

    // ====================================================================
    // FLAGS
    // ====================================================================

    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    pub fn is_present(&self) -> bool {
        self.flags().contains(PteFlags::PRESENT)
    }

    pub fn is_swapped(&self) -> bool {
        self.flags().contains(PteFlags::SWAPPED)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().contains(PteFlags::DIRTY)
    }

    pub fn is_backed(&self) -> bool {
        self.flags().contains(PteFlags::BACKED)
    }

    /// Present in RAM right now.
    pub fn is_resident(&self) -> bool {
        self.is_present() && !self.is_swapped()
    }

    pub fn set_dirty(&mut self) {
        self.0 |= PteFlags::DIRTY.bits();
    }

    pub fn clear_dirty(&mut self) {
        self.0 &= !PteFlags::DIRTY.bits();
    }

    // ====================================================================
    // PACKED FIELDS
    // ====================================================================

    #[inline]
    fn set_field(&mut self, value: u64, mask: u64, lobit: u32) {
        self.0 = (self.0 & !mask) | ((value << lobit) & mask);
    }

    pub fn fpn(&self) -> Fpn {
        (self.0 & PTE_FPN_MASK) >> PTE_FPN_LOBIT
    }

    pub fn swap_type(&self) -> u32 {
        ((self.0 & PTE_SWPTYP_MASK) >> PTE_SWPTYP_LOBIT) as u32
    }

    pub fn swap_off(&self) -> u64 {
        (self.0 & PTE_SWPOFF_MASK) >> PTE_SWPOFF_LOBIT
    }

    /// Rewrite to the resident form: present, not swapped, FPN set.
    /// Swap provenance and the dirty bit are left untouched.
    pub fn set_fpn(&mut self, fpn: Fpn) {
        self.0 |= PteFlags::PRESENT.bits();
        self.0 &= !PteFlags::SWAPPED.bits();
        self.set_field(fpn, PTE_FPN_MASK, PTE_FPN_LOBIT);
    }

    /// Rewrite to the swapped form: present, swapped, slot recorded.
    pub fn set_swap(&mut self, swap_type: u32, swap_off: u64) {
        self.0 |= (PteFlags::PRESENT | PteFlags::SWAPPED | PteFlags::BACKED).bits();
        self.0 &= !PteFlags::DIRTY.bits();
        self.set_field(swap_type as u64, PTE_SWPTYP_MASK, PTE_SWPTYP_LOBIT);
        self.set_field(swap_off, PTE_SWPOFF_MASK, PTE_SWPOFF_LOBIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_present_yields_the_zero_word() {
        assert_eq!(Pte::init(false, 9, true, 3, 42), Ok(Pte::EMPTY));
    }

    #[test]
    fn resident_fpn_zero_is_rejected() {
        assert_eq!(Pte::init(true, 0, false, 0, 0), Err(MemError::InvalidPte));
    }

    #[test]
    fn resident_entry_round_trips_its_fpn() {
        let pte = Pte::init(true, 0x3FF, false, 0, 0).unwrap();
        assert!(pte.is_present());
        assert!(!pte.is_swapped());
        assert!(!pte.is_dirty());
        assert_eq!(pte.fpn(), 0x3FF);
    }

    #[test]
    fn swapped_entry_round_trips_type_and_offset() {
        let pte = Pte::init(true, 0, true, 3, 42).unwrap();
        assert!(pte.is_present());
        assert!(pte.is_swapped());
        assert!(!pte.is_dirty());
        assert_eq!(pte.swap_type(), 3);
        assert_eq!(pte.swap_off(), 42);
    }

    #[test]
    fn set_fpn_preserves_swap_provenance() {
        let mut pte = Pte::init(true, 0, true, 2, 77).unwrap();
        pte.set_fpn(5);
        assert!(pte.is_resident());
        assert!(pte.is_backed());
        assert_eq!(pte.fpn(), 5);
        assert_eq!(pte.swap_type(), 2);
        assert_eq!(pte.swap_off(), 77);
    }

    #[test]
    fn evicting_a_written_page_clears_dirty() {
        let mut pte = Pte::init(true, 5, false, 0, 0).unwrap();
        pte.set_dirty();
        assert!(pte.is_dirty());
        pte.set_swap(0, 12);
        assert!(pte.is_swapped());
        assert!(!pte.is_dirty());
        assert_eq!(pte.swap_off(), 12);
    }

    #[test]
    fn field_writes_mask_out_of_range_values() {
        let mut pte = Pte::EMPTY;
        pte.set_fpn(PTE_FPN_MASK + 5);
        // Only the low 20 bits of the FPN survive.
        assert_eq!(pte.fpn(), 4);
    }
}
