//! DRAM address-map layouts: bit-offset tuples over a line address.

use serde::{Deserialize, Serialize};

/// Which bit-offset layout a [`crate::dram::Dram`] uses to decompose a line
/// address into channel/bankgroup/bank/rank/row/column fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressMapKind {
    /// Channel bits occupy the lowest offset (below even column), then
    /// bankgroup, bank, rank, column, row — "minimize open pages" layout
    /// that spreads sequential access across channels before it ever
    /// touches the row a given channel has open.
    Mop,
    /// Coffee-Lake-like: column | channel | bankgroup | bank | rank | row.
    CoffeeLake,
    /// Skylake-like: a different channel/bankgroup interleave than
    /// Coffee-Lake, with the bank fields swapped relative to it.
    Skylake,
}

/// Resolved bit offsets for each address field, given a chosen layout and
/// DRAM geometry (field widths, in bits).
#[derive(Clone, Copy, Debug)]
pub struct AddressMap {
    ch_off: u32,
    bg_off: u32,
    ba_off: u32,
    ra_off: u32,
    col_off: u32,
    row_off: u32,
    ch_bits: u32,
    bg_bits: u32,
    ba_bits: u32,
    ra_bits: u32,
    row_bits: u32,
    col_bits: u32,
}

fn bits_for(count: usize) -> u32 {
    if count <= 1 {
        0
    } else {
        usize::BITS - (count - 1).leading_zeros()
    }
}

impl AddressMap {
    /// Resolves a concrete bit-offset table for `kind` given the channel,
    /// bankgroup, bank, rank, row and column counts.
    #[must_use]
    pub fn new(
        kind: AddressMapKind,
        channels: usize,
        bankgroups: usize,
        banks: usize,
        ranks: usize,
        rows: usize,
        columns: usize,
    ) -> Self {
        let ch_bits = bits_for(channels);
        let bg_bits = bits_for(bankgroups);
        let ba_bits = bits_for(banks);
        let ra_bits = bits_for(ranks);
        let row_bits = bits_for(rows);
        let col_bits = bits_for(columns);

        let (ch_off, bg_off, ba_off, ra_off, col_off, row_off) = match kind {
            AddressMapKind::Mop => {
                // Channel sits directly above the line offset, below every
                // other field — column is *not* folded in below it, so it
                // gets placed just under row instead, after rank.
                let ch_off = 0;
                let bg_off = ch_off + ch_bits;
                let ba_off = bg_off + bg_bits;
                let ra_off = ba_off + ba_bits;
                let col_off = ra_off + ra_bits;
                let row_off = col_off + col_bits;
                (ch_off, bg_off, ba_off, ra_off, col_off, row_off)
            }
            AddressMapKind::CoffeeLake => {
                let ch_off = col_bits;
                let bg_off = ch_off + ch_bits;
                let ba_off = bg_off + bg_bits;
                let ra_off = ba_off + ba_bits;
                let row_off = ra_off + ra_bits;
                (ch_off, bg_off, ba_off, ra_off, 0, row_off)
            }
            AddressMapKind::Skylake => {
                let ch_off = col_bits;
                let ba_off = ch_off + ch_bits;
                let bg_off = ba_off + ba_bits;
                let ra_off = bg_off + bg_bits;
                let row_off = ra_off + ra_bits;
                (ch_off, bg_off, ba_off, ra_off, 0, row_off)
            }
        };

        Self {
            ch_off,
            bg_off,
            ba_off,
            ra_off,
            col_off,
            row_off,
            ch_bits,
            bg_bits,
            ba_bits,
            ra_bits,
            row_bits,
            col_bits,
        }
    }

    fn extract(addr: u64, off: u32, bits: u32) -> usize {
        if bits == 0 {
            return 0;
        }
        let mask = (1u64 << bits) - 1;
        ((addr >> off) & mask) as usize
    }

    /// Extracts the channel index from a line address.
    #[must_use]
    pub fn channel(&self, addr: u64) -> usize {
        Self::extract(addr, self.ch_off, self.ch_bits)
    }

    /// Extracts the bank-group index.
    #[must_use]
    pub fn bankgroup(&self, addr: u64) -> usize {
        Self::extract(addr, self.bg_off, self.bg_bits)
    }

    /// Extracts the bank index (within its bank group).
    #[must_use]
    pub fn bank(&self, addr: u64) -> usize {
        Self::extract(addr, self.ba_off, self.ba_bits)
    }

    /// Extracts the rank index.
    #[must_use]
    pub fn rank(&self, addr: u64) -> usize {
        Self::extract(addr, self.ra_off, self.ra_bits)
    }

    /// Extracts the row index.
    #[must_use]
    pub fn row(&self, addr: u64) -> usize {
        Self::extract(addr, self.row_off, self.row_bits)
    }

    /// Flat bank index combining bankgroup and in-group bank ordinal,
    /// suitable for indexing a channel's flat bank array.
    #[must_use]
    pub fn flat_bank(&self, addr: u64, banks_per_group: usize) -> usize {
        self.bankgroup(addr) * banks_per_group + self.bank(addr)
    }

    /// Column bit width, exposed for tests validating the layout.
    #[must_use]
    pub const fn col_bits(&self) -> u32 {
        self.col_bits
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        // Encode each field at its resolved offset and check extraction
        // recovers exactly the value that was encoded, for every layout.
        #[test]
        fn fields_round_trip_for_arbitrary_addresses(
            ch in 0u64..2,
            bg in 0u64..8,
            ba in 0u64..4,
            row in 0u64..65536,
            col in 0u64..128,
        ) {
            for kind in [AddressMapKind::Mop, AddressMapKind::CoffeeLake, AddressMapKind::Skylake] {
                let map = AddressMap::new(kind, 2, 8, 4, 1, 65536, 128);
                let addr = (row << map.row_off)
                    | (ba << map.ba_off)
                    | (bg << map.bg_off)
                    | (ch << map.ch_off)
                    | (col << map.col_off);

                prop_assert_eq!(map.channel(addr) as u64, ch);
                prop_assert_eq!(map.bankgroup(addr) as u64, bg);
                prop_assert_eq!(map.bank(addr) as u64, ba);
                prop_assert_eq!(map.rank(addr), 0, "single-rank map must always decode rank 0");
                prop_assert_eq!(map.row(addr) as u64, row);
            }
        }
    }

    #[test]
    fn fields_round_trip_through_extraction() {
        for kind in [AddressMapKind::Mop, AddressMapKind::CoffeeLake, AddressMapKind::Skylake] {
            let map = AddressMap::new(kind, 2, 8, 4, 1, 65536, 128);
            let addr: u64 = 0xDEAD_BEEF_1234;
            let ch = map.channel(addr);
            let bg = map.bankgroup(addr);
            let ba = map.bank(addr);
            let row = map.row(addr);
            assert!(ch < 2);
            assert!(bg < 8);
            assert!(ba < 4);
            assert!(row < 65536);
        }
    }

    /// Mop places the channel field below even the column bits, while
    /// Coffee-Lake and Skylake both place it directly above column — the
    /// three layouts must not silently collapse onto the same bit offsets.
    #[test]
    fn the_three_layouts_place_channel_at_different_offsets() {
        let mop = AddressMap::new(AddressMapKind::Mop, 2, 8, 4, 2, 65536, 128);
        let coffeelake = AddressMap::new(AddressMapKind::CoffeeLake, 2, 8, 4, 2, 65536, 128);
        let skylake = AddressMap::new(AddressMapKind::Skylake, 2, 8, 4, 2, 65536, 128);

        assert_eq!(mop.ch_off, 0, "mop channel sits at the line offset, below column");
        assert_ne!(
            mop.ch_off, coffeelake.ch_off,
            "mop and coffeelake must decode channel from different bit ranges"
        );
        assert_eq!(
            coffeelake.ch_off, skylake.ch_off,
            "coffeelake and skylake both place channel directly above column"
        );
        assert_ne!(
            coffeelake.ba_off, skylake.ba_off,
            "coffeelake and skylake swap bankgroup/bank relative order"
        );

        // All five fields still tile the address with no gaps or overlap
        // for every layout, row_off landing at the same total bit count.
        assert_eq!(mop.row_off, coffeelake.row_off);
        assert_eq!(mop.row_off, skylake.row_off);
    }
}
