use tracing::warn;

/// The MCP2515 crystals this gateway supports. `CanManager` is constructed
/// with exactly one of these; the bitrate table below carries `None` cells
/// for rates the datasheet doesn't offer on a given crystal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crystal {
    Mhz8,
    Mhz16,
    Mhz20,
}

impl Crystal {
    #[must_use]
    pub fn hz(self) -> u32 {
        match self {
            Crystal::Mhz8 => 8_000_000,
            Crystal::Mhz16 => 16_000_000,
            Crystal::Mhz20 => 20_000_000,
        }
    }

    fn column(self) -> usize {
        match self {
            Crystal::Mhz8 => 0,
            Crystal::Mhz16 => 1,
            Crystal::Mhz20 => 2,
        }
    }
}

/// `(bitrate, [8MHz cell, 16MHz cell, 20MHz cell])`, `None` where the
/// datasheet doesn't offer that combination. Cells are `[CNF1, CNF2,
/// CNF3]`, programmed into the MCP2515's config registers by
/// [`crate::mcp2515::Mcp2515::set_bitrate`]. Values per SPEC_FULL.md §4.5.
const TABLE: &[(u32, [Option<[u8; 3]>; 3])] = &[
    (5_000, [Some([0x1F, 0xBF, 0x07]), Some([0x3F, 0xFF, 0x87]), None]),
    (10_000, [Some([0x0F, 0xBF, 0x07]), Some([0x1F, 0xFF, 0x87]), None]),
    (20_000, [Some([0x07, 0xBF, 0x07]), Some([0x0F, 0xFF, 0x87]), None]),
    (
        50_000,
        [Some([0x03, 0xBF, 0x07]), Some([0x07, 0xFF, 0x87]), Some([0x09, 0xFA, 0x87])],
    ),
    (
        100_000,
        [Some([0x01, 0xBF, 0x07]), Some([0x03, 0xFA, 0x87]), Some([0x04, 0xFA, 0x87])],
    ),
    (
        125_000,
        [Some([0x01, 0xB1, 0x85]), Some([0x03, 0xF0, 0x86]), Some([0x03, 0xFA, 0x87])],
    ),
    (
        250_000,
        [Some([0x41, 0xF1, 0x85]), Some([0x41, 0xF1, 0x85]), Some([0x01, 0xFA, 0x87])],
    ),
    (
        500_000,
        [Some([0x00, 0xF0, 0x86]), Some([0x00, 0xF0, 0x86]), Some([0x00, 0xFA, 0x87])],
    ),
    (
        1_000_000,
        [Some([0x00, 0xD0, 0x82]), Some([0x00, 0xD0, 0x82]), Some([0x00, 0xD9, 0x82])],
    ),
];

/// Every bitrate this crystal offers a config cell for, ascending.
#[must_use]
pub fn candidates(crystal: Crystal) -> Vec<u32> {
    TABLE
        .iter()
        .filter(|(_, cells)| cells[crystal.column()].is_some())
        .map(|(bitrate, _)| *bitrate)
        .collect()
}

/// Looks up the exact `(bitrate, crystal)` cell, or `None` if unsupported.
#[must_use]
pub fn lookup(bitrate: u32, crystal: Crystal) -> Option<[u8; 3]> {
    TABLE
        .iter()
        .find(|(b, _)| *b == bitrate)
        .and_then(|(_, cells)| cells[crystal.column()])
}

/// Resolves `requested` to a supported `(bitrate, cnf)` pair for `crystal`,
/// falling back to the numerically nearest candidate and logging a warning
/// when `requested` has no cell of its own, per spec.md §4.5.
#[must_use]
pub fn resolve(requested: u32, crystal: Crystal) -> (u32, [u8; 3]) {
    if let Some(cnf) = lookup(requested, crystal) {
        return (requested, cnf);
    }

    let options = candidates(crystal);
    let nearest = options
        .iter()
        .min_by_key(|b| b.abs_diff(requested))
        .copied()
        .expect("crystal always offers at least one bitrate");
    warn!(
        requested,
        nearest, "unsupported CAN bitrate for this crystal, using nearest supported rate"
    );
    (nearest, lookup(nearest, crystal).expect("nearest came from candidates()"))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn exact_lookup_matches_spec_mandated_cells() {
        assert_eq!(lookup(125_000, Crystal::Mhz8), Some([0x01, 0xB1, 0x85]));
        assert_eq!(lookup(125_000, Crystal::Mhz16), Some([0x03, 0xF0, 0x86]));
        assert_eq!(lookup(125_000, Crystal::Mhz20), Some([0x03, 0xFA, 0x87]));
    }

    #[test]
    fn unsupported_rate_falls_back_to_nearest() {
        let (bitrate, _) = resolve(15_000, Crystal::Mhz20);
        assert_eq!(bitrate, 20_000);
    }

    #[test]
    fn twenty_mhz_has_no_low_rate_cells() {
        assert_eq!(lookup(5_000, Crystal::Mhz20), None);
        assert_eq!(lookup(10_000, Crystal::Mhz20), None);
        assert_eq!(lookup(20_000, Crystal::Mhz20), None);
    }
}
