use super::ids::{AtomId, BondId};
use super::props::GenericPropContainer;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum BondOrder {
    #[default]
    Single,
    Double,
    Triple,
    Aromatic,
}

#[derive(Debug, Error)]
#[error("Invalid bond order string")]
pub struct ParseBondOrderError;

impl FromStr for BondOrder {
    type Err = ParseBondOrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "s" | "single" => Ok(Self::Single),
            "2" | "d" | "double" => Ok(Self::Double),
            "3" | "t" | "triple" => Ok(Self::Triple),
            "ar" | "aromatic" => Ok(Self::Aromatic),
            _ => Err(ParseBondOrderError),
        }
    }
}

impl fmt::Display for BondOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Single => "Single",
                Self::Double => "Double",
                Self::Triple => "Triple",
                Self::Aromatic => "Aromatic",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bond {
    pub first: AtomId,               // First atom, as passed to connect
    pub second: AtomId,              // Second atom
    pub order: BondOrder,            // Bond order (e.g., single, double, etc.)
    pub props: GenericPropContainer, // User-defined properties
}

impl Bond {
    pub fn new(first: AtomId, second: AtomId, order: BondOrder) -> Self {
        Self {
            first,
            second,
            order,
            props: GenericPropContainer::new(),
        }
    }

    pub fn contains(&self, atom_id: AtomId) -> bool {
        self.first == atom_id || self.second == atom_id
    }

    /// The atom on the other side of the bond, if `atom_id` is one of its ends.
    pub fn partner(&self, atom_id: AtomId) -> Option<AtomId> {
        if self.first == atom_id {
            Some(self.second)
        } else if self.second == atom_id {
            Some(self.first)
        } else {
            None
        }
    }

    /// Whether this bond joins `a` and `b`, in either direction.
    pub fn connects(&self, a: AtomId, b: AtomId) -> bool {
        (self.first == a && self.second == b) || (self.first == b && self.second == a)
    }
}

/// A named dihedral over four consecutively bonded atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torsion {
    pub name: String,
    pub atoms: [AtomId; 4],
}

impl Torsion {
    pub fn new(name: &str, atoms: [AtomId; 4]) -> Self {
        Self {
            name: name.to_string(),
            atoms,
        }
    }

    pub fn involves(&self, atom_id: AtomId) -> bool {
        self.atoms.contains(&atom_id)
    }

    /// The two atoms of the central bond.
    pub fn central(&self) -> (AtomId, AtomId) {
        (self.atoms[1], self.atoms[2])
    }

    /// Whether `bond` is one of the three bonds the torsion spans.
    pub fn spans(&self, bond: &Bond) -> bool {
        self.atoms
            .windows(2)
            .any(|pair| bond.connects(pair[0], pair[1]))
    }

    /// Whether the central bond of the torsion is `bond`.
    pub fn is_around(&self, bond: &Bond) -> bool {
        let (b, c) = self.central();
        bond.connects(b, c)
    }
}

/// A bond id paired with the partner atom it leads to.
pub type Neighbor = (BondId, AtomId);

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::KeyData;

    fn dummy_atom_id(n: u64) -> AtomId {
        AtomId::from(KeyData::from_ffi(n))
    }

    mod bond_order {
        use super::*;

        #[test]
        fn from_str_accepts_valid_strings_case_insensitively() {
            assert_eq!("1".parse::<BondOrder>().unwrap(), BondOrder::Single);
            assert_eq!("D".parse::<BondOrder>().unwrap(), BondOrder::Double);
            assert_eq!("Triple".parse::<BondOrder>().unwrap(), BondOrder::Triple);
            assert_eq!("ar".parse::<BondOrder>().unwrap(), BondOrder::Aromatic);
        }

        #[test]
        fn from_str_rejects_invalid_strings() {
            assert!("4".parse::<BondOrder>().is_err());
            assert!("".parse::<BondOrder>().is_err());
        }

        #[test]
        fn default_is_single() {
            assert_eq!(BondOrder::default(), BondOrder::Single);
        }
    }

    mod bond {
        use super::*;

        #[test]
        fn partner_and_connects_are_direction_independent() {
            let a = dummy_atom_id(1);
            let b = dummy_atom_id(2);
            let c = dummy_atom_id(3);
            let bond = Bond::new(a, b, BondOrder::Double);

            assert!(bond.contains(a) && bond.contains(b) && !bond.contains(c));
            assert_eq!(bond.partner(a), Some(b));
            assert_eq!(bond.partner(b), Some(a));
            assert_eq!(bond.partner(c), None);
            assert!(bond.connects(b, a));
            assert!(!bond.connects(a, c));
        }
    }

    mod torsion {
        use super::*;

        #[test]
        fn spans_and_is_around_identify_bonds() {
            let ids: Vec<AtomId> = (1..=5).map(dummy_atom_id).collect();
            let torsion = Torsion::new("phi", [ids[0], ids[1], ids[2], ids[3]]);

            let first = Bond::new(ids[1], ids[0], BondOrder::Single);
            let central = Bond::new(ids[2], ids[1], BondOrder::Single);
            let outside = Bond::new(ids[3], ids[4], BondOrder::Single);

            assert!(torsion.spans(&first));
            assert!(!torsion.is_around(&first));
            assert!(torsion.spans(&central));
            assert!(torsion.is_around(&central));
            assert!(!torsion.spans(&outside));
            assert!(torsion.involves(ids[3]));
            assert!(!torsion.involves(ids[4]));
        }
    }
}
