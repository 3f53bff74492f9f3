use phf::{Map, phf_map};

/// Single-bond covalent radii in Angstroms, keyed by upper-case element symbol.
static COVALENT_RADII: Map<&'static str, f64> = phf_map! {
    "H" => 0.31, "D" => 0.31,
    "C" => 0.76, "N" => 0.71, "O" => 0.66, "F" => 0.57,
    "P" => 1.07, "S" => 1.05, "CL" => 1.02, "SE" => 1.20,
    "BR" => 1.20, "I" => 1.39,
    "NA" => 1.66, "MG" => 1.41, "K" => 2.03, "CA" => 1.76,
    "MN" => 1.39, "FE" => 1.32, "CO" => 1.26, "NI" => 1.24,
    "CU" => 1.32, "ZN" => 1.22,
};

/// One-letter codes of the standard and a few common modified residues.
static ONE_LETTER_CODES: Map<&'static str, char> = phf_map! {
    "ALA" => 'A', "ARG" => 'R', "ASN" => 'N', "ASP" => 'D', "CYS" => 'C',
    "GLN" => 'Q', "GLU" => 'E', "GLY" => 'G', "HIS" => 'H', "ILE" => 'I',
    "LEU" => 'L', "LYS" => 'K', "MET" => 'M', "PHE" => 'F', "PRO" => 'P',
    "SER" => 'S', "THR" => 'T', "TRP" => 'W', "TYR" => 'Y', "VAL" => 'V',
    "MSE" => 'M', "SEC" => 'U', "PYL" => 'O', "HSD" => 'H', "HSE" => 'H',
    "HIE" => 'H', "HID" => 'H', "HIP" => 'H', "CYX" => 'C',
};

/// One-letter code for a residue key, `'X'` when unknown.
pub fn one_letter_code(residue_key: &str) -> char {
    ONE_LETTER_CODES
        .get(residue_key.to_ascii_uppercase().as_str())
        .copied()
        .unwrap_or('X')
}

pub fn covalent_radius(element: &str) -> Option<f64> {
    COVALENT_RADII.get(element.to_ascii_uppercase().as_str()).copied()
}

/// Guesses an element symbol from an atom name when the source did not provide one.
///
/// Leading digits (as in `1HB`) are skipped and the first letter is taken.
pub fn guess_element(atom_name: &str) -> String {
    atom_name
        .chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covalent_radius_is_case_insensitive() {
        assert_eq!(covalent_radius("C"), Some(0.76));
        assert_eq!(covalent_radius("Fe"), Some(1.32));
        assert_eq!(covalent_radius("xx"), None);
    }

    #[test]
    fn one_letter_code_covers_standard_and_modified_residues() {
        assert_eq!(one_letter_code("TRP"), 'W');
        assert_eq!(one_letter_code("mse"), 'M');
        assert_eq!(one_letter_code("HOH"), 'X');
    }

    #[test]
    fn guess_element_skips_leading_digits() {
        assert_eq!(guess_element("CA"), "C");
        assert_eq!(guess_element("1HB"), "H");
        assert_eq!(guess_element("og1"), "O");
        assert_eq!(guess_element("123"), "");
    }
}
