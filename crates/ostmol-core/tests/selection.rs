use nalgebra::Point3;
use ostmol::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// A three-residue peptide (MET-LYS-ASP) in chain A, backbone along x,
/// and a water in chain W close to LYS.
fn peptide() -> EntityHandle {
    let entity = EntityHandle::create("peptide");
    let mut ed = entity.edit_xcs(EditMode::Buffered).unwrap();
    let chain = ed.insert_chain("A").unwrap();
    for (i, key) in ["MET", "LYS", "ASP"].iter().enumerate() {
        let residue = ed.append_residue(&chain, key, None).unwrap();
        let x = i as f64 * 3.6;
        for (name, offset) in [("N", [0.0, 0.0, 0.0]), ("CA", [1.45, 0.3, 0.0]), ("C", [2.4, -0.8, 0.0]), ("O", [2.2, -2.0, 0.1])] {
            let pos = Point3::new(x + offset[0], offset[1], offset[2]);
            let atom = ed.insert_atom(&residue, name, pos, None).unwrap();
            ed.set_b_factor(&atom, 10.0 * (i + 1) as f64).unwrap();
        }
    }
    let water = ed.insert_chain("W").unwrap();
    let hoh = ed.append_residue(&water, "HOH", None).unwrap();
    ed.insert_atom(&hoh, "O", Point3::new(5.0, 2.5, 0.0), None).unwrap();
    drop(ed);
    entity
}

fn processed_peptide() -> (EntityHandle, ProcessReport) {
    let entity = peptide();
    let library = CompoundLibrary::builtin().unwrap();
    let config = ProcessorConfig::default();
    let report = RuleBasedProcessor::new()
        .process(&ProcessingContext::new(&library, &config), &entity)
        .unwrap();
    (entity, report)
}

fn names(view: &EntityView) -> Vec<String> {
    view.atoms().iter().map(|a| a.qualified_name().unwrap()).collect()
}

#[test]
fn doubled_equals_sign_is_reported_at_the_second_one() {
    let query = Query::new("rname==ALA");
    assert!(!query.is_valid());
    let desc = query.error_description().unwrap();
    assert_eq!(desc.range, 6..7);

    let entity = peptide();
    assert!(matches!(
        entity.select("rname==ALA"),
        Err(EntityError::Query { .. })
    ));
}

#[test]
fn selections_are_deterministic_and_idempotent() {
    let entity = peptide();
    let queries = [
        "rname=LYS,ASP and aname=CA",
        "abfac>15 or cname=W",
        "not (aname=N,C,O)",
        "within 3.0 of cname=W",
        "rnum=1:2 and ele=C",
        "",
    ];
    for text in queries {
        let query = Query::new(text);
        assert!(query.is_valid(), "{text}");
        let first = entity.select_with(&query, QueryFlags::default()).unwrap();
        let second = entity.select_with(&query, QueryFlags::default()).unwrap();
        assert_eq!(names(&first), names(&second), "{text}");
        assert_eq!(first.bond_count(), second.bond_count(), "{text}");

        let again = first.select(&query, QueryFlags::default()).unwrap();
        assert_eq!(names(&again), names(&first), "{text}");
    }
}

#[test]
fn compound_queries_select_the_expected_atoms() {
    let entity = peptide();
    assert_eq!(
        names(&entity.select("rname=LYS,ASP and aname=CA").unwrap()),
        vec!["A.LYS2.CA", "A.ASP3.CA"]
    );
    assert_eq!(
        names(&entity.select("abfac>25 or cname=W").unwrap()),
        vec!["A.ASP3.N", "A.ASP3.CA", "A.ASP3.C", "A.ASP3.O", "W.HOH1.O"]
    );
    assert_eq!(
        names(&entity.select("rnum=2:3 and aname=O").unwrap()),
        vec!["A.LYS2.O", "A.ASP3.O"]
    );
    let near_water = entity.select("within 2.5 of cname=W and not cname=W").unwrap();
    assert_eq!(names(&near_water), vec!["A.LYS2.CA"]);
}

#[test]
fn processing_connects_the_backbone_and_marks_chemistry() {
    let (entity, report) = processed_peptide();
    assert_eq!(report.residues_processed, 4);
    assert_eq!(report.peptide_links, 2);
    assert!(report.diagnostics.is_empty());
    assert_eq!(entity.bond_count(), 3 * 3 + 2);

    let peptide_view = entity.select("peptide=true").unwrap();
    assert_eq!(peptide_view.atom_count(), 12);
    assert_eq!(peptide_view.bond_count(), 11);
    assert_eq!(
        entity.select("chemclass=water").unwrap().atom_count(),
        1
    );
    let olc: String = entity
        .residues()
        .iter()
        .map(|r| r.one_letter_code().unwrap())
        .collect();
    assert_eq!(olc, "MKDX");
}

#[test]
fn processor_configuration_is_loaded_from_toml() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "connect-peptides = false").unwrap();
    writeln!(file, "bond-tolerance = 0.3").unwrap();
    let config = ProcessorConfig::load(file.path()).unwrap();
    assert!(!config.connect_peptides);

    let entity = peptide();
    let library = CompoundLibrary::builtin().unwrap();
    let report = RuleBasedProcessor::new()
        .process(&ProcessingContext::new(&library, &config), &entity)
        .unwrap();
    assert_eq!(report.peptide_links, 0);
    assert_eq!(entity.bond_count(), 9);

    let mut bad = NamedTempFile::new().unwrap();
    writeln!(bad, "peptide-bond-cutoff = -1.0").unwrap();
    assert!(matches!(
        ProcessorConfig::load(bad.path()),
        Err(ConfigError::InvalidValue { parameter: "peptide-bond-cutoff", .. })
    ));
}
