use super::config::ProcessorConfig;
use super::editor::{EditMode, XcsEditor};
use super::entity::EntityHandle;
use super::error::EntityError;
use super::handle::{AtomHandle, ResidueHandle};
use crate::core::compounds::elements;
use crate::core::compounds::library::{Compound, CompoundLibrary};
use crate::core::models::residue::ChemClass;
use crate::core::models::topology::BondOrder;
use crate::core::utils::geometry;
use std::fmt;
use tracing::{debug, info, instrument, trace, warn};

/// Everything a processor may consult besides the entity itself.
#[derive(Clone, Copy)]
pub struct ProcessingContext<'a> {
    pub library: &'a CompoundLibrary,
    pub config: &'a ProcessorConfig,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(library: &'a CompoundLibrary, config: &'a ProcessorConfig) -> Self {
        Self { library, config }
    }
}

/// A problem found while processing; processing continues past all of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    UnknownCompound { residue: String },
    UnknownAtom { atom: String },
    ImplausibleBond { first: String, second: String, length: f64 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::UnknownCompound { residue } => {
                write!(f, "residue {} is not in the compound library", residue)
            }
            Diagnostic::UnknownAtom { atom } => {
                write!(f, "atom {} is not part of its compound template", atom)
            }
            Diagnostic::ImplausibleBond { first, second, length } => {
                write!(f, "bond {}-{} has implausible length {:.3}", first, second, length)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessReport {
    pub residues_processed: usize,
    pub bonds_created: usize,
    pub peptide_links: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// Post-processing of freshly built entities, e.g. assigning connectivity.
///
/// Implementations mutate the entity through a buffered editor, so observers
/// see the whole pass as a single batch of notifications.
pub trait Processor {
    fn process(&self, ctx: &ProcessingContext<'_>, entity: &EntityHandle) -> Result<ProcessReport, EntityError>;
}

/// Assigns chemistry and connectivity from compound templates and distances.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedProcessor;

impl RuleBasedProcessor {
    pub fn new() -> Self {
        Self
    }

    fn process_known(
        &self,
        ctx: &ProcessingContext<'_>,
        editor: &mut XcsEditor,
        residue: &ResidueHandle,
        compound: &Compound,
        report: &mut ProcessReport,
    ) -> Result<(), EntityError> {
        if ctx.config.assign_chem_class {
            editor.set_chem_class(residue, compound.chem_class)?;
            editor.set_one_letter_code(residue, compound.olc())?;
            if compound.chem_class == ChemClass::NonPolymer {
                editor.set_ligand(residue, true)?;
            }
        }
        for atom in residue.atoms()? {
            if !compound.has_atom(&atom.name()?) {
                let atom = atom.qualified_name()?;
                warn!(atom = %atom, "Atom is not part of its compound template.");
                report.diagnostics.push(Diagnostic::UnknownAtom { atom });
            }
        }
        if !ctx.config.connect_templates {
            return Ok(());
        }
        for bond in &compound.bonds {
            let [first, second] = &bond.atoms;
            let (Some(a), Some(b)) = (residue.find_atom(first)?, residue.find_atom(second)?) else {
                trace!(
                    residue = %residue.qualified_name()?,
                    first = %first,
                    second = %second,
                    "Template bond skipped, atom missing."
                );
                continue;
            };
            if self.link(ctx.config, editor, &a, &b, bond.order, report)? {
                report.bonds_created += 1;
            }
        }
        Ok(())
    }

    /// Connects atoms of a residue the library does not know by covalent radii.
    fn process_unknown(
        &self,
        config: &ProcessorConfig,
        editor: &mut XcsEditor,
        residue: &ResidueHandle,
        report: &mut ProcessReport,
    ) -> Result<(), EntityError> {
        let atoms = residue
            .atoms()?
            .into_iter()
            .map(|a| Ok((a.pos()?, elements::covalent_radius(&a.element()?), a)))
            .collect::<Result<Vec<_>, EntityError>>()?;
        for (i, (pos_a, radius_a, a)) in atoms.iter().enumerate() {
            for (pos_b, radius_b, b) in &atoms[i + 1..] {
                let (Some(ra), Some(rb)) = (radius_a, radius_b) else {
                    continue;
                };
                let length = geometry::distance(pos_a, pos_b);
                let bonded = length >= config.min_bond_length && length <= ra + rb + config.bond_tolerance;
                if bonded && Self::connect(editor, a, b, BondOrder::Single)? {
                    report.bonds_created += 1;
                }
            }
        }
        Ok(())
    }

    /// Links C of each peptide-linking residue to N of its successor.
    fn link_peptides(
        &self,
        config: &ProcessorConfig,
        editor: &mut XcsEditor,
        entity: &EntityHandle,
        report: &mut ProcessReport,
    ) -> Result<(), EntityError> {
        for chain in entity.chains() {
            let residues = chain.residues()?;
            for pair in residues.windows(2) {
                let (prev, next) = (&pair[0], &pair[1]);
                if !prev.chem_class()?.is_peptide_linking() || !next.chem_class()?.is_peptide_linking() {
                    continue;
                }
                let (Some(c), Some(n)) = (prev.find_atom("C")?, next.find_atom("N")?) else {
                    continue;
                };
                let length = geometry::distance(&c.pos()?, &n.pos()?);
                if length > config.peptide_bond_cutoff {
                    debug!(
                        from = %prev.qualified_name()?,
                        to = %next.qualified_name()?,
                        length,
                        "Chain break, residues too far apart for a peptide bond."
                    );
                    continue;
                }
                if self.link(config, editor, &c, &n, BondOrder::Single, report)? {
                    report.bonds_created += 1;
                    report.peptide_links += 1;
                }
            }
        }
        Ok(())
    }

    /// Connects two atoms unless their distance is implausible for a bond.
    ///
    /// # Return
    ///
    /// Whether a new bond was created.
    fn link(
        &self,
        config: &ProcessorConfig,
        editor: &mut XcsEditor,
        a: &AtomHandle,
        b: &AtomHandle,
        order: BondOrder,
        report: &mut ProcessReport,
    ) -> Result<bool, EntityError> {
        let length = geometry::distance(&a.pos()?, &b.pos()?);
        if length < config.min_bond_length || length > config.max_bond_length {
            let (first, second) = (a.qualified_name()?, b.qualified_name()?);
            warn!(first = %first, second = %second, length, "Implausible bond length, bond not created.");
            report.diagnostics.push(Diagnostic::ImplausibleBond { first, second, length });
            return Ok(false);
        }
        Self::connect(editor, a, b, order)
    }

    /// Whether the bond is new; existing bonds keep their order.
    fn connect(editor: &mut XcsEditor, a: &AtomHandle, b: &AtomHandle, order: BondOrder) -> Result<bool, EntityError> {
        let existed = a.is_bonded_to(b)?;
        editor.connect(a, b, Some(order))?;
        Ok(!existed)
    }
}

impl Processor for RuleBasedProcessor {
    #[instrument(level = "debug", skip_all, fields(entity = %entity.name()))]
    fn process(&self, ctx: &ProcessingContext<'_>, entity: &EntityHandle) -> Result<ProcessReport, EntityError> {
        let mut report = ProcessReport::default();
        let mut editor = entity.edit_xcs(EditMode::Buffered)?;

        for residue in entity.residues() {
            let key = residue.name()?;
            match ctx.library.get(&key) {
                Some(compound) => self.process_known(ctx, &mut editor, &residue, compound, &mut report)?,
                None => {
                    let name = residue.qualified_name()?;
                    warn!(residue = %name, "Residue is not in the compound library.");
                    report.diagnostics.push(Diagnostic::UnknownCompound { residue: name });
                    if ctx.config.connect_unknown {
                        self.process_unknown(ctx.config, &mut editor, &residue, &mut report)?;
                    }
                }
            }
            report.residues_processed += 1;
        }

        if ctx.config.connect_peptides {
            self.link_peptides(ctx.config, &mut editor, entity, &mut report)?;
        }
        drop(editor);

        info!(
            residues = report.residues_processed,
            bonds = report.bonds_created,
            peptide_links = report.peptide_links,
            diagnostics = report.diagnostics.len(),
            "Processing finished."
        );
        Ok(report)
    }
}
