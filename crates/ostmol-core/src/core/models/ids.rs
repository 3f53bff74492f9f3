use slotmap::new_key_type;

new_key_type! {
    pub struct AtomId;
    pub struct ResidueId;
    pub struct ChainId;
    pub struct BondId;
    pub struct TorsionId;
}
