//! `FillSpecRegistry`: `(cid, profile) -> FillSpec`, a hard-coded per-CID
//! schema table. Grounded on `src/til/section.rs`'s `TILSectionHeader1`
//! version-gated field presence (which fields exist depends on the section
//! format version) — here scaled from ~5 section versions to one schema per
//! named object kind, itself shaped by the active `VersionProfile`.

use crate::version::{Cid, ObjectKind, VersionProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillKind {
    /// No stored field data; the object is fully described by its alloc
    /// record (e.g. predefined sentinels).
    None,
    Sentinel,
    /// Raw byte blob at a rodata offset (non-instructions ROData).
    ROData,
    InstructionsTable,
    /// `num_refs` compressed pointers, then a typed scalar tail.
    Refs,
    String,
    Double,
    Code,
    ObjectPool,
    Array,
    WeakArray,
    TypedData,
    ExceptionHandlers,
    Context,
    ContextScope,
    TypeArguments,
    Class,
    Field,
    Record,
    /// Raw bytes embedded inline in the cluster, not a rodata pointer.
    InlineBytes,
    /// Plain instance with an unboxed-fields bitmap (spec §4.6).
    Instance,
}

/// One scalar read operation in a `FillSpec`'s scalar tail (spec §4.5):
/// distinct wire widths and encodings, never collapsed to a uniform
/// `Tagged64` read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarOp {
    Tagged32,
    Tagged64,
    Unsigned,
    /// one byte, nonzero is true.
    Bool,
    U8,
    I8,
    /// tagged32 variant, truncated to 16 bits.
    U16,
    I16,
    /// big-endian signed-byte accumulation (spec §4.1).
    RefId,
}

/// Per-CID fill schema. Most fields only matter for `FillKind::Refs` and
/// the handful of kinds that extract a name/owner/signature out of their
/// ref list (spec §4.6: "Refs with name/owner/signature/scalar extraction").
#[derive(Debug, Clone)]
pub struct FillSpec {
    pub kind: FillKind,
    pub num_refs: u8,
    /// index into the ref list holding this object's name string, if any.
    pub name_idx: Option<u8>,
    pub owner_idx: Option<u8>,
    pub signature_idx: Option<u8>,
    /// ordered scalar operations read after the refs (spec §4.5).
    pub scalars: Vec<ScalarOp>,
    /// a single leading bool flag precedes the refs (spec's
    /// `V210FillLeadingBool`, folded in per DESIGN.md).
    pub leading_bool: bool,
    /// ref list needs `FunctionType`-specific extraction: scalar 1 is
    /// `packed_parameter_counts` (spec §4.6).
    pub is_func_type: bool,
    /// ref list needs `Field`-specific extraction: scalar 0 is
    /// `kind_bits`, scalar 1 is `host_offset_or_field_id` (spec §4.6).
    pub is_field: bool,
}

impl FillSpec {
    fn plain(kind: FillKind) -> Self {
        Self {
            kind,
            num_refs: 0,
            name_idx: None,
            owner_idx: None,
            signature_idx: None,
            scalars: Vec::new(),
            leading_bool: false,
            is_func_type: false,
            is_field: false,
        }
    }
}

pub struct FillSpecRegistry;

impl FillSpecRegistry {
    /// Look up the schema for `cid` under `profile`. Unknown CIDs still
    /// get a spec back (`FillKind::None`, zero refs) — the caller is
    /// responsible for treating that as a fatal schema-mismatch (spec §7),
    /// since fill has no resync point.
    pub fn resolve(cid: Cid, profile: &VersionProfile) -> FillSpec {
        use ObjectKind::*;
        use ScalarOp::*;
        match profile.cids.kind_of(cid) {
            Some(OneByteString) | Some(TwoByteString) => FillSpec::plain(FillKind::String),
            Some(StringAbstract) => FillSpec::plain(FillKind::String),
            Some(Mint) => FillSpec { scalars: vec![Tagged64], ..FillSpec::plain(FillKind::Refs) },
            Some(Double) => FillSpec::plain(FillKind::Double),
            Some(Array) | Some(ImmutableArray) => FillSpec::plain(FillKind::Array),
            Some(WeakArray) => FillSpec::plain(FillKind::WeakArray),
            Some(TypeArguments) => FillSpec::plain(FillKind::TypeArguments),
            Some(Class) => FillSpec {
                num_refs: profile.class_num_refs,
                name_idx: Some(0),
                scalars: {
                    // class-id, instance_size, next_field_offset,
                    // type_args_offset, num_type_args, num_native_fields
                    // are all tagged32; older versions additionally carry
                    // two token-position tagged32 fields before the
                    // trailing state_bits tagged32 (spec §4.6).
                    let mut scalars = vec![Tagged32, Tagged32, Tagged32, Tagged32, Tagged32, Tagged32];
                    if profile.class_has_token_pos {
                        scalars.push(Tagged32);
                        scalars.push(Tagged32);
                    }
                    scalars.push(Tagged32); // state_bits
                    scalars
                },
                ..FillSpec::plain(FillKind::Class)
            },
            Some(Function) => FillSpec {
                num_refs: profile.func_num_refs,
                name_idx: Some(0),
                owner_idx: Some(1),
                signature_idx: Some(2),
                scalars: vec![Tagged32, Tagged32],
                ..FillSpec::plain(FillKind::Refs)
            },
            Some(FunctionType) => FillSpec {
                num_refs: profile.func_type_num_refs,
                signature_idx: Some(0),
                scalars: if profile.func_type_old_scalars { vec![Tagged32] } else { vec![Tagged32, Tagged32] },
                is_func_type: true,
                ..FillSpec::plain(FillKind::Refs)
            },
            Some(TypeParameter) => FillSpec {
                num_refs: profile.type_param_num_refs,
                scalars: match (profile.type_param_byte_scalars, profile.type_param_wide_scalars) {
                    (true, _) => vec![U8],
                    (_, true) => vec![Tagged32, Tagged32, Tagged32],
                    _ => vec![Tagged32, Tagged32],
                },
                ..FillSpec::plain(FillKind::Refs)
            },
            Some(Type) => FillSpec {
                num_refs: profile.type_num_refs,
                scalars: if profile.type_has_token_pos { vec![Tagged32, Tagged32] } else { vec![Tagged32] },
                ..FillSpec::plain(FillKind::Refs)
            },
            Some(TypeRef) => FillSpec { num_refs: profile.type_ref_num_refs, ..FillSpec::plain(FillKind::Refs) },
            Some(RecordType) => FillSpec { num_refs: 1, scalars: vec![Tagged32], ..FillSpec::plain(FillKind::Record) },
            Some(Record) => FillSpec::plain(FillKind::Record),
            Some(Code) => FillSpec {
                num_refs: profile.code_num_refs,
                name_idx: None,
                owner_idx: Some(1),
                scalars: if profile.code_text_offset_delta { vec![Unsigned, Unsigned] } else { vec![Unsigned] },
                ..FillSpec::plain(FillKind::Code)
            },
            Some(ObjectPool) => FillSpec::plain(FillKind::ObjectPool),
            Some(ROData) => FillSpec::plain(FillKind::ROData),
            Some(ExceptionHandlers) => FillSpec::plain(FillKind::ExceptionHandlers),
            Some(Context) => FillSpec { num_refs: 1, scalars: vec![Tagged32], ..FillSpec::plain(FillKind::Context) },
            Some(ContextScope) => FillSpec::plain(FillKind::ContextScope),
            Some(ClosureData) => FillSpec {
                num_refs: profile.closure_data_num_refs,
                ..FillSpec::plain(FillKind::Refs)
            },
            Some(Field) => FillSpec {
                num_refs: 3,
                name_idx: Some(0),
                owner_idx: Some(1),
                scalars: vec![Tagged32, RefId],
                is_field: true,
                ..FillSpec::plain(FillKind::Field)
            },
            Some(Script) => FillSpec {
                num_refs: 1,
                name_idx: Some(0),
                scalars: {
                    let mut scalars = Vec::new();
                    if profile.script_has_line_col {
                        scalars.push(Tagged32);
                        scalars.push(Tagged32);
                    }
                    if profile.script_has_flags {
                        scalars.push(Tagged32);
                    }
                    scalars
                },
                ..FillSpec::plain(FillKind::Refs)
            },
            Some(Map) | Some(Set) => FillSpec { num_refs: 2, scalars: vec![Tagged32], ..FillSpec::plain(FillKind::Refs) },
            Some(WeakSerializationReference) => FillSpec { num_refs: 1, ..FillSpec::plain(FillKind::Refs) },
            None => {
                if profile.cids.is_typed_data_internal(cid) {
                    FillSpec::plain(FillKind::TypedData)
                } else if cid >= profile.cids.instance_cid_base {
                    FillSpec::plain(FillKind::Instance)
                } else {
                    FillSpec::plain(FillKind::None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::profile_latest;

    #[test]
    fn class_spec_has_token_pos_scalar_count() {
        let profile = profile_latest();
        let cid = profile.cids.cid(ObjectKind::Class).unwrap();
        let spec = FillSpecRegistry::resolve(cid, &profile);
        assert_eq!(spec.kind, FillKind::Class);
        let expected = if profile.class_has_token_pos { 9 } else { 7 };
        assert_eq!(spec.scalars.len(), expected);
    }

    #[test]
    fn string_spec_has_no_refs() {
        let profile = profile_latest();
        let cid = profile.cids.cid(ObjectKind::OneByteString).unwrap();
        let spec = FillSpecRegistry::resolve(cid, &profile);
        assert_eq!(spec.kind, FillKind::String);
        assert_eq!(spec.num_refs, 0);
    }

    #[test]
    fn instance_range_resolves_by_threshold_not_table() {
        let profile = profile_latest();
        let spec = FillSpecRegistry::resolve(profile.cids.instance_cid_base + 7, &profile);
        assert_eq!(spec.kind, FillKind::Instance);
    }

    #[test]
    fn field_spec_uses_ref_id_scalar_for_host_offset() {
        let profile = profile_latest();
        let cid = profile.cids.cid(ObjectKind::Field).unwrap();
        let spec = FillSpecRegistry::resolve(cid, &profile);
        assert_eq!(spec.scalars, vec![ScalarOp::Tagged32, ScalarOp::RefId]);
        assert!(spec.is_field);
    }
}
