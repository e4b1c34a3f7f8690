//! `classify`: a pure `(cid, &CidTable) -> AllocKind` function. Grounded on
//! the teacher's type-tag matching in `til.rs` (a single ordered `match`
//! over small integer tags, no subclassing) — here scaled to the 19
//! alloc-phase shapes a cluster's objects can take (spec §4.3).

use crate::version::{Cid, CidTable, ObjectKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocKind {
    /// Fixed-shape object with no per-instance length/aux data beyond a
    /// count (spec §4.4 "Simple").
    Simple,
    /// One of the canonicalizable clusters (`Type`, `FunctionType`,
    /// `TypeParameter`): carries a canonical-set table length.
    CanonicalSet,
    String,
    Mint,
    /// `Array`/`ImmutableArray`: per-instance element count.
    Array,
    WeakArray,
    TypeArguments,
    Class,
    Code,
    ObjectPool,
    ROData,
    ExceptionHandlers,
    Context,
    ContextScope,
    Record,
    /// Internal typed-data element kinds (`typed_data_start..typed_data_end`).
    TypedData,
    /// Plain `Instance` (cid at or above `instance_cid_base`).
    Instance,
    /// A recognized-but-vestigial CID with no alloc payload at all (e.g.
    /// `WeakSerializationReference`).
    Empty,
    /// No recognized shape whatsoever; the caller should record a
    /// diagnostic and still reserve a ref-id range with zero aux data
    /// (spec §7: alloc errors are non-fatal).
    Unknown,
}

/// Ordered rule list (spec §4.3): named CIDs first, then the optional
/// later-version record-family CIDs, then the "30+ simple alloc CIDs"
/// fallback, the typed-data and instance ranges, and finally the two
/// catch-alls (any other predefined CID is `Simple`, anything else is
/// `Unknown`).
pub fn classify(cid: Cid, cids: &CidTable) -> AllocKind {
    use ObjectKind::*;

    // Rule 1: named CIDs.
    match cids.kind_of(cid) {
        Some(OneByteString | TwoByteString | StringAbstract) => return AllocKind::String,
        Some(Mint) => return AllocKind::Mint,
        Some(Array | ImmutableArray) => return AllocKind::Array,
        Some(WeakArray) => return AllocKind::WeakArray,
        Some(TypeArguments) => return AllocKind::TypeArguments,
        Some(Type | FunctionType | TypeParameter) => return AllocKind::CanonicalSet,
        Some(Class) => return AllocKind::Class,
        Some(Code) => return AllocKind::Code,
        Some(ObjectPool) => return AllocKind::ObjectPool,
        Some(ROData) => return AllocKind::ROData,
        Some(ExceptionHandlers) => return AllocKind::ExceptionHandlers,
        Some(Context) => return AllocKind::Context,
        Some(ContextScope) => return AllocKind::ContextScope,
        Some(Map | Set) => return AllocKind::Simple,
        _ => {}
    }

    // Rule 2: optional later-version record-family CIDs.
    match cids.kind_of(cid) {
        Some(RecordType) => return AllocKind::CanonicalSet,
        Some(Record) => return AllocKind::Record,
        Some(WeakSerializationReference) => return AllocKind::Empty,
        _ => {}
    }

    // Rule 3: the remaining named "simple alloc" CIDs — fixed-shape
    // objects whose alloc phase is nothing but a count. `TypeRef` is
    // deliberately not grouped into rule 1's canonical-set family (see
    // DESIGN.md Open Question); it lands here instead.
    if matches!(cids.kind_of(cid), Some(Double | Field | Function | ClosureData | Script | TypeRef)) {
        return AllocKind::Simple;
    }

    // Rule 4: typed-data internal CID range.
    if cids.is_typed_data_internal(cid) {
        return AllocKind::TypedData;
    }

    // Rule 5: Instance threshold.
    if cid >= cids.instance_cid_base {
        return AllocKind::Instance;
    }

    // Rule 6: any remaining predefined CID.
    if cid >= 0 && cid < cids.predefined_count {
        return AllocKind::Simple;
    }

    // Rule 7: otherwise, unrecognized.
    AllocKind::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::profile_latest;
    use rstest::rstest;

    fn cids() -> CidTable {
        profile_latest().cids
    }

    #[rstest]
    #[case(ObjectKind::OneByteString, AllocKind::String)]
    #[case(ObjectKind::TwoByteString, AllocKind::String)]
    #[case(ObjectKind::StringAbstract, AllocKind::String)]
    #[case(ObjectKind::Mint, AllocKind::Mint)]
    #[case(ObjectKind::Array, AllocKind::Array)]
    #[case(ObjectKind::ImmutableArray, AllocKind::Array)]
    #[case(ObjectKind::WeakArray, AllocKind::WeakArray)]
    #[case(ObjectKind::TypeArguments, AllocKind::TypeArguments)]
    #[case(ObjectKind::Class, AllocKind::Class)]
    #[case(ObjectKind::Code, AllocKind::Code)]
    #[case(ObjectKind::ObjectPool, AllocKind::ObjectPool)]
    #[case(ObjectKind::ROData, AllocKind::ROData)]
    #[case(ObjectKind::ExceptionHandlers, AllocKind::ExceptionHandlers)]
    #[case(ObjectKind::Context, AllocKind::Context)]
    #[case(ObjectKind::ContextScope, AllocKind::ContextScope)]
    #[case(ObjectKind::Type, AllocKind::CanonicalSet)]
    #[case(ObjectKind::FunctionType, AllocKind::CanonicalSet)]
    #[case(ObjectKind::TypeParameter, AllocKind::CanonicalSet)]
    #[case(ObjectKind::RecordType, AllocKind::CanonicalSet)]
    #[case(ObjectKind::Record, AllocKind::Record)]
    #[case(ObjectKind::WeakSerializationReference, AllocKind::Empty)]
    #[case(ObjectKind::Field, AllocKind::Simple)]
    #[case(ObjectKind::Function, AllocKind::Simple)]
    #[case(ObjectKind::Double, AllocKind::Simple)]
    #[case(ObjectKind::TypeRef, AllocKind::Simple)]
    #[case(ObjectKind::Map, AllocKind::Simple)]
    #[case(ObjectKind::Set, AllocKind::Simple)]
    fn classifies_named_kinds(#[case] kind: ObjectKind, #[case] expected: AllocKind) {
        let table = cids();
        let cid = table.cid(kind).unwrap();
        assert_eq!(classify(cid, &table), expected);
    }

    #[test]
    fn typed_data_internal_range_classifies() {
        let table = cids();
        assert_eq!(classify(table.typed_data_start, &table), AllocKind::TypedData);
        assert_eq!(classify(table.typed_data_start + table.typed_data_stride, &table), AllocKind::TypedData);
    }

    #[test]
    fn instance_threshold_classifies() {
        let table = cids();
        assert_eq!(classify(table.instance_cid_base, &table), AllocKind::Instance);
        assert_eq!(classify(table.instance_cid_base + 50, &table), AllocKind::Instance);
    }

    #[test]
    fn unknown_cid_is_unknown() {
        let table = cids();
        assert_eq!(classify(99_999, &table), AllocKind::Unknown);
    }
}
