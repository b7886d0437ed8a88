/// Salsa database holding interned types and protocols.
///
/// Every `CanonicalType` and `Protocol` handle is tied to the database it
/// was interned in; code generation for one function borrows it immutably.
#[derive(Default, Clone)]
#[salsa::db]
pub struct AbiDatabase {
    storage: salsa::Storage<Self>,
}

#[salsa::db]
impl salsa::Database for AbiDatabase {}
