//! Traits for storage abstraction and extensibility

use async_trait::async_trait;

use crate::config::ConfiguracionMatching;
use crate::types::*;

/// Storage abstraction for statement, ledger and link records
///
/// The engine never owns records: extracto and sistema rows are read through
/// this trait, and links and period state are written back through it. Any
/// backend (SQL database, in-memory map, remote service) can implement it.
/// Callers must serialize mutating calls for the same period.
///
/// The engine clones its store into each component, and the period lock reads
/// through its own clone. Clones must therefore be handles to the same data
/// (as with `MemoryStore` or a connection pool); a deep-copying `Clone`
/// would let a closed period accept mutations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List the extracto records of a period
    async fn list_extractos(&self, periodo: &Periodo) -> ConciliacionResult<Vec<ExtractoRecord>>;

    /// List the sistema records of a period
    async fn list_sistema(&self, periodo: &Periodo) -> ConciliacionResult<Vec<SistemaRecord>>;

    /// Get one extracto record within a period
    async fn get_extracto(
        &self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<Option<ExtractoRecord>>;

    /// Get one sistema record within a period
    async fn get_sistema(
        &self,
        periodo: &Periodo,
        sistema_id: RecordId,
    ) -> ConciliacionResult<Option<SistemaRecord>>;

    /// Materialize a new sistema record and return it with its assigned id
    async fn crear_movimiento_sistema(
        &mut self,
        periodo: &Periodo,
        movimiento: &NuevoMovimientoSistema,
    ) -> ConciliacionResult<SistemaRecord>;

    /// List every link of a period
    async fn list_vinculaciones(&self, periodo: &Periodo) -> ConciliacionResult<Vec<Vinculacion>>;

    /// Get the link of one extracto record
    async fn get_vinculacion(
        &self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<Option<Vinculacion>>;

    /// Insert or replace the link of `vinculacion.extracto_id`
    async fn save_vinculacion(
        &mut self,
        periodo: &Periodo,
        vinculacion: &Vinculacion,
    ) -> ConciliacionResult<Vinculacion>;

    /// Remove the link of one extracto record, returning whether it existed
    async fn delete_vinculacion(
        &mut self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<bool>;

    /// Remove every link of a period, returning how many were removed
    async fn delete_vinculaciones(&mut self, periodo: &Periodo) -> ConciliacionResult<usize>;

    /// Get the closing record of a period
    async fn get_conciliacion(&self, periodo: &Periodo) -> ConciliacionResult<Option<Conciliacion>>;

    /// Insert or replace the closing record of a period
    async fn save_conciliacion(&mut self, conciliacion: &Conciliacion) -> ConciliacionResult<()>;

    /// Get the stored matching configuration, if any
    async fn get_configuracion(&self) -> ConciliacionResult<Option<ConfiguracionMatching>>;

    /// Replace the stored matching configuration
    async fn save_configuracion(&mut self, config: &ConfiguracionMatching)
        -> ConciliacionResult<()>;
}

/// Trait for implementing custom configuration validation rules
pub trait ConfiguracionValidator: Send + Sync {
    /// Validate a configuration before it is stored
    fn validate_configuracion(&self, config: &ConfiguracionMatching) -> ConciliacionResult<()>;
}

/// Default validator, enforcing the invariants a matching run relies on
pub struct DefaultConfiguracionValidator;

impl ConfiguracionValidator for DefaultConfiguracionValidator {
    fn validate_configuracion(&self, config: &ConfiguracionMatching) -> ConciliacionResult<()> {
        config.validate()
    }
}
