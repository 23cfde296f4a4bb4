//! In-memory record store for testing and embedding

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

use crate::config::ConfiguracionMatching;
use crate::traits::*;
use crate::types::*;

fn poisoned<T>(_: PoisonError<T>) -> ConciliacionError {
    ConciliacionError::Storage("memory store lock poisoned".to_string())
}

/// In-memory storage implementation for testing and development
///
/// Clones share the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    extractos: Arc<RwLock<HashMap<Periodo, BTreeMap<RecordId, ExtractoRecord>>>>,
    sistemas: Arc<RwLock<HashMap<Periodo, BTreeMap<RecordId, SistemaRecord>>>>,
    vinculaciones: Arc<RwLock<HashMap<Periodo, BTreeMap<RecordId, Vinculacion>>>>,
    conciliaciones: Arc<RwLock<HashMap<Periodo, Conciliacion>>>,
    configuracion: Arc<RwLock<Option<ConfiguracionMatching>>>,
}

impl MemoryStore {
    /// Create a new memory store instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Load statement lines into a period, replacing records with equal ids
    pub fn insert_extractos(
        &self,
        periodo: &Periodo,
        records: Vec<ExtractoRecord>,
    ) -> ConciliacionResult<()> {
        let mut extractos = self.extractos.write().map_err(poisoned)?;
        let scope = extractos.entry(*periodo).or_default();
        for record in records {
            scope.insert(record.id, record);
        }
        Ok(())
    }

    /// Load ledger movements into a period, replacing records with equal ids
    pub fn insert_sistema(
        &self,
        periodo: &Periodo,
        records: Vec<SistemaRecord>,
    ) -> ConciliacionResult<()> {
        let mut sistemas = self.sistemas.write().map_err(poisoned)?;
        let scope = sistemas.entry(*periodo).or_default();
        for record in records {
            scope.insert(record.id, record);
        }
        Ok(())
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> ConciliacionResult<()> {
        self.extractos.write().map_err(poisoned)?.clear();
        self.sistemas.write().map_err(poisoned)?.clear();
        self.vinculaciones.write().map_err(poisoned)?.clear();
        self.conciliaciones.write().map_err(poisoned)?.clear();
        *self.configuracion.write().map_err(poisoned)? = None;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_extractos(&self, periodo: &Periodo) -> ConciliacionResult<Vec<ExtractoRecord>> {
        let extractos = self.extractos.read().map_err(poisoned)?;
        Ok(extractos
            .get(periodo)
            .map(|scope| scope.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_sistema(&self, periodo: &Periodo) -> ConciliacionResult<Vec<SistemaRecord>> {
        let sistemas = self.sistemas.read().map_err(poisoned)?;
        Ok(sistemas
            .get(periodo)
            .map(|scope| scope.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_extracto(
        &self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<Option<ExtractoRecord>> {
        let extractos = self.extractos.read().map_err(poisoned)?;
        Ok(extractos
            .get(periodo)
            .and_then(|scope| scope.get(&extracto_id))
            .cloned())
    }

    async fn get_sistema(
        &self,
        periodo: &Periodo,
        sistema_id: RecordId,
    ) -> ConciliacionResult<Option<SistemaRecord>> {
        let sistemas = self.sistemas.read().map_err(poisoned)?;
        Ok(sistemas
            .get(periodo)
            .and_then(|scope| scope.get(&sistema_id))
            .cloned())
    }

    async fn crear_movimiento_sistema(
        &mut self,
        periodo: &Periodo,
        movimiento: &NuevoMovimientoSistema,
    ) -> ConciliacionResult<SistemaRecord> {
        let mut sistemas = self.sistemas.write().map_err(poisoned)?;
        let siguiente = sistemas
            .values()
            .filter_map(|scope| scope.keys().next_back())
            .max()
            .map_or(1, |id| id + 1);

        let record = SistemaRecord {
            id: siguiente,
            fecha: movimiento.fecha,
            descripcion: movimiento.descripcion.clone(),
            referencia: movimiento.referencia.clone(),
            valor: movimiento.valor.clone(),
            usd: movimiento.usd.clone(),
            trm: movimiento.trm.clone(),
            tercero_id: None,
            centro_costo_id: None,
            concepto_id: None,
        };
        sistemas
            .entry(*periodo)
            .or_default()
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn list_vinculaciones(&self, periodo: &Periodo) -> ConciliacionResult<Vec<Vinculacion>> {
        let vinculaciones = self.vinculaciones.read().map_err(poisoned)?;
        Ok(vinculaciones
            .get(periodo)
            .map(|scope| scope.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_vinculacion(
        &self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<Option<Vinculacion>> {
        let vinculaciones = self.vinculaciones.read().map_err(poisoned)?;
        Ok(vinculaciones
            .get(periodo)
            .and_then(|scope| scope.get(&extracto_id))
            .cloned())
    }

    async fn save_vinculacion(
        &mut self,
        periodo: &Periodo,
        vinculacion: &Vinculacion,
    ) -> ConciliacionResult<Vinculacion> {
        let mut vinculaciones = self.vinculaciones.write().map_err(poisoned)?;
        let scope = vinculaciones.entry(*periodo).or_default();

        let mut guardada = vinculacion.clone();
        if guardada.id.is_none() {
            guardada.id = scope
                .get(&guardada.extracto_id)
                .and_then(|previa| previa.id)
                .or_else(|| Some(Uuid::new_v4()));
        }
        scope.insert(guardada.extracto_id, guardada.clone());
        Ok(guardada)
    }

    async fn delete_vinculacion(
        &mut self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<bool> {
        let mut vinculaciones = self.vinculaciones.write().map_err(poisoned)?;
        Ok(vinculaciones
            .get_mut(periodo)
            .and_then(|scope| scope.remove(&extracto_id))
            .is_some())
    }

    async fn delete_vinculaciones(&mut self, periodo: &Periodo) -> ConciliacionResult<usize> {
        let mut vinculaciones = self.vinculaciones.write().map_err(poisoned)?;
        Ok(vinculaciones
            .remove(periodo)
            .map(|scope| scope.len())
            .unwrap_or(0))
    }

    async fn get_conciliacion(&self, periodo: &Periodo) -> ConciliacionResult<Option<Conciliacion>> {
        Ok(self
            .conciliaciones
            .read()
            .map_err(poisoned)?
            .get(periodo)
            .cloned())
    }

    async fn save_conciliacion(&mut self, conciliacion: &Conciliacion) -> ConciliacionResult<()> {
        self.conciliaciones
            .write()
            .map_err(poisoned)?
            .insert(conciliacion.periodo, conciliacion.clone());
        Ok(())
    }

    async fn get_configuracion(&self) -> ConciliacionResult<Option<ConfiguracionMatching>> {
        Ok(self.configuracion.read().map_err(poisoned)?.clone())
    }

    async fn save_configuracion(
        &mut self,
        config: &ConfiguracionMatching,
    ) -> ConciliacionResult<()> {
        *self.configuracion.write().map_err(poisoned)? = Some(config.clone());
        Ok(())
    }
}
