//! Main reconciliation orchestrator

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::config::ConfiguracionMatching;
use crate::matching::{candidatos_para, Candidato, MatchSet};
use crate::reconciliation::anomaly::{detectar_uno_a_muchos, CasoUnoAMuchos, ResumenInvalidacion};
use crate::reconciliation::integrity::{EstadisticasConciliacion, PeriodIntegrity};
use crate::reconciliation::manager::*;
use crate::reconciliation::period::PeriodLock;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_notas, validate_periodo, validate_usuario};

/// A link together with the records it joins, for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VinculacionDetalle {
    pub vinculacion: Vinculacion,
    pub extracto: ExtractoRecord,
    pub sistema: Option<SistemaRecord>,
}

/// Main reconciliation system that orchestrates all engine operations
///
/// Mutating operations take `&mut self`: one instance is the single writer
/// of the periods it touches.
pub struct Conciliador<S: RecordStore> {
    manager: VinculacionManager<S>,
    lock: PeriodLock<S>,
    validator: Box<dyn ConfiguracionValidator>,
}

impl<S: RecordStore + Clone> Conciliador<S> {
    /// Create a new reconciliation engine with the given storage backend
    pub fn new(storage: S) -> Self {
        Self::with_validator(storage, Box::new(DefaultConfiguracionValidator))
    }

    /// Create a new reconciliation engine with a custom configuration validator
    pub fn with_validator(storage: S, validator: Box<dyn ConfiguracionValidator>) -> Self {
        Self {
            manager: VinculacionManager::new(storage.clone()),
            lock: PeriodLock::new(storage),
            validator,
        }
    }
}

impl<S: RecordStore> Conciliador<S> {
    // Configuration
    /// Current matching configuration, defaults when none was stored
    pub async fn obtener_configuracion(&self) -> ConciliacionResult<ConfiguracionMatching> {
        self.manager.configuracion().await
    }

    /// Validate and store a new matching configuration
    pub async fn actualizar_configuracion(
        &mut self,
        config: ConfiguracionMatching,
    ) -> ConciliacionResult<ConfiguracionMatching> {
        self.validator.validate_configuracion(&config)?;
        self.manager.storage.save_configuracion(&config).await?;
        info!(
            peso_fecha = config.peso_fecha,
            peso_valor = config.peso_valor,
            peso_descripcion = config.peso_descripcion,
            score_minimo_exacto = config.score_minimo_exacto,
            score_minimo_probable = config.score_minimo_probable,
            "matching configuration updated"
        );
        Ok(config)
    }

    // Matching
    /// Compute the match set of a period without persisting it
    pub async fn proponer_matches(&self, periodo: &Periodo) -> ConciliacionResult<MatchSet> {
        validate_periodo(periodo)?;
        self.manager.proponer_matches(periodo).await
    }

    /// Compute and persist the match set of a period
    pub async fn ejecutar_matching(&mut self, periodo: &Periodo) -> ConciliacionResult<MatchSet> {
        validate_periodo(periodo)?;
        self.manager.ejecutar_matching(periodo).await
    }

    /// Ranked sistema candidates for one extracto record, best first
    ///
    /// Sistema records already held by another active link are left out.
    pub async fn sugerir_candidatos(
        &self,
        periodo: &Periodo,
        extracto_id: RecordId,
        limite: usize,
    ) -> ConciliacionResult<Vec<Candidato>> {
        validate_periodo(periodo)?;
        let storage = &self.manager.storage;
        let extracto = storage
            .get_extracto(periodo, extracto_id)
            .await?
            .ok_or_else(|| {
                ConciliacionError::RecordNotFound(format!("extracto {} in {}", extracto_id, periodo))
            })?;

        let ocupados: Vec<RecordId> = storage
            .list_vinculaciones(periodo)
            .await?
            .into_iter()
            .filter(|v| v.extracto_id != extracto_id && v.estado != MatchEstado::Ignorado)
            .filter_map(|v| v.sistema_id)
            .collect();
        let libres: Vec<SistemaRecord> = storage
            .list_sistema(periodo)
            .await?
            .into_iter()
            .filter(|s| !ocupados.contains(&s.id))
            .collect();

        let config = self.manager.configuracion().await?;
        let mut candidatos = candidatos_para(&extracto, &libres, &config);
        candidatos.truncate(limite);
        Ok(candidatos)
    }

    /// Every extracto record of a period with its link and linked record
    pub async fn detalle_matches(
        &self,
        periodo: &Periodo,
    ) -> ConciliacionResult<Vec<VinculacionDetalle>> {
        validate_periodo(periodo)?;
        let storage = &self.manager.storage;
        let extractos = storage.list_extractos(periodo).await?;
        let sistemas: HashMap<RecordId, SistemaRecord> = storage
            .list_sistema(periodo)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();
        let mut vinculaciones: HashMap<RecordId, Vinculacion> = storage
            .list_vinculaciones(periodo)
            .await?
            .into_iter()
            .map(|v| (v.extracto_id, v))
            .collect();

        let mut detalle: Vec<VinculacionDetalle> = extractos
            .into_iter()
            .map(|extracto| {
                let vinculacion = vinculaciones
                    .remove(&extracto.id)
                    .unwrap_or_else(|| Vinculacion::sin_match(extracto.id));
                let sistema = vinculacion
                    .sistema_id
                    .and_then(|id| sistemas.get(&id).cloned());
                VinculacionDetalle {
                    vinculacion,
                    extracto,
                    sistema,
                }
            })
            .collect();
        detalle.sort_by_key(|d| d.extracto.id);
        Ok(detalle)
    }

    // Link operations
    /// Link an extracto record to a chosen sistema record
    pub async fn vincular(
        &mut self,
        periodo: &Periodo,
        params: VincularParams,
    ) -> ConciliacionResult<Vinculacion> {
        validate_periodo(periodo)?;
        validate_usuario(&params.usuario)?;
        validate_notas(params.notas.as_deref())?;
        self.manager.vincular_manual(periodo, params).await
    }

    /// Reset an extracto record to SIN_MATCH
    pub async fn desvincular(
        &mut self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<Vinculacion> {
        validate_periodo(periodo)?;
        self.manager.desvincular(periodo, extracto_id).await
    }

    /// Mark an extracto record as IGNORADO
    pub async fn ignorar(
        &mut self,
        periodo: &Periodo,
        extracto_id: RecordId,
        usuario: &str,
        razon: Option<String>,
    ) -> ConciliacionResult<Vinculacion> {
        validate_periodo(periodo)?;
        validate_usuario(usuario)?;
        validate_notas(razon.as_deref())?;
        self.manager.ignorar(periodo, extracto_id, usuario, razon).await
    }

    /// Approve a PROBABLE link
    pub async fn aprobar(
        &mut self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<Vinculacion> {
        validate_periodo(periodo)?;
        self.manager.aprobar(periodo, extracto_id).await
    }

    /// Approve every PROBABLE link scoring at least `umbral`
    pub async fn aprobar_todos_probables(
        &mut self,
        periodo: &Periodo,
        umbral: Option<f64>,
    ) -> ConciliacionResult<usize> {
        validate_periodo(periodo)?;
        self.manager.aprobar_todos_probables(periodo, umbral).await
    }

    /// Create and link the missing sistema movement of one extracto record
    pub async fn crear_movimiento_faltante(
        &mut self,
        periodo: &Periodo,
        params: CrearMovimientoParams,
    ) -> ConciliacionResult<MovimientoCreado> {
        validate_periodo(periodo)?;
        self.manager.crear_movimiento_faltante(periodo, params).await
    }

    /// Create and link missing sistema movements, reporting failures per item
    pub async fn crear_movimientos_lote(
        &mut self,
        periodo: &Periodo,
        items: Vec<CrearMovimientoParams>,
    ) -> ConciliacionResult<ResultadoLote> {
        validate_periodo(periodo)?;
        self.manager.crear_movimientos_lote(periodo, items).await
    }

    /// Remove every link of the period
    pub async fn desvincular_todo(&mut self, periodo: &Periodo) -> ConciliacionResult<usize> {
        validate_periodo(periodo)?;
        self.manager.desvincular_todo(periodo).await
    }

    // Anomalies
    /// Sistema records linked to more than one extracto record
    pub async fn detectar_uno_a_muchos(
        &self,
        periodo: &Periodo,
    ) -> ConciliacionResult<Vec<CasoUnoAMuchos>> {
        validate_periodo(periodo)?;
        self.manager.detectar_uno_a_muchos(periodo).await
    }

    /// Reopen every extracto record involved in a one-to-many group
    pub async fn invalidar_uno_a_muchos(
        &mut self,
        periodo: &Periodo,
    ) -> ConciliacionResult<ResumenInvalidacion> {
        validate_periodo(periodo)?;
        self.manager.invalidar_uno_a_muchos(periodo).await
    }

    // Integrity and closing
    /// Aggregated figures of a period
    pub async fn estadisticas(
        &self,
        periodo: &Periodo,
    ) -> ConciliacionResult<EstadisticasConciliacion> {
        validate_periodo(periodo)?;
        let storage = &self.manager.storage;
        let extractos = storage.list_extractos(periodo).await?;
        let sistemas = storage.list_sistema(periodo).await?;
        let vinculaciones = storage.list_vinculaciones(periodo).await?;
        Ok(EstadisticasConciliacion::calcular(
            &extractos,
            &sistemas,
            &vinculaciones,
        ))
    }

    /// Evaluate the six closing requirements of a period
    pub async fn verificar_integridad(
        &self,
        periodo: &Periodo,
    ) -> ConciliacionResult<PeriodIntegrity> {
        validate_periodo(periodo)?;
        let storage = &self.manager.storage;
        let extractos = storage.list_extractos(periodo).await?;
        let sistemas = storage.list_sistema(periodo).await?;
        let vinculaciones = storage.list_vinculaciones(periodo).await?;

        let stats = EstadisticasConciliacion::calcular(&extractos, &sistemas, &vinculaciones);
        let casos = detectar_uno_a_muchos(&vinculaciones, &extractos, &sistemas);
        Ok(PeriodIntegrity::evaluar(&stats, casos.len()))
    }

    /// Closing record of a period, created as PENDIENTE on first access
    pub async fn estado_conciliacion(
        &mut self,
        periodo: &Periodo,
    ) -> ConciliacionResult<Conciliacion> {
        validate_periodo(periodo)?;
        self.lock.obtener_o_crear(periodo).await
    }

    /// Close the period; fails with `PeriodNotBalanced` unless balanced
    pub async fn cerrar_conciliacion(
        &mut self,
        periodo: &Periodo,
    ) -> ConciliacionResult<Conciliacion> {
        let integridad = self.verificar_integridad(periodo).await?;
        self.lock.cerrar(periodo, &integridad).await
    }
}
