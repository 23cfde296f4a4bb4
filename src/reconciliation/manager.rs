//! Authoritative state transitions of links

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::ConfiguracionMatching;
use crate::matching::{emparejar, score, MatchSet};
use crate::reconciliation::anomaly::{detectar_uno_a_muchos, extractos_a_reabrir};
use crate::reconciliation::anomaly::{CasoUnoAMuchos, ResumenInvalidacion};
use crate::reconciliation::period::PeriodLock;
use crate::traits::*;
use crate::types::*;

/// Parameters for linking an extracto record to a chosen sistema record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VincularParams {
    pub extracto_id: RecordId,
    pub sistema_id: RecordId,
    pub usuario: String,
    pub notas: Option<String>,
    /// Reopen other extracto records already holding this sistema record
    pub reemplazar_existente: bool,
}

impl VincularParams {
    pub fn new(extracto_id: RecordId, sistema_id: RecordId, usuario: &str) -> Self {
        Self {
            extracto_id,
            sistema_id,
            usuario: usuario.to_string(),
            notas: None,
            reemplazar_existente: false,
        }
    }
}

/// Parameters for materializing the ledger movement of a statement line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrearMovimientoParams {
    pub extracto_id: RecordId,
    /// Overrides the extracto description on the new movement
    pub descripcion: Option<String>,
    pub usuario: Option<String>,
}

impl CrearMovimientoParams {
    pub fn new(extracto_id: RecordId) -> Self {
        Self {
            extracto_id,
            descripcion: None,
            usuario: None,
        }
    }
}

/// A sistema record created from a statement line and its link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovimientoCreado {
    pub sistema: SistemaRecord,
    pub vinculacion: Vinculacion,
}

/// Failure of one item of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLote {
    pub extracto_id: RecordId,
    pub razon: String,
}

/// Outcome of a batch creation: successes and failures side by side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultadoLote {
    pub creados: Vec<MovimientoCreado>,
    pub errores: Vec<ErrorLote>,
}

impl ResultadoLote {
    pub fn total_creados(&self) -> usize {
        self.creados.len()
    }

    pub fn has_errores(&self) -> bool {
        !self.errores.is_empty()
    }
}

/// Link manager applying every user-driven transition
///
/// Every mutating call checks the period lock first and writes one link at
/// a time, so a retried or interrupted batch leaves earlier items applied.
pub struct VinculacionManager<S: RecordStore> {
    pub(crate) storage: S,
    lock: PeriodLock<S>,
}

impl<S: RecordStore + Clone> VinculacionManager<S> {
    /// Create a new link manager
    pub fn new(storage: S) -> Self {
        Self {
            lock: PeriodLock::new(storage.clone()),
            storage,
        }
    }
}

impl<S: RecordStore> VinculacionManager<S> {
    /// Configuration snapshot for one operation
    pub async fn configuracion(&self) -> ConciliacionResult<ConfiguracionMatching> {
        Ok(self.storage.get_configuracion().await?.unwrap_or_default())
    }

    async fn get_extracto_required(
        &self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<ExtractoRecord> {
        self.storage
            .get_extracto(periodo, extracto_id)
            .await?
            .ok_or_else(|| {
                ConciliacionError::RecordNotFound(format!(
                    "extracto {} in {}",
                    extracto_id, periodo
                ))
            })
    }

    async fn get_sistema_required(
        &self,
        periodo: &Periodo,
        sistema_id: RecordId,
    ) -> ConciliacionResult<SistemaRecord> {
        self.storage
            .get_sistema(periodo, sistema_id)
            .await?
            .ok_or_else(|| {
                ConciliacionError::RecordNotFound(format!("sistema {} in {}", sistema_id, periodo))
            })
    }

    async fn vinculacion_actual(
        &self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<Vinculacion> {
        Ok(self
            .storage
            .get_vinculacion(periodo, extracto_id)
            .await?
            .unwrap_or_else(|| Vinculacion::sin_match(extracto_id)))
    }

    /// Compute the match set of a period without persisting it
    pub async fn proponer_matches(&self, periodo: &Periodo) -> ConciliacionResult<MatchSet> {
        let config = self.configuracion().await?;
        config.validate()?;

        let extractos = self.storage.list_extractos(periodo).await?;
        let sistemas = self.storage.list_sistema(periodo).await?;
        let existentes = self.storage.list_vinculaciones(periodo).await?;

        Ok(emparejar(&extractos, &sistemas, &existentes, &config))
    }

    /// Compute the match set and persist every link a run may replace
    pub async fn ejecutar_matching(&mut self, periodo: &Periodo) -> ConciliacionResult<MatchSet> {
        self.lock.asegurar_abierto(periodo).await?;
        let propuesta = self.proponer_matches(periodo).await?;

        let mut vinculaciones = Vec::with_capacity(propuesta.len());
        for vinculacion in propuesta.vinculaciones {
            if vinculacion.is_preservada() {
                vinculaciones.push(vinculacion);
                continue;
            }
            let mut nueva = vinculacion;
            if let Some(previa) = self
                .storage
                .get_vinculacion(periodo, nueva.extracto_id)
                .await?
            {
                nueva.id = previa.id;
            }
            vinculaciones.push(self.storage.save_vinculacion(periodo, &nueva).await?);
        }

        let resultado = MatchSet::new(vinculaciones);
        info!(
            %periodo,
            ok = resultado.contar(MatchEstado::Ok),
            probable = resultado.contar(MatchEstado::Probable),
            sin_match = resultado.contar(MatchEstado::SinMatch),
            manual = resultado.contar(MatchEstado::Manual),
            ignorado = resultado.contar(MatchEstado::Ignorado),
            "matching run completed"
        );
        Ok(resultado)
    }

    /// Link an extracto record to a user-chosen sistema record
    ///
    /// Reusing a sistema record already linked elsewhere is tolerated and
    /// left for the one-to-many detector, unless `reemplazar_existente`
    /// asks to reopen the previous holders first.
    pub async fn vincular_manual(
        &mut self,
        periodo: &Periodo,
        params: VincularParams,
    ) -> ConciliacionResult<Vinculacion> {
        self.lock.asegurar_abierto(periodo).await?;

        let extracto = self.get_extracto_required(periodo, params.extracto_id).await?;
        let sistema = self.get_sistema_required(periodo, params.sistema_id).await?;
        let actual = self.vinculacion_actual(periodo, extracto.id).await?;

        if !actual.estado.puede_transicionar(MatchEstado::Manual) {
            return Err(ConciliacionError::InvalidTransition(format!(
                "extracto {} is {}; unlink it before linking manually",
                extracto.id, actual.estado
            )));
        }

        let otros: Vec<Vinculacion> = self
            .storage
            .list_vinculaciones(periodo)
            .await?
            .into_iter()
            .filter(|v| {
                v.sistema_id == Some(sistema.id)
                    && v.extracto_id != extracto.id
                    && v.estado != MatchEstado::Ignorado
            })
            .collect();

        if params.reemplazar_existente {
            for mut previa in otros {
                debug!(%periodo, extracto_id = previa.extracto_id, sistema_id = sistema.id, "superseding link");
                previa.reset();
                self.storage.save_vinculacion(periodo, &previa).await?;
            }
        } else if !otros.is_empty() {
            warn!(
                %periodo,
                sistema_id = sistema.id,
                extracto_id = extracto.id,
                previos = otros.len(),
                "sistema record linked to more than one extracto record"
            );
        }

        let config = self.configuracion().await?;
        let mut vinculacion = Vinculacion::con_candidato(
            extracto.id,
            sistema.id,
            MatchEstado::Manual,
            score(&extracto, &sistema, &config),
        );
        vinculacion.id = actual.id;
        vinculacion.confirmado_por_usuario = true;
        vinculacion.created_by = Some(params.usuario);
        vinculacion.notas = params.notas;

        let guardada = self.storage.save_vinculacion(periodo, &vinculacion).await?;
        info!(%periodo, extracto_id = extracto.id, sistema_id = sistema.id, "manual link saved");
        Ok(guardada)
    }

    /// Remove the sistema link and scores of an extracto record
    pub async fn desvincular(
        &mut self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<Vinculacion> {
        self.lock.asegurar_abierto(periodo).await?;
        self.get_extracto_required(periodo, extracto_id).await?;

        self.reabrir(periodo, extracto_id).await
    }

    async fn reabrir(
        &mut self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<Vinculacion> {
        let mut vinculacion = self.vinculacion_actual(periodo, extracto_id).await?;
        if vinculacion.id.is_some()
            && vinculacion.estado == MatchEstado::SinMatch
            && vinculacion.sistema_id.is_none()
        {
            return Ok(vinculacion);
        }

        vinculacion.reset();
        let guardada = self.storage.save_vinculacion(periodo, &vinculacion).await?;
        debug!(%periodo, extracto_id, "link reopened");
        Ok(guardada)
    }

    /// Exclude an extracto record from reconciliation
    pub async fn ignorar(
        &mut self,
        periodo: &Periodo,
        extracto_id: RecordId,
        usuario: &str,
        razon: Option<String>,
    ) -> ConciliacionResult<Vinculacion> {
        self.lock.asegurar_abierto(periodo).await?;
        self.get_extracto_required(periodo, extracto_id).await?;

        let mut vinculacion = self.vinculacion_actual(periodo, extracto_id).await?;
        vinculacion.sistema_id = None;
        vinculacion.set_score(MatchCandidateScore::default());
        vinculacion.estado = MatchEstado::Ignorado;
        vinculacion.confirmado_por_usuario = true;
        vinculacion.created_by = Some(usuario.to_string());
        vinculacion.notas = razon;
        vinculacion.touch();

        let guardada = self.storage.save_vinculacion(periodo, &vinculacion).await?;
        info!(%periodo, extracto_id, usuario, "extracto record ignored");
        Ok(guardada)
    }

    /// Confirm a PROBABLE link as OK, keeping its scores
    pub async fn aprobar(
        &mut self,
        periodo: &Periodo,
        extracto_id: RecordId,
    ) -> ConciliacionResult<Vinculacion> {
        self.lock.asegurar_abierto(periodo).await?;
        self.get_extracto_required(periodo, extracto_id).await?;

        let mut vinculacion = self.vinculacion_actual(periodo, extracto_id).await?;
        match vinculacion.estado {
            MatchEstado::Probable => {}
            MatchEstado::Ok if vinculacion.confirmado_por_usuario => return Ok(vinculacion),
            estado => {
                return Err(ConciliacionError::InvalidTransition(format!(
                    "only PROBABLE links can be approved; extracto {} is {}",
                    extracto_id, estado
                )))
            }
        }

        vinculacion.estado = MatchEstado::Ok;
        vinculacion.confirmado_por_usuario = true;
        vinculacion.touch();
        self.storage.save_vinculacion(periodo, &vinculacion).await
    }

    /// Approve every PROBABLE link scoring at least `umbral`
    ///
    /// Defaults to the configured probable threshold, which approves all of
    /// them. Returns how many links were approved.
    pub async fn aprobar_todos_probables(
        &mut self,
        periodo: &Periodo,
        umbral: Option<f64>,
    ) -> ConciliacionResult<usize> {
        self.lock.asegurar_abierto(periodo).await?;
        let umbral = match umbral {
            Some(umbral) => umbral,
            None => self.configuracion().await?.score_minimo_probable,
        };

        let probables: Vec<Vinculacion> = self
            .storage
            .list_vinculaciones(periodo)
            .await?
            .into_iter()
            .filter(|v| v.estado == MatchEstado::Probable && v.score_total >= umbral)
            .collect();

        let total = probables.len();
        for mut vinculacion in probables {
            vinculacion.estado = MatchEstado::Ok;
            vinculacion.confirmado_por_usuario = true;
            vinculacion.touch();
            self.storage.save_vinculacion(periodo, &vinculacion).await?;
        }

        info!(%periodo, aprobados = total, umbral, "bulk approval completed");
        Ok(total)
    }

    /// Create the missing sistema movement of an unmatched extracto record
    /// and link it
    pub async fn crear_movimiento_faltante(
        &mut self,
        periodo: &Periodo,
        params: CrearMovimientoParams,
    ) -> ConciliacionResult<MovimientoCreado> {
        self.lock.asegurar_abierto(periodo).await?;
        self.crear_movimiento(periodo, params).await
    }

    async fn crear_movimiento(
        &mut self,
        periodo: &Periodo,
        params: CrearMovimientoParams,
    ) -> ConciliacionResult<MovimientoCreado> {
        let extracto = self.get_extracto_required(periodo, params.extracto_id).await?;
        let actual = self.vinculacion_actual(periodo, extracto.id).await?;
        if actual.estado != MatchEstado::SinMatch {
            return Err(ConciliacionError::InvalidTransition(format!(
                "extracto {} is {}; only SIN_MATCH records get a new movement",
                extracto.id, actual.estado
            )));
        }

        let movimiento = NuevoMovimientoSistema::desde_extracto(&extracto, params.descripcion);
        let sistema = match self.movimiento_huerfano(periodo, &movimiento).await? {
            Some(existente) => {
                debug!(%periodo, extracto_id = extracto.id, sistema_id = existente.id, "reusing unlinked movement");
                existente
            }
            None => {
                self.storage
                    .crear_movimiento_sistema(periodo, &movimiento)
                    .await?
            }
        };

        let config = self.configuracion().await?;
        let mut vinculacion = Vinculacion::con_candidato(
            extracto.id,
            sistema.id,
            MatchEstado::Manual,
            score(&extracto, &sistema, &config),
        );
        vinculacion.id = actual.id;
        vinculacion.confirmado_por_usuario = true;
        vinculacion.created_by = params.usuario;

        let vinculacion = self.storage.save_vinculacion(periodo, &vinculacion).await?;
        info!(%periodo, extracto_id = extracto.id, sistema_id = sistema.id, "missing movement created");
        Ok(MovimientoCreado {
            sistema,
            vinculacion,
        })
    }

    /// Unlinked sistema record mirroring `movimiento`, left behind by an
    /// interrupted creation
    async fn movimiento_huerfano(
        &self,
        periodo: &Periodo,
        movimiento: &NuevoMovimientoSistema,
    ) -> ConciliacionResult<Option<SistemaRecord>> {
        let vinculados: BTreeSet<RecordId> = self
            .storage
            .list_vinculaciones(periodo)
            .await?
            .into_iter()
            .filter(|v| v.estado != MatchEstado::Ignorado)
            .filter_map(|v| v.sistema_id)
            .collect();

        Ok(self
            .storage
            .list_sistema(periodo)
            .await?
            .into_iter()
            .find(|s| {
                !vinculados.contains(&s.id)
                    && s.fecha == movimiento.fecha
                    && s.valor == movimiento.valor
                    && s.descripcion == movimiento.descripcion
                    && s.referencia == movimiento.referencia
            }))
    }

    /// Batch variant of [`Self::crear_movimiento_faltante`]
    ///
    /// Each item succeeds or fails on its own; failures are reported next
    /// to the successes and never undo them.
    pub async fn crear_movimientos_lote(
        &mut self,
        periodo: &Periodo,
        items: Vec<CrearMovimientoParams>,
    ) -> ConciliacionResult<ResultadoLote> {
        self.lock.asegurar_abierto(periodo).await?;

        let mut resultado = ResultadoLote::default();
        for params in items {
            let extracto_id = params.extracto_id;
            match self.crear_movimiento(periodo, params).await {
                Ok(creado) => resultado.creados.push(creado),
                Err(e) => {
                    warn!(%periodo, extracto_id, error = %e, "batch item failed");
                    resultado.errores.push(ErrorLote {
                        extracto_id,
                        razon: e.to_string(),
                    });
                }
            }
        }

        info!(
            %periodo,
            creados = resultado.creados.len(),
            errores = resultado.errores.len(),
            "batch creation completed"
        );
        Ok(resultado)
    }

    /// Remove every link of the period
    pub async fn desvincular_todo(&mut self, periodo: &Periodo) -> ConciliacionResult<usize> {
        self.lock.asegurar_abierto(periodo).await?;
        let eliminadas = self.storage.delete_vinculaciones(periodo).await?;
        info!(%periodo, eliminadas, "all links removed");
        Ok(eliminadas)
    }

    /// Report every sistema record linked to more than one extracto record
    pub async fn detectar_uno_a_muchos(
        &self,
        periodo: &Periodo,
    ) -> ConciliacionResult<Vec<CasoUnoAMuchos>> {
        let vinculaciones = self.storage.list_vinculaciones(periodo).await?;
        let extractos = self.storage.list_extractos(periodo).await?;
        let sistemas = self.storage.list_sistema(periodo).await?;
        Ok(detectar_uno_a_muchos(&vinculaciones, &extractos, &sistemas))
    }

    /// Reopen every extracto record of every one-to-many group
    pub async fn invalidar_uno_a_muchos(
        &mut self,
        periodo: &Periodo,
    ) -> ConciliacionResult<ResumenInvalidacion> {
        self.lock.asegurar_abierto(periodo).await?;

        let casos = self.detectar_uno_a_muchos(periodo).await?;
        let reabrir: BTreeSet<RecordId> = extractos_a_reabrir(&casos);

        for extracto_id in &reabrir {
            self.reabrir(periodo, *extracto_id).await?;
        }

        let resumen = ResumenInvalidacion {
            vinculaciones_eliminadas: reabrir.len(),
            movimientos_sistema_afectados: casos.len(),
            extractos_ahora_sin_match: reabrir.len(),
        };
        info!(
            %periodo,
            eliminadas = resumen.vinculaciones_eliminadas,
            sistema_afectados = resumen.movimientos_sistema_afectados,
            "one-to-many links invalidated"
        );
        Ok(resumen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStore;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;

    fn periodo() -> Periodo {
        Periodo::new(1, 2024, 3)
    }

    fn fecha(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_extractos(
                &periodo(),
                vec![
                    ExtractoRecord::new(1, fecha(5), "PAGO PROVEEDOR X", BigDecimal::from(-150000)),
                    ExtractoRecord::new(2, fecha(6), "ABONO CLIENTE Z", BigDecimal::from(80000)),
                    ExtractoRecord::new(3, fecha(9), "GMF 4X1000", BigDecimal::from(-600)),
                ],
            )
            .unwrap();
        store
            .insert_sistema(
                &periodo(),
                vec![
                    SistemaRecord::new(10, fecha(5), "PAGO PROVEEDOR X SA", BigDecimal::from(-150000)),
                    SistemaRecord::new(11, fecha(8), "ABONO CLIENTE", BigDecimal::from(80000)),
                ],
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_matching_run_persists_links() {
        let mut manager = VinculacionManager::new(store());
        let set = manager.ejecutar_matching(&periodo()).await.unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.get(1).unwrap().estado, MatchEstado::Ok);
        assert_eq!(set.get(3).unwrap().estado, MatchEstado::SinMatch);
        assert!(set.iter().all(|v| v.id.is_some()));

        let stored = manager.storage.list_vinculaciones(&periodo()).await.unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn test_manual_link_overrides_candidate() {
        let mut manager = VinculacionManager::new(store());
        manager.ejecutar_matching(&periodo()).await.unwrap();

        let mut params = VincularParams::new(2, 11, "ana");
        params.notas = Some("confirmado con cliente".to_string());
        let vinculacion = manager.vincular_manual(&periodo(), params).await.unwrap();

        assert_eq!(vinculacion.estado, MatchEstado::Manual);
        assert!(vinculacion.confirmado_por_usuario);
        assert_eq!(vinculacion.created_by.as_deref(), Some("ana"));
        assert!(vinculacion.score_total > 0.0);
    }

    #[tokio::test]
    async fn test_manual_link_unknown_records() {
        let mut manager = VinculacionManager::new(store());

        let result = manager
            .vincular_manual(&periodo(), VincularParams::new(99, 10, "ana"))
            .await;
        assert!(matches!(result, Err(ConciliacionError::RecordNotFound(_))));

        let result = manager
            .vincular_manual(&periodo(), VincularParams::new(1, 99, "ana"))
            .await;
        assert!(matches!(result, Err(ConciliacionError::RecordNotFound(_))));
    }

    #[tokio::test]
    async fn test_manual_link_supersedes_previous_holder() {
        let mut manager = VinculacionManager::new(store());
        manager
            .vincular_manual(&periodo(), VincularParams::new(1, 10, "ana"))
            .await
            .unwrap();

        let mut params = VincularParams::new(3, 10, "ana");
        params.reemplazar_existente = true;
        manager.vincular_manual(&periodo(), params).await.unwrap();

        let previa = manager
            .storage
            .get_vinculacion(&periodo(), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(previa.estado, MatchEstado::SinMatch);
        assert!(manager.detectar_uno_a_muchos(&periodo()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_desvincular_is_idempotent() {
        let mut manager = VinculacionManager::new(store());
        manager.ejecutar_matching(&periodo()).await.unwrap();

        let first = manager.desvincular(&periodo(), 1).await.unwrap();
        let second = manager.desvincular(&periodo(), 1).await.unwrap();

        assert_eq!(first.estado, MatchEstado::SinMatch);
        assert_eq!(first.sistema_id, None);
        assert_eq!(first.score_total, 0.0);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_ignored_record_requires_unlink_before_manual() {
        let mut manager = VinculacionManager::new(store());
        let ignorada = manager
            .ignorar(&periodo(), 3, "ana", Some("impuesto".to_string()))
            .await
            .unwrap();
        assert_eq!(ignorada.estado, MatchEstado::Ignorado);
        assert_eq!(ignorada.notas.as_deref(), Some("impuesto"));

        let result = manager
            .vincular_manual(&periodo(), VincularParams::new(3, 10, "ana"))
            .await;
        assert!(matches!(result, Err(ConciliacionError::InvalidTransition(_))));

        let reabierta = manager.desvincular(&periodo(), 3).await.unwrap();
        assert_eq!(reabierta.estado, MatchEstado::SinMatch);
    }

    #[tokio::test]
    async fn test_aprobar_only_from_probable() {
        let mut manager = VinculacionManager::new(store());
        let set = manager.ejecutar_matching(&periodo()).await.unwrap();
        assert_eq!(set.get(2).unwrap().estado, MatchEstado::Probable);

        let aprobada = manager.aprobar(&periodo(), 2).await.unwrap();
        assert_eq!(aprobada.estado, MatchEstado::Ok);
        assert!(aprobada.confirmado_por_usuario);
        assert_eq!(aprobada.score(), set.get(2).unwrap().score());

        // retry is harmless
        assert!(manager.aprobar(&periodo(), 2).await.is_ok());

        let result = manager.aprobar(&periodo(), 3).await;
        assert!(matches!(result, Err(ConciliacionError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_crear_movimiento_faltante() {
        let mut manager = VinculacionManager::new(store());
        manager.ejecutar_matching(&periodo()).await.unwrap();

        let creado = manager
            .crear_movimiento_faltante(&periodo(), CrearMovimientoParams::new(3))
            .await
            .unwrap();

        assert_eq!(creado.sistema.valor, BigDecimal::from(-600));
        assert_eq!(creado.sistema.fecha, fecha(9));
        assert_eq!(creado.vinculacion.sistema_id, Some(creado.sistema.id));
        assert_eq!(creado.vinculacion.estado, MatchEstado::Manual);

        // a second attempt must not create a duplicate movement
        let result = manager
            .crear_movimiento_faltante(&periodo(), CrearMovimientoParams::new(3))
            .await;
        assert!(matches!(result, Err(ConciliacionError::InvalidTransition(_))));
        assert_eq!(manager.storage.list_sistema(&periodo()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let mut manager = VinculacionManager::new(store());
        manager.ejecutar_matching(&periodo()).await.unwrap();

        let resultado = manager
            .crear_movimientos_lote(
                &periodo(),
                vec![
                    CrearMovimientoParams::new(1),
                    CrearMovimientoParams::new(404),
                    CrearMovimientoParams::new(3),
                ],
            )
            .await
            .unwrap();

        assert_eq!(resultado.total_creados(), 1);
        assert_eq!(resultado.creados[0].vinculacion.extracto_id, 3);
        assert_eq!(resultado.errores.len(), 2);
        assert_eq!(resultado.errores[0].extracto_id, 1);
        assert_eq!(resultado.errores[1].extracto_id, 404);
    }

    #[tokio::test]
    async fn test_bulk_approval() {
        let mut manager = VinculacionManager::new(store());
        manager.ejecutar_matching(&periodo()).await.unwrap();

        let aprobados = manager.aprobar_todos_probables(&periodo(), Some(0.99)).await.unwrap();
        assert_eq!(aprobados, 0);

        let aprobados = manager.aprobar_todos_probables(&periodo(), None).await.unwrap();
        assert_eq!(aprobados, 1);
        let vinculacion = manager.storage.get_vinculacion(&periodo(), 2).await.unwrap().unwrap();
        assert_eq!(vinculacion.estado, MatchEstado::Ok);
    }

    #[tokio::test]
    async fn test_desvincular_todo() {
        let mut manager = VinculacionManager::new(store());
        manager.ejecutar_matching(&periodo()).await.unwrap();

        assert_eq!(manager.desvincular_todo(&periodo()).await.unwrap(), 3);
        assert_eq!(manager.desvincular_todo(&periodo()).await.unwrap(), 0);
        assert!(manager.storage.list_vinculaciones(&periodo()).await.unwrap().is_empty());
    }

    /// Store whose first link write fails
    #[derive(Clone)]
    struct FlakyStore {
        inner: MemoryStore,
        fallar: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait::async_trait]
    impl RecordStore for FlakyStore {
        async fn list_extractos(&self, p: &Periodo) -> ConciliacionResult<Vec<ExtractoRecord>> {
            self.inner.list_extractos(p).await
        }

        async fn list_sistema(&self, p: &Periodo) -> ConciliacionResult<Vec<SistemaRecord>> {
            self.inner.list_sistema(p).await
        }

        async fn get_extracto(
            &self,
            p: &Periodo,
            id: RecordId,
        ) -> ConciliacionResult<Option<ExtractoRecord>> {
            self.inner.get_extracto(p, id).await
        }

        async fn get_sistema(
            &self,
            p: &Periodo,
            id: RecordId,
        ) -> ConciliacionResult<Option<SistemaRecord>> {
            self.inner.get_sistema(p, id).await
        }

        async fn crear_movimiento_sistema(
            &mut self,
            p: &Periodo,
            movimiento: &NuevoMovimientoSistema,
        ) -> ConciliacionResult<SistemaRecord> {
            self.inner.crear_movimiento_sistema(p, movimiento).await
        }

        async fn list_vinculaciones(&self, p: &Periodo) -> ConciliacionResult<Vec<Vinculacion>> {
            self.inner.list_vinculaciones(p).await
        }

        async fn get_vinculacion(
            &self,
            p: &Periodo,
            id: RecordId,
        ) -> ConciliacionResult<Option<Vinculacion>> {
            self.inner.get_vinculacion(p, id).await
        }

        async fn save_vinculacion(
            &mut self,
            p: &Periodo,
            vinculacion: &Vinculacion,
        ) -> ConciliacionResult<Vinculacion> {
            if self.fallar.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(ConciliacionError::Storage("transient".to_string()));
            }
            self.inner.save_vinculacion(p, vinculacion).await
        }

        async fn delete_vinculacion(&mut self, p: &Periodo, id: RecordId) -> ConciliacionResult<bool> {
            self.inner.delete_vinculacion(p, id).await
        }

        async fn delete_vinculaciones(&mut self, p: &Periodo) -> ConciliacionResult<usize> {
            self.inner.delete_vinculaciones(p).await
        }

        async fn get_conciliacion(&self, p: &Periodo) -> ConciliacionResult<Option<Conciliacion>> {
            self.inner.get_conciliacion(p).await
        }

        async fn save_conciliacion(&mut self, conciliacion: &Conciliacion) -> ConciliacionResult<()> {
            self.inner.save_conciliacion(conciliacion).await
        }

        async fn get_configuracion(&self) -> ConciliacionResult<Option<ConfiguracionMatching>> {
            self.inner.get_configuracion().await
        }

        async fn save_configuracion(
            &mut self,
            config: &ConfiguracionMatching,
        ) -> ConciliacionResult<()> {
            self.inner.save_configuracion(config).await
        }
    }

    #[tokio::test]
    async fn test_retry_after_failed_link_write_reuses_movement() {
        let flaky = FlakyStore {
            inner: store(),
            fallar: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
        };
        let mut manager = VinculacionManager::new(flaky);

        let first = manager
            .crear_movimiento_faltante(&periodo(), CrearMovimientoParams::new(3))
            .await;
        assert!(matches!(first, Err(ConciliacionError::Storage(_))));
        assert_eq!(manager.storage.list_sistema(&periodo()).await.unwrap().len(), 3);

        let retry = manager
            .crear_movimiento_faltante(&periodo(), CrearMovimientoParams::new(3))
            .await
            .unwrap();
        assert_eq!(retry.vinculacion.sistema_id, Some(retry.sistema.id));
        assert_eq!(retry.vinculacion.estado, MatchEstado::Manual);
        assert_eq!(manager.storage.list_sistema(&periodo()).await.unwrap().len(), 3);
    }
}
