//! One-way period lock: PENDIENTE to CONCILIADO

use tracing::{info, warn};

use crate::reconciliation::integrity::PeriodIntegrity;
use crate::traits::*;
use crate::types::*;

/// Gatekeeper of period mutability
pub struct PeriodLock<S: RecordStore> {
    pub(crate) storage: S,
}

impl<S: RecordStore> PeriodLock<S> {
    /// Create a new period lock over the given storage
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Current closing record, `PENDIENTE` when none was stored yet
    pub async fn estado(&self, periodo: &Periodo) -> ConciliacionResult<Conciliacion> {
        Ok(self
            .storage
            .get_conciliacion(periodo)
            .await?
            .unwrap_or_else(|| Conciliacion::pendiente(*periodo)))
    }

    /// Closing record of the period, stored on first access
    pub async fn obtener_o_crear(&mut self, periodo: &Periodo) -> ConciliacionResult<Conciliacion> {
        if let Some(existing) = self.storage.get_conciliacion(periodo).await? {
            return Ok(existing);
        }

        let conciliacion = Conciliacion::pendiente(*periodo);
        self.storage.save_conciliacion(&conciliacion).await?;
        Ok(conciliacion)
    }

    /// Fail with `PeriodLocked` once the period is closed
    pub async fn asegurar_abierto(&self, periodo: &Periodo) -> ConciliacionResult<()> {
        if self.estado(periodo).await?.is_cerrada() {
            warn!(%periodo, "mutation rejected on closed period");
            return Err(ConciliacionError::PeriodLocked(*periodo));
        }
        Ok(())
    }

    /// Close the period when every integrity requirement holds
    ///
    /// Closing an already closed period returns the stored record.
    pub async fn cerrar(
        &mut self,
        periodo: &Periodo,
        integridad: &PeriodIntegrity,
    ) -> ConciliacionResult<Conciliacion> {
        let mut conciliacion = self.obtener_o_crear(periodo).await?;
        if conciliacion.is_cerrada() {
            return Ok(conciliacion);
        }

        if !integridad.es_cuadrado() {
            let fallidos = integridad.fallidos();
            warn!(%periodo, ?fallidos, "period closing refused");
            return Err(ConciliacionError::PeriodNotBalanced {
                periodo: *periodo,
                fallidos,
            });
        }

        conciliacion.estado = ConciliacionEstado::Conciliado;
        conciliacion.cerrado_en = Some(chrono::Utc::now().naive_utc());
        self.storage.save_conciliacion(&conciliacion).await?;

        info!(%periodo, "period closed");
        Ok(conciliacion)
    }
}
