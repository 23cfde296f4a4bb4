//! Core types and data structures for the reconciliation engine

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of an extracto or sistema record
pub type RecordId = i64;

/// Accounting period of one bank account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Periodo {
    /// Bank account the period belongs to
    pub cuenta_id: i64,
    pub year: i32,
    /// Month number, 1 to 12
    pub month: u32,
}

impl Periodo {
    /// Create a new period
    pub fn new(cuenta_id: i64, year: i32, month: u32) -> Self {
        Self {
            cuenta_id,
            year,
            month,
        }
    }

    /// First day of the period
    pub fn inicio(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Last day of the period
    pub fn fin(&self) -> Option<NaiveDate> {
        let (year, month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1).and_then(|d| d.pred_opt())
    }
}

impl fmt::Display for Periodo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cuenta {} {}-{:02}", self.cuenta_id, self.year, self.month)
    }
}

/// Bank-issued statement line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractoRecord {
    pub id: RecordId,
    pub fecha: NaiveDate,
    pub descripcion: String,
    pub referencia: Option<String>,
    /// Signed amount in the account currency
    pub valor: BigDecimal,
    /// Foreign-currency amount, if any
    pub usd: Option<BigDecimal>,
    /// Exchange rate already applied to `usd`
    pub trm: Option<BigDecimal>,
}

impl ExtractoRecord {
    /// Create a new extracto record without foreign-currency data
    pub fn new(id: RecordId, fecha: NaiveDate, descripcion: &str, valor: BigDecimal) -> Self {
        Self {
            id,
            fecha,
            descripcion: descripcion.to_string(),
            referencia: None,
            valor,
            usd: None,
            trm: None,
        }
    }
}

/// Internal ledger movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SistemaRecord {
    pub id: RecordId,
    pub fecha: NaiveDate,
    pub descripcion: String,
    pub referencia: Option<String>,
    pub valor: BigDecimal,
    pub usd: Option<BigDecimal>,
    pub trm: Option<BigDecimal>,
    pub tercero_id: Option<i64>,
    pub centro_costo_id: Option<i64>,
    pub concepto_id: Option<i64>,
}

impl SistemaRecord {
    /// Create a new sistema record without classification data
    pub fn new(id: RecordId, fecha: NaiveDate, descripcion: &str, valor: BigDecimal) -> Self {
        Self {
            id,
            fecha,
            descripcion: descripcion.to_string(),
            referencia: None,
            valor,
            usd: None,
            trm: None,
            tercero_id: None,
            centro_costo_id: None,
            concepto_id: None,
        }
    }
}

/// Data needed to materialize a missing sistema movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NuevoMovimientoSistema {
    pub fecha: NaiveDate,
    pub descripcion: String,
    pub referencia: Option<String>,
    pub valor: BigDecimal,
    pub usd: Option<BigDecimal>,
    pub trm: Option<BigDecimal>,
}

impl NuevoMovimientoSistema {
    /// Mirror an extracto record, optionally overriding its description
    pub fn desde_extracto(extracto: &ExtractoRecord, descripcion: Option<String>) -> Self {
        Self {
            fecha: extracto.fecha,
            descripcion: descripcion.unwrap_or_else(|| extracto.descripcion.clone()),
            referencia: extracto.referencia.clone(),
            valor: extracto.valor.clone(),
            usd: extracto.usd.clone(),
            trm: extracto.trm.clone(),
        }
    }
}

/// Per-field similarity between one extracto and one sistema record
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchCandidateScore {
    pub score_fecha: f64,
    pub score_valor: f64,
    pub score_descripcion: f64,
    pub score_total: f64,
}

/// Match state of one extracto record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchEstado {
    /// No qualifying sistema record
    SinMatch,
    /// Automatic candidate below the auto-approve threshold
    Probable,
    /// High-confidence or approved match
    Ok,
    /// Linked explicitly by a user
    Manual,
    /// Excluded from reconciliation by a user
    Ignorado,
}

impl MatchEstado {
    /// Whether the record counts as fully resolved for closing
    pub fn is_resuelto(&self) -> bool {
        matches!(self, MatchEstado::Ok | MatchEstado::Manual)
    }

    /// Whether the record still needs attention
    pub fn is_pendiente(&self) -> bool {
        matches!(self, MatchEstado::SinMatch | MatchEstado::Probable)
    }

    /// Whether a transition from `self` to `destino` is legal
    pub fn puede_transicionar(&self, destino: MatchEstado) -> bool {
        match (self, destino) {
            (_, MatchEstado::Ignorado) | (_, MatchEstado::SinMatch) => true,
            (MatchEstado::Ignorado, _) => false,
            (_, MatchEstado::Manual) => true,
            (MatchEstado::SinMatch, MatchEstado::Probable)
            | (MatchEstado::SinMatch, MatchEstado::Ok)
            | (MatchEstado::Probable, MatchEstado::Ok) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MatchEstado {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MatchEstado::SinMatch => "SIN_MATCH",
            MatchEstado::Probable => "PROBABLE",
            MatchEstado::Ok => "OK",
            MatchEstado::Manual => "MANUAL",
            MatchEstado::Ignorado => "IGNORADO",
        };
        f.write_str(label)
    }
}

/// Link between one extracto record and zero or one sistema record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vinculacion {
    /// Assigned by the record store on first save
    pub id: Option<Uuid>,
    pub extracto_id: RecordId,
    pub sistema_id: Option<RecordId>,
    pub estado: MatchEstado,
    pub score_fecha: f64,
    pub score_valor: f64,
    pub score_descripcion: f64,
    pub score_total: f64,
    pub confirmado_por_usuario: bool,
    pub created_by: Option<String>,
    pub notas: Option<String>,
    pub updated_at: NaiveDateTime,
}

impl Vinculacion {
    /// Unmatched record with zeroed scores
    pub fn sin_match(extracto_id: RecordId) -> Self {
        Self {
            id: None,
            extracto_id,
            sistema_id: None,
            estado: MatchEstado::SinMatch,
            score_fecha: 0.0,
            score_valor: 0.0,
            score_descripcion: 0.0,
            score_total: 0.0,
            confirmado_por_usuario: false,
            created_by: None,
            notas: None,
            updated_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Link to a sistema record with the given state and scores
    pub fn con_candidato(
        extracto_id: RecordId,
        sistema_id: RecordId,
        estado: MatchEstado,
        score: MatchCandidateScore,
    ) -> Self {
        let mut vinculacion = Self::sin_match(extracto_id);
        vinculacion.sistema_id = Some(sistema_id);
        vinculacion.estado = estado;
        vinculacion.set_score(score);
        vinculacion
    }

    /// Copy the scores into the link
    pub fn set_score(&mut self, score: MatchCandidateScore) {
        self.score_fecha = score.score_fecha;
        self.score_valor = score.score_valor;
        self.score_descripcion = score.score_descripcion;
        self.score_total = score.score_total;
    }

    /// Scores embedded in the link
    pub fn score(&self) -> MatchCandidateScore {
        MatchCandidateScore {
            score_fecha: self.score_fecha,
            score_valor: self.score_valor,
            score_descripcion: self.score_descripcion,
            score_total: self.score_total,
        }
    }

    /// Whether a matching run must leave this link untouched
    pub fn is_preservada(&self) -> bool {
        match self.estado {
            MatchEstado::Manual | MatchEstado::Ignorado => true,
            MatchEstado::Ok => self.confirmado_por_usuario,
            MatchEstado::SinMatch | MatchEstado::Probable => false,
        }
    }

    /// Reset to the unmatched state, keeping identity
    pub fn reset(&mut self) {
        self.sistema_id = None;
        self.estado = MatchEstado::SinMatch;
        self.set_score(MatchCandidateScore::default());
        self.confirmado_por_usuario = false;
        self.notas = None;
        self.touch();
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// Closing state of a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConciliacionEstado {
    Pendiente,
    Conciliado,
}

/// Reconciliation record of one account period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conciliacion {
    pub periodo: Periodo,
    pub estado: ConciliacionEstado,
    pub cerrado_en: Option<NaiveDateTime>,
}

impl Conciliacion {
    /// Open period
    pub fn pendiente(periodo: Periodo) -> Self {
        Self {
            periodo,
            estado: ConciliacionEstado::Pendiente,
            cerrado_en: None,
        }
    }

    pub fn is_cerrada(&self) -> bool {
        self.estado == ConciliacionEstado::Conciliado
    }
}

/// Errors that can occur in the reconciliation engine
#[derive(Debug, thiserror::Error)]
pub enum ConciliacionError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Period is locked: {0}")]
    PeriodLocked(Periodo),
    #[error("Period is not balanced: {periodo} (failed checks: {})", .fallidos.join(", "))]
    PeriodNotBalanced {
        periodo: Periodo,
        fallidos: Vec<String>,
    },
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type for reconciliation operations
pub type ConciliacionResult<T> = Result<T, ConciliacionError>;
