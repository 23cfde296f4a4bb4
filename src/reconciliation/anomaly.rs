//! Detection of sistema records linked to more than one statement line

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::types::*;

/// Statement line taking part in a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractoConflicto {
    pub extracto_id: RecordId,
    pub descripcion: Option<String>,
    pub valor: Option<BigDecimal>,
    pub fecha: Option<NaiveDate>,
    pub estado: MatchEstado,
}

/// One sistema record claimed by several extracto records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasoUnoAMuchos {
    pub sistema_id: RecordId,
    /// `None` when the record is no longer in the period scope
    pub sistema: Option<SistemaRecord>,
    pub extractos: Vec<ExtractoConflicto>,
    pub num_vinculaciones: usize,
}

/// Outcome of reopening every conflicting group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumenInvalidacion {
    pub vinculaciones_eliminadas: usize,
    pub movimientos_sistema_afectados: usize,
    pub extractos_ahora_sin_match: usize,
}

/// Group non-ignored links by sistema id and report every group with more
/// than one distinct extracto record, ordered by sistema id
pub fn detectar_uno_a_muchos(
    vinculaciones: &[Vinculacion],
    extractos: &[ExtractoRecord],
    sistemas: &[SistemaRecord],
) -> Vec<CasoUnoAMuchos> {
    let mut grupos: BTreeMap<RecordId, BTreeMap<RecordId, MatchEstado>> = BTreeMap::new();
    for vinculacion in vinculaciones {
        if vinculacion.estado == MatchEstado::Ignorado {
            continue;
        }
        if let Some(sistema_id) = vinculacion.sistema_id {
            grupos
                .entry(sistema_id)
                .or_default()
                .insert(vinculacion.extracto_id, vinculacion.estado);
        }
    }

    let extractos_por_id: HashMap<RecordId, &ExtractoRecord> =
        extractos.iter().map(|e| (e.id, e)).collect();
    let sistemas_por_id: HashMap<RecordId, &SistemaRecord> =
        sistemas.iter().map(|s| (s.id, s)).collect();

    grupos
        .into_iter()
        .filter(|(_, miembros)| miembros.len() > 1)
        .map(|(sistema_id, miembros)| {
            let extractos: Vec<ExtractoConflicto> = miembros
                .into_iter()
                .map(|(extracto_id, estado)| {
                    let extracto = extractos_por_id.get(&extracto_id);
                    ExtractoConflicto {
                        extracto_id,
                        descripcion: extracto.map(|e| e.descripcion.clone()),
                        valor: extracto.map(|e| e.valor.clone()),
                        fecha: extracto.map(|e| e.fecha),
                        estado,
                    }
                })
                .collect();

            CasoUnoAMuchos {
                sistema_id,
                sistema: sistemas_por_id.get(&sistema_id).map(|s| (*s).clone()),
                num_vinculaciones: extractos.len(),
                extractos,
            }
        })
        .collect()
}

/// Every extracto record that must be reopened to clear the given cases
pub fn extractos_a_reabrir(casos: &[CasoUnoAMuchos]) -> BTreeSet<RecordId> {
    casos
        .iter()
        .flat_map(|caso| caso.extractos.iter().map(|e| e.extracto_id))
        .collect()
}
