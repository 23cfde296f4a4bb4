//! Candidate selection and greedy one-to-one assignment

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::config::ConfiguracionMatching;
use crate::matching::classifier::vinculacion_automatica;
use crate::matching::scorer::{dias_diferencia, score};
use crate::types::*;

/// A scored (extracto, sistema) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidato {
    pub extracto_id: RecordId,
    pub sistema_id: RecordId,
    pub score: MatchCandidateScore,
    /// Absolute date distance in days
    pub dias: i64,
}

impl Candidato {
    /// Ranking order: best first
    ///
    /// Higher total, then higher value score, then closer date, then lower
    /// sistema id, then lower extracto id.
    pub fn ranking(&self, other: &Self) -> Ordering {
        other
            .score
            .score_total
            .total_cmp(&self.score.score_total)
            .then_with(|| other.score.score_valor.total_cmp(&self.score.score_valor))
            .then_with(|| self.dias.cmp(&other.dias))
            .then_with(|| self.sistema_id.cmp(&other.sistema_id))
            .then_with(|| self.extracto_id.cmp(&other.extracto_id))
    }
}

/// Links of one period, one per extracto record, ordered by extracto id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchSet {
    pub vinculaciones: Vec<Vinculacion>,
}

impl MatchSet {
    /// Build from links in any order
    pub fn new(mut vinculaciones: Vec<Vinculacion>) -> Self {
        vinculaciones.sort_by_key(|v| v.extracto_id);
        Self { vinculaciones }
    }

    /// Link of one extracto record
    pub fn get(&self, extracto_id: RecordId) -> Option<&Vinculacion> {
        self.vinculaciones
            .binary_search_by_key(&extracto_id, |v| v.extracto_id)
            .ok()
            .map(|i| &self.vinculaciones[i])
    }

    /// Number of links in the given state
    pub fn contar(&self, estado: MatchEstado) -> usize {
        self.vinculaciones
            .iter()
            .filter(|v| v.estado == estado)
            .count()
    }

    pub fn len(&self) -> usize {
        self.vinculaciones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vinculaciones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vinculacion> {
        self.vinculaciones.iter()
    }
}

/// Whether a pair may be considered a candidate at all
fn es_elegible(score: &MatchCandidateScore, config: &ConfiguracionMatching) -> bool {
    score.score_valor > 0.0 || score.score_descripcion >= config.similitud_descripcion_minima
}

/// Rank every eligible sistema record for one extracto record
pub fn candidatos_para(
    extracto: &ExtractoRecord,
    sistemas: &[SistemaRecord],
    config: &ConfiguracionMatching,
) -> Vec<Candidato> {
    let mut candidatos: Vec<Candidato> = sistemas
        .iter()
        .map(|sistema| Candidato {
            extracto_id: extracto.id,
            sistema_id: sistema.id,
            score: score(extracto, sistema, config),
            dias: dias_diferencia(extracto.fecha, sistema.fecha),
        })
        .filter(|c| es_elegible(&c.score, config))
        .collect();

    candidatos.sort_by(Candidato::ranking);
    candidatos
}

/// Match extracto records against sistema records
///
/// Links in `existentes` that a run must not touch (MANUAL, IGNORADO,
/// confirmed OK) are carried over as they are, and the sistema records
/// they hold are removed from the pool. Every other extracto record is
/// matched afresh: records are visited by the total of their best
/// candidate, highest first (ties by lower extracto id), and each one takes
/// its best sistema record still in the pool. Input order does not affect
/// the result.
pub fn emparejar(
    extractos: &[ExtractoRecord],
    sistemas: &[SistemaRecord],
    existentes: &[Vinculacion],
    config: &ConfiguracionMatching,
) -> MatchSet {
    let extracto_ids: HashSet<RecordId> = extractos.iter().map(|e| e.id).collect();

    let preservadas: BTreeMap<RecordId, &Vinculacion> = existentes
        .iter()
        .filter(|v| v.is_preservada() && extracto_ids.contains(&v.extracto_id))
        .map(|v| (v.extracto_id, v))
        .collect();

    let sistema_usados: HashSet<RecordId> = preservadas
        .values()
        .filter(|v| v.estado != MatchEstado::Ignorado)
        .filter_map(|v| v.sistema_id)
        .collect();

    let mut pool: Vec<SistemaRecord> = sistemas
        .iter()
        .filter(|s| !sistema_usados.contains(&s.id))
        .cloned()
        .collect();
    pool.sort_by_key(|s| s.id);

    let mut pendientes: Vec<(&ExtractoRecord, f64)> = extractos
        .iter()
        .filter(|e| !preservadas.contains_key(&e.id))
        .map(|e| {
            let mejor = candidatos_para(e, &pool, config)
                .first()
                .map_or(f64::NEG_INFINITY, |c| c.score.score_total);
            (e, mejor)
        })
        .collect();
    pendientes.sort_by(|(a, mejor_a), (b, mejor_b)| {
        mejor_b.total_cmp(mejor_a).then_with(|| a.id.cmp(&b.id))
    });

    let mut vinculaciones: Vec<Vinculacion> = preservadas.into_values().cloned().collect();
    for (extracto, _) in pendientes {
        let elegido = candidatos_para(extracto, &pool, config)
            .into_iter()
            .next()
            .filter(|c| c.score.score_total >= config.score_minimo_probable);

        let vinculacion = match elegido {
            Some(candidato) => {
                pool.retain(|s| s.id != candidato.sistema_id);
                vinculacion_automatica(
                    candidato.extracto_id,
                    candidato.sistema_id,
                    candidato.score,
                    config,
                )
            }
            None => Vinculacion::sin_match(extracto.id),
        };
        vinculaciones.push(vinculacion);
    }

    MatchSet::new(vinculaciones)
}
