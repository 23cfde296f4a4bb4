//! Period-level closure readiness

use bigdecimal::{BigDecimal, Signed};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::*;

/// Largest absolute difference between totals still considered balanced
pub fn epsilon_balance() -> BigDecimal {
    BigDecimal::from(1)
}

/// Aggregated figures of one period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstadisticasConciliacion {
    pub total_extracto: usize,
    pub total_sistema: usize,
    pub sin_match: usize,
    pub probable: usize,
    pub ok: usize,
    pub manual: usize,
    pub ignorado: usize,
    /// Sum of positive extracto amounts
    pub ingresos_extracto: BigDecimal,
    /// Sum of negative extracto amounts
    pub egresos_extracto: BigDecimal,
    pub ingresos_sistema: BigDecimal,
    pub egresos_sistema: BigDecimal,
    /// Sistema records no active link points to
    pub sistema_sin_vincular: usize,
}

impl EstadisticasConciliacion {
    /// Aggregate a period; extracto records without a link count as SIN_MATCH
    pub fn calcular(
        extractos: &[ExtractoRecord],
        sistemas: &[SistemaRecord],
        vinculaciones: &[Vinculacion],
    ) -> Self {
        let por_extracto: HashMap<RecordId, &Vinculacion> =
            vinculaciones.iter().map(|v| (v.extracto_id, v)).collect();

        let mut stats = Self {
            total_extracto: extractos.len(),
            total_sistema: sistemas.len(),
            ..Self::default()
        };

        for extracto in extractos {
            let estado = por_extracto
                .get(&extracto.id)
                .map(|v| v.estado)
                .unwrap_or(MatchEstado::SinMatch);
            match estado {
                MatchEstado::SinMatch => stats.sin_match += 1,
                MatchEstado::Probable => stats.probable += 1,
                MatchEstado::Ok => stats.ok += 1,
                MatchEstado::Manual => stats.manual += 1,
                MatchEstado::Ignorado => stats.ignorado += 1,
            }

            if extracto.valor.is_positive() {
                stats.ingresos_extracto += &extracto.valor;
            } else {
                stats.egresos_extracto += &extracto.valor;
            }
        }

        for sistema in sistemas {
            if sistema.valor.is_positive() {
                stats.ingresos_sistema += &sistema.valor;
            } else {
                stats.egresos_sistema += &sistema.valor;
            }
        }

        stats.sistema_sin_vincular = sistemas
            .iter()
            .filter(|s| {
                !vinculaciones.iter().any(|v| {
                    v.sistema_id == Some(s.id) && v.estado != MatchEstado::Ignorado
                })
            })
            .count();

        stats
    }

    /// Extracto records in OK or MANUAL
    pub fn resueltos(&self) -> usize {
        self.ok + self.manual
    }

    /// Extracto records in SIN_MATCH or PROBABLE
    pub fn pendientes(&self) -> usize {
        self.sin_match + self.probable
    }

    /// Share of extracto records fully resolved, in [0, 1]
    pub fn porcentaje_conciliado(&self) -> f64 {
        if self.total_extracto == 0 {
            return 1.0;
        }
        self.resueltos() as f64 / self.total_extracto as f64
    }
}

/// The six closing requirements of a period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodIntegrity {
    pub balance_ingresos: bool,
    pub balance_egresos: bool,
    pub igualdad_registros: bool,
    pub todo_vinculado: bool,
    pub sin_pendientes: bool,
    pub relacion_1_a_1: bool,
}

impl PeriodIntegrity {
    /// Evaluate the requirements from aggregated figures and the number of
    /// one-to-many cases found
    pub fn evaluar(stats: &EstadisticasConciliacion, casos_uno_a_muchos: usize) -> Self {
        let epsilon = epsilon_balance();
        let cuadra = |a: &BigDecimal, b: &BigDecimal| (a - b).abs() < epsilon;

        Self {
            balance_ingresos: cuadra(&stats.ingresos_extracto, &stats.ingresos_sistema),
            balance_egresos: cuadra(&stats.egresos_extracto, &stats.egresos_sistema),
            igualdad_registros: stats.total_extracto == stats.total_sistema,
            todo_vinculado: stats.resueltos() == stats.total_extracto,
            sin_pendientes: stats.pendientes() == 0,
            relacion_1_a_1: casos_uno_a_muchos == 0,
        }
    }

    /// All six requirements hold
    pub fn es_cuadrado(&self) -> bool {
        self.balance_ingresos
            && self.balance_egresos
            && self.igualdad_registros
            && self.todo_vinculado
            && self.sin_pendientes
            && self.relacion_1_a_1
    }

    /// Names of the requirements that do not hold
    pub fn fallidos(&self) -> Vec<String> {
        [
            ("balance_ingresos", self.balance_ingresos),
            ("balance_egresos", self.balance_egresos),
            ("igualdad_registros", self.igualdad_registros),
            ("todo_vinculado", self.todo_vinculado),
            ("sin_pendientes", self.sin_pendientes),
            ("relacion_1_a_1", self.relacion_1_a_1),
        ]
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(nombre, _)| nombre.to_string())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn fecha() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
    }

    fn ok(extracto_id: RecordId, sistema_id: RecordId) -> Vinculacion {
        Vinculacion::con_candidato(
            extracto_id,
            sistema_id,
            MatchEstado::Ok,
            MatchCandidateScore::default(),
        )
    }

    #[test]
    fn test_balanced_period() {
        let extractos = vec![
            ExtractoRecord::new(1, fecha(), "ABONO", BigDecimal::from(1000)),
            ExtractoRecord::new(2, fecha(), "CARGO", BigDecimal::from(-400)),
        ];
        let sistemas = vec![
            SistemaRecord::new(10, fecha(), "ABONO", BigDecimal::from_str("1000.40").unwrap()),
            SistemaRecord::new(11, fecha(), "CARGO", BigDecimal::from(-400)),
        ];
        let vinculaciones = vec![ok(1, 10), ok(2, 11)];

        let stats = EstadisticasConciliacion::calcular(&extractos, &sistemas, &vinculaciones);
        assert_eq!(stats.ok, 2);
        assert_eq!(stats.sistema_sin_vincular, 0);
        assert_eq!(stats.egresos_extracto, BigDecimal::from(-400));

        let integrity = PeriodIntegrity::evaluar(&stats, 0);
        assert!(integrity.es_cuadrado());
        assert!(integrity.fallidos().is_empty());
    }

    #[test]
    fn test_pending_records_fail() {
        let extractos = vec![
            ExtractoRecord::new(1, fecha(), "ABONO", BigDecimal::from(1000)),
            ExtractoRecord::new(2, fecha(), "ABONO", BigDecimal::from(500)),
        ];
        let sistemas = vec![
            SistemaRecord::new(10, fecha(), "ABONO", BigDecimal::from(1000)),
            SistemaRecord::new(11, fecha(), "ABONO", BigDecimal::from(500)),
        ];
        let vinculaciones = vec![ok(1, 10)];

        let stats = EstadisticasConciliacion::calcular(&extractos, &sistemas, &vinculaciones);
        assert_eq!(stats.sin_match, 1);
        assert_eq!(stats.sistema_sin_vincular, 1);
        assert_eq!(stats.porcentaje_conciliado(), 0.5);

        let integrity = PeriodIntegrity::evaluar(&stats, 0);
        assert!(integrity.balance_ingresos);
        assert!(integrity.igualdad_registros);
        assert!(!integrity.todo_vinculado);
        assert!(!integrity.sin_pendientes);
        assert!(!integrity.es_cuadrado());
        assert_eq!(integrity.fallidos(), vec!["todo_vinculado", "sin_pendientes"]);
    }

    #[test]
    fn test_unbalanced_totals_and_anomalies() {
        let extractos = vec![ExtractoRecord::new(1, fecha(), "ABONO", BigDecimal::from(1000))];
        let sistemas = vec![SistemaRecord::new(10, fecha(), "ABONO", BigDecimal::from(1002))];
        let vinculaciones = vec![ok(1, 10)];

        let stats = EstadisticasConciliacion::calcular(&extractos, &sistemas, &vinculaciones);
        let integrity = PeriodIntegrity::evaluar(&stats, 1);
        assert!(!integrity.balance_ingresos);
        assert!(integrity.balance_egresos);
        assert!(!integrity.relacion_1_a_1);
        assert!(!integrity.es_cuadrado());
    }

    #[test]
    fn test_empty_period_is_balanced() {
        let stats = EstadisticasConciliacion::calcular(&[], &[], &[]);
        assert!(PeriodIntegrity::evaluar(&stats, 0).es_cuadrado());
        assert_eq!(stats.porcentaje_conciliado(), 1.0);
    }
}
