use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Rows every seeded knowledge base must contain, as `(table, id)` pairs.
const SEED_ROWS: &[(&str, i64)] = &[
    ("boiler_models", 9001),
    ("boiler_models", 9004),
    ("boiler_manuals", 9101),
    ("boiler_manuals", 9103),
    ("boiler_fault_codes", 9201),
    ("boiler_fault_codes", 9205),
    ("boiler_components", 9301),
    ("diagnostic_symptoms", 9401),
    ("diagnostic_procedures", 9501),
    ("symptom_fault_relationships", 9601),
    ("knowledge_base", 9701),
    ("repair_histories", 9801),
];

/// Seeded tables, children before parents so cleaning respects foreign keys.
const SEED_TABLES: &[&str] = &[
    "symptom_fault_relationships",
    "repair_histories",
    "knowledge_base",
    "diagnostic_procedures",
    "diagnostic_symptoms",
    "boiler_components",
    "boiler_fault_codes",
    "boiler_manuals",
    "boiler_models",
];

/// Fault codes with the manual that documents them, used by smoke checks.
pub const SEED_FAULT_CODES: &[SeedFaultCode] = &[
    SeedFaultCode {
        manufacturer: "Ideal",
        model_name: "Logic Combi 30",
        fault_code: "F1",
        description: "Low system water pressure",
        step_count: 3,
    },
    SeedFaultCode {
        manufacturer: "Ideal",
        model_name: "Logic Combi 30",
        fault_code: "L2",
        description: "Ignition lockout after five attempts",
        step_count: 3,
    },
    SeedFaultCode {
        manufacturer: "Worcester Bosch",
        model_name: "Greenstar 30i",
        fault_code: "EA",
        description: "Flame not detected",
        step_count: 2,
    },
    SeedFaultCode {
        manufacturer: "Vaillant",
        model_name: "ecoTEC plus 832",
        fault_code: "F28",
        description: "Ignition failure on start-up",
        step_count: 1,
    },
    SeedFaultCode {
        manufacturer: "Baxi",
        model_name: "600 Combi 2 24",
        fault_code: "E119",
        description: "Water pressure switch not operated",
        step_count: 2,
    },
];

/// Deterministic knowledge base: a handful of boilers with fault codes,
/// manuals, procedures and one regulation note.
pub struct KnowledgeSeedDataset;

impl KnowledgeSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/knowledge_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult { fault_codes_seeded: SEED_FAULT_CODES.len(), tables: SEED_TABLES.to_vec() })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::with_capacity(SEED_ROWS.len());
        for (table, id) in SEED_ROWS {
            // Table names are compile-time constants.
            let present: i64 =
                sqlx::query_scalar(&format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?)"))
                    .bind(id)
                    .fetch_one(pool)
                    .await?;
            checks.push((format!("{table}#{id}"), present == 1));
        }

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes seeded rows only; anything an operator added stays.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        for table in SEED_TABLES {
            sqlx::query(&format!("DELETE FROM {table} WHERE id BETWEEN 9000 AND 9999"))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedFaultCode {
    pub manufacturer: &'static str,
    pub model_name: &'static str,
    pub fault_code: &'static str,
    pub description: &'static str,
    pub step_count: usize,
}

#[derive(Debug)]
pub struct SeedResult {
    pub fault_codes_seeded: usize,
    pub tables: Vec<&'static str>,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}
