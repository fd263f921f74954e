//! Read-only reference data access: parts pricing and policy records.

use async_trait::async_trait;
use claim_flow::{ClaimError, PartPrice, PartsStore, Policy, PolicyStatus, PolicyStore, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    Ok(pool)
}

#[derive(FromRow)]
struct PartRow {
    make: String,
    model: String,
    year_start: i32,
    year_end: i32,
    part_name: String,
    price_tokunbo: i64,
    price_new: i64,
    labor_cost: i64,
}

impl From<PartRow> for PartPrice {
    fn from(row: PartRow) -> Self {
        PartPrice {
            make: row.make,
            model: row.model,
            year_start: row.year_start,
            year_end: row.year_end,
            part_name: row.part_name,
            price_tokunbo: row.price_tokunbo,
            price_new: row.price_new,
            labor_cost: row.labor_cost,
        }
    }
}

pub struct PostgresPartsStore {
    pool: PgPool,
}

impl PostgresPartsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PartsStore for PostgresPartsStore {
    async fn find_parts(
        &self,
        make: &str,
        model: &str,
        year: Option<i32>,
    ) -> Result<Vec<PartPrice>> {
        let rows: Vec<PartRow> = match year {
            Some(year) => {
                sqlx::query_as::<_, PartRow>(
                    "SELECT make, model, year_start, year_end, part_name, \
                            price_tokunbo, price_new, labor_cost \
                     FROM parts \
                     WHERE make = $1 AND model = $2 \
                       AND year_start <= $3 AND year_end >= $3",
                )
                .bind(make)
                .bind(model)
                .bind(year)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, PartRow>(
                    "SELECT make, model, year_start, year_end, part_name, \
                            price_tokunbo, price_new, labor_cost \
                     FROM parts \
                     WHERE make = $1 AND model = $2",
                )
                .bind(make)
                .bind(model)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| ClaimError::Upstream(format!("parts lookup failed: {e}")))?;

        Ok(rows.into_iter().map(PartPrice::from).collect())
    }
}

#[derive(FromRow)]
struct PolicyRow {
    plate_number: String,
    owner_name: String,
    insurance_company: String,
    expiry_date: chrono::NaiveDate,
    status: String,
}

impl TryFrom<PolicyRow> for Policy {
    type Error = ClaimError;

    fn try_from(row: PolicyRow) -> Result<Policy> {
        let status = PolicyStatus::parse(&row.status).ok_or_else(|| {
            ClaimError::Upstream(format!("unrecognized policy status: {}", row.status))
        })?;
        Ok(Policy {
            plate_number: row.plate_number,
            owner_name: row.owner_name,
            insurance_company: row.insurance_company,
            expiry_date: row.expiry_date,
            status,
        })
    }
}

pub struct PostgresPolicyStore {
    pool: PgPool,
}

impl PostgresPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyStore for PostgresPolicyStore {
    /// `ILIKE` with no wildcards in the normalized plate gives a
    /// case-insensitive exact match; `fetch_optional` keeps not-found
    /// distinct from a query failure.
    async fn find_by_plate(&self, plate: &str) -> Result<Option<Policy>> {
        let row = sqlx::query_as::<_, PolicyRow>(
            "SELECT plate_number, owner_name, insurance_company, expiry_date, status \
             FROM policies \
             WHERE plate_number ILIKE $1 \
             LIMIT 1",
        )
        .bind(plate)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ClaimError::Upstream(format!("policy lookup failed: {e}")))?;

        row.map(Policy::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_row_maps_to_domain_type() {
        let row = PartRow {
            make: "Toyota".to_string(),
            model: "Camry".to_string(),
            year_start: 2015,
            year_end: 2020,
            part_name: "Bumper".to_string(),
            price_tokunbo: 40_000,
            price_new: 95_000,
            labor_cost: 10_000,
        };
        let part = PartPrice::from(row);
        assert_eq!(part.part_name, "Bumper");
        assert!(part.covers_year(2018));
    }

    #[test]
    fn policy_row_maps_known_status() {
        let row = PolicyRow {
            plate_number: "LAG-123-ABC".to_string(),
            owner_name: "Adaeze Okafor".to_string(),
            insurance_company: "Leadway Assurance".to_string(),
            expiry_date: chrono::NaiveDate::from_ymd_opt(2027, 3, 14).unwrap(),
            status: "Active".to_string(),
        };
        let policy = Policy::try_from(row).unwrap();
        assert_eq!(policy.status, PolicyStatus::Active);
    }

    #[test]
    fn policy_row_rejects_unknown_status() {
        let row = PolicyRow {
            plate_number: "LAG-123-ABC".to_string(),
            owner_name: "Adaeze Okafor".to_string(),
            insurance_company: "Leadway Assurance".to_string(),
            expiry_date: chrono::NaiveDate::from_ymd_opt(2027, 3, 14).unwrap(),
            status: "suspended".to_string(),
        };
        assert!(matches!(
            Policy::try_from(row).unwrap_err(),
            ClaimError::Upstream(_)
        ));
    }
}
