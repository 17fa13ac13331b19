use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use aiv_forecast::models::{ElasticityEstimate, GeoSignal, GeoSnapshot, Observation};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn ensure_tenant(pool: &PgPool, slug: &str) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO aiv_forecast.tenants (id, slug, display_name)
        VALUES ($1, $2, $2)
        ON CONFLICT (slug) DO UPDATE SET slug = EXCLUDED.slug
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(slug)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

pub async fn tenant_id(pool: &PgPool, slug: &str) -> anyhow::Result<Uuid> {
    let row = sqlx::query("SELECT id FROM aiv_forecast.tenants WHERE slug = $1")
        .bind(slug)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("unknown tenant '{slug}'; import data or run seed first"))?;
    Ok(row.get("id"))
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let tenant = ensure_tenant(pool, "demo-dealer").await?;
    let start = Utc
        .with_ymd_and_hms(2026, 6, 1, 0, 0, 0)
        .single()
        .context("invalid seed start date")?;

    let weeks = vec![
        (58.0, 55.0, 61.0, 52.0, 21_400.0),
        (61.0, 57.0, 63.0, 55.0, 20_900.0),
        (57.0, 54.0, 60.0, 53.0, 21_600.0),
        (63.0, 60.0, 66.0, 58.0, 20_300.0),
        (62.0, 58.0, 65.0, 60.0, 20_500.0),
        (66.0, 63.0, 69.0, 61.0, 19_600.0),
        (64.0, 61.0, 67.0, 62.0, 19_900.0),
        (69.0, 66.0, 72.0, 64.0, 18_800.0),
        (67.0, 64.0, 70.0, 66.0, 19_200.0),
        (71.0, 68.0, 74.0, 67.0, 18_300.0),
    ];

    for (week, (index, search, answer_engine, geo, revenue)) in weeks.into_iter().enumerate() {
        let observation = Observation {
            observed_at: start + Duration::weeks(week as i64),
            index,
            search: Some(search),
            answer_engine: Some(answer_engine),
            geo: Some(geo),
            revenue_at_risk: Some(revenue),
        };
        insert_observation(pool, tenant, &observation, &format!("seed-obs-{week:02}")).await?;
    }

    let snapshots = vec![
        (45, 61.0, 32.0, 58.0, true, 64.0, 7.0, 55.0),
        (55, 64.0, 34.0, 60.0, true, 68.0, 8.5, 57.0),
        (62, 66.0, 35.0, 61.0, true, 70.0, 9.0, 58.0),
    ];

    for (day, checklist, aio, depth, kg_present, kg_completeness, velocity, extractability) in snapshots {
        let snapshot = GeoSnapshot {
            computed_at: start + Duration::days(day),
            signal: GeoSignal {
                checklist_score: checklist,
                aio_exposure_pct: aio,
                topical_depth_score: depth,
                knowledge_graph_present: kg_present,
                knowledge_graph_completeness: kg_completeness,
                mention_velocity: velocity,
                extractability_score: extractability,
            },
        };
        insert_geo_snapshot(pool, tenant, &snapshot, &format!("seed-geo-{day:03}")).await?;
    }

    info!(tenant = %tenant, "seeded demo tenant");
    Ok(())
}

async fn insert_observation(
    pool: &PgPool,
    tenant: Uuid,
    observation: &Observation,
    source_key: &str,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO aiv_forecast.observations
        (id, tenant_id, observed_at, aiv_index, search_score, answer_engine_score,
         geo_score, revenue_at_risk, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tenant)
    .bind(observation.observed_at)
    .bind(observation.index)
    .bind(observation.search)
    .bind(observation.answer_engine)
    .bind(observation.geo)
    .bind(observation.revenue_at_risk)
    .bind(source_key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn insert_geo_snapshot(
    pool: &PgPool,
    tenant: Uuid,
    snapshot: &GeoSnapshot,
    source_key: &str,
) -> anyhow::Result<bool> {
    let signal = &snapshot.signal;
    let result = sqlx::query(
        r#"
        INSERT INTO aiv_forecast.geo_snapshots
        (id, tenant_id, computed_at, checklist_score, aio_exposure_pct, topical_depth_score,
         knowledge_graph_present, knowledge_graph_completeness, mention_velocity,
         extractability_score, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tenant)
    .bind(snapshot.computed_at)
    .bind(signal.checklist_score)
    .bind(signal.aio_exposure_pct)
    .bind(signal.topical_depth_score)
    .bind(signal.knowledge_graph_present)
    .bind(signal.knowledge_graph_completeness)
    .bind(signal.mention_velocity)
    .bind(signal.extractability_score)
    .bind(source_key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_observations(pool: &PgPool, tenant: Uuid) -> anyhow::Result<Vec<Observation>> {
    let rows = sqlx::query(
        "SELECT observed_at, aiv_index, search_score, answer_engine_score, geo_score, revenue_at_risk \
         FROM aiv_forecast.observations \
         WHERE tenant_id = $1 \
         ORDER BY observed_at",
    )
    .bind(tenant)
    .fetch_all(pool)
    .await?;

    let mut observations = Vec::with_capacity(rows.len());
    for row in rows {
        observations.push(Observation {
            observed_at: row.get("observed_at"),
            index: row.get("aiv_index"),
            search: row.get("search_score"),
            answer_engine: row.get("answer_engine_score"),
            geo: row.get("geo_score"),
            revenue_at_risk: row.get("revenue_at_risk"),
        });
    }
    debug!(count = observations.len(), "loaded observations");
    Ok(observations)
}

pub async fn fetch_geo_snapshots(pool: &PgPool, tenant: Uuid) -> anyhow::Result<Vec<GeoSnapshot>> {
    let rows = sqlx::query(
        "SELECT computed_at, checklist_score, aio_exposure_pct, topical_depth_score, \
         knowledge_graph_present, knowledge_graph_completeness, mention_velocity, extractability_score \
         FROM aiv_forecast.geo_snapshots \
         WHERE tenant_id = $1 \
         ORDER BY computed_at",
    )
    .bind(tenant)
    .fetch_all(pool)
    .await?;

    let mut snapshots = Vec::with_capacity(rows.len());
    for row in rows {
        snapshots.push(GeoSnapshot {
            computed_at: row.get("computed_at"),
            signal: GeoSignal {
                checklist_score: row.get("checklist_score"),
                aio_exposure_pct: row.get("aio_exposure_pct"),
                topical_depth_score: row.get("topical_depth_score"),
                knowledge_graph_present: row.get("knowledge_graph_present"),
                knowledge_graph_completeness: row.get("knowledge_graph_completeness"),
                mention_velocity: row.get("mention_velocity"),
                extractability_score: row.get("extractability_score"),
            },
        });
    }
    debug!(count = snapshots.len(), "loaded geo snapshots");
    Ok(snapshots)
}

/// Latest persisted estimate and how many history points it was built from.
pub async fn latest_elasticity(
    pool: &PgPool,
    tenant: Uuid,
) -> anyhow::Result<Option<(ElasticityEstimate, usize)>> {
    let row = sqlx::query(
        "SELECT payload, history_points FROM aiv_forecast.elasticity_estimates \
         WHERE tenant_id = $1 ORDER BY version DESC LIMIT 1",
    )
    .bind(tenant)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let Json(estimate): Json<ElasticityEstimate> = row.get("payload");
        let points: i32 = row.get("history_points");
        (estimate, points.max(0) as usize)
    }))
}

pub async fn insert_elasticity(
    pool: &PgPool,
    tenant: Uuid,
    estimate: &ElasticityEstimate,
    history_points: usize,
) -> anyhow::Result<()> {
    let computed_at: DateTime<Utc> = estimate.computed_at.unwrap_or_else(Utc::now);
    sqlx::query(
        r#"
        INSERT INTO aiv_forecast.elasticity_estimates
        (id, tenant_id, version, history_points, usd_per_point, payload, computed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(tenant)
    .bind(i32::try_from(estimate.version).context("elasticity version overflow")?)
    .bind(i32::try_from(history_points).context("history too long")?)
    .bind(estimate.usd_per_point)
    .bind(Json(estimate))
    .bind(computed_at)
    .execute(pool)
    .await
    .with_context(|| format!("failed to store elasticity v{}", estimate.version))?;
    Ok(())
}

/// Appends a result payload; results are never updated in place.
pub async fn record_result<T: Serialize + Sync>(
    pool: &PgPool,
    tenant: Uuid,
    kind: &str,
    payload: &T,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO aiv_forecast.results (id, tenant_id, kind, payload) VALUES ($1, $2, $3, $4)",
    )
    .bind(id)
    .bind(tenant)
    .bind(kind)
    .bind(Json(payload))
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn import_observations(
    pool: &PgPool,
    tenant: Uuid,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        observed_at: DateTime<Utc>,
        aiv_index: f64,
        search_score: Option<f64>,
        answer_engine_score: Option<f64>,
        geo_score: Option<f64>,
        revenue_at_risk: Option<f64>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("bad observation row {}", line + 1))?;
        if !(0.0..=100.0).contains(&row.aiv_index) {
            anyhow::bail!("row {}: aiv_index {} outside [0, 100]", line + 1, row.aiv_index);
        }
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let observation = Observation {
            observed_at: row.observed_at,
            index: row.aiv_index,
            search: row.search_score,
            answer_engine: row.answer_engine_score,
            geo: row.geo_score,
            revenue_at_risk: row.revenue_at_risk,
        };
        if insert_observation(pool, tenant, &observation, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_geo_snapshots(
    pool: &PgPool,
    tenant: Uuid,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        computed_at: DateTime<Utc>,
        checklist_score: f64,
        aio_exposure_pct: f64,
        topical_depth_score: f64,
        knowledge_graph_present: bool,
        knowledge_graph_completeness: f64,
        mention_velocity: f64,
        extractability_score: f64,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("bad geo snapshot row {}", line + 1))?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let snapshot = GeoSnapshot {
            computed_at: row.computed_at,
            signal: GeoSignal {
                checklist_score: row.checklist_score,
                aio_exposure_pct: row.aio_exposure_pct,
                topical_depth_score: row.topical_depth_score,
                knowledge_graph_present: row.knowledge_graph_present,
                knowledge_graph_completeness: row.knowledge_graph_completeness,
                mention_velocity: row.mention_velocity,
                extractability_score: row.extractability_score,
            },
        };
        if insert_geo_snapshot(pool, tenant, &snapshot, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}
