//! Parcel rows and queries

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::model::{ActivityType, PackType, Parcel, ParcelStatus};

/// Filters for listing parcels. Every field is optional; unset fields do not filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParcelQuery {
    /// Exact status match
    #[serde(default)]
    pub status: Option<ParcelStatus>,
    /// Exact activity match
    #[serde(default)]
    pub activity_type: Option<ActivityType>,
    /// Case-insensitive substring of the region name
    #[serde(default)]
    pub region: Option<String>,
    /// Exact pack match
    #[serde(default)]
    pub pack_type: Option<PackType>,
    /// Shortcut for `status = AVAILABLE`; wins over `status`
    #[serde(default)]
    pub available_only: bool,
    /// Page size; unlimited when unset
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl ParcelQuery {
    pub fn available() -> Self {
        Self {
            available_only: true,
            ..Default::default()
        }
    }

    fn effective_status(&self) -> Option<ParcelStatus> {
        if self.available_only {
            Some(ParcelStatus::Available)
        } else {
            self.status
        }
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions = vec![];
        let mut values = vec![];

        if let Some(status) = self.effective_status() {
            conditions.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(activity) = self.activity_type {
            conditions.push("activity_type = ?");
            values.push(Value::Text(activity.as_str().to_string()));
        }
        if let Some(region) = self.region.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            conditions.push("instr(region_key, ?) > 0");
            values.push(Value::Text(region.to_lowercase()));
        }
        if let Some(pack) = self.pack_type {
            conditions.push("pack_type = ?");
            values.push(Value::Text(pack.as_str().to_string()));
        }

        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), values)
        }
    }
}

fn from_row(row: &Row) -> rusqlite::Result<Parcel> {
    let images_json: String = row.get("images_json")?;
    let images: Vec<String> = serde_json::from_str(&images_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
    })?;

    Ok(Parcel {
        id: row.get("id")?,
        code: row.get("code")?,
        region: row.get("region")?,
        locality: row.get("locality")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        pack_type: row.get("pack_type")?,
        activity_type: row.get("activity_type")?,
        sub_plot_count: row.get("sub_plot_count")?,
        surface_area: row.get("surface_area")?,
        monthly_unit_price: row.get("monthly_unit_price")?,
        total_monthly_price: row.get("total_monthly_price")?,
        estimated_yield: row.get("estimated_yield")?,
        status: row.get("status")?,
        current_crop: row.get("current_crop")?,
        soil_quality: row.get("soil_quality")?,
        water_access: row.get("water_access")?,
        exposure: row.get("exposure")?,
        organic_certified: row.get("organic_certified")?,
        co2_absorbed: row.get("co2_absorbed")?,
        water_saved: row.get("water_saved")?,
        biodiversity_score: row.get("biodiversity_score")?,
        images,
        main_image: row.get("main_image")?,
        farmer_id: row.get("farmer_id")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn insert_parcel(conn: &Connection, parcel: &Parcel) -> Result<()> {
    let images_json = serde_json::to_string(&parcel.images)?;

    conn.execute(
        r#"
        INSERT INTO parcels (
            id, code, region, region_key, locality, latitude, longitude,
            pack_type, activity_type, sub_plot_count, surface_area,
            monthly_unit_price, total_monthly_price, estimated_yield, status,
            current_crop, soil_quality, water_access, exposure, organic_certified,
            co2_absorbed, water_saved, biodiversity_score, images_json, main_image,
            farmer_id, created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            parcel.id,
            parcel.code,
            parcel.region,
            parcel.region.to_lowercase(),
            parcel.locality,
            parcel.latitude,
            parcel.longitude,
            parcel.pack_type,
            parcel.activity_type,
            parcel.sub_plot_count,
            parcel.surface_area,
            parcel.monthly_unit_price,
            parcel.total_monthly_price,
            parcel.estimated_yield,
            parcel.status,
            parcel.current_crop,
            parcel.soil_quality,
            parcel.water_access,
            parcel.exposure,
            parcel.organic_certified,
            parcel.co2_absorbed,
            parcel.water_saved,
            parcel.biodiversity_score,
            images_json,
            parcel.main_image,
            parcel.farmer_id,
            parcel.created_by,
            parcel.created_at,
            parcel.updated_at,
        ],
    )?;

    Ok(())
}

pub fn get_parcel(conn: &Connection, id: &str) -> Result<Option<Parcel>> {
    let parcel = conn
        .query_row("SELECT * FROM parcels WHERE id = ?", params![id], from_row)
        .optional()?;
    Ok(parcel)
}

/// Write every mutable column of `parcel`. `id`, `code` and creation fields never change.
pub fn update_parcel(conn: &Connection, parcel: &Parcel) -> Result<bool> {
    let images_json = serde_json::to_string(&parcel.images)?;

    let updated = conn.execute(
        r#"
        UPDATE parcels SET
            region = ?, region_key = ?, locality = ?, latitude = ?, longitude = ?,
            pack_type = ?, activity_type = ?, sub_plot_count = ?, surface_area = ?,
            monthly_unit_price = ?, total_monthly_price = ?, estimated_yield = ?, status = ?,
            current_crop = ?, soil_quality = ?, water_access = ?, exposure = ?,
            organic_certified = ?, co2_absorbed = ?, water_saved = ?, biodiversity_score = ?,
            images_json = ?, main_image = ?, farmer_id = ?, updated_at = ?
        WHERE id = ?
        "#,
        params![
            parcel.region,
            parcel.region.to_lowercase(),
            parcel.locality,
            parcel.latitude,
            parcel.longitude,
            parcel.pack_type,
            parcel.activity_type,
            parcel.sub_plot_count,
            parcel.surface_area,
            parcel.monthly_unit_price,
            parcel.total_monthly_price,
            parcel.estimated_yield,
            parcel.status,
            parcel.current_crop,
            parcel.soil_quality,
            parcel.water_access,
            parcel.exposure,
            parcel.organic_certified,
            parcel.co2_absorbed,
            parcel.water_saved,
            parcel.biodiversity_score,
            images_json,
            parcel.main_image,
            parcel.farmer_id,
            parcel.updated_at,
            parcel.id,
        ],
    )?;

    Ok(updated > 0)
}

/// Conditional status flip. Returns false when the parcel is missing or not in `expected`.
pub fn set_status_if(
    conn: &Connection,
    id: &str,
    expected: ParcelStatus,
    next: ParcelStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE parcels SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        params![next, now, id, expected],
    )?;
    Ok(updated == 1)
}

pub fn delete_parcel(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM parcels WHERE id = ?", params![id])?;
    Ok(deleted > 0)
}

/// List parcels newest first
pub fn list_parcels(conn: &Connection, query: &ParcelQuery) -> Result<Vec<Parcel>> {
    let (where_sql, mut values) = query.where_clause();
    let sql = format!(
        "SELECT * FROM parcels{} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        where_sql
    );
    values.push(Value::Integer(query.limit.map(i64::from).unwrap_or(-1)));
    values.push(Value::Integer(query.offset.map(i64::from).unwrap_or(0)));

    debug!("Executing query: {}", sql);

    let mut stmt = conn.prepare(&sql)?;
    let parcels = stmt
        .query_map(params_from_iter(values.iter()), from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(parcels)
}

/// Count parcels matching the filters, ignoring `limit` and `offset`
pub fn count_parcels(conn: &Connection, query: &ParcelQuery) -> Result<u32> {
    let (where_sql, values) = query.where_clause();
    let sql = format!("SELECT COUNT(*) FROM parcels{}", where_sql);
    let count = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
    Ok(count)
}

/// Column a parcel count can be grouped by
#[derive(Debug, Clone, Copy)]
pub enum GroupBy {
    Status,
    Region,
    Activity,
}

impl GroupBy {
    fn column(&self) -> &'static str {
        match self {
            GroupBy::Status => "status",
            GroupBy::Region => "region",
            GroupBy::Activity => "activity_type",
        }
    }
}

/// Parcel counts per distinct value of a column, ordered by value
pub fn count_grouped(conn: &Connection, group: GroupBy) -> Result<Vec<(String, u32)>> {
    let column = group.column();
    let sql = format!(
        "SELECT {column}, COUNT(*) FROM parcels GROUP BY {column} ORDER BY {column}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::schema::init_schema;

    pub(crate) fn sample_parcel(id: &str, code: &str, region: &str) -> Parcel {
        let now = Utc::now();
        Parcel {
            id: id.to_string(),
            code: code.to_string(),
            region: region.to_string(),
            locality: "Keur Massar".to_string(),
            latitude: 14.78,
            longitude: -17.31,
            pack_type: PackType::Quad,
            activity_type: ActivityType::MarketGardening,
            sub_plot_count: 4,
            surface_area: 36,
            monthly_unit_price: 5000,
            total_monthly_price: 20000,
            estimated_yield: 15.0,
            status: ParcelStatus::Available,
            current_crop: None,
            soil_quality: Some("loam".to_string()),
            water_access: true,
            exposure: None,
            organic_certified: false,
            co2_absorbed: None,
            water_saved: None,
            biodiversity_score: Some(60),
            images: vec!["https://img.example/1.jpg".to_string()],
            main_image: None,
            farmer_id: None,
            created_by: "admin".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_get() {
        let conn = setup();
        let parcel = sample_parcel("p1", "PAR-DAK-2024-0001", "Dakar");
        insert_parcel(&conn, &parcel).unwrap();

        let loaded = get_parcel(&conn, "p1").unwrap().unwrap();
        assert_eq!(loaded, parcel);
        assert!(get_parcel(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_region_filter_is_case_insensitive_substring() {
        let conn = setup();
        insert_parcel(&conn, &sample_parcel("p1", "PAR-THI-2024-0001", "Thiès")).unwrap();
        insert_parcel(&conn, &sample_parcel("p2", "PAR-DAK-2024-0001", "Dakar")).unwrap();

        let query = ParcelQuery {
            region: Some("THIÈ".to_string()),
            ..Default::default()
        };
        let found = list_parcels(&conn, &query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "p1");

        let query = ParcelQuery {
            region: Some("ak".to_string()),
            ..Default::default()
        };
        assert_eq!(count_parcels(&conn, &query).unwrap(), 1);
    }

    #[test]
    fn test_available_only_overrides_status() {
        let conn = setup();
        let mut leased = sample_parcel("p1", "PAR-DAK-2024-0001", "Dakar");
        leased.status = ParcelStatus::Leased;
        insert_parcel(&conn, &leased).unwrap();
        insert_parcel(&conn, &sample_parcel("p2", "PAR-DAK-2024-0002", "Dakar")).unwrap();

        let query = ParcelQuery {
            status: Some(ParcelStatus::Leased),
            available_only: true,
            ..Default::default()
        };
        let found = list_parcels(&conn, &query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "p2");
    }

    #[test]
    fn test_list_is_newest_first_and_count_ignores_paging() {
        let conn = setup();
        for i in 1..=3 {
            insert_parcel(
                &conn,
                &sample_parcel(&format!("p{i}"), &format!("PAR-DAK-2024-000{i}"), "Dakar"),
            )
            .unwrap();
        }

        let query = ParcelQuery {
            limit: Some(2),
            ..Default::default()
        };
        let page = list_parcels(&conn, &query).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "p3");
        assert_eq!(count_parcels(&conn, &query).unwrap(), 3);
    }

    #[test]
    fn test_conditional_status_flip() {
        let conn = setup();
        insert_parcel(&conn, &sample_parcel("p1", "PAR-DAK-2024-0001", "Dakar")).unwrap();

        let now = Utc::now();
        assert!(set_status_if(&conn, "p1", ParcelStatus::Available, ParcelStatus::Leased, now).unwrap());
        assert!(!set_status_if(&conn, "p1", ParcelStatus::Available, ParcelStatus::Leased, now).unwrap());
        assert_eq!(get_parcel(&conn, "p1").unwrap().unwrap().status, ParcelStatus::Leased);
    }

    #[test]
    fn test_count_grouped() {
        let conn = setup();
        insert_parcel(&conn, &sample_parcel("p1", "PAR-DAK-2024-0001", "Dakar")).unwrap();
        insert_parcel(&conn, &sample_parcel("p2", "PAR-DAK-2024-0002", "Dakar")).unwrap();
        insert_parcel(&conn, &sample_parcel("p3", "PAR-THI-2024-0001", "Thiès")).unwrap();

        let by_region = count_grouped(&conn, GroupBy::Region).unwrap();
        assert_eq!(
            by_region,
            vec![("Dakar".to_string(), 2), ("Thiès".to_string(), 1)]
        );
    }
}
