pub mod events;

use std::path::Path;

use actix::{Actor, ActorContext, Context, Handler, ResponseFuture};
use chrono::Utc;
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use thiserror::Error;
use tracing::instrument;

use crate::models::{Explored, Planet, PlayerStats, Port, Sector, Ship, Trader};

use self::events::{
    CloseStore, LoadAllScriptVariables, LoadPlayerStats, LoadPort, LoadSector,
    LoadScriptVariable, MergeDensity, MergePort, MergeWarpLink, SavePlayerStats, SaveSector,
    SaveScriptVariable,
};

static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    OpenFailed(String),
    #[error("failed to write record: {0}")]
    WriteFailed(sqlx::Error),
    #[error("record not found")]
    NotFound,
    #[error("database corrupt: {0}")]
    Corrupt(sqlx::Error),
}

/// Identity of the game database currently backing the session, as shown to
/// the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub game_name: String,
    pub host: String,
    pub port: u16,
    pub db_name: String,
}

/// Takes game state discovered by the parser and scripts and persists it to
/// the per-game database.
///
/// Exactly one store is active per connection; the session swaps stores
/// atomically when the detector moves between games.
pub struct GameStore {
    pub pool: SqlitePool,
    pub info: DatabaseInfo,
}

impl GameStore {
    /// Opens (creating if necessary) the database backing `(host, port,
    /// game)` under `data_dir` and applies any pending migrations.
    pub async fn open(
        data_dir: &Path,
        host: &str,
        port: u16,
        game_name: &str,
    ) -> Result<Self, StoreError> {
        let db_name = database_name(host, port, game_name);
        let path = data_dir.join(format!("{db_name}.db"));

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;

        Ok(Self {
            pool,
            info: DatabaseInfo {
                game_name: game_name.to_string(),
                host: host.to_string(),
                port,
                db_name,
            },
        })
    }
}

impl Actor for GameStore {
    type Context = Context<Self>;
}

impl Handler<SaveSector> for GameStore {
    type Result = ResponseFuture<Result<(), StoreError>>;

    #[instrument(parent = &msg.span, skip_all, fields(sector = msg.sector.number))]
    fn handle(&mut self, msg: SaveSector, _ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        Box::pin(async move { save_sector(&pool, &msg.sector).await })
    }
}

impl Handler<LoadSector> for GameStore {
    type Result = ResponseFuture<Result<Option<Sector>, StoreError>>;

    #[instrument(parent = &msg.span, skip_all, fields(sector = msg.number))]
    fn handle(&mut self, msg: LoadSector, _ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        Box::pin(async move { load_sector(&pool, msg.number).await })
    }
}

impl Handler<LoadPort> for GameStore {
    type Result = ResponseFuture<Result<Option<Port>, StoreError>>;

    #[instrument(parent = &msg.span, skip_all, fields(sector = msg.number))]
    fn handle(&mut self, msg: LoadPort, _ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        Box::pin(async move {
            Ok(load_sector(&pool, msg.number)
                .await?
                .and_then(|sector| sector.port))
        })
    }
}

impl Handler<MergeDensity> for GameStore {
    type Result = ResponseFuture<Result<Sector, StoreError>>;

    #[instrument(parent = &msg.span, skip_all, fields(sector = msg.number))]
    fn handle(&mut self, msg: MergeDensity, _ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        Box::pin(async move {
            merge_density(&pool, msg.number, msg.density, msg.nav_haz, msg.anomaly).await
        })
    }
}

impl Handler<MergeWarpLink> for GameStore {
    type Result = ResponseFuture<Result<Sector, StoreError>>;

    #[instrument(parent = &msg.span, skip_all, fields(from = msg.from, to = msg.to))]
    fn handle(&mut self, msg: MergeWarpLink, _ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        Box::pin(async move { merge_warp_link(&pool, msg.from, msg.to).await })
    }
}

impl Handler<MergePort> for GameStore {
    type Result = ResponseFuture<Result<Sector, StoreError>>;

    #[instrument(parent = &msg.span, skip_all, fields(sector = msg.number))]
    fn handle(&mut self, msg: MergePort, _ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        Box::pin(async move { merge_port(&pool, msg.number, msg.port).await })
    }
}

impl Handler<SavePlayerStats> for GameStore {
    type Result = ResponseFuture<Result<(), StoreError>>;

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: SavePlayerStats, _ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        Box::pin(async move { save_player_stats(&pool, &msg.stats).await })
    }
}

impl Handler<LoadPlayerStats> for GameStore {
    type Result = ResponseFuture<Result<Option<PlayerStats>, StoreError>>;

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: LoadPlayerStats, _ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        Box::pin(async move { load_player_stats(&pool).await })
    }
}

impl Handler<SaveScriptVariable> for GameStore {
    type Result = ResponseFuture<Result<(), StoreError>>;

    #[instrument(parent = &msg.span, skip_all, fields(name = %msg.name))]
    fn handle(&mut self, msg: SaveScriptVariable, _ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        Box::pin(async move { save_script_variable(&pool, &msg.name, &msg.value).await })
    }
}

impl Handler<LoadScriptVariable> for GameStore {
    type Result = ResponseFuture<Result<Option<String>, StoreError>>;

    #[instrument(parent = &msg.span, skip_all, fields(name = %msg.name))]
    fn handle(&mut self, msg: LoadScriptVariable, _ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        Box::pin(async move { load_script_variable(&pool, &msg.name).await })
    }
}

impl Handler<LoadAllScriptVariables> for GameStore {
    type Result = ResponseFuture<Result<Vec<(String, String)>, StoreError>>;

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: LoadAllScriptVariables, _ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query_as("SELECT name, value FROM script_variables")
                .fetch_all(&pool)
                .await
                .map_err(StoreError::Corrupt)
        })
    }
}

impl Handler<CloseStore> for GameStore {
    type Result = ();

    #[instrument(parent = &msg.span, skip_all, fields(db = %self.info.db_name))]
    fn handle(&mut self, msg: CloseStore, ctx: &mut Self::Context) -> Self::Result {
        let pool = self.pool.clone();
        actix_rt::spawn(async move { pool.close().await });
        ctx.stop();
    }
}

pub async fn save_sector(pool: &SqlitePool, sector: &Sector) -> Result<(), StoreError> {
    let mut tx = pool.begin().await.map_err(StoreError::WriteFailed)?;

    sqlx::query(
        "INSERT INTO sectors (number, constellation, beacon, nav_haz, density, anomaly, explored, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(number) DO UPDATE SET
             constellation = excluded.constellation,
             beacon = excluded.beacon,
             nav_haz = excluded.nav_haz,
             density = excluded.density,
             anomaly = excluded.anomaly,
             explored = MAX(explored, excluded.explored),
             updated_at = excluded.updated_at",
    )
    .bind(sector.number)
    .bind(&sector.constellation)
    .bind(&sector.beacon)
    .bind(sector.nav_haz)
    .bind(sector.density)
    .bind(sector.anomaly)
    .bind(sector.explored)
    .bind(sector.updated_at.unwrap_or_else(Utc::now))
    .execute(&mut *tx)
    .await
    .map_err(StoreError::WriteFailed)?;

    for table in [
        "sector_warps",
        "sector_traders",
        "sector_ships",
        "sector_planets",
    ] {
        sqlx::query(&format!("DELETE FROM {table} WHERE sector = ?"))
            .bind(sector.number)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::WriteFailed)?;
    }

    for (position, target) in sector.warps.iter().enumerate() {
        sqlx::query("INSERT INTO sector_warps (sector, position, target) VALUES (?, ?, ?)")
            .bind(sector.number)
            .bind(position_index(position))
            .bind(target)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::WriteFailed)?;
    }

    for (position, trader) in sector.traders.iter().enumerate() {
        sqlx::query(
            "INSERT INTO sector_traders (sector, position, name, ship_name, ship_type, figs)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(sector.number)
        .bind(position_index(position))
        .bind(&trader.name)
        .bind(&trader.ship_name)
        .bind(&trader.ship_type)
        .bind(trader.figs)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::WriteFailed)?;
    }

    for (position, ship) in sector.ships.iter().enumerate() {
        sqlx::query(
            "INSERT INTO sector_ships (sector, position, name, owner, ship_type, figs)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(sector.number)
        .bind(position_index(position))
        .bind(&ship.name)
        .bind(&ship.owner)
        .bind(&ship.ship_type)
        .bind(ship.figs)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::WriteFailed)?;
    }

    for (position, planet) in sector.planets.iter().enumerate() {
        sqlx::query("INSERT INTO sector_planets (sector, position, name) VALUES (?, ?, ?)")
            .bind(sector.number)
            .bind(position_index(position))
            .bind(&planet.name)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::WriteFailed)?;
    }

    if let Some(port) = &sector.port {
        sqlx::query(
            "INSERT INTO ports (sector, name, class,
                                buying_ore, buying_org, buying_equ,
                                amount_ore, amount_org, amount_equ,
                                percent_ore, percent_org, percent_equ)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(sector) DO UPDATE SET
                 name = excluded.name,
                 class = excluded.class,
                 buying_ore = excluded.buying_ore,
                 buying_org = excluded.buying_org,
                 buying_equ = excluded.buying_equ,
                 amount_ore = excluded.amount_ore,
                 amount_org = excluded.amount_org,
                 amount_equ = excluded.amount_equ,
                 percent_ore = excluded.percent_ore,
                 percent_org = excluded.percent_org,
                 percent_equ = excluded.percent_equ",
        )
        .bind(sector.number)
        .bind(&port.name)
        .bind(port.class_index)
        .bind(port.buying[0])
        .bind(port.buying[1])
        .bind(port.buying[2])
        .bind(port.amounts[0])
        .bind(port.amounts[1])
        .bind(port.amounts[2])
        .bind(port.percents[0])
        .bind(port.percents[1])
        .bind(port.percents[2])
        .execute(&mut *tx)
        .await
        .map_err(StoreError::WriteFailed)?;
    }

    tx.commit().await.map_err(StoreError::WriteFailed)
}

fn position_index(position: usize) -> i64 {
    i64::try_from(position).unwrap_or(i64::MAX)
}

pub async fn load_sector(pool: &SqlitePool, number: i64) -> Result<Option<Sector>, StoreError> {
    let Some((constellation, beacon, nav_haz, density, anomaly, explored, updated_at)) =
        sqlx::query_as::<
            _,
            (
                String,
                String,
                i64,
                i64,
                bool,
                Explored,
                Option<chrono::DateTime<Utc>>,
            ),
        >(
            "SELECT constellation, beacon, nav_haz, density, anomaly, explored, updated_at
             FROM sectors WHERE number = ?",
        )
        .bind(number)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::Corrupt)?
    else {
        return Ok(None);
    };

    let warps: Vec<(i64,)> =
        sqlx::query_as("SELECT target FROM sector_warps WHERE sector = ? ORDER BY position")
            .bind(number)
            .fetch_all(pool)
            .await
            .map_err(StoreError::Corrupt)?;

    let traders: Vec<(String, String, String, i64)> = sqlx::query_as(
        "SELECT name, ship_name, ship_type, figs
         FROM sector_traders WHERE sector = ? ORDER BY position",
    )
    .bind(number)
    .fetch_all(pool)
    .await
    .map_err(StoreError::Corrupt)?;

    let ships: Vec<(String, String, String, i64)> = sqlx::query_as(
        "SELECT name, owner, ship_type, figs
         FROM sector_ships WHERE sector = ? ORDER BY position",
    )
    .bind(number)
    .fetch_all(pool)
    .await
    .map_err(StoreError::Corrupt)?;

    let planets: Vec<(String,)> =
        sqlx::query_as("SELECT name FROM sector_planets WHERE sector = ? ORDER BY position")
            .bind(number)
            .fetch_all(pool)
            .await
            .map_err(StoreError::Corrupt)?;

    let port = sqlx::query_as::<
        _,
        (String, i16, bool, bool, bool, i64, i64, i64, i64, i64, i64),
    >(
        "SELECT name, class,
                buying_ore, buying_org, buying_equ,
                amount_ore, amount_org, amount_equ,
                percent_ore, percent_org, percent_equ
         FROM ports WHERE sector = ?",
    )
    .bind(number)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::Corrupt)?
    .map(
        |(name, class_index, b0, b1, b2, a0, a1, a2, p0, p1, p2)| Port {
            name,
            class_index,
            buying: [b0, b1, b2],
            amounts: [a0, a1, a2],
            percents: [p0, p1, p2],
        },
    );

    Ok(Some(Sector {
        number,
        nav_haz,
        constellation,
        beacon,
        warps: warps.into_iter().map(|(target,)| target).collect(),
        port,
        traders: traders
            .into_iter()
            .map(|(name, ship_name, ship_type, figs)| Trader {
                name,
                ship_name,
                ship_type,
                figs,
            })
            .collect(),
        ships: ships
            .into_iter()
            .map(|(name, owner, ship_type, figs)| Ship {
                name,
                owner,
                ship_type,
                figs,
            })
            .collect(),
        planets: planets.into_iter().map(|(name,)| Planet { name }).collect(),
        density,
        anomaly,
        explored,
        updated_at,
    }))
}

pub async fn merge_density(
    pool: &SqlitePool,
    number: i64,
    density: i64,
    nav_haz: i64,
    anomaly: bool,
) -> Result<Sector, StoreError> {
    let mut sector = load_sector(pool, number)
        .await?
        .unwrap_or_else(|| Sector::new(number));

    sector.density = density;
    sector.nav_haz = nav_haz;
    sector.anomaly = anomaly;
    sector.mark_explored(Explored::Density);

    save_sector(pool, &sector).await?;
    Ok(sector)
}

pub async fn merge_warp_link(pool: &SqlitePool, from: i64, to: i64) -> Result<Sector, StoreError> {
    let mut sector = load_sector(pool, from)
        .await?
        .unwrap_or_else(|| Sector::new(from));

    sector.add_warp(to);
    sector.mark_explored(Explored::Calc);

    save_sector(pool, &sector).await?;
    Ok(sector)
}

pub async fn merge_port(
    pool: &SqlitePool,
    number: i64,
    port: Port,
) -> Result<Sector, StoreError> {
    let mut sector = load_sector(pool, number)
        .await?
        .unwrap_or_else(|| Sector::new(number));

    let merged = match sector.port.take() {
        Some(mut existing) => {
            if !port.name.is_empty() {
                existing.name = port.name;
            }
            if port.class_index >= 0 {
                existing.class_index = port.class_index;
            }
            existing.buying = port.buying;
            existing.amounts = port.amounts;
            existing.percents = port.percents;
            existing
        }
        None => port,
    };

    sector.port = Some(merged);
    save_sector(pool, &sector).await?;
    Ok(sector)
}

pub async fn save_player_stats(pool: &SqlitePool, stats: &PlayerStats) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT OR REPLACE INTO player_stats (
             id, player_name, current_sector, turns, credits, fighters, shields,
             total_holds, ore_holds, org_holds, equ_holds, col_holds, empty_holds,
             photons, armids, limpets, gen_torps, cloaks, beacons, atomics,
             corbomite, eprobes, mine_disr, alignment, experience, corp,
             ship_number, ship_class, psychic_probe, planet_scanner, scan_type
         ) VALUES (0, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&stats.player_name)
    .bind(stats.current_sector)
    .bind(stats.turns)
    .bind(stats.credits)
    .bind(stats.fighters)
    .bind(stats.shields)
    .bind(stats.total_holds)
    .bind(stats.ore_holds)
    .bind(stats.org_holds)
    .bind(stats.equ_holds)
    .bind(stats.col_holds)
    .bind(stats.empty_holds)
    .bind(stats.photons)
    .bind(stats.armids)
    .bind(stats.limpets)
    .bind(stats.gen_torps)
    .bind(stats.cloaks)
    .bind(stats.beacons)
    .bind(stats.atomics)
    .bind(stats.corbomite)
    .bind(stats.eprobes)
    .bind(stats.mine_disr)
    .bind(stats.alignment)
    .bind(stats.experience)
    .bind(stats.corp)
    .bind(stats.ship_number)
    .bind(&stats.ship_class)
    .bind(stats.psychic_probe)
    .bind(stats.planet_scanner)
    .bind(&stats.scan_type)
    .execute(pool)
    .await
    .map_err(StoreError::WriteFailed)?;

    Ok(())
}

pub async fn load_player_stats(pool: &SqlitePool) -> Result<Option<PlayerStats>, StoreError> {
    sqlx::query_as::<_, PlayerStats>(
        "SELECT player_name, current_sector, turns, credits, fighters, shields,
                total_holds, ore_holds, org_holds, equ_holds, col_holds, empty_holds,
                photons, armids, limpets, gen_torps, cloaks, beacons, atomics,
                corbomite, eprobes, mine_disr, alignment, experience, corp,
                ship_number, ship_class, psychic_probe, planet_scanner, scan_type
         FROM player_stats WHERE id = 0",
    )
    .fetch_optional(pool)
    .await
    .map_err(StoreError::Corrupt)
}

pub async fn save_script_variable(
    pool: &SqlitePool,
    name: &str,
    value: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO script_variables (name, value)
         VALUES (?, ?)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
    )
    .bind(name)
    .bind(value)
    .execute(pool)
    .await
    .map_err(StoreError::WriteFailed)?;

    Ok(())
}

pub async fn load_script_variable(
    pool: &SqlitePool,
    name: &str,
) -> Result<Option<String>, StoreError> {
    sqlx::query_as("SELECT value FROM script_variables WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::Corrupt)
        .map(|row| row.map(|(value,)| value))
}

/// Derives the filename-safe database key for a `(host, port, game)` triple.
///
/// The result contains only `[a-z0-9_]` and the derivation is idempotent.
#[must_use]
pub fn database_name(host: &str, port: u16, game_name: &str) -> String {
    sanitize_name(&format!("{host} {port} {game_name}"))
}

#[must_use]
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());

    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }

    out.trim_end_matches('_').to_string()
}
