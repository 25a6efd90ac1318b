use actix::Message;
use tracing::Span;

use crate::models::{PlayerStats, Port, Sector};

use super::StoreError;

/// Persists one fully-assembled sector record.
#[derive(Message)]
#[rtype(result = "Result<(), StoreError>")]
pub struct SaveSector {
    pub sector: Sector,
    pub span: Span,
}

/// Loads a sector record, `None` when the sector has never been seen.
#[derive(Message)]
#[rtype(result = "Result<Option<Sector>, StoreError>")]
pub struct LoadSector {
    pub number: i64,
    pub span: Span,
}

/// Projection of a sector's port, `None` when unknown or portless.
#[derive(Message)]
#[rtype(result = "Result<Option<Port>, StoreError>")]
pub struct LoadPort {
    pub number: i64,
    pub span: Span,
}

#[derive(Message)]
#[rtype(result = "Result<(), StoreError>")]
pub struct SavePlayerStats {
    pub stats: PlayerStats,
    pub span: Span,
}

#[derive(Message)]
#[rtype(result = "Result<Option<PlayerStats>, StoreError>")]
pub struct LoadPlayerStats {
    pub span: Span,
}

/// Merges one density-scan reading into a sector record, raising its
/// explored level to `Density`, and returns the updated record.
#[derive(Message)]
#[rtype(result = "Result<Sector, StoreError>")]
pub struct MergeDensity {
    pub number: i64,
    pub density: i64,
    pub nav_haz: i64,
    pub anomaly: bool,
    pub span: Span,
}

/// Records one hop of a plotted course against the origin sector, raising
/// its explored level to `Calc`.
#[derive(Message)]
#[rtype(result = "Result<Sector, StoreError>")]
pub struct MergeWarpLink {
    pub from: i64,
    pub to: i64,
    pub span: Span,
}

/// Merges a commerce report into a sector's port record, keeping the known
/// port class when the report doesn't carry one.
#[derive(Message)]
#[rtype(result = "Result<Sector, StoreError>")]
pub struct MergePort {
    pub number: i64,
    pub port: Port,
    pub span: Span,
}

/// Persists one script-variable scalar; arrays arrive pre-flattened as
/// `name[index]` rows plus a `name[ARRAYSIZE]` sentinel.
#[derive(Message)]
#[rtype(result = "Result<(), StoreError>")]
pub struct SaveScriptVariable {
    pub name: String,
    pub value: String,
    pub span: Span,
}

#[derive(Message)]
#[rtype(result = "Result<Option<String>, StoreError>")]
pub struct LoadScriptVariable {
    pub name: String,
    pub span: Span,
}

/// Fetches every persisted script variable, used to prime the in-memory
/// cache when a game database is activated.
#[derive(Message)]
#[rtype(result = "Result<Vec<(String, String)>, StoreError>")]
pub struct LoadAllScriptVariables {
    pub span: Span,
}

/// Closes the underlying pool; the store actor stops afterwards.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseStore {
    pub span: Span,
}
