// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedded database migrations using refinery.
//!
//! SQL migration files are compiled into the binary at build time via
//! `embed_migrations!`. Migrations run automatically on database open.

use palaver_core::PalaverError;
use tracing::info;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Run all pending migrations against the given connection.
///
/// Refinery tracks applied migrations in its own `refinery_schema_history` table.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), PalaverError> {
    let report = embedded::migrations::runner()
        .run(conn)
        .map_err(PalaverError::storage)?;
    let applied = report.applied_migrations().len();
    if applied > 0 {
        info!(applied, "database migrations applied");
    }
    Ok(())
}
