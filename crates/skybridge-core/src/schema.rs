//! Static table registry and idempotent provisioning.
//!
//! Every core table is described once: canonical DDL, key shape, composite
//! natural key, optional modified-at column, and the integer foreign keys that
//! point at auto-id parents. The registry drives provisioning here, the sync
//! entity scope, and the default replication manifest. Order is parents before
//! children so creates and row copies never hit a dangling reference.

use crate::connection::LiveConnection;
use serde::{Deserialize, Serialize};
use skybridge_types::{Dialect, Result};
use tracing::debug;

/// How a table's primary key is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Engine-assigned integer id. Locally minted ids are provisional until
    /// reconciled against the cloud-assigned id.
    AutoId,
    /// The primary key is itself the natural key (e.g. a control code such as
    /// 'A.5.1'); ids are identical on every node and never remapped.
    Natural,
}

/// An integer foreign key referencing an auto-id parent table. When a parent
/// row's local id is rewritten during reconciliation, every link column
/// pointing at that parent is rewritten with it.
#[derive(Debug, Clone, Copy)]
pub struct Link {
    pub column: &'static str,
    pub parent: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    pub ddl: &'static str,
    pub primary_key: &'static str,
    pub key: KeyKind,
    /// Business-unique tuple used to match rows across nodes. All columns are
    /// non-null so equality matching needs no IS NULL special-casing.
    pub natural_key: &'static [&'static str],
    /// Column advanced on every write, used as the incremental pull filter.
    /// Tables without one are pulled by full scan.
    pub modified_col: Option<&'static str>,
    pub links: &'static [Link],
}

const REGISTRY: [TableDef; 7] = [
    TableDef {
        name: "assets",
        ddl: "CREATE TABLE IF NOT EXISTS assets (\
              id INT AUTO_INCREMENT PRIMARY KEY, \
              parent_id INT, \
              name VARCHAR(255) NOT NULL, \
              type VARCHAR(50), \
              description TEXT, \
              created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
              updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
              CONSTRAINT uq_assets_nk UNIQUE (name, created_at))",
        primary_key: "id",
        key: KeyKind::AutoId,
        natural_key: &["name", "created_at"],
        modified_col: Some("updated_at"),
        links: &[],
    },
    TableDef {
        name: "iso_controls",
        ddl: "CREATE TABLE IF NOT EXISTS iso_controls (\
              id VARCHAR(10) PRIMARY KEY, \
              theme VARCHAR(50), \
              description TEXT, \
              created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)",
        primary_key: "id",
        key: KeyKind::Natural,
        natural_key: &["id"],
        modified_col: None,
        links: &[],
    },
    TableDef {
        name: "policies",
        ddl: "CREATE TABLE IF NOT EXISTS policies (\
              id INT AUTO_INCREMENT PRIMARY KEY, \
              name VARCHAR(255) NOT NULL, \
              category VARCHAR(100), \
              summary TEXT, \
              content TEXT, \
              created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
              CONSTRAINT uq_policies_nk UNIQUE (name, created_at))",
        primary_key: "id",
        key: KeyKind::AutoId,
        natural_key: &["name", "created_at"],
        modified_col: None,
        links: &[],
    },
    TableDef {
        name: "problems",
        ddl: "CREATE TABLE IF NOT EXISTS problems (\
              id INT AUTO_INCREMENT PRIMARY KEY, \
              title VARCHAR(255) NOT NULL, \
              description TEXT, \
              root_cause_analysis TEXT, \
              status VARCHAR(50) DEFAULT 'Open', \
              created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
              CONSTRAINT uq_problems_nk UNIQUE (title, created_at))",
        primary_key: "id",
        key: KeyKind::AutoId,
        natural_key: &["title", "created_at"],
        modified_col: None,
        links: &[],
    },
    TableDef {
        name: "tickets",
        ddl: "CREATE TABLE IF NOT EXISTS tickets (\
              id INT AUTO_INCREMENT PRIMARY KEY, \
              asset_id INT NOT NULL, \
              ticket_type VARCHAR(50), \
              title VARCHAR(255), \
              description TEXT, \
              status VARCHAR(50) DEFAULT 'Open', \
              priority VARCHAR(50), \
              logged_by VARCHAR(100) NOT NULL, \
              created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
              updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
              CONSTRAINT uq_tickets_nk UNIQUE (asset_id, created_at, logged_by), \
              FOREIGN KEY (asset_id) REFERENCES assets(id) ON DELETE CASCADE)",
        primary_key: "id",
        key: KeyKind::AutoId,
        natural_key: &["asset_id", "created_at", "logged_by"],
        modified_col: Some("updated_at"),
        links: &[Link {
            column: "asset_id",
            parent: "assets",
        }],
    },
    TableDef {
        name: "asset_controls",
        ddl: "CREATE TABLE IF NOT EXISTS asset_controls (\
              id INT AUTO_INCREMENT PRIMARY KEY, \
              asset_id INT NOT NULL, \
              control_id VARCHAR(10) NOT NULL, \
              status VARCHAR(50) DEFAULT 'Not Applicable', \
              notes TEXT, \
              linked_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
              CONSTRAINT uq_asset_controls_nk UNIQUE (asset_id, control_id), \
              FOREIGN KEY (asset_id) REFERENCES assets(id) ON DELETE CASCADE, \
              FOREIGN KEY (control_id) REFERENCES iso_controls(id) ON DELETE CASCADE)",
        primary_key: "id",
        key: KeyKind::AutoId,
        natural_key: &["asset_id", "control_id"],
        modified_col: None,
        links: &[Link {
            column: "asset_id",
            parent: "assets",
        }],
    },
    TableDef {
        name: "ticket_attachments",
        ddl: "CREATE TABLE IF NOT EXISTS ticket_attachments (\
              id INT AUTO_INCREMENT PRIMARY KEY, \
              ticket_id INT NOT NULL, \
              file_name VARCHAR(255) NOT NULL, \
              file_path VARCHAR(500), \
              uploaded_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
              CONSTRAINT uq_ticket_attachments_nk UNIQUE (ticket_id, file_name, uploaded_at), \
              FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE)",
        primary_key: "id",
        key: KeyKind::AutoId,
        natural_key: &["ticket_id", "file_name", "uploaded_at"],
        modified_col: None,
        links: &[Link {
            column: "ticket_id",
            parent: "tickets",
        }],
    },
];

/// Account store for the companion portal. Lives only on the designated
/// identity node, outside the sync/replication scope.
pub const IDENTITY_DDL: &str = "CREATE TABLE IF NOT EXISTS companion_users (\
    id INT AUTO_INCREMENT PRIMARY KEY, \
    username VARCHAR(100) NOT NULL, \
    password_hash VARCHAR(255) NOT NULL, \
    role VARCHAR(20) NOT NULL DEFAULT 'user', \
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP, \
    CONSTRAINT uq_companion_users_username UNIQUE (username))";

/// All core tables, parents before children.
pub fn registry() -> &'static [TableDef] {
    &REGISTRY
}

pub fn table(name: &str) -> Option<&'static TableDef> {
    REGISTRY.iter().find(|t| t.name == name)
}

/// Link columns across the registry that reference `parent`.
pub fn links_to(parent: &str) -> impl Iterator<Item = (&'static TableDef, &'static Link)> + '_ {
    REGISTRY
        .iter()
        .flat_map(|t| t.links.iter().map(move |l| (t, l)))
        .filter(move |(_, l)| l.parent == parent)
}

/// Create every registry table on the node if absent. Safe to call repeatedly.
pub async fn ensure_schema(conn: &LiveConnection) -> Result<()> {
    for def in &REGISTRY {
        conn.execute(def.ddl, vec![]).await?;
    }
    debug!(dialect = %conn.dialect(), tables = REGISTRY.len(), "schema ensured");
    Ok(())
}

/// Create the companion account table on the identity node if absent.
pub async fn ensure_identity_schema(conn: &LiveConnection) -> Result<()> {
    conn.execute(IDENTITY_DDL, vec![]).await?;
    Ok(())
}

/// Names of the node's base tables, sorted.
pub async fn list_tables(conn: &LiveConnection) -> Result<Vec<String>> {
    let statement = match conn.dialect() {
        Dialect::MySql => {
            "SELECT table_name AS name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
             ORDER BY table_name"
        }
        Dialect::Sqlite => {
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name"
        }
    };
    let rows = conn.fetch_all(statement, vec![]).await?;
    Ok(rows
        .iter()
        .filter_map(|r| r.get_text("name").map(str::to_string))
        .collect())
}

/// Tables present on one node but missing on the other. Used as the
/// disaster-recovery preflight view before replication.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaDiff {
    pub missing_on_a: Vec<String>,
    pub missing_on_b: Vec<String>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.missing_on_a.is_empty() && self.missing_on_b.is_empty()
    }
}

pub async fn compare_schemas(a: &LiveConnection, b: &LiveConnection) -> Result<SchemaDiff> {
    let tables_a = list_tables(a).await?;
    let tables_b = list_tables(b).await?;
    Ok(SchemaDiff {
        missing_on_a: tables_b
            .iter()
            .filter(|t| !tables_a.contains(t))
            .cloned()
            .collect(),
        missing_on_b: tables_a
            .iter()
            .filter(|t| !tables_b.contains(t))
            .cloned()
            .collect(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dialect::translate;

    #[test]
    fn test_registry_names_are_unique() {
        let mut names: Vec<_> = REGISTRY.iter().map(|t| t.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), REGISTRY.len());
    }

    #[test]
    fn test_registry_is_ordered_parents_first() {
        for (idx, def) in REGISTRY.iter().enumerate() {
            for link in def.links {
                let parent_idx = REGISTRY
                    .iter()
                    .position(|t| t.name == link.parent)
                    .unwrap_or_else(|| panic!("{} links to unknown {}", def.name, link.parent));
                assert!(
                    parent_idx < idx,
                    "{} must come after its parent {}",
                    def.name,
                    link.parent
                );
            }
        }
    }

    #[test]
    fn test_every_ddl_translates_for_both_engines() {
        for def in &REGISTRY {
            translate(def.ddl, Dialect::MySql).unwrap();
            let embedded = translate(def.ddl, Dialect::Sqlite).unwrap();
            assert!(
                !embedded.contains("AUTO_INCREMENT PRIMARY KEY"),
                "{} identity column not rewritten",
                def.name
            );
        }
        translate(IDENTITY_DDL, Dialect::MySql).unwrap();
        translate(IDENTITY_DDL, Dialect::Sqlite).unwrap();
    }

    #[test]
    fn test_natural_keys_are_nonempty_and_declared() {
        for def in &REGISTRY {
            assert!(!def.natural_key.is_empty(), "{} has no natural key", def.name);
            if def.key == KeyKind::AutoId {
                // Uniqueness of the tuple is enforced in the DDL itself
                assert!(
                    def.ddl.contains("UNIQUE ("),
                    "{} missing natural-key constraint",
                    def.name
                );
            }
        }
    }

    #[test]
    fn test_links_to_finds_dependents() {
        let dependents: Vec<_> = links_to("tickets").map(|(t, l)| (t.name, l.column)).collect();
        assert_eq!(dependents, vec![("ticket_attachments", "ticket_id")]);

        let asset_dependents: Vec<_> = links_to("assets").map(|(t, _)| t.name).collect();
        assert_eq!(asset_dependents, vec!["tickets", "asset_controls"]);
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(table("tickets").unwrap().modified_col, Some("updated_at"));
        assert_eq!(table("iso_controls").unwrap().key, KeyKind::Natural);
        assert!(table("sla_policies").is_none());
    }
}
