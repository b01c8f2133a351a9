//! Schema DDL, applied idempotently at boot.

/// Tables, indexes and the library projection view.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS scan_candidates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL,
    detected_title TEXT NOT NULL,
    detected_engine TEXT,
    confidence_score REAL NOT NULL DEFAULT 0.5,
    game_indicators TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK(status IN ('pending', 'confirmed', 'ignored', 'rejected', 'merged')),
    detected_at TEXT NOT NULL,
    confirmed_at TEXT,
    manual_correction TEXT
);

CREATE INDEX IF NOT EXISTS idx_candidates_status
    ON scan_candidates(status);
CREATE INDEX IF NOT EXISTS idx_candidates_confidence
    ON scan_candidates(confidence_score DESC);

CREATE TABLE IF NOT EXISTS identity_match_candidate (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL,
    detected_title TEXT NOT NULL,
    detected_engine TEXT,
    confidence_score REAL NOT NULL DEFAULT 0.5,
    external_source_type TEXT,
    external_source_id TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK(status IN ('pending', 'accepted', 'canonicalized', 'rejected')),
    detected_at TEXT NOT NULL,
    canonicalized_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_identity_match_status
    ON identity_match_candidate(status);

CREATE TABLE IF NOT EXISTS canonical_games (
    id TEXT PRIMARY KEY,
    display_title TEXT NOT NULL,
    metadata_snapshot TEXT NOT NULL DEFAULT 'null',
    cover_image_url TEXT,
    is_curated INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_canonical_display_title
    ON canonical_games(display_title COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS identity_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    canonical_id TEXT NOT NULL
        REFERENCES canonical_games(id) ON DELETE CASCADE,
    source_type TEXT NOT NULL,
    external_id TEXT NOT NULL,
    external_url TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(source_type, external_id)
);

CREATE INDEX IF NOT EXISTS idx_identity_canonical_id
    ON identity_links(canonical_id);

CREATE TABLE IF NOT EXISTS games (
    folder_path TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    developer TEXT,
    cover_image TEXT,
    game_id TEXT REFERENCES canonical_games(id) ON DELETE SET NULL,
    scan_signature TEXT,
    folder_mtime INTEGER NOT NULL DEFAULT 0,
    metadata_mtime INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_games_game_id ON games(game_id);
CREATE INDEX IF NOT EXISTS idx_games_scan_signature ON games(scan_signature);

CREATE TABLE IF NOT EXISTS match_clusters (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL
        CHECK(status IN ('suggested', 'accepted', 'rejected')),
    confidence_score REAL NOT NULL
        CHECK(confidence_score >= 0.0 AND confidence_score <= 1.0),
    suggested_title TEXT NOT NULL,
    suggested_canonical_id TEXT
        REFERENCES canonical_games(id) ON DELETE SET NULL,
    metadata_snapshot TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_match_cluster_status
    ON match_clusters(status);
CREATE INDEX IF NOT EXISTS idx_match_cluster_confidence
    ON match_clusters(confidence_score DESC);

CREATE TABLE IF NOT EXISTS match_cluster_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cluster_id TEXT NOT NULL
        REFERENCES match_clusters(id) ON DELETE CASCADE,
    match_score REAL NOT NULL
        CHECK(match_score >= 0.0 AND match_score <= 1.0),
    instance_path TEXT NOT NULL,
    is_primary INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(cluster_id, instance_path)
);

CREATE INDEX IF NOT EXISTS idx_match_member_cluster_id
    ON match_cluster_members(cluster_id);
CREATE INDEX IF NOT EXISTS idx_match_member_instance_path
    ON match_cluster_members(instance_path);

CREATE TABLE IF NOT EXISTS canonical_source_link (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    source_type TEXT NOT NULL,
    source_id TEXT NOT NULL,
    source_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(entity_type, entity_id, source_type, source_id)
);

DROP VIEW IF EXISTS library_entry_view;
CREATE VIEW library_entry_view AS

-- Canonical entries (games linked to canonical_games)
SELECT
    'canonical:' || cg.id AS entry_id,
    'canonical' AS entry_type,
    cg.display_title AS display_title,
    cg.cover_image_url AS cover_image_url,
    cg.metadata_snapshot AS metadata,
    NULL AS cluster_id,
    cg.id AS canonical_id,
    COUNT(g.folder_path) AS instance_count,
    NULL AS confidence_score,
    cg.created_at AS created_at
FROM canonical_games cg
LEFT JOIN games g ON g.game_id = cg.id
GROUP BY cg.id

UNION ALL

-- Suggested cluster entries (pending user decision)
SELECT
    'cluster:' || mc.id AS entry_id,
    'suggested' AS entry_type,
    mc.suggested_title AS display_title,
    (SELECT g2.cover_image FROM games g2 WHERE g2.folder_path = (
        SELECT mcm2.instance_path FROM match_cluster_members mcm2
        WHERE mcm2.cluster_id = mc.id AND mcm2.is_primary = 1 LIMIT 1
    )) AS cover_image_url,
    mc.metadata_snapshot AS metadata,
    mc.id AS cluster_id,
    mc.suggested_canonical_id AS canonical_id,
    COUNT(mcm.id) AS instance_count,
    mc.confidence_score AS confidence_score,
    mc.created_at AS created_at
FROM match_clusters mc
INNER JOIN match_cluster_members mcm ON mcm.cluster_id = mc.id
WHERE mc.status = 'suggested'
GROUP BY mc.id

UNION ALL

-- Orphan entries (no canonical link, not in any live cluster)
SELECT
    'orphan:' || g.folder_path AS entry_id,
    'orphan' AS entry_type,
    g.title AS display_title,
    g.cover_image AS cover_image_url,
    json_object('developer', g.developer) AS metadata,
    NULL AS cluster_id,
    NULL AS canonical_id,
    1 AS instance_count,
    NULL AS confidence_score,
    g.created_at AS created_at
FROM games g
WHERE g.game_id IS NULL
  AND NOT EXISTS (
      SELECT 1 FROM match_cluster_members mcm
      INNER JOIN match_clusters mc ON mc.id = mcm.cluster_id
      WHERE mcm.instance_path = g.folder_path
        AND mc.status != 'rejected'
  );
"#;
