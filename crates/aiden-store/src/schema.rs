/// Tables for every persisted pipeline entity plus the chunk index.
pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL,
    current_phase TEXT,
    config TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS phases (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id),
    phase_type TEXT NOT NULL,
    phase_order INTEGER NOT NULL,
    status TEXT NOT NULL,
    agent_name TEXT,
    started_at TEXT,
    completed_at TEXT,
    UNIQUE (project_id, phase_type)
);

CREATE TABLE IF NOT EXISTS agent_executions (
    id TEXT PRIMARY KEY,
    phase_id TEXT NOT NULL REFERENCES phases(id),
    agent_name TEXT NOT NULL,
    thread_id TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    total_cost REAL NOT NULL DEFAULT 0,
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_executions_phase
    ON agent_executions(phase_id, created_at);

CREATE TABLE IF NOT EXISTS hitl_reviews (
    id TEXT PRIMARY KEY,
    execution_id TEXT REFERENCES agent_executions(id),
    review_type TEXT NOT NULL,
    status TEXT NOT NULL,
    content_snapshot TEXT NOT NULL,
    interrupt_id TEXT,
    reviewer TEXT,
    assigned_at TEXT,
    decided_at TEXT,
    deadline_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reviews_execution ON hitl_reviews(execution_id);
CREATE INDEX IF NOT EXISTS idx_reviews_status ON hitl_reviews(status);

CREATE TABLE IF NOT EXISTS review_decisions (
    id TEXT PRIMARY KEY,
    review_id TEXT NOT NULL REFERENCES hitl_reviews(id),
    decision TEXT NOT NULL,
    feedback TEXT,
    edits TEXT,
    decided_by TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deliverables (
    id TEXT PRIMARY KEY,
    phase_id TEXT NOT NULL REFERENCES phases(id),
    title TEXT NOT NULL,
    deliverable_type TEXT NOT NULL,
    status TEXT NOT NULL,
    current_version INTEGER NOT NULL,
    format TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (phase_id, deliverable_type)
);

CREATE TABLE IF NOT EXISTS deliverable_versions (
    id TEXT PRIMARY KEY,
    deliverable_id TEXT NOT NULL REFERENCES deliverables(id),
    version_number INTEGER NOT NULL,
    content TEXT NOT NULL,
    content_structured TEXT,
    change_summary TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (deliverable_id, version_number)
);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id),
    doc_type TEXT NOT NULL,
    filename TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    seq INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_project
    ON documents(project_id, doc_type, seq DESC);

CREATE TABLE IF NOT EXISTS document_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL REFERENCES documents(id),
    project_id TEXT NOT NULL,
    doc_type TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_document
    ON document_chunks(document_id, chunk_index);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    content='document_chunks',
    content_rowid='id',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS document_chunks_ai AFTER INSERT ON document_chunks BEGIN
    INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
END;
";
