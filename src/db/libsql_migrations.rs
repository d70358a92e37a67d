//! SQLite-dialect schema for the libSQL backend.
//!
//! Migrations are applied in order and recorded in `schema_migrations`;
//! a version already recorded is never re-run. Tenant-owned tables expose
//! `UNIQUE (tenant_id, id)` so children can reference them with composite
//! foreign keys, which makes cross-tenant references unrepresentable.
//!
//! Money columns are TEXT holding decimal strings, dates are `YYYY-MM-DD`,
//! timestamps are RFC 3339 written by the application.

/// `(version, name, sql)` in application order.
pub const MIGRATIONS: &[(i64, &str, &str)] = &[(1, "initial_schema", V1_INITIAL)];

const V1_INITIAL: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    token_hash TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memberships (
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    profile_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    role TEXT NOT NULL CHECK (role IN ('admin', 'lawyer', 'assistant', 'accountant')),
    hourly_rate TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, profile_id)
);

CREATE INDEX IF NOT EXISTS idx_memberships_profile ON memberships(profile_id);

CREATE TABLE IF NOT EXISTS cabinet_settings (
    tenant_id TEXT PRIMARY KEY REFERENCES tenants(id) ON DELETE CASCADE,
    legal_name TEXT NOT NULL,
    address TEXT,
    vat_number TEXT,
    currency TEXT NOT NULL,
    default_vat_rate TEXT NOT NULL,
    default_hourly_rate TEXT NOT NULL,
    rounding_increment_minutes INTEGER NOT NULL,
    rounding_mode TEXT NOT NULL CHECK (rounding_mode IN ('up', 'nearest', 'down')),
    invoice_prefix TEXT NOT NULL,
    credit_note_prefix TEXT NOT NULL,
    payment_terms_days INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    name_normalized TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('individual', 'company')),
    email TEXT,
    phone TEXT,
    address TEXT,
    vat_number TEXT,
    vat_exempt INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (tenant_id, id),
    UNIQUE (tenant_id, name_normalized)
);

CREATE TABLE IF NOT EXISTS matters (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    client_id TEXT NOT NULL,
    reference TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('open', 'on_hold', 'closed', 'archived')),
    hourly_rate TEXT,
    vat_rate TEXT,
    opened_on TEXT,
    closed_on TEXT,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (tenant_id, id),
    UNIQUE (tenant_id, reference),
    FOREIGN KEY (tenant_id, client_id) REFERENCES clients(tenant_id, id)
);

CREATE INDEX IF NOT EXISTS idx_matters_client ON matters(tenant_id, client_id);

CREATE TABLE IF NOT EXISTS matter_assignments (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    matter_id TEXT NOT NULL,
    profile_id TEXT NOT NULL,
    hourly_rate TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (matter_id, profile_id),
    FOREIGN KEY (tenant_id, matter_id) REFERENCES matters(tenant_id, id) ON DELETE CASCADE,
    FOREIGN KEY (tenant_id, profile_id) REFERENCES memberships(tenant_id, profile_id)
        ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS invoices (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    matter_id TEXT NOT NULL,
    client_id TEXT NOT NULL,
    number TEXT,
    status TEXT NOT NULL
        CHECK (status IN ('draft', 'issued', 'partially_paid', 'paid', 'cancelled')),
    issue_date TEXT,
    due_date TEXT,
    period_start TEXT,
    period_end TEXT,
    net_total TEXT NOT NULL,
    vat_total TEXT NOT NULL,
    gross_total TEXT NOT NULL,
    paid_total TEXT NOT NULL DEFAULT '0',
    credited_total TEXT NOT NULL DEFAULT '0',
    currency TEXT NOT NULL,
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (tenant_id, id),
    UNIQUE (tenant_id, number),
    FOREIGN KEY (tenant_id, matter_id) REFERENCES matters(tenant_id, id),
    FOREIGN KEY (tenant_id, client_id) REFERENCES clients(tenant_id, id)
);

CREATE INDEX IF NOT EXISTS idx_invoices_status ON invoices(tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_invoices_matter ON invoices(tenant_id, matter_id);

CREATE TABLE IF NOT EXISTS invoice_lines (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    invoice_id TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('time', 'expense', 'fee')),
    description TEXT NOT NULL,
    quantity TEXT NOT NULL,
    unit_price TEXT NOT NULL,
    vat_rate TEXT NOT NULL,
    net_amount TEXT NOT NULL,
    sort_order INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (tenant_id, invoice_id) REFERENCES invoices(tenant_id, id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_invoice_lines_invoice ON invoice_lines(invoice_id, sort_order);

CREATE TABLE IF NOT EXISTS payments (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    invoice_id TEXT NOT NULL,
    amount TEXT NOT NULL,
    paid_on TEXT NOT NULL,
    method TEXT,
    reference TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (tenant_id, invoice_id) REFERENCES invoices(tenant_id, id)
);

CREATE INDEX IF NOT EXISTS idx_payments_invoice ON payments(invoice_id);

CREATE TABLE IF NOT EXISTS credit_notes (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    invoice_id TEXT NOT NULL,
    number TEXT NOT NULL,
    issue_date TEXT NOT NULL,
    reason TEXT,
    net_amount TEXT NOT NULL,
    vat_amount TEXT NOT NULL,
    gross_amount TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (tenant_id, number),
    FOREIGN KEY (tenant_id, invoice_id) REFERENCES invoices(tenant_id, id)
);

CREATE TABLE IF NOT EXISTS number_sequences (
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    kind TEXT NOT NULL CHECK (kind IN ('invoice', 'credit_note')),
    year INTEGER NOT NULL,
    last_value INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, kind, year)
);

CREATE TABLE IF NOT EXISTS time_entries (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    matter_id TEXT NOT NULL,
    profile_id TEXT NOT NULL,
    work_date TEXT NOT NULL,
    minutes INTEGER NOT NULL CHECK (minutes > 0),
    billed_minutes INTEGER NOT NULL CHECK (billed_minutes >= 0),
    description TEXT NOT NULL,
    billable INTEGER NOT NULL DEFAULT 1,
    hourly_rate TEXT,
    invoice_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (tenant_id, matter_id) REFERENCES matters(tenant_id, id),
    FOREIGN KEY (tenant_id, profile_id) REFERENCES memberships(tenant_id, profile_id),
    FOREIGN KEY (tenant_id, invoice_id) REFERENCES invoices(tenant_id, id)
);

CREATE INDEX IF NOT EXISTS idx_time_entries_matter ON time_entries(tenant_id, matter_id, work_date);
CREATE INDEX IF NOT EXISTS idx_time_entries_profile ON time_entries(tenant_id, profile_id, work_date);
CREATE INDEX IF NOT EXISTS idx_time_entries_invoice ON time_entries(invoice_id);

CREATE TABLE IF NOT EXISTS expenses (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    matter_id TEXT NOT NULL,
    profile_id TEXT NOT NULL,
    incurred_on TEXT NOT NULL,
    description TEXT NOT NULL,
    amount TEXT NOT NULL,
    vat_rate TEXT NOT NULL,
    billable INTEGER NOT NULL DEFAULT 1,
    invoice_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (tenant_id, matter_id) REFERENCES matters(tenant_id, id),
    FOREIGN KEY (tenant_id, profile_id) REFERENCES memberships(tenant_id, profile_id),
    FOREIGN KEY (tenant_id, invoice_id) REFERENCES invoices(tenant_id, id)
);

CREATE INDEX IF NOT EXISTS idx_expenses_matter ON expenses(tenant_id, matter_id, incurred_on);
CREATE INDEX IF NOT EXISTS idx_expenses_invoice ON expenses(invoice_id);

CREATE TABLE IF NOT EXISTS purchases (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id) ON DELETE CASCADE,
    supplier TEXT NOT NULL,
    description TEXT NOT NULL,
    purchased_on TEXT NOT NULL,
    net_amount TEXT NOT NULL,
    vat_rate TEXT NOT NULL,
    vat_amount TEXT NOT NULL,
    category TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_purchases_date ON purchases(tenant_id, purchased_on);

CREATE TABLE IF NOT EXISTS todos (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    matter_id TEXT,
    assignee_id TEXT,
    created_by TEXT NOT NULL,
    title TEXT NOT NULL,
    notes TEXT,
    due_on TEXT,
    done INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (tenant_id, matter_id) REFERENCES matters(tenant_id, id),
    FOREIGN KEY (tenant_id, assignee_id) REFERENCES memberships(tenant_id, profile_id),
    FOREIGN KEY (tenant_id, created_by) REFERENCES memberships(tenant_id, profile_id)
);

CREATE INDEX IF NOT EXISTS idx_todos_assignee ON todos(tenant_id, assignee_id, done);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    matter_id TEXT,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    read_at TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (tenant_id, sender_id) REFERENCES memberships(tenant_id, profile_id),
    FOREIGN KEY (tenant_id, recipient_id) REFERENCES memberships(tenant_id, profile_id),
    FOREIGN KEY (tenant_id, matter_id) REFERENCES matters(tenant_id, id)
);

CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(tenant_id, recipient_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(tenant_id, sender_id, created_at);

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    matter_id TEXT,
    client_id TEXT,
    uploaded_by TEXT NOT NULL,
    file_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    sha256 TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (tenant_id, matter_id) REFERENCES matters(tenant_id, id),
    FOREIGN KEY (tenant_id, client_id) REFERENCES clients(tenant_id, id),
    FOREIGN KEY (tenant_id, uploaded_by) REFERENCES memberships(tenant_id, profile_id)
);

CREATE INDEX IF NOT EXISTS idx_documents_matter ON documents(tenant_id, matter_id);
"#;
