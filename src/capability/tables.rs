//! Keyword tables for the enrichment phases.
//!
//! These are data on purpose: the matcher is a pure function of what's listed
//! here, so tolerating a new colloquialism is a table edit, not a code change.

/// Phase 1: technology vocabulary matched directly against prompt words.
/// Single words match on word prefix ("deploy" covers "deployment"),
/// multi-word entries match as phrases.
pub const TECH_VOCAB: &[&str] = &[
    "rust",
    "cargo",
    "python",
    "javascript",
    "typescript",
    "react",
    "vue",
    "css",
    "html",
    "styling",
    "ui",
    "frontend",
    "sql",
    "postgres",
    "database",
    "migration",
    "docker",
    "kubernetes",
    "container",
    "deploy",
    "ci",
    "auth",
    "oauth",
    "token",
    "password",
    "security",
    "test",
    "coverage",
    "api",
    "render",
];

/// Phase 2: colloquial and mixed-language phrasings mapped to canonical
/// keywords. Keys match as phrases against the lowered prompt.
pub const SYNONYMS: &[(&str, &[&str])] = &[
    ("not showing", &["render", "ui"]),
    ("doesn't work", &["bug"]),
    ("does not work", &["bug"]),
    ("not working", &["bug"]),
    ("broken", &["bug"]),
    ("looks weird", &["ui", "styling"]),
    ("looks wrong", &["ui", "styling"]),
    ("messed up", &["bug"]),
    ("panel", &["ui", "dashboard"]),
    ("screen", &["ui"]),
    ("page", &["ui"]),
    ("log in", &["auth"]),
    ("sign in", &["auth"]),
    ("kaputt", &["bug"]),
    ("no funciona", &["bug"]),
    ("ne marche pas", &["bug"]),
    ("crash", &["bug"]),
    ("hangs", &["bug", "performance"]),
    ("slow", &["performance"]),
];

/// Phase 3: one keyword pulls in its neighbours, so a UI defect also carries
/// layout and styling terms into registry matching.
pub const CONTEXT_EXPANSIONS: &[(&str, &[&str])] = &[
    ("ui", &["layout", "styling", "css"]),
    ("render", &["ui", "layout"]),
    ("css", &["styling", "layout"]),
    ("auth", &["security", "session"]),
    ("password", &["security", "auth"]),
    ("docker", &["deploy", "container"]),
    ("kubernetes", &["deploy", "container"]),
    ("database", &["sql", "migration"]),
    ("bug", &["debugging"]),
    ("performance", &["profiling"]),
    ("test", &["coverage"]),
];

/// Phase 4: file extensions mentioned in the prompt hint at domains.
pub const EXTENSION_HINTS: &[(&str, &[&str])] = &[
    (".css", &["css", "styling"]),
    (".scss", &["css", "styling"]),
    (".tsx", &["react", "ui", "typescript"]),
    (".jsx", &["react", "ui", "javascript"]),
    (".rs", &["rust"]),
    (".py", &["python"]),
    (".sql", &["sql", "database"]),
    (".yml", &["ci", "deploy"]),
    (".yaml", &["ci", "deploy"]),
    ("dockerfile", &["docker", "deploy"]),
];
