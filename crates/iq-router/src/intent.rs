use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    DatabaseQuery,
    DocumentQuery,
    AnalyticsQuery,
    HybridQuery,
    GeneralChat,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::DatabaseQuery => "database_query",
            Intent::DocumentQuery => "document_query",
            Intent::AnalyticsQuery => "analytics_query",
            Intent::HybridQuery => "hybrid_query",
            Intent::GeneralChat => "general_chat",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(hi|hello|hey|good\s*(morning|afternoon|evening|day)|howdy|greetings|what'?s\s*up|sup|hiya)\b",
    )
    .expect("greeting pattern")
});

const GREETING_MAX_TOKENS: usize = 8;

const DB_KEYWORDS: &[&str] = &[
    "table", "tables", "column", "columns", "row", "rows", "database", "db", "query", "sql",
    "select", "count", "sum", "average", "avg", "total", "maximum", "minimum", "max", "min",
    "group by", "order by", "where", "join", "schema", "record", "records", "field", "fields",
    "entry", "entries", "revenue", "sales", "profit", "employee", "employees", "customer",
    "customers", "order", "orders", "product", "products", "invoice", "transaction",
    "transactions", "aggregate", "filter", "show me", "list all", "how many", "fetch",
    "retrieve", "get all",
];

const DOC_KEYWORDS: &[&str] = &[
    "document", "documents", "file", "files", "pdf", "docx", "report", "uploaded", "text",
    "paragraph", "page", "pages", "summary", "summarize", "what does", "what did",
    "according to", "the document", "the report", "the file", "mention", "mentions", "stated",
    "states", "content", "section", "chapters", "article", "clause", "contract", "policy",
];

const ANALYTICS_KEYWORDS: &[&str] = &[
    "chart", "charts", "graph", "plot", "visualise", "visualize", "trend", "trends", "growth",
    "decline", "over time", "month by month", "year by year", "bar chart", "line chart",
    "pie chart", "histogram", "comparison", "compare", "distribution", "breakdown",
];

/// Keyword hits per vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassifierScores {
    pub db: usize,
    pub doc: usize,
    pub analytics: usize,
}

impl ClassifierScores {
    /// Substring counts, so short keywords also hit inside longer words
    /// ("db" in "feedback", "row" in "grow").
    pub fn of(lowered: &str) -> Self {
        let hits = |vocab: &[&str]| vocab.iter().filter(|kw| lowered.contains(*kw)).count();
        Self {
            db: hits(DB_KEYWORDS),
            doc: hits(DOC_KEYWORDS),
            analytics: hits(ANALYTICS_KEYWORDS),
        }
    }
}

/// Rule-based intent classification. Pure and deterministic.
pub fn classify(question: &str) -> Intent {
    let text = question.trim().to_lowercase();

    if GREETING.is_match(&text) && text.split_whitespace().count() <= GREETING_MAX_TOKENS {
        debug!(intent = "greeting", "classified question");
        return Intent::Greeting;
    }

    let scores = ClassifierScores::of(&text);
    let intent = if scores.db >= 1 && scores.doc >= 1 {
        Intent::HybridQuery
    } else if scores.analytics >= 1 && scores.doc == 0 {
        Intent::AnalyticsQuery
    } else if scores.db >= 1 {
        Intent::DatabaseQuery
    } else if scores.doc >= 1 {
        Intent::DocumentQuery
    } else {
        Intent::GeneralChat
    };
    debug!(intent = intent.as_str(), ?scores, "classified question");
    intent
}
