use std::fmt;

/// Persistence failures the core branches on.
#[derive(Debug)]
pub enum StoreError {
    /// A uniqueness key is already taken (email, or client + time).
    Conflict(String),
    /// A referenced row does not exist (appointment for an unknown client).
    MissingReference(String),
    NotFound(String),
    Backend(anyhow::Error),
}

impl StoreError {
    /// Map a sqlx error by SQLSTATE: 23505 unique violation, 23503 foreign key.
    pub fn from_sqlx(err: sqlx::Error, ctx: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let constraint = db_err.constraint().unwrap_or("-").to_string();
            match db_err.code().as_deref() {
                Some("23505") => {
                    return StoreError::Conflict(format!("{ctx} constraint={constraint}"))
                }
                Some("23503") => {
                    return StoreError::MissingReference(format!("{ctx} constraint={constraint}"))
                }
                _ => {}
            }
        }
        StoreError::Backend(anyhow::Error::new(err).context(ctx.to_string()))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Conflict(msg) => write!(f, "conflict: {msg}"),
            StoreError::MissingReference(msg) => write!(f, "missing reference: {msg}"),
            StoreError::NotFound(msg) => write!(f, "not found: {msg}"),
            StoreError::Backend(e) => write!(f, "store backend error: {e:#}"),
        }
    }
}

impl std::error::Error for StoreError {}
