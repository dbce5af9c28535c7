use poker_core::CardSourceError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("list not found: {0}")]
    ListNotFound(String),

    #[error("card not found: {0}")]
    CardNotFound(String),

    #[error("card {0} already exists")]
    DuplicateCard(String),

    #[error("invalid seed file: {0}")]
    Seed(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Seed(e.to_string())
    }
}

impl From<StoreError> for CardSourceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ListNotFound(id) => CardSourceError::ListNotFound(id),
            StoreError::CardNotFound(id) => CardSourceError::CardNotFound(id),
            other => CardSourceError::Unavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn maps_onto_card_source_errors() {
        assert_matches!(
            CardSourceError::from(StoreError::ListNotFound("l1".into())),
            CardSourceError::ListNotFound(id) if id == "l1"
        );
        assert_matches!(
            CardSourceError::from(StoreError::Database("locked".into())),
            CardSourceError::Unavailable(msg) if msg.contains("locked")
        );
    }
}
