//! Card lists persisted in SQLite, exposed to the engine as a [`CardSource`].

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use poker_core::ids::{CardId, ListId};
use poker_core::{Card, CardSource, CardSourceError};

use crate::database::Database;
use crate::error::StoreError;

/// One list in a seed file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedList {
    pub list_id: ListId,
    pub name: String,
    #[serde(default)]
    pub cards: Vec<Card>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub lists: usize,
    pub cards: usize,
}

#[derive(Clone)]
pub struct CardRepo {
    db: Database,
}

impl CardRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a list, or rename it when it already exists.
    #[instrument(skip(self), fields(list_id = %list_id))]
    pub fn upsert_list(&self, list_id: &ListId, name: &str) -> Result<(), StoreError> {
        self.db.with_conn(|conn| upsert_list(conn, list_id, name))
    }

    /// Append a card to the end of a list.
    #[instrument(skip(self, card), fields(list_id = %list_id, card_id = %card.card_id))]
    pub fn add_card(&self, list_id: &ListId, card: &Card) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            require_list(conn, list_id)?;
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM cards WHERE id = ?1)",
                [card.card_id.as_str()],
                |row| row.get(0),
            )?;
            if exists {
                return Err(StoreError::DuplicateCard(card.card_id.to_string()));
            }
            let position: i64 = conn.query_row(
                "SELECT COALESCE(MAX(position), -1) + 1 FROM cards WHERE list_id = ?1",
                [list_id.as_str()],
                |row| row.get(0),
            )?;
            insert_card(conn, list_id, position, card)
        })
    }

    /// Cards of a list in board order.
    #[instrument(skip(self), fields(list_id = %list_id))]
    pub fn list_cards(&self, list_id: &ListId) -> Result<Vec<Card>, StoreError> {
        self.db.with_conn(|conn| {
            require_list(conn, list_id)?;
            let mut stmt = conn.prepare(
                "SELECT id, name, description, story_points FROM cards
                 WHERE list_id = ?1 ORDER BY position, id",
            )?;
            let cards = stmt
                .query_map([list_id.as_str()], |row| {
                    Ok(Card {
                        card_id: CardId::from_raw(row.get::<_, String>(0)?),
                        name: row.get(1)?,
                        description: row.get(2)?,
                        story_points: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(cards)
        })
    }

    #[instrument(skip(self), fields(card_id = %card_id))]
    pub fn get_card(&self, card_id: &CardId) -> Result<Card, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, description, story_points FROM cards WHERE id = ?1",
                [card_id.as_str()],
                |row| {
                    Ok(Card {
                        card_id: CardId::from_raw(row.get::<_, String>(0)?),
                        name: row.get(1)?,
                        description: row.get(2)?,
                        story_points: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::CardNotFound(card_id.to_string()))
        })
    }

    #[instrument(skip(self), fields(card_id = %card_id))]
    pub fn set_story_points(&self, card_id: &CardId, points: f64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE cards SET story_points = ?1, updated_at = ?2 WHERE id = ?3",
                params![points, Utc::now().to_rfc3339(), card_id.as_str()],
            )?;
            if updated == 0 {
                return Err(StoreError::CardNotFound(card_id.to_string()));
            }
            Ok(())
        })
    }

    /// Replace the contents of every list in `lists` inside one transaction.
    /// Lists not mentioned are left alone.
    pub fn import(&self, lists: &[SeedList]) -> Result<SeedReport, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut report = SeedReport::default();
            for list in lists {
                upsert_list(&tx, &list.list_id, &list.name)?;
                let _ = tx.execute("DELETE FROM cards WHERE list_id = ?1", [list.list_id.as_str()])?;
                for (position, card) in list.cards.iter().enumerate() {
                    insert_card(&tx, &list.list_id, position as i64, card)?;
                }
                report.lists += 1;
                report.cards += list.cards.len();
            }
            tx.commit()?;
            debug!(lists = report.lists, cards = report.cards, "seed imported");
            Ok(report)
        })
    }

    /// Parse a JSON array of [`SeedList`] and [`import`](Self::import) it.
    pub fn import_file(&self, path: &Path) -> Result<SeedReport, StoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Io(format!("read {}: {e}", path.display())))?;
        let lists: Vec<SeedList> = serde_json::from_str(&raw)?;
        self.import(&lists)
    }
}

fn require_list(conn: &Connection, list_id: &ListId) -> Result<(), StoreError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM lists WHERE id = ?1)",
        [list_id.as_str()],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(StoreError::ListNotFound(list_id.to_string()))
    }
}

fn upsert_list(conn: &Connection, list_id: &ListId, name: &str) -> Result<(), StoreError> {
    let _ = conn.execute(
        "INSERT INTO lists (id, name, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        params![list_id.as_str(), name, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn insert_card(conn: &Connection, list_id: &ListId, position: i64, card: &Card) -> Result<(), StoreError> {
    let _ = conn.execute(
        "INSERT INTO cards (id, list_id, position, name, description, story_points, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            card.card_id.as_str(),
            list_id.as_str(),
            position,
            card.name,
            card.description,
            card.story_points,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl CardSource for CardRepo {
    async fn list_candidates(&self, list_id: &ListId) -> Result<Vec<Card>, CardSourceError> {
        let repo = self.clone();
        let list_id = list_id.clone();
        tokio::task::spawn_blocking(move || repo.list_cards(&list_id))
            .await
            .map_err(|e| CardSourceError::Unavailable(format!("card store task failed: {e}")))?
            .map_err(CardSourceError::from)
    }

    async fn set_story_points(&self, card_id: &CardId, points: f64) -> Result<(), CardSourceError> {
        let repo = self.clone();
        let card_id = card_id.clone();
        tokio::task::spawn_blocking(move || CardRepo::set_story_points(&repo, &card_id, points))
            .await
            .map_err(|e| CardSourceError::Unavailable(format!("card store task failed: {e}")))?
            .map_err(CardSourceError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn repo() -> CardRepo {
        CardRepo::new(Database::in_memory().unwrap())
    }

    fn card(id: &str, points: Option<f64>) -> Card {
        Card {
            card_id: CardId::from_raw(id),
            name: format!("Story {id}"),
            description: Some(format!("Details for {id}")),
            story_points: points,
        }
    }

    fn seeded() -> CardRepo {
        let repo = repo();
        repo.import(&[SeedList {
            list_id: ListId::from_raw("sprint-1"),
            name: "Sprint 1".into(),
            cards: vec![card("c1", None), card("c2", Some(3.0)), card("c3", None)],
        }])
        .unwrap();
        repo
    }

    #[test]
    fn cards_come_back_in_board_order() {
        let repo = seeded();
        let cards = repo.list_cards(&ListId::from_raw("sprint-1")).unwrap();
        let ids: Vec<_> = cards.iter().map(|c| c.card_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(cards[1].story_points, Some(3.0));
        assert_eq!(cards[0].description.as_deref(), Some("Details for c1"));
    }

    #[test]
    fn unknown_list_is_an_error() {
        let repo = seeded();
        assert_matches!(
            repo.list_cards(&ListId::from_raw("nope")),
            Err(StoreError::ListNotFound(_))
        );
    }

    #[test]
    fn empty_list_has_no_cards() {
        let repo = repo();
        repo.upsert_list(&ListId::from_raw("empty"), "Empty").unwrap();
        assert!(repo.list_cards(&ListId::from_raw("empty")).unwrap().is_empty());
    }

    #[test]
    fn add_card_appends() {
        let repo = seeded();
        let list = ListId::from_raw("sprint-1");
        repo.add_card(&list, &card("c4", None)).unwrap();
        let cards = repo.list_cards(&list).unwrap();
        assert_eq!(cards.last().unwrap().card_id.as_str(), "c4");

        assert_matches!(
            repo.add_card(&list, &card("c4", None)),
            Err(StoreError::DuplicateCard(_))
        );
        assert_matches!(
            repo.add_card(&ListId::from_raw("missing"), &card("c5", None)),
            Err(StoreError::ListNotFound(_))
        );
    }

    #[test]
    fn story_points_write_back() {
        let repo = seeded();
        repo.set_story_points(&CardId::from_raw("c3"), 8.0).unwrap();
        assert_eq!(repo.get_card(&CardId::from_raw("c3")).unwrap().story_points, Some(8.0));
        assert_matches!(
            repo.set_story_points(&CardId::from_raw("ghost"), 1.0),
            Err(StoreError::CardNotFound(_))
        );
    }

    #[test]
    fn reimport_replaces_list_contents() {
        let repo = seeded();
        let report = repo
            .import(&[SeedList {
                list_id: ListId::from_raw("sprint-1"),
                name: "Sprint 1 (replanned)".into(),
                cards: vec![card("c9", None)],
            }])
            .unwrap();
        assert_eq!(report, SeedReport { lists: 1, cards: 1 });
        let cards = repo.list_cards(&ListId::from_raw("sprint-1")).unwrap();
        assert_eq!(cards.len(), 1);
        assert_matches!(
            repo.get_card(&CardId::from_raw("c1")),
            Err(StoreError::CardNotFound(_))
        );
    }

    #[test]
    fn import_file_parses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(
            &path,
            r#"[{"listId": "L", "name": "Backlog", "cards": [
                {"cardId": "a", "name": "Login page"},
                {"cardId": "b", "name": "Export", "description": "CSV", "storyPoints": 5}
            ]}]"#,
        )
        .unwrap();
        let repo = repo();
        let report = repo.import_file(&path).unwrap();
        assert_eq!(report, SeedReport { lists: 1, cards: 2 });
        assert_eq!(repo.get_card(&CardId::from_raw("b")).unwrap().story_points, Some(5.0));
    }

    #[test]
    fn bad_seed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, r#"{"not": "a list"}"#).unwrap();
        assert_matches!(repo().import_file(&path), Err(StoreError::Seed(_)));
    }

    #[tokio::test]
    async fn card_source_contract() {
        let repo = seeded();
        let source: &dyn CardSource = &repo;
        let cards = source.list_candidates(&ListId::from_raw("sprint-1")).await.unwrap();
        assert_eq!(cards.len(), 3);

        source.set_story_points(&CardId::from_raw("c1"), 2.0).await.unwrap();
        assert_eq!(repo.get_card(&CardId::from_raw("c1")).unwrap().story_points, Some(2.0));

        assert_matches!(
            source.list_candidates(&ListId::from_raw("nope")).await,
            Err(CardSourceError::ListNotFound(_))
        );
        assert_matches!(
            source.set_story_points(&CardId::from_raw("ghost"), 2.0).await,
            Err(CardSourceError::CardNotFound(_))
        );
    }
}
