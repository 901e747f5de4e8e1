//! The in-memory reference implementation of the store.
//!
//! Backs the test-suite and small deployments. All tables live under one
//! mutex; a batch is validated in full before anything is applied, which
//! gives the same all-or-nothing behavior a relational transaction would.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;

use super::{
    AuctionAggregate,
    EventRecord,
    Repository,
    RepositoryError,
    Write,
    WriteBatch,
};
use crate::{
    events::EventEnvelope,
    model::{
        Auction,
        AuctionId,
        Bid,
        BudgetTransaction,
        Lot,
        LotId,
        Player,
        PlayerId,
        RosterEntry,
        Season,
        SeasonId,
        Team,
        TeamId,
    },
};

#[derive(Default)]
struct Tables {
    seasons: HashMap<SeasonId, Season>,
    teams: HashMap<TeamId, Team>,
    players: HashMap<PlayerId, Player>,
    auctions: HashMap<AuctionId, Auction>,
    lots: HashMap<LotId, Lot>,
    /// Placement order is insertion order.
    bids: Vec<Bid>,
    roster: Vec<RosterEntry>,
    budget_transactions: Vec<BudgetTransaction>,
    /// Per-auction log, ascending by sequence.
    events: HashMap<AuctionId, Vec<EventRecord>>,
}

#[derive(Default)]
pub struct InMemoryRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_season(&self, season: Season) {
        self.lock().seasons.insert(season.id, season);
    }

    pub fn insert_team(&self, team: Team) {
        self.lock().teams.insert(team.id, team);
    }

    pub fn insert_player(&self, player: Player) {
        self.lock().players.insert(player.id, player);
    }

    pub fn insert_auction(&self, auction: Auction) {
        self.lock().auctions.insert(auction.id, auction);
    }

    pub fn insert_lot(&self, lot: Lot) {
        self.lock().lots.insert(lot.id, lot);
    }

    /// Seeds a roster entry, e.g. a player won in an earlier auction of the
    /// season.
    pub fn insert_roster_entry(&self, entry: RosterEntry) {
        self.lock().roster.push(entry);
    }

    /// A consistent copy of a team row, for assertions.
    #[must_use]
    pub fn team(&self, team_id: TeamId) -> Option<Team> {
        self.lock().teams.get(&team_id).cloned()
    }

    /// A consistent copy of a lot row, for assertions.
    #[must_use]
    pub fn lot(&self, lot_id: LotId) -> Option<Lot> {
        self.lock().lots.get(&lot_id).cloned()
    }

    /// All roster entries of a team, for assertions.
    #[must_use]
    pub fn roster_of(&self, team_id: TeamId) -> Vec<RosterEntry> {
        self.lock()
            .roster
            .iter()
            .filter(|entry| entry.team_id == team_id)
            .cloned()
            .collect()
    }

    /// All budget transactions of a team, for assertions.
    #[must_use]
    pub fn budget_transactions_of(&self, team_id: TeamId) -> Vec<BudgetTransaction> {
        self.lock()
            .budget_transactions
            .iter()
            .filter(|tx| tx.team_id == team_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn validate(tables: &Tables, batch: &WriteBatch) -> Result<(), RepositoryError> {
        let mut appended_in_batch = std::collections::HashSet::new();
        for write in batch.writes() {
            match write {
                Write::UpdateAuction {
                    auction_id, ..
                } => {
                    if !tables.auctions.contains_key(auction_id) {
                        return Err(RepositoryError::MissingEntity {
                            entity: format!("auction `{auction_id}`"),
                        });
                    }
                }
                Write::UpdateLot(lot) => {
                    if !tables.lots.contains_key(&lot.id) {
                        return Err(RepositoryError::MissingEntity {
                            entity: format!("lot `{}`", lot.id),
                        });
                    }
                }
                Write::UpdateTeamBudget {
                    team_id, ..
                } => {
                    if !tables.teams.contains_key(team_id) {
                        return Err(RepositoryError::MissingEntity {
                            entity: format!("team `{team_id}`"),
                        });
                    }
                }
                Write::AppendEvent(record) => {
                    let log = tables.events.get(&record.auction_id);
                    let exists = log.is_some_and(|log| {
                        log.binary_search_by_key(&record.sequence, |row| row.sequence)
                            .is_ok()
                    });
                    if exists || !appended_in_batch.insert((record.auction_id, record.sequence)) {
                        return Err(RepositoryError::SequenceConflict {
                            auction_id: record.auction_id,
                            sequence: record.sequence,
                        });
                    }
                }
                Write::InsertBid(_)
                | Write::InsertRosterEntry(_)
                | Write::InsertBudgetTransaction(_) => {}
            }
        }
        Ok(())
    }

    fn apply(tables: &mut Tables, batch: WriteBatch) {
        for write in batch.writes().iter().cloned() {
            match write {
                Write::UpdateAuction {
                    auction_id,
                    status,
                    current_lot,
                } => {
                    let auction = tables
                        .auctions
                        .get_mut(&auction_id)
                        .expect("validated before apply");
                    auction.status = status;
                    auction.current_lot = current_lot;
                }
                Write::UpdateLot(lot) => {
                    tables.lots.insert(lot.id, lot);
                }
                Write::InsertBid(bid) => tables.bids.push(bid),
                Write::InsertRosterEntry(entry) => tables.roster.push(entry),
                Write::InsertBudgetTransaction(tx) => tables.budget_transactions.push(tx),
                Write::UpdateTeamBudget {
                    team_id,
                    budget_spent,
                } => {
                    tables
                        .teams
                        .get_mut(&team_id)
                        .expect("validated before apply")
                        .budget_spent = budget_spent;
                }
                Write::AppendEvent(record) => {
                    let log = tables.events.entry(record.auction_id).or_default();
                    let at = log
                        .binary_search_by_key(&record.sequence, |row| row.sequence)
                        .expect_err("validated before apply");
                    log.insert(at, record);
                }
            }
        }
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn load_auction(
        &self,
        auction_id: AuctionId,
    ) -> Result<Option<AuctionAggregate>, RepositoryError> {
        let tables = self.lock();
        let Some(auction) = tables.auctions.get(&auction_id).cloned() else {
            return Ok(None);
        };
        let season = tables
            .seasons
            .get(&auction.season_id)
            .cloned()
            .ok_or_else(|| RepositoryError::MissingEntity {
                entity: format!("season `{}`", auction.season_id),
            })?;

        let mut lots: Vec<Lot> = tables
            .lots
            .values()
            .filter(|lot| lot.auction_id == auction_id)
            .cloned()
            .collect();
        lots.sort_by_key(|lot| lot.order);

        let lot_ids: Vec<LotId> = lots.iter().map(|lot| lot.id).collect();
        let bids: Vec<Bid> = tables
            .bids
            .iter()
            .filter(|bid| lot_ids.contains(&bid.lot_id))
            .cloned()
            .collect();

        let teams: Vec<Team> = tables
            .teams
            .values()
            .filter(|team| team.season_id == auction.season_id)
            .cloned()
            .collect();
        // Squad caps count everything a team holds in the season, also what
        // it won in earlier auctions.
        let roster: Vec<RosterEntry> = tables
            .roster
            .iter()
            .filter(|entry| teams.iter().any(|team| team.id == entry.team_id))
            .cloned()
            .collect();
        let players: Vec<Player> = tables
            .players
            .values()
            .filter(|player| player.season_id == auction.season_id)
            .cloned()
            .collect();

        let last_sequence = tables
            .events
            .get(&auction_id)
            .and_then(|log| log.last())
            .map_or(0, |row| row.sequence);

        Ok(Some(AuctionAggregate {
            auction,
            season,
            teams,
            players,
            lots,
            bids,
            roster,
            last_sequence,
        }))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), RepositoryError> {
        let mut tables = self.lock();
        Self::validate(&tables, &batch)?;
        Self::apply(&mut tables, batch);
        Ok(())
    }

    async fn events_since(
        &self,
        auction_id: AuctionId,
        after_sequence: u64,
        limit: usize,
    ) -> Result<Vec<EventEnvelope>, RepositoryError> {
        let tables = self.lock();
        let Some(log) = tables.events.get(&auction_id) else {
            return Ok(Vec::new());
        };
        let start = log.partition_point(|row| row.sequence <= after_sequence);
        log[start..]
            .iter()
            .take(limit)
            .map(EventRecord::decode)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{
            AuctionSettings,
            SeasonSettings,
        },
        events::AuctionEvent,
        model::AuctionStatus,
    };

    fn record(auction_id: AuctionId, sequence: u64) -> EventRecord {
        EventRecord {
            auction_id,
            sequence,
            timestamp: "2026-03-01T10:00:00Z".parse().unwrap(),
            payload: AuctionEvent::AuctionStarted {
                auction_id,
            }
            .to_blob(),
        }
    }

    fn seeded_auction(repo: &InMemoryRepository) -> AuctionId {
        let season = Season {
            id: SeasonId::new(),
            name: "season".into(),
            settings: SeasonSettings::default(),
        };
        let auction = Auction {
            id: AuctionId::new(),
            season_id: season.id,
            status: AuctionStatus::NotStarted,
            current_lot: None,
            settings: AuctionSettings::default(),
        };
        let auction_id = auction.id;
        repo.insert_season(season);
        repo.insert_auction(auction);
        auction_id
    }

    #[tokio::test]
    async fn load_unknown_auction_returns_none() {
        let repo = InMemoryRepository::new();
        assert!(repo.load_auction(AuctionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sequence_conflict_rolls_back_the_whole_batch() {
        let repo = InMemoryRepository::new();
        let auction_id = seeded_auction(&repo);

        let mut batch = WriteBatch::new();
        batch.push(Write::AppendEvent(record(auction_id, 1)));
        repo.commit(batch).await.unwrap();

        // A batch mixing a status update with a conflicting append must leave
        // the status untouched.
        let mut batch = WriteBatch::new();
        batch.push(Write::UpdateAuction {
            auction_id,
            status: AuctionStatus::InProgress,
            current_lot: None,
        });
        batch.push(Write::AppendEvent(record(auction_id, 1)));
        let err = repo.commit(batch).await.unwrap_err();
        assert!(matches!(err, RepositoryError::SequenceConflict { .. }));

        let aggregate = repo.load_auction(auction_id).await.unwrap().unwrap();
        assert_eq!(aggregate.auction.status, AuctionStatus::NotStarted);
        assert_eq!(aggregate.last_sequence, 1);
    }

    #[tokio::test]
    async fn events_since_pages_in_order() {
        let repo = InMemoryRepository::new();
        let auction_id = seeded_auction(&repo);

        for sequence in 1..=5 {
            let mut batch = WriteBatch::new();
            batch.push(Write::AppendEvent(record(auction_id, sequence)));
            repo.commit(batch).await.unwrap();
        }

        let page = repo.events_since(auction_id, 2, 2).await.unwrap();
        assert_eq!(
            page.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![3, 4],
        );
        let rest = repo.events_since(auction_id, 4, 100).await.unwrap();
        assert_eq!(rest.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![5]);
        assert!(repo.events_since(auction_id, 5, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_sequence_reflects_the_log() {
        let repo = InMemoryRepository::new();
        let auction_id = seeded_auction(&repo);
        assert_eq!(
            repo.load_auction(auction_id)
                .await
                .unwrap()
                .unwrap()
                .last_sequence,
            0,
        );

        let mut batch = WriteBatch::new();
        batch.push(Write::AppendEvent(record(auction_id, 1)));
        batch.push(Write::AppendEvent(record(auction_id, 2)));
        repo.commit(batch).await.unwrap();
        assert_eq!(
            repo.load_auction(auction_id)
                .await
                .unwrap()
                .unwrap()
                .last_sequence,
            2,
        );
    }
}
