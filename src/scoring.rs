//! Turns ballots into rank scores and aggregates stored votes into leaderboard and player
//! statistics. Nothing in here touches the database: callers load the sessions they care about
//! (already filtered by game) into [`SessionTally`] values first.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::model::{
    ChartPoint, GameBreakdown, GameScorePoint, LeaderboardRow, Player, PlayerDetail,
    PlayerOverall, Session, SessionHistoryEntry, Vote,
};

/// Format of the x-axis labels of the score-over-time chart.
pub const CHART_DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Why a submitted ranking is not a ranking of exactly the session's participants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BallotError {
    #[error("expected {expected} ranked players, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("player {0} is ranked more than once")]
    DuplicateTarget(i32),
    #[error("player {0} is not a participant")]
    UnknownTarget(i32),
    #[error("rankings are not a list of player ids: {0}")]
    Unreadable(String),
}

/// Reads a ranking sent as a JSON array of player ids, best first.
pub fn parse_rankings(rankings: &str) -> Result<Vec<i32>, BallotError> {
    serde_json::from_str(rankings).map_err(|e| BallotError::Unreadable(e.to_string()))
}

/// Checks that `ranked_ids` is a permutation of `participant_ids`.
pub fn validate_ballot(ranked_ids: &[i32], participant_ids: &[i32]) -> Result<(), BallotError> {
    let participants: HashSet<i32> = participant_ids.iter().copied().collect();
    let mut seen = HashSet::with_capacity(ranked_ids.len());
    for &target_id in ranked_ids {
        if !participants.contains(&target_id) {
            return Err(BallotError::UnknownTarget(target_id));
        }
        if !seen.insert(target_id) {
            return Err(BallotError::DuplicateTarget(target_id));
        }
    }
    if seen.len() != participants.len() {
        return Err(BallotError::WrongLength {
            expected: participants.len(),
            got: ranked_ids.len(),
        });
    }
    Ok(())
}

/// Pairs each ranked player (best first) with its rank score: the first of N gets N, the last
/// gets 1.
pub fn ballot_scores(ranked_ids: &[i32]) -> Vec<(i32, i32)> {
    let n = ranked_ids.len() as i32;
    ranked_ids
        .iter()
        .enumerate()
        .map(|(index, &target_id)| (target_id, n - index as i32))
        .collect()
}

/// True once every participant appears among the voters.
pub fn all_participants_voted(participant_ids: &[i32], voter_ids: &[i32]) -> bool {
    let voters: HashSet<i32> = voter_ids.iter().copied().collect();
    participant_ids.iter().all(|id| voters.contains(id))
}

/// A session with its participants and every vote cast in it.
#[derive(Debug, Clone)]
pub struct SessionTally {
    pub session: Session,
    pub game_name: String,
    pub participant_ids: Vec<i32>,
    pub votes: Vec<Vote>,
}

impl SessionTally {
    /// The session size N, which is also the king score.
    pub fn participant_count(&self) -> i32 {
        self.participant_ids.len() as i32
    }

    pub fn includes(&self, player_id: i32) -> bool {
        self.participant_ids.contains(&player_id)
    }

    fn votes_for(&self, player_id: i32) -> impl Iterator<Item = &Vote> + '_ {
        self.votes
            .iter()
            .filter(move |v| v.target_player_id == player_id)
    }

    pub fn score_of(&self, player_id: i32) -> i32 {
        self.votes_for(player_id).map(|v| v.rank_score).sum()
    }

    pub fn king_count_of(&self, player_id: i32) -> i32 {
        let n = self.participant_count();
        self.votes_for(player_id)
            .filter(|v| v.rank_score == n)
            .count() as i32
    }

    pub fn cone_count_of(&self, player_id: i32) -> i32 {
        self.votes_for(player_id)
            .filter(|v| v.rank_score == 1)
            .count() as i32
    }

    /// 1-based position of `player_id` when participants are ordered by their score in this
    /// session, highest first. Equal scores are ordered by player id.
    pub fn rank_of(&self, player_id: i32) -> Option<i32> {
        let mut standings: Vec<(i32, i32)> = self
            .participant_ids
            .iter()
            .map(|&id| (id, self.score_of(id)))
            .collect();
        standings.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        standings
            .iter()
            .position(|&(id, _)| id == player_id)
            .map(|index| index as i32 + 1)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    score: i32,
    king_count: i32,
    cone_count: i32,
    sessions: i32,
}

impl Totals {
    fn add(&mut self, tally: &SessionTally, player_id: i32) {
        self.score += tally.score_of(player_id);
        self.king_count += tally.king_count_of(player_id);
        self.cone_count += tally.cone_count_of(player_id);
        if tally.includes(player_id) {
            self.sessions += 1;
        }
    }

    fn over<'a>(tallies: impl IntoIterator<Item = &'a SessionTally>, player_id: i32) -> Self {
        let mut totals = Totals::default();
        for tally in tallies {
            totals.add(tally, player_id);
        }
        totals
    }
}

/// Builds the leaderboard over `tallies` for every player, highest score first. Equal scores are
/// ordered by player id.
pub fn compute_leaderboard(players: &[Player], tallies: &[SessionTally]) -> Vec<LeaderboardRow> {
    let mut rows: Vec<LeaderboardRow> = players
        .iter()
        .map(|player| {
            let totals = Totals::over(tallies, player.id);
            LeaderboardRow {
                player_id: player.id,
                name: player.name.clone(),
                score: totals.score,
                sessions_participated: totals.sessions,
                cone_count: totals.cone_count,
                king_count: totals.king_count,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.score.cmp(&a.score).then(a.player_id.cmp(&b.player_id)));
    rows
}

/// Computes everything the player page shows for `player` over `tallies`.
pub fn compute_player_detail(player: &Player, tallies: &[SessionTally]) -> PlayerDetail {
    let overall_totals = Totals::over(tallies, player.id);
    let own: Vec<&SessionTally> = tallies.iter().filter(|t| t.includes(player.id)).collect();

    let overall = PlayerOverall {
        score: overall_totals.score,
        king_count: overall_totals.king_count,
        cone_count: overall_totals.cone_count,
        sessions_count: own.len() as i32,
    };

    let by_game = breakdown_by_game(player.id, &own);

    let mut session_history: Vec<SessionHistoryEntry> = own
        .iter()
        .map(|tally| SessionHistoryEntry {
            session_id: tally.session.id,
            game_name: tally.game_name.clone(),
            date: tally.session.date,
            score_in_session: tally.score_of(player.id),
            was_king: tally.king_count_of(player.id) > 0,
            was_cone: tally.cone_count_of(player.id) > 0,
            rank_in_session: tally.rank_of(player.id).unwrap_or(1),
        })
        .collect();
    session_history.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then(b.session_id.cmp(&a.session_id))
    });

    let chart_over_time = session_history
        .iter()
        .rev()
        .map(|entry| ChartPoint {
            date_label: entry.date.format(CHART_DATE_FORMAT).to_string(),
            score: entry.score_in_session,
            king: u8::from(entry.was_king),
            cone: u8::from(entry.was_cone),
        })
        .collect();

    let chart_by_game = by_game
        .iter()
        .map(|g| GameScorePoint {
            game_name: g.game_name.clone(),
            score: g.score,
        })
        .collect();

    PlayerDetail {
        player: player.clone(),
        overall,
        by_game,
        session_history,
        chart_over_time,
        chart_by_game,
    }
}

fn breakdown_by_game(player_id: i32, own: &[&SessionTally]) -> Vec<GameBreakdown> {
    let mut groups: HashMap<i32, (String, Vec<&SessionTally>)> = HashMap::new();
    for tally in own {
        groups
            .entry(tally.session.game_id)
            .or_insert_with(|| (tally.game_name.clone(), Vec::new()))
            .1
            .push(tally);
    }

    let mut by_game: Vec<GameBreakdown> = groups
        .into_iter()
        .map(|(game_id, (game_name, game_tallies))| {
            let totals = Totals::over(game_tallies.iter().copied(), player_id);
            GameBreakdown {
                game_id,
                game_name,
                score: totals.score,
                king_count: totals.king_count,
                cone_count: totals.cone_count,
                sessions_count: game_tallies.len() as i32,
            }
        })
        .collect();
    by_game.sort_by(|a, b| b.score.cmp(&a.score).then(a.game_id.cmp(&b.game_id)));
    by_game
}
