use chrono::NaiveDateTime;
#[cfg(feature = "ssr")]
use diesel::prelude::*;
#[cfg(feature = "ssr")]
use diesel::sqlite::Sqlite;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ssr", derive(Queryable, Selectable))]
#[cfg_attr(feature = "ssr", diesel(table_name = crate::schema::players))]
pub struct Player {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ssr", derive(Queryable, Selectable))]
#[cfg_attr(feature = "ssr", diesel(table_name = crate::schema::games))]
pub struct Game {
    pub id: i32,
    pub name: String,
}

#[cfg(feature = "ssr")]
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::players)]
pub struct NewPlayer<'a> {
    pub name: &'a str,
}

#[cfg(feature = "ssr")]
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::games)]
pub struct NewGame<'a> {
    pub name: &'a str,
}

/// One round of a game among a fixed set of players. Open for voting while `is_active` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ssr", derive(Queryable, Selectable))]
#[cfg_attr(feature = "ssr", diesel(table_name = crate::schema::sessions))]
#[cfg_attr(feature = "ssr", diesel(check_for_backend(Sqlite)))]
pub struct Session {
    pub id: i32,
    pub date: NaiveDateTime,
    pub game_id: i32,
    pub is_active: bool,
}

#[cfg(feature = "ssr")]
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::sessions)]
pub struct NewSession {
    pub date: NaiveDateTime,
    pub game_id: i32,
    // is_active defaults to open
}

#[cfg(feature = "ssr")]
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::session_participants)]
pub struct NewSessionParticipant {
    pub session_id: i32,
    pub player_id: i32,
}

/// A single ranking entry of a ballot: `voter_id` placed `target_player_id` at `rank_score`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ssr", derive(Queryable, Selectable))]
#[cfg_attr(feature = "ssr", diesel(table_name = crate::schema::votes))]
#[cfg_attr(feature = "ssr", diesel(check_for_backend(Sqlite)))]
pub struct Vote {
    pub id: i32,
    pub session_id: i32,
    pub voter_id: i32,
    pub target_player_id: i32,
    pub rank_score: i32,
}

#[cfg(feature = "ssr")]
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::votes)]
pub struct NewVote {
    pub session_id: i32,
    pub voter_id: i32,
    pub target_player_id: i32,
    pub rank_score: i32,
}

/// A session together with everything the lobby and stats pages show about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: Session,
    pub game_name: String,
    pub participants: Vec<Player>,
    pub voter_ids: Vec<i32>,
}

/// Lobby page data: open sessions (newest first) and the catalogs for the create form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lobby {
    pub active_sessions: Vec<SessionSummary>,
    pub games: Vec<Game>,
    pub players: Vec<Player>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingView {
    pub session: Session,
    pub game: Game,
    pub participants: Vec<Player>,
    pub voter_ids: Vec<i32>,
}

/// Either the voting view, or where to send the visitor instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VotingPage {
    Open(VotingView),
    Redirect(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub player_id: i32,
    pub name: String,
    pub score: i32,
    pub sessions_participated: i32,
    pub cone_count: i32,
    pub king_count: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub games: Vec<Game>,
    pub sessions: Vec<SessionSummary>,
    pub leaderboard: Vec<LeaderboardRow>,
    pub selected_game_id: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerOverall {
    pub score: i32,
    pub king_count: i32,
    pub cone_count: i32,
    pub sessions_count: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameBreakdown {
    pub game_id: i32,
    pub game_name: String,
    pub score: i32,
    pub king_count: i32,
    pub cone_count: i32,
    pub sessions_count: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHistoryEntry {
    pub session_id: i32,
    pub game_name: String,
    pub date: NaiveDateTime,
    pub score_in_session: i32,
    pub was_king: bool,
    pub was_cone: bool,
    pub rank_in_session: i32,
}

/// One point of the score-over-time chart. `king` and `cone` are 0 or 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub date_label: String,
    pub score: i32,
    pub king: u8,
    pub cone: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameScorePoint {
    pub game_name: String,
    pub score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerDetail {
    pub player: Player,
    pub overall: PlayerOverall,
    pub by_game: Vec<GameBreakdown>,
    pub session_history: Vec<SessionHistoryEntry>,
    pub chart_over_time: Vec<ChartPoint>,
    pub chart_by_game: Vec<GameScorePoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerPageData {
    pub games: Vec<Game>,
    pub selected_game_id: Option<i32>,
    pub detail: PlayerDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlayerPage {
    Found(PlayerPageData),
    Redirect(String),
}
