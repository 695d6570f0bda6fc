pub mod app;
#[cfg(feature = "ssr")]
pub mod config;
#[cfg(feature = "ssr")]
pub mod error;
pub mod model;
#[cfg(feature = "ssr")]
pub mod schema;
pub mod scoring;

#[cfg(feature = "ssr")]
use chrono::{NaiveDateTime, Utc};
#[cfg(feature = "ssr")]
use diesel::connection::SimpleConnection;
#[cfg(feature = "ssr")]
use diesel::prelude::*;
#[cfg(feature = "ssr")]
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PoolError};
#[cfg(feature = "ssr")]
use diesel::SqliteConnection;
#[cfg(feature = "ssr")]
use std::collections::{BTreeSet, HashMap};
#[cfg(feature = "ssr")]
use tracing::info;

#[cfg(feature = "ssr")]
use crate::config::AppConfig;
#[cfg(feature = "ssr")]
use crate::error::{not_found_to_domain, SessionError};
#[cfg(feature = "ssr")]
use crate::model::{
    Game, LeaderboardRow, Lobby, NewGame, NewPlayer, NewSession, NewSessionParticipant, NewVote,
    Player, PlayerDetail, Session, SessionSummary, Stats, Vote, VotingView,
};
#[cfg(feature = "ssr")]
use crate::schema::{games, players, session_participants, sessions, votes};
#[cfg(feature = "ssr")]
use crate::scoring::{
    all_participants_voted, ballot_scores, compute_leaderboard, compute_player_detail,
    parse_rankings, validate_ballot, BallotError, SessionTally,
};

#[cfg(feature = "hydrate")]
#[wasm_bindgen::prelude::wasm_bindgen]
pub fn hydrate() {
    use crate::app::*;
    console_error_panic_hook::set_once();
    leptos::mount::hydrate_body(App);
}

/// Players every fresh database starts with.
pub const SEED_PLAYERS: &[&str] = &["Maor", "Alko", "Becker", "Regev"];
/// Games every fresh database starts with.
pub const SEED_GAMES: &[&str] = &[
    "FIFA",
    "Rainbow 6 Siege",
    "PUBG",
    "Call Of Duty",
    "Battlefield",
];

#[cfg(feature = "ssr")]
const CREATE_TABLES_SQL: &str =
    include_str!("../migrations/2025-11-02-000000_create_tables/up.sql");
#[cfg(feature = "ssr")]
const DROP_TABLES_SQL: &str =
    include_str!("../migrations/2025-11-02-000000_create_tables/down.sql");

// The timeout comes first so that switching to WAL also waits on a locked database. WAL allows
// concurrent reads during writes; a second ballot waits for the write lock instead of failing.
#[cfg(feature = "ssr")]
const CONNECTION_PRAGMAS: &str = "PRAGMA busy_timeout = 10000; \
    PRAGMA foreign_keys = ON; \
    PRAGMA journal_mode = WAL; \
    PRAGMA synchronous = NORMAL;";

#[cfg(feature = "ssr")]
pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Applies the SQLite pragmas to every connection the pool hands out.
#[cfg(feature = "ssr")]
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions;

#[cfg(feature = "ssr")]
impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(CONNECTION_PRAGMAS)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[cfg(feature = "ssr")]
pub fn build_pool(config: &AppConfig) -> Result<DbPool, PoolError> {
    let manager = ConnectionManager::<SqliteConnection>::new(&config.database_url);
    Pool::builder()
        .max_size(config.pool_size)
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)
}

#[cfg(feature = "ssr")]
pub fn establish_connection(database_url: &str) -> ConnectionResult<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url)?;
    conn.batch_execute(CONNECTION_PRAGMAS)
        .map_err(ConnectionError::CouldntSetupConfiguration)?;
    Ok(conn)
}

/// Creates any missing tables. Safe to run on every start.
#[cfg(feature = "ssr")]
pub fn create_schema(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.batch_execute(CREATE_TABLES_SQL)
}

/// Inserts the fixed player and game catalog, skipping names that already exist.
#[cfg(feature = "ssr")]
pub fn seed_catalog(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.transaction(|conn| {
        let new_players: Vec<NewPlayer> = SEED_PLAYERS
            .iter()
            .map(|&name| NewPlayer { name })
            .collect();
        diesel::insert_or_ignore_into(players::table)
            .values(&new_players)
            .execute(conn)?;

        let new_games: Vec<NewGame> = SEED_GAMES.iter().map(|&name| NewGame { name }).collect();
        diesel::insert_or_ignore_into(games::table)
            .values(&new_games)
            .execute(conn)?;
        Ok(())
    })
}

/// Drops every table, recreates the schema and reseeds the catalog.
#[cfg(feature = "ssr")]
pub fn reset_database(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.transaction(|conn| {
        conn.batch_execute(DROP_TABLES_SQL)?;
        create_schema(conn)?;
        seed_catalog(conn)
    })?;
    info!("database reset");
    Ok(())
}

/// Deletes all sessions with their participants and votes, keeping players and games. Returns
/// the number of sessions removed.
#[cfg(feature = "ssr")]
pub fn clear_sessions(conn: &mut SqliteConnection) -> QueryResult<usize> {
    let removed = conn.transaction(|conn| {
        diesel::delete(votes::table).execute(conn)?;
        diesel::delete(session_participants::table).execute(conn)?;
        diesel::delete(sessions::table).execute(conn)
    })?;
    info!(removed, "cleared all sessions");
    Ok(removed)
}

#[cfg(feature = "ssr")]
pub fn get_all_players(conn: &mut SqliteConnection) -> QueryResult<Vec<Player>> {
    players::table
        .order(players::id.asc())
        .select(Player::as_select())
        .load(conn)
}

#[cfg(feature = "ssr")]
pub fn get_all_games(conn: &mut SqliteConnection) -> QueryResult<Vec<Game>> {
    games::table
        .order(games::id.asc())
        .select(Game::as_select())
        .load(conn)
}

/// Which sessions an aggregation or listing looks at. Filtering happens in SQL, before any
/// scoring.
#[cfg(feature = "ssr")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFilter {
    pub game_id: Option<i32>,
    pub active_only: bool,
}

#[cfg(feature = "ssr")]
impl SessionFilter {
    pub fn for_game(game_id: Option<i32>) -> Self {
        Self {
            game_id,
            active_only: false,
        }
    }

    pub fn active() -> Self {
        Self {
            game_id: None,
            active_only: true,
        }
    }
}

/// Loads the matching sessions, newest first, with their participants and votes.
#[cfg(feature = "ssr")]
pub fn load_tallies(
    conn: &mut SqliteConnection,
    filter: SessionFilter,
) -> QueryResult<Vec<SessionTally>> {
    let mut query = sessions::table
        .select(Session::as_select())
        .order((sessions::date.desc(), sessions::id.desc()))
        .into_boxed();
    if let Some(game_id) = filter.game_id {
        query = query.filter(sessions::game_id.eq(game_id));
    }
    if filter.active_only {
        query = query.filter(sessions::is_active.eq(true));
    }
    let found: Vec<Session> = query.load(conn)?;
    let session_ids: Vec<i32> = found.iter().map(|s| s.id).collect();

    let game_names: HashMap<i32, String> = get_all_games(conn)?
        .into_iter()
        .map(|g| (g.id, g.name))
        .collect();

    let mut participants: HashMap<i32, Vec<i32>> = HashMap::new();
    let participation: Vec<(i32, i32)> = session_participants::table
        .filter(session_participants::session_id.eq_any(&session_ids))
        .order((
            session_participants::session_id.asc(),
            session_participants::player_id.asc(),
        ))
        .select((
            session_participants::session_id,
            session_participants::player_id,
        ))
        .load(conn)?;
    for (session_id, player_id) in participation {
        participants.entry(session_id).or_default().push(player_id);
    }

    let mut votes_by_session: HashMap<i32, Vec<Vote>> = HashMap::new();
    let all_votes: Vec<Vote> = votes::table
        .filter(votes::session_id.eq_any(&session_ids))
        .order(votes::id.asc())
        .select(Vote::as_select())
        .load(conn)?;
    for vote in all_votes {
        votes_by_session.entry(vote.session_id).or_default().push(vote);
    }

    Ok(found
        .into_iter()
        .map(|session| SessionTally {
            game_name: game_names
                .get(&session.game_id)
                .cloned()
                .unwrap_or_else(|| "Unknown game".to_string()),
            participant_ids: participants.remove(&session.id).unwrap_or_default(),
            votes: votes_by_session.remove(&session.id).unwrap_or_default(),
            session,
        })
        .collect())
}

#[cfg(feature = "ssr")]
fn summarize(tally: &SessionTally, players_by_id: &HashMap<i32, Player>) -> SessionSummary {
    let voter_ids: BTreeSet<i32> = tally.votes.iter().map(|v| v.voter_id).collect();
    SessionSummary {
        session: tally.session.clone(),
        game_name: tally.game_name.clone(),
        participants: tally
            .participant_ids
            .iter()
            .filter_map(|id| players_by_id.get(id).cloned())
            .collect(),
        voter_ids: voter_ids.into_iter().collect(),
    }
}

#[cfg(feature = "ssr")]
fn players_by_id(players: &[Player]) -> HashMap<i32, Player> {
    players.iter().map(|p| (p.id, p.clone())).collect()
}

/// Returns the open sessions (newest first) and the catalogs for the create-session form.
#[cfg(feature = "ssr")]
pub fn get_lobby(conn: &mut SqliteConnection) -> QueryResult<Lobby> {
    conn.transaction(|conn| {
        let players = get_all_players(conn)?;
        let games = get_all_games(conn)?;
        let by_id = players_by_id(&players);
        let active_sessions = load_tallies(conn, SessionFilter::active())?
            .iter()
            .map(|tally| summarize(tally, &by_id))
            .collect();
        Ok(Lobby {
            active_sessions,
            games,
            players,
        })
    })
}

/// Creates an open session for `game_id` with the given players, dated now. Returns its id.
#[cfg(feature = "ssr")]
pub fn create_session(
    conn: &mut SqliteConnection,
    game_id: i32,
    player_ids: &[i32],
) -> Result<i32, SessionError> {
    create_session_at(conn, game_id, player_ids, Utc::now().naive_utc())
}

/// Same as [`create_session`] with an explicit creation date.
#[cfg(feature = "ssr")]
pub fn create_session_at(
    conn: &mut SqliteConnection,
    game_id: i32,
    player_ids: &[i32],
    date: NaiveDateTime,
) -> Result<i32, SessionError> {
    let unique_ids: BTreeSet<i32> = player_ids.iter().copied().collect();
    if unique_ids.is_empty() {
        return Err(SessionError::NoParticipants);
    }

    // Takes the write lock up front; a read-then-write upgrade fails at once under WAL.
    let session_id = conn.immediate_transaction::<_, SessionError, _>(|conn| {
        games::table
            .find(game_id)
            .select(games::id)
            .first::<i32>(conn)
            .map_err(not_found_to_domain)?;

        let known: i64 = players::table
            .filter(players::id.eq_any(&unique_ids))
            .count()
            .get_result(conn)?;
        if known as usize != unique_ids.len() {
            return Err(SessionError::NotFound);
        }

        let session_id: i32 = diesel::insert_into(sessions::table)
            .values(&NewSession { date, game_id })
            .returning(sessions::id)
            .get_result(conn)?;

        let participants: Vec<NewSessionParticipant> = unique_ids
            .iter()
            .map(|&player_id| NewSessionParticipant {
                session_id,
                player_id,
            })
            .collect();
        diesel::insert_into(session_participants::table)
            .values(&participants)
            .execute(conn)?;

        Ok(session_id)
    })?;

    info!(
        session_id,
        game_id,
        participants = unique_ids.len(),
        "session created"
    );
    Ok(session_id)
}

/// Fetches a session and its game; either missing is `NotFound`.
#[cfg(feature = "ssr")]
fn find_session(
    conn: &mut SqliteConnection,
    session_id: i32,
) -> Result<(Session, Game), SessionError> {
    let session: Session = sessions::table
        .find(session_id)
        .select(Session::as_select())
        .first(conn)
        .map_err(not_found_to_domain)?;
    let game: Game = games::table
        .find(session.game_id)
        .select(Game::as_select())
        .first(conn)
        .map_err(not_found_to_domain)?;
    Ok((session, game))
}

#[cfg(feature = "ssr")]
fn participant_ids(conn: &mut SqliteConnection, session_id: i32) -> QueryResult<Vec<i32>> {
    session_participants::table
        .filter(session_participants::session_id.eq(session_id))
        .order(session_participants::player_id.asc())
        .select(session_participants::player_id)
        .load(conn)
}

#[cfg(feature = "ssr")]
fn voter_ids(conn: &mut SqliteConnection, session_id: i32) -> QueryResult<Vec<i32>> {
    votes::table
        .filter(votes::session_id.eq(session_id))
        .select(votes::voter_id)
        .distinct()
        .order(votes::voter_id.asc())
        .load(conn)
}

/// Returns what the voting page needs for an open session.
#[cfg(feature = "ssr")]
pub fn open_voting_view(
    conn: &mut SqliteConnection,
    session_id: i32,
) -> Result<VotingView, SessionError> {
    let (session, game) = find_session(conn, session_id)?;
    if !session.is_active {
        return Err(SessionError::AlreadyClosed);
    }

    let participants: Vec<Player> = session_participants::table
        .inner_join(players::table)
        .filter(session_participants::session_id.eq(session_id))
        .order(players::id.asc())
        .select(Player::as_select())
        .load(conn)?;
    let voter_ids = voter_ids(conn, session_id)?;

    Ok(VotingView {
        session,
        game,
        participants,
        voter_ids,
    })
}

/// Outcome of an accepted ballot.
#[cfg(feature = "ssr")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BallotReceipt {
    pub votes_recorded: usize,
    pub session_closed: bool,
}

/// Records `voter_id`'s ranking of the session participants, best first, and closes the session
/// once every participant has voted.
///
/// Runs inside `BEGIN IMMEDIATE`, so the duplicate check, the inserts and the closing check hold
/// the database write lock together and either all happen or none do.
#[cfg(feature = "ssr")]
pub fn submit_ballot(
    conn: &mut SqliteConnection,
    session_id: i32,
    voter_id: i32,
    ranked_ids: &[i32],
) -> Result<BallotReceipt, SessionError> {
    record_ballot(conn, session_id, voter_id, Ok(ranked_ids))
}

/// Same as [`submit_ballot`] with the ranking as a JSON array of player ids. An unreadable
/// ranking is an `InvalidBallot`, reported only once the session and voter checks have passed.
#[cfg(feature = "ssr")]
pub fn submit_ballot_json(
    conn: &mut SqliteConnection,
    session_id: i32,
    voter_id: i32,
    rankings: &str,
) -> Result<BallotReceipt, SessionError> {
    match parse_rankings(rankings) {
        Ok(ranked_ids) => record_ballot(conn, session_id, voter_id, Ok(ranked_ids.as_slice())),
        Err(e) => record_ballot(conn, session_id, voter_id, Err(e)),
    }
}

#[cfg(feature = "ssr")]
fn record_ballot(
    conn: &mut SqliteConnection,
    session_id: i32,
    voter_id: i32,
    ranking: Result<&[i32], BallotError>,
) -> Result<BallotReceipt, SessionError> {
    let receipt = conn.immediate_transaction::<_, SessionError, _>(|conn| {
        let (session, _game) = find_session(conn, session_id)?;
        if !session.is_active {
            return Err(SessionError::AlreadyClosed);
        }

        let already_voted: i64 = votes::table
            .filter(votes::session_id.eq(session_id))
            .filter(votes::voter_id.eq(voter_id))
            .count()
            .get_result(conn)?;
        if already_voted > 0 {
            return Err(SessionError::DuplicateVote);
        }

        let participants = participant_ids(conn, session_id)?;
        if !participants.contains(&voter_id) {
            return Err(SessionError::NotAParticipant);
        }
        let ranked_ids = ranking?;
        validate_ballot(ranked_ids, &participants)?;

        let new_votes: Vec<NewVote> = ballot_scores(ranked_ids)
            .into_iter()
            .map(|(target_player_id, rank_score)| NewVote {
                session_id,
                voter_id,
                target_player_id,
                rank_score,
            })
            .collect();
        let votes_recorded = diesel::insert_into(votes::table)
            .values(&new_votes)
            .execute(conn)?;

        let voters = voter_ids(conn, session_id)?;
        let session_closed = all_participants_voted(&participants, &voters);
        if session_closed {
            diesel::update(sessions::table.find(session_id))
                .set(sessions::is_active.eq(false))
                .execute(conn)?;
        }

        Ok(BallotReceipt {
            votes_recorded,
            session_closed,
        })
    })?;

    info!(session_id, voter_id, "ballot recorded");
    if receipt.session_closed {
        info!(session_id, "all participants voted; session closed");
    }
    Ok(receipt)
}

/// Deletes a session with its participants and votes. Returns false if there was nothing to
/// delete.
#[cfg(feature = "ssr")]
pub fn delete_session(conn: &mut SqliteConnection, session_id: i32) -> Result<bool, SessionError> {
    let deleted = conn.transaction::<_, SessionError, _>(|conn| {
        diesel::delete(votes::table.filter(votes::session_id.eq(session_id))).execute(conn)?;
        diesel::delete(
            session_participants::table.filter(session_participants::session_id.eq(session_id)),
        )
        .execute(conn)?;
        let removed = diesel::delete(sessions::table.find(session_id)).execute(conn)?;
        Ok(removed > 0)
    })?;
    if deleted {
        info!(session_id, "session deleted");
    }
    Ok(deleted)
}

#[cfg(feature = "ssr")]
pub fn get_leaderboard(
    conn: &mut SqliteConnection,
    game_id: Option<i32>,
) -> QueryResult<Vec<LeaderboardRow>> {
    conn.transaction(|conn| {
        let players = get_all_players(conn)?;
        let tallies = load_tallies(conn, SessionFilter::for_game(game_id))?;
        Ok(compute_leaderboard(&players, &tallies))
    })
}

/// Returns the stats page: games, sessions (newest first) and leaderboard, optionally for a
/// single game. All reads share one snapshot.
#[cfg(feature = "ssr")]
pub fn get_stats(conn: &mut SqliteConnection, game_id: Option<i32>) -> QueryResult<Stats> {
    conn.transaction(|conn| {
        let games = get_all_games(conn)?;
        let players = get_all_players(conn)?;
        let tallies = load_tallies(conn, SessionFilter::for_game(game_id))?;
        let by_id = players_by_id(&players);
        Ok(Stats {
            games,
            sessions: tallies.iter().map(|t| summarize(t, &by_id)).collect(),
            leaderboard: compute_leaderboard(&players, &tallies),
            selected_game_id: game_id,
        })
    })
}

#[cfg(feature = "ssr")]
pub fn get_player_detail(
    conn: &mut SqliteConnection,
    player_id: i32,
    game_id: Option<i32>,
) -> Result<PlayerDetail, SessionError> {
    conn.transaction::<_, SessionError, _>(|conn| {
        let player: Player = players::table
            .find(player_id)
            .select(Player::as_select())
            .first(conn)
            .map_err(not_found_to_domain)?;
        let tallies = load_tallies(conn, SessionFilter::for_game(game_id))?;
        Ok(compute_player_detail(&player, &tallies))
    })
}

#[cfg(all(test, feature = "ssr"))]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    // Helper to run a test against a brand new in-memory database with the schema and catalog in
    // place. Each test gets its own database, so nothing leaks between tests.
    fn run_test_in_fresh_db<F>(test_fn: F)
    where
        F: FnOnce(&mut SqliteConnection) -> Result<(), SessionError>,
    {
        let mut conn = establish_connection(":memory:").expect("Failed to open in-memory db");
        create_schema(&mut conn).expect("Failed to create schema");
        seed_catalog(&mut conn).expect("Failed to seed catalog");
        test_fn(&mut conn).expect("Test body returned an error");
    }

    fn player_id(conn: &mut SqliteConnection, name: &str) -> i32 {
        players::table
            .filter(players::name.eq(name))
            .select(players::id)
            .first(conn)
            .expect("Seeded player should exist")
    }

    fn game_id(conn: &mut SqliteConnection, name: &str) -> i32 {
        games::table
            .filter(games::name.eq(name))
            .select(games::id)
            .first(conn)
            .expect("Seeded game should exist")
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, day)
            .and_then(|d| d.and_hms_opt(hour, 30, 0))
            .expect("valid date")
    }

    fn vote_count(conn: &mut SqliteConnection, session_id: i32) -> i64 {
        votes::table
            .filter(votes::session_id.eq(session_id))
            .count()
            .get_result(conn)
            .expect("count should work")
    }

    fn is_active(conn: &mut SqliteConnection, session_id: i32) -> bool {
        sessions::table
            .find(session_id)
            .select(sessions::is_active)
            .first(conn)
            .expect("session should exist")
    }

    #[test]
    fn test_seed_catalog() {
        run_test_in_fresh_db(|conn| {
            let players = get_all_players(conn)?;
            let names: Vec<&str> = players.iter().map(|p| p.name.as_str()).collect();
            assert_eq!(names, SEED_PLAYERS.to_vec());
            assert_eq!(get_all_games(conn)?.len(), SEED_GAMES.len());

            // Seeding twice does not duplicate anything.
            seed_catalog(conn)?;
            assert_eq!(get_all_players(conn)?.len(), SEED_PLAYERS.len());
            assert_eq!(get_all_games(conn)?.len(), SEED_GAMES.len());

            Ok(())
        });
    }

    #[test]
    fn test_create_session() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let maor = player_id(conn, "Maor");
            let alko = player_id(conn, "Alko");

            let session_id = create_session(conn, fifa, &[alko, maor, alko])?;
            let view = open_voting_view(conn, session_id)?;
            assert!(view.session.is_active);
            assert_eq!(view.game.name, "FIFA");
            let mut ids: Vec<i32> = view.participants.iter().map(|p| p.id).collect();
            ids.sort();
            let mut expected = vec![maor, alko];
            expected.sort();
            assert_eq!(ids, expected);
            assert!(view.voter_ids.is_empty());

            Ok(())
        });
    }

    #[test]
    fn test_create_session_rejects_bad_references() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let maor = player_id(conn, "Maor");

            let err = create_session(conn, 999, &[maor]).expect_err("Unknown game");
            assert!(matches!(err, SessionError::NotFound));

            let err = create_session(conn, fifa, &[maor, 999]).expect_err("Unknown player");
            assert!(matches!(err, SessionError::NotFound));

            let err = create_session(conn, fifa, &[]).expect_err("No players");
            assert!(matches!(err, SessionError::NoParticipants));

            let count: i64 = sessions::table.count().get_result(conn)?;
            assert_eq!(count, 0);

            Ok(())
        });
    }

    #[test]
    fn test_open_voting_view_errors() {
        run_test_in_fresh_db(|conn| {
            let err = open_voting_view(conn, 42).expect_err("Missing session");
            assert!(matches!(err, SessionError::NotFound));

            let fifa = game_id(conn, "FIFA");
            let maor = player_id(conn, "Maor");
            let session_id = create_session(conn, fifa, &[maor])?;
            submit_ballot(conn, session_id, maor, &[maor])?;

            let err = open_voting_view(conn, session_id).expect_err("Closed session");
            assert!(matches!(err, SessionError::AlreadyClosed));

            Ok(())
        });
    }

    #[test]
    fn test_submit_ballot_assigns_rank_scores() {
        run_test_in_fresh_db(|conn| {
            let pubg = game_id(conn, "PUBG");
            let ids: Vec<i32> = get_all_players(conn)?.iter().map(|p| p.id).collect();
            let session_id = create_session(conn, pubg, &ids)?;

            let ranking = vec![ids[2], ids[0], ids[3], ids[1]];
            let receipt = submit_ballot(conn, session_id, ids[0], &ranking)?;
            assert_eq!(receipt.votes_recorded, 4);
            assert!(!receipt.session_closed);

            let stored: Vec<(i32, i32)> = votes::table
                .filter(votes::session_id.eq(session_id))
                .order(votes::rank_score.desc())
                .select((votes::target_player_id, votes::rank_score))
                .load(conn)?;
            assert_eq!(
                stored,
                vec![(ids[2], 4), (ids[0], 3), (ids[3], 2), (ids[1], 1)]
            );

            Ok(())
        });
    }

    #[test]
    fn test_three_player_scenario() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let a = player_id(conn, "Maor");
            let b = player_id(conn, "Alko");
            let c = player_id(conn, "Becker");
            let session_id = create_session(conn, fifa, &[a, b, c])?;

            submit_ballot(conn, session_id, a, &[b, a, c])?;
            let rows = get_leaderboard(conn, None)?;
            let top: Vec<(i32, i32)> = rows.iter().take(3).map(|r| (r.player_id, r.score)).collect();
            assert_eq!(top, vec![(b, 3), (a, 2), (c, 1)]);

            submit_ballot(conn, session_id, b, &[b, a, c])?;
            assert!(is_active(conn, session_id));

            let receipt = submit_ballot(conn, session_id, c, &[b, a, c])?;
            assert!(receipt.session_closed);
            assert!(!is_active(conn, session_id));

            let rows = get_leaderboard(conn, None)?;
            let b_row = rows.iter().find(|r| r.player_id == b).expect("b row");
            assert_eq!(b_row.score, 9);
            assert_eq!(b_row.king_count, 3);
            let c_row = rows.iter().find(|r| r.player_id == c).expect("c row");
            assert_eq!(c_row.cone_count, 3);

            // A closed session never reopens.
            let err = submit_ballot(conn, session_id, a, &[a, b, c]).expect_err("Closed");
            assert!(matches!(err, SessionError::AlreadyClosed));
            assert!(!is_active(conn, session_id));

            Ok(())
        });
    }

    #[test]
    fn test_submit_ballot_duplicate_vote() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let a = player_id(conn, "Maor");
            let b = player_id(conn, "Alko");
            let c = player_id(conn, "Becker");
            let session_id = create_session(conn, fifa, &[a, b, c])?;

            submit_ballot(conn, session_id, a, &[a, b, c])?;
            let err = submit_ballot(conn, session_id, a, &[c, b, a]).expect_err("Second ballot");
            assert!(matches!(err, SessionError::DuplicateVote));
            assert_eq!(vote_count(conn, session_id), 3);

            Ok(())
        });
    }

    #[test]
    fn test_submit_ballot_not_a_participant() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let a = player_id(conn, "Maor");
            let b = player_id(conn, "Alko");
            let outsider = player_id(conn, "Regev");
            let session_id = create_session(conn, fifa, &[a, b])?;

            let err = submit_ballot(conn, session_id, outsider, &[a, b]).expect_err("Outsider");
            assert!(matches!(err, SessionError::NotAParticipant));
            assert_eq!(vote_count(conn, session_id), 0);

            Ok(())
        });
    }

    #[test]
    fn test_submit_ballot_rejects_malformed_ranking() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let a = player_id(conn, "Maor");
            let b = player_id(conn, "Alko");
            let c = player_id(conn, "Becker");
            let outsider = player_id(conn, "Regev");
            let session_id = create_session(conn, fifa, &[a, b, c])?;

            let err = submit_ballot(conn, session_id, a, &[a, b]).expect_err("Missing player");
            assert!(matches!(
                err,
                SessionError::InvalidBallot(BallotError::WrongLength { .. })
            ));
            let err = submit_ballot(conn, session_id, a, &[a, a, c]).expect_err("Duplicate");
            assert!(matches!(
                err,
                SessionError::InvalidBallot(BallotError::DuplicateTarget(_))
            ));
            let err = submit_ballot(conn, session_id, a, &[a, b, outsider]).expect_err("Extra");
            assert!(matches!(
                err,
                SessionError::InvalidBallot(BallotError::UnknownTarget(_))
            ));
            assert_eq!(vote_count(conn, session_id), 0);

            // The voter can still cast a proper ballot afterwards.
            submit_ballot(conn, session_id, a, &[c, b, a])?;
            assert_eq!(vote_count(conn, session_id), 3);

            Ok(())
        });
    }

    #[test]
    fn test_submit_ballot_missing_session() {
        run_test_in_fresh_db(|conn| {
            let a = player_id(conn, "Maor");
            let err = submit_ballot(conn, 77, a, &[a]).expect_err("Missing session");
            assert!(matches!(err, SessionError::NotFound));
            Ok(())
        });
    }

    #[test]
    fn test_delete_session() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let a = player_id(conn, "Maor");
            let b = player_id(conn, "Alko");
            let session_id = create_session(conn, fifa, &[a, b])?;
            submit_ballot(conn, session_id, a, &[a, b])?;

            assert!(delete_session(conn, session_id)?);
            assert_eq!(vote_count(conn, session_id), 0);
            let participants: i64 = session_participants::table
                .filter(session_participants::session_id.eq(session_id))
                .count()
                .get_result(conn)?;
            assert_eq!(participants, 0);

            let stats = get_stats(conn, None)?;
            assert!(stats.sessions.is_empty());
            assert!(stats.leaderboard.iter().all(|r| r.score == 0));
            assert!(get_lobby(conn)?.active_sessions.is_empty());

            // Deleting again is a no-op.
            assert!(!delete_session(conn, session_id)?);

            Ok(())
        });
    }

    #[test]
    fn test_lobby_lists_open_sessions_newest_first() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let pubg = game_id(conn, "PUBG");
            let a = player_id(conn, "Maor");
            let b = player_id(conn, "Alko");

            let older = create_session_at(conn, fifa, &[a, b], at(1, 20))?;
            let newer = create_session_at(conn, pubg, &[a, b], at(2, 20))?;
            let closed = create_session_at(conn, fifa, &[a], at(3, 20))?;
            submit_ballot(conn, closed, a, &[a])?;
            submit_ballot(conn, newer, b, &[b, a])?;

            let lobby = get_lobby(conn)?;
            let ids: Vec<i32> = lobby.active_sessions.iter().map(|s| s.session.id).collect();
            assert_eq!(ids, vec![newer, older]);
            assert_eq!(lobby.active_sessions[0].game_name, "PUBG");
            assert_eq!(lobby.active_sessions[0].voter_ids, vec![b]);
            assert_eq!(lobby.active_sessions[0].participants.len(), 2);
            assert_eq!(lobby.players.len(), SEED_PLAYERS.len());
            assert_eq!(lobby.games.len(), SEED_GAMES.len());

            Ok(())
        });
    }

    #[test]
    fn test_stats_filtered_by_game() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let pubg = game_id(conn, "PUBG");
            let a = player_id(conn, "Maor");
            let b = player_id(conn, "Alko");

            let s1 = create_session_at(conn, fifa, &[a, b], at(1, 20))?;
            submit_ballot(conn, s1, a, &[a, b])?;
            submit_ballot(conn, s1, b, &[a, b])?;
            let s2 = create_session_at(conn, pubg, &[a, b], at(2, 20))?;
            submit_ballot(conn, s2, a, &[b, a])?;
            submit_ballot(conn, s2, b, &[b, a])?;

            let all = get_stats(conn, None)?;
            assert_eq!(all.sessions.len(), 2);
            assert_eq!(all.sessions[0].session.id, s2);
            let a_all = all.leaderboard.iter().find(|r| r.player_id == a).expect("a");
            assert_eq!(a_all.score, 2 + 2 + 1 + 1);
            assert_eq!(a_all.sessions_participated, 2);

            let only_fifa = get_stats(conn, Some(fifa))?;
            assert_eq!(only_fifa.selected_game_id, Some(fifa));
            assert_eq!(only_fifa.sessions.len(), 1);
            assert_eq!(only_fifa.leaderboard[0].player_id, a);
            assert_eq!(only_fifa.leaderboard[0].score, 4);
            assert_eq!(only_fifa.leaderboard[0].king_count, 2);
            assert_eq!(only_fifa.leaderboard[0].sessions_participated, 1);

            // Players outside every session still appear with zero.
            let regev = player_id(conn, "Regev");
            let r = only_fifa
                .leaderboard
                .iter()
                .find(|r| r.player_id == regev)
                .expect("regev");
            assert_eq!((r.score, r.sessions_participated), (0, 0));

            Ok(())
        });
    }

    #[test]
    fn test_get_player_detail() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let pubg = game_id(conn, "PUBG");
            let a = player_id(conn, "Maor");
            let b = player_id(conn, "Alko");
            let c = player_id(conn, "Becker");

            let s1 = create_session_at(conn, fifa, &[a, b], at(1, 20))?;
            submit_ballot(conn, s1, a, &[a, b])?;
            submit_ballot(conn, s1, b, &[a, b])?;
            let s2 = create_session_at(conn, pubg, &[a, b, c], at(2, 21))?;
            submit_ballot(conn, s2, a, &[b, c, a])?;

            let detail = get_player_detail(conn, a, None)?;
            assert_eq!(detail.player.name, "Maor");
            assert_eq!(detail.overall.score, 4 + 1);
            assert_eq!(detail.overall.king_count, 2);
            assert_eq!(detail.overall.cone_count, 1);
            assert_eq!(detail.overall.sessions_count, 2);
            assert_eq!(detail.session_history.len(), 2);
            assert_eq!(detail.session_history[0].session_id, s2);
            assert_eq!(detail.session_history[0].rank_in_session, 3);
            assert_eq!(detail.session_history[1].rank_in_session, 1);
            assert_eq!(detail.chart_over_time[0].date_label, "2025-10-01 20:30");
            assert_eq!(detail.chart_over_time[0].king, 1);
            assert_eq!(detail.by_game[0].game_name, "FIFA");

            let only_pubg = get_player_detail(conn, a, Some(pubg))?;
            assert_eq!(only_pubg.overall.sessions_count, 1);
            assert_eq!(only_pubg.by_game.len(), 1);
            assert_eq!(only_pubg.by_game[0].game_id, pubg);

            let err = get_player_detail(conn, 999, None).expect_err("Unknown player");
            assert!(matches!(err, SessionError::NotFound));

            Ok(())
        });
    }

    #[test]
    fn test_clear_sessions_and_reset_database() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let a = player_id(conn, "Maor");
            let session_id = create_session(conn, fifa, &[a])?;
            submit_ballot(conn, session_id, a, &[a])?;

            assert_eq!(clear_sessions(conn)?, 1);
            assert_eq!(vote_count(conn, session_id), 0);
            assert_eq!(get_all_players(conn)?.len(), SEED_PLAYERS.len());

            create_session(conn, fifa, &[a])?;
            reset_database(conn)?;
            let count: i64 = sessions::table.count().get_result(conn)?;
            assert_eq!(count, 0);
            assert_eq!(get_all_games(conn)?.len(), SEED_GAMES.len());

            Ok(())
        });
    }

    #[test]
    fn test_submit_ballot_json_checks_session_first() {
        run_test_in_fresh_db(|conn| {
            let fifa = game_id(conn, "FIFA");
            let a = player_id(conn, "Maor");
            let b = player_id(conn, "Alko");

            let err = submit_ballot_json(conn, 404, a, "not json").expect_err("Missing session");
            assert!(matches!(err, SessionError::NotFound));

            let closed = create_session(conn, fifa, &[a])?;
            submit_ballot(conn, closed, a, &[a])?;
            let err = submit_ballot_json(conn, closed, a, "not json").expect_err("Closed");
            assert!(matches!(err, SessionError::AlreadyClosed));

            let open = create_session(conn, fifa, &[a, b])?;
            let err = submit_ballot_json(conn, open, a, "[1, oops").expect_err("Garbage");
            assert!(matches!(
                err,
                SessionError::InvalidBallot(BallotError::Unreadable(_))
            ));
            assert_eq!(
                err.redirect_path(open),
                Some(format!("/vote/{}?error=invalid_ballot", open))
            );
            assert_eq!(vote_count(conn, open), 0);

            let receipt = submit_ballot_json(conn, open, a, &format!("[{}, {}]", b, a))?;
            assert_eq!(receipt.votes_recorded, 2);

            Ok(())
        });
    }

    // Runs `test_fn` against a pool over a fresh temp-file database, so several connections can
    // write concurrently the way the server does.
    fn run_test_with_file_pool<F>(name: &str, pool_size: u32, test_fn: F)
    where
        F: FnOnce(&DbPool),
    {
        let path = std::env::temp_dir().join(format!(
            "whos-the-cone-{}-{}.db",
            name,
            std::process::id()
        ));
        let database_url = path.to_string_lossy().to_string();
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", database_url, suffix));
        }

        let pool = build_pool(&AppConfig {
            database_url: database_url.clone(),
            pool_size,
        })
        .expect("Failed to build pool");
        {
            let mut conn = pool.get().expect("connection");
            create_schema(&mut conn).expect("schema");
            seed_catalog(&mut conn).expect("seed");
        }

        test_fn(&pool);
        drop(pool);

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", database_url, suffix));
        }
    }

    #[test]
    fn test_concurrent_ballots_from_same_voter() {
        run_test_with_file_pool("same-voter", 4, |pool| {
            let (session_id, a, b) = {
                let mut conn = pool.get().expect("connection");
                let fifa = game_id(&mut conn, "FIFA");
                let a = player_id(&mut conn, "Maor");
                let b = player_id(&mut conn, "Alko");
                let session_id = create_session(&mut conn, fifa, &[a, b]).expect("session");
                (session_id, a, b)
            };

            let results: Vec<Result<BallotReceipt, SessionError>> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        scope.spawn(move || {
                            let mut conn = pool.get().expect("connection");
                            submit_ballot(&mut conn, session_id, a, &[a, b])
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("thread panicked"))
                    .collect()
            });

            let accepted = results.iter().filter(|r| r.is_ok()).count();
            let duplicates = results
                .iter()
                .filter(|r| matches!(r, Err(SessionError::DuplicateVote)))
                .count();
            assert_eq!(accepted, 1);
            assert_eq!(duplicates, 3);

            let mut conn = pool.get().expect("connection");
            assert_eq!(vote_count(&mut conn, session_id), 2);
        });
    }

    #[test]
    fn test_concurrent_session_creation_waits_for_writers() {
        run_test_with_file_pool("create", 8, |pool| {
            let (fifa, a, b) = {
                let mut conn = pool.get().expect("connection");
                (
                    game_id(&mut conn, "FIFA"),
                    player_id(&mut conn, "Maor"),
                    player_id(&mut conn, "Alko"),
                )
            };

            let failures: Vec<SessionError> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..8)
                    .map(|_| {
                        scope.spawn(move || {
                            let mut conn = pool.get().expect("connection");
                            let mut failures = Vec::new();
                            for _ in 0..25 {
                                match create_session(&mut conn, fifa, &[a, b]) {
                                    Ok(session_id) => {
                                        if let Err(e) =
                                            submit_ballot(&mut conn, session_id, a, &[a, b])
                                        {
                                            failures.push(e);
                                        }
                                    }
                                    Err(e) => failures.push(e),
                                }
                            }
                            failures
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .flat_map(|h| h.join().expect("thread panicked"))
                    .collect()
            });

            assert!(failures.is_empty(), "unexpected errors: {:?}", failures);
            let mut conn = pool.get().expect("connection");
            let created: i64 = sessions::table
                .count()
                .get_result(&mut *conn)
                .expect("count");
            assert_eq!(created, 8 * 25);
        });
    }

    #[test]
    fn test_concurrent_ballots_close_session_once() {
        run_test_with_file_pool("close", 4, |pool| {
            let (fifa, ids) = {
                let mut conn = pool.get().expect("connection");
                let ids: Vec<i32> = get_all_players(&mut conn)
                    .expect("players")
                    .iter()
                    .map(|p| p.id)
                    .collect();
                (game_id(&mut conn, "FIFA"), ids)
            };

            for _ in 0..5 {
                let session_id = {
                    let mut conn = pool.get().expect("connection");
                    create_session(&mut conn, fifa, &ids).expect("session")
                };

                let receipts: Vec<Result<BallotReceipt, SessionError>> =
                    std::thread::scope(|scope| {
                        let handles: Vec<_> = ids
                            .iter()
                            .map(|&voter| {
                                let ranking = ids.clone();
                                scope.spawn(move || {
                                    let mut conn = pool.get().expect("connection");
                                    submit_ballot(&mut conn, session_id, voter, &ranking)
                                })
                            })
                            .collect();
                        handles
                            .into_iter()
                            .map(|h| h.join().expect("thread panicked"))
                            .collect()
                    });

                let closing = receipts
                    .iter()
                    .filter(|r| matches!(r, Ok(receipt) if receipt.session_closed))
                    .count();
                assert!(receipts.iter().all(|r| r.is_ok()), "{:?}", receipts);
                assert_eq!(closing, 1);

                let mut conn = pool.get().expect("connection");
                assert!(!is_active(&mut conn, session_id));
                assert_eq!(vote_count(&mut conn, session_id), (ids.len() * ids.len()) as i64);
            }
        });
    }

    #[test]
    fn test_stats_stay_consistent_while_voting() {
        run_test_with_file_pool("snapshot", 4, |pool| {
            let (fifa, ids) = {
                let mut conn = pool.get().expect("connection");
                let ids: Vec<i32> = get_all_players(&mut conn)
                    .expect("players")
                    .iter()
                    .map(|p| p.id)
                    .collect();
                (game_id(&mut conn, "FIFA"), ids)
            };
            let per_ballot: i32 = (1..=ids.len() as i32).sum();

            std::thread::scope(|scope| {
                let writer_ids = ids.clone();
                let writer = scope.spawn(move || {
                    let mut conn = pool.get().expect("connection");
                    for _ in 0..20 {
                        let session_id =
                            create_session(&mut conn, fifa, &writer_ids).expect("session");
                        for &voter in &writer_ids {
                            submit_ballot(&mut conn, session_id, voter, &writer_ids)
                                .expect("ballot");
                        }
                    }
                });

                let mut conn = pool.get().expect("connection");
                while !writer.is_finished() {
                    let stats = get_stats(&mut conn, None).expect("stats");
                    let mut expected_total = 0;
                    for summary in &stats.sessions {
                        let all_voted = summary.voter_ids.len() == summary.participants.len();
                        assert_eq!(summary.session.is_active, !all_voted);
                        expected_total += summary.voter_ids.len() as i32 * per_ballot;
                    }
                    let total: i32 = stats.leaderboard.iter().map(|r| r.score).sum();
                    assert_eq!(total, expected_total);
                }
                writer.join().expect("writer panicked");
            });
        });
    }
}
