use leptos::ev::SubmitEvent;
use leptos::logging::log;
use leptos::prelude::*;
use leptos::server_fn::error::NoCustomError;
use leptos::task::spawn_local;
use leptos_meta::{provide_meta_context, MetaTags, Stylesheet, Title};
use leptos_router::{
    components::{Route, Router, Routes},
    hooks::{use_navigate, use_params_map, use_query_map},
    path, NavigateOptions,
};

use crate::model::{
    ChartPoint, GameScorePoint, Lobby, Player, PlayerPage, SessionSummary, Stats, VotingPage,
    VotingView,
};
use crate::scoring::CHART_DATE_FORMAT;
#[cfg(feature = "ssr")]
use crate::{
    create_session, delete_session, error::SessionError, get_lobby, get_player_detail,
    get_stats, open_voting_view, submit_ballot_json, DbPool,
};

#[cfg(feature = "ssr")]
use diesel::SqliteConnection;

#[cfg(feature = "ssr")]
fn server_error(e: impl ToString) -> ServerFnError<NoCustomError> {
    ServerFnError::<NoCustomError>::ServerError(e.to_string())
}

// Checks a connection out of the pool and runs `f` on a blocking thread. The connection goes back
// to the pool when `f` returns, whatever the outcome.
#[cfg(feature = "ssr")]
async fn with_connection<T, F>(f: F) -> Result<T, ServerFnError<NoCustomError>>
where
    T: Send + 'static,
    F: FnOnce(&mut SqliteConnection) -> Result<T, ServerFnError<NoCustomError>> + Send + 'static,
{
    let pool: DbPool = expect_context();
    let result = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(server_error)?;
        f(&mut conn)
    })
    .await;
    match result {
        Ok(value) => value,
        Err(e) => Err(server_error(e)),
    }
}

/// Path of the stats page, keeping the game filter.
pub fn stats_path(game_id: Option<i32>) -> String {
    match game_id {
        Some(id) => format!("/stats?game_id={}", id),
        None => "/stats".to_string(),
    }
}

/// Path of a player's page, keeping the game filter.
pub fn player_path(player_id: i32, game_id: Option<i32>) -> String {
    match game_id {
        Some(id) => format!("/player/{}?game_id={}", player_id, id),
        None => format!("/player/{}", player_id),
    }
}

/// Text shown on the voting page for an `?error=` code.
pub fn ballot_error_message(code: &str) -> &'static str {
    match code {
        "already_voted" => "You have already voted in this session.",
        "not_participant" => "You are not playing in this session.",
        "invalid_ballot" => "Rank every player of the session exactly once.",
        _ => "Something went wrong, try again.",
    }
}

/// Renders `url` as an SVG QR code.
#[cfg(feature = "ssr")]
pub fn vote_qr_svg(url: &str) -> Result<String, qrcode::types::QrError> {
    use qrcode::render::svg;
    use qrcode::QrCode;

    let code = QrCode::new(url.as_bytes())?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(180, 180)
        .dark_color(svg::Color("#1b1b1b"))
        .light_color(svg::Color("#ffffff"))
        .build())
}

#[server(GetLobby)]
pub async fn get_lobby_handler() -> Result<Lobby, ServerFnError<NoCustomError>> {
    with_connection(|conn| get_lobby(conn).map_err(server_error)).await
}

#[server(CreateSession)]
pub async fn create_session_handler(
    game_id: i32,
    player_ids: Vec<i32>,
) -> Result<i32, ServerFnError<NoCustomError>> {
    with_connection(move |conn| create_session(conn, game_id, &player_ids).map_err(server_error))
        .await
}

#[server(GetVotingView)]
pub async fn get_voting_view(session_id: i32) -> Result<VotingPage, ServerFnError<NoCustomError>> {
    with_connection(move |conn| match open_voting_view(conn, session_id) {
        Ok(view) => Ok(VotingPage::Open(view)),
        Err(e) => match e.redirect_path(session_id) {
            Some(path) => Ok(VotingPage::Redirect(path)),
            None => Err(server_error(e)),
        },
    })
    .await
}

/// Records a ballot. `rankings` is a JSON array of player ids, best first. Returns the path the
/// voter should be sent to next.
#[server(SubmitBallot)]
pub async fn submit_ballot_handler(
    session_id: i32,
    voter_id: i32,
    rankings: String,
) -> Result<String, ServerFnError<NoCustomError>> {
    with_connection(
        move |conn| match submit_ballot_json(conn, session_id, voter_id, &rankings) {
            Ok(_) => Ok(stats_path(None)),
            Err(SessionError::Database(e)) => Err(server_error(e)),
            Err(e) => {
                tracing::info!(session_id, voter_id, reason = %e, "ballot rejected");
                e.redirect_path(session_id).ok_or_else(|| server_error(&e))
            }
        },
    )
    .await
}

#[server(GetStats)]
pub async fn get_stats_handler(
    game_id: Option<i32>,
) -> Result<Stats, ServerFnError<NoCustomError>> {
    with_connection(move |conn| get_stats(conn, game_id).map_err(server_error)).await
}

#[server(GetPlayerDetail)]
pub async fn get_player_detail_handler(
    player_id: i32,
    game_id: Option<i32>,
) -> Result<PlayerPage, ServerFnError<NoCustomError>> {
    with_connection(move |conn| {
        let games = crate::get_all_games(conn).map_err(server_error)?;
        match get_player_detail(conn, player_id, game_id) {
            Ok(detail) => Ok(PlayerPage::Found(crate::model::PlayerPageData {
                games,
                selected_game_id: game_id,
                detail,
            })),
            Err(SessionError::NotFound) => Ok(PlayerPage::Redirect(stats_path(game_id))),
            Err(e) => Err(server_error(e)),
        }
    })
    .await
}

/// Deletes a session if it exists. Returns the stats path to go back to.
#[server(DeleteSession)]
pub async fn delete_session_handler(
    session_id: i32,
    game_id: Option<i32>,
) -> Result<String, ServerFnError<NoCustomError>> {
    with_connection(move |conn| {
        delete_session(conn, session_id).map_err(server_error)?;
        Ok(stats_path(game_id))
    })
    .await
}

#[server(GetVoteQrCode)]
pub async fn get_vote_qr_code(session_id: i32) -> Result<String, ServerFnError<NoCustomError>> {
    use axum::http::HeaderMap;
    use leptos_axum::extract;

    let headers: HeaderMap = extract().await.map_err(server_error)?;
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost:3000");
    let url = format!("http://{}/vote/{}", host, session_id);
    vote_qr_svg(&url).map_err(server_error)
}

pub fn shell(options: LeptosOptions) -> impl IntoView {
    view! {
        <!DOCTYPE html>
        <html lang="en">
            <head>
                <meta charset="utf-8" />
                <meta name="viewport" content="width=device-width, initial-scale=1" />
                <AutoReload options=options.clone() />
                <HydrationScripts options />
                <MetaTags />
            </head>
            <body>
                <App />
            </body>
        </html>
    }
}

#[component]
pub fn App() -> impl IntoView {
    // Provides context that manages stylesheets, titles, meta tags, etc.
    provide_meta_context();

    view! {
        <Stylesheet id="leptos" href="/pkg/whos-the-cone.css" />

        <Title text="Who's the Cone?" />

        <Router>
            <Nav />
            <main>
                <Routes fallback=|| "Page not found.".into_view()>
                    <Route path=path!("/") view=Home />
                    <Route path=path!("/vote/:id") view=VotingRoom />
                    <Route path=path!("/stats") view=StatsPage />
                    <Route path=path!("/player/:id") view=PlayerStats />
                </Routes>
            </main>
        </Router>
    }
}

#[component]
fn Nav() -> impl IntoView {
    view! {
        <nav class="top-nav">
            <a href="/">"Lobby"</a>
            <a href="/stats">"Leaderboard"</a>
        </nav>
    }
}

fn format_date(date: &chrono::NaiveDateTime) -> String {
    date.format(CHART_DATE_FORMAT).to_string()
}

fn participant_names(summary: &SessionSummary) -> String {
    summary
        .participants
        .iter()
        .map(|p| p.name.clone())
        .collect::<Vec<_>>()
        .join(", ")
}

#[component]
fn Home() -> impl IntoView {
    let lobby = Resource::new(|| (), |_| get_lobby_handler());
    let navigate = use_navigate();

    let selected_game = RwSignal::new(0i32);
    let selected_players = RwSignal::new(Vec::<i32>::new());
    let error = RwSignal::new(String::new());

    // Creates the session and takes the host straight to its voting page.
    let submit = move |ev: SubmitEvent| {
        ev.prevent_default();
        let game_id = selected_game.get();
        let player_ids = selected_players.get();
        if game_id == 0 || player_ids.is_empty() {
            error.set("Pick a game and at least one player.".to_string());
            return;
        }
        let navigate = navigate.clone();
        spawn_local(async move {
            match create_session_handler(game_id, player_ids).await {
                Ok(session_id) => {
                    error.set(String::new());
                    navigate(&format!("/vote/{}", session_id), NavigateOptions::default());
                }
                Err(e) => error.set(e.to_string()),
            }
        });
    };

    view! {
        <div class="page">
            <h1>"Who's the Cone?"</h1>
            <section class="card">
                <h2>"Open sessions"</h2>
                <Suspense fallback=|| {
                    view! { "Loading..." }
                }>
                    {move || {
                        lobby
                            .with(|maybe_result| match maybe_result {
                                Some(Ok(lobby)) if lobby.active_sessions.is_empty() => {
                                    view! { <p>"No session is waiting for votes."</p> }.into_any()
                                }
                                Some(Ok(lobby)) => {
                                    view! {
                                        <ul class="session-list">
                                            {lobby
                                                .active_sessions
                                                .iter()
                                                .map(|summary| {
                                                    let href = format!("/vote/{}", summary.session.id);
                                                    view! {
                                                        <li>
                                                            <a href=href>
                                                                {summary.game_name.clone()} " - "
                                                                {format_date(&summary.session.date)}
                                                            </a>
                                                            <span class="muted">
                                                                " " {participant_names(summary)} " ("
                                                                {summary.voter_ids.len()} "/"
                                                                {summary.participants.len()} " voted)"
                                                            </span>
                                                        </li>
                                                    }
                                                })
                                                .collect_view()}
                                        </ul>
                                    }
                                        .into_any()
                                }
                                _ => view! { "Error loading sessions" }.into_any(),
                            })
                    }}
                </Suspense>
            </section>

            <section class="card">
                <h2>"New session"</h2>
                <form class="session-form" on:submit=submit>
                    <label>
                        "Game: "
                        <select
                            class="form-select"
                            prop:value=move || selected_game.get().to_string()
                            on:change=move |ev| {
                                selected_game.set(event_target_value(&ev).parse().unwrap_or(0))
                            }
                        >
                            <option value="0">"Select a game"</option>
                            <Suspense fallback=|| {
                                view! { <option>"Loading..."</option> }
                            }>
                                {move || {
                                    lobby
                                        .with(|maybe_result| match maybe_result {
                                            Some(Ok(lobby)) => {
                                                lobby
                                                    .games
                                                    .iter()
                                                    .map(|game| {
                                                        view! {
                                                            <option value=game
                                                                .id
                                                                .to_string()>{game.name.clone()}</option>
                                                        }
                                                    })
                                                    .collect_view()
                                                    .into_any()
                                            }
                                            _ => view! { <option>"Error"</option> }.into_any(),
                                        })
                                }}
                            </Suspense>
                        </select>
                    </label>
                    <fieldset class="player-picks">
                        <legend>"Players"</legend>
                        <Suspense fallback=|| {
                            view! { "Loading..." }
                        }>
                            {move || {
                                lobby
                                    .with(|maybe_result| match maybe_result {
                                        Some(Ok(lobby)) => {
                                            lobby
                                                .players
                                                .iter()
                                                .map(|player| {
                                                    let id = player.id;
                                                    view! {
                                                        <label class="player-check">
                                                            <input
                                                                type="checkbox"
                                                                prop:checked=move || {
                                                                    selected_players.with(|ids| ids.contains(&id))
                                                                }
                                                                on:change=move |ev| {
                                                                    let checked = event_target_checked(&ev);
                                                                    selected_players
                                                                        .update(|ids| {
                                                                            ids.retain(|&p| p != id);
                                                                            if checked {
                                                                                ids.push(id);
                                                                            }
                                                                        });
                                                                }
                                                            />
                                                            {player.name.clone()}
                                                        </label>
                                                    }
                                                })
                                                .collect_view()
                                                .into_any()
                                        }
                                        _ => view! { "Error loading players" }.into_any(),
                                    })
                            }}
                        </Suspense>
                    </fieldset>
                    <button type="submit" class="btn-primary">
                        "Start voting"
                    </button>
                </form>
                {move || (!error.get().is_empty()).then(|| view! { <p class="error">{error.get()}</p> })}
            </section>
        </div>
    }
}

#[component]
fn VotingRoom() -> impl IntoView {
    let params = use_params_map();
    let query = use_query_map();
    let session_id = move || {
        params
            .read()
            .get("id")
            .and_then(|id| id.parse::<i32>().ok())
            .unwrap_or(0)
    };
    let error_code = move || query.read().get("error");

    let page = Resource::new(session_id, get_voting_view);
    let qr_code = Resource::new(session_id, get_vote_qr_code);

    let voting = RwSignal::new(None::<VotingView>);
    let ranking = RwSignal::new(Vec::<Player>::new());
    let voter_id = RwSignal::new(0i32);
    let form_error = RwSignal::new(String::new());

    // Sends the visitor away from missing or closed sessions, otherwise seeds the ranking with the
    // participants.
    let navigate = use_navigate();
    let navigate_away = navigate.clone();
    Effect::new(move || {
        page.with(|maybe_result| match maybe_result {
            Some(Ok(VotingPage::Redirect(path))) => {
                navigate_away(path, NavigateOptions::default());
            }
            Some(Ok(VotingPage::Open(view))) => {
                ranking.set(view.participants.clone());
                voting.set(Some(view.clone()));
            }
            _ => {}
        });
    });

    let move_player = move |index: usize, up: bool| {
        ranking.update(|list| {
            let other = if up {
                index.checked_sub(1)
            } else {
                Some(index + 1).filter(|&i| i < list.len())
            };
            if let Some(other) = other {
                list.swap(index, other);
            }
        });
    };

    let submit = move |ev: SubmitEvent| {
        ev.prevent_default();
        let voter = voter_id.get();
        if voter == 0 {
            form_error.set("Pick your name first.".to_string());
            return;
        }
        let ids: Vec<i32> = ranking.with(|list| list.iter().map(|p| p.id).collect());
        let rankings = match serde_json::to_string(&ids) {
            Ok(json) => json,
            Err(e) => {
                form_error.set(e.to_string());
                return;
            }
        };
        let id = session_id();
        let navigate = navigate.clone();
        spawn_local(async move {
            match submit_ballot_handler(id, voter, rankings).await {
                Ok(path) => {
                    form_error.set(String::new());
                    navigate(&path, NavigateOptions::default());
                }
                Err(e) => {
                    log!("Ballot failed: {}", e);
                    form_error.set(e.to_string());
                }
            }
        });
    };

    view! {
        <div class="page">
            <Suspense fallback=|| {
                view! { "Loading..." }
            }>
                {move || {
                    page.with(|maybe_result| match maybe_result {
                        Some(Ok(VotingPage::Open(view))) => {
                            view! {
                                <h1>"Vote: " {view.game.name.clone()}</h1>
                                <p class="muted">
                                    {format_date(&view.session.date)} " - "
                                    {view.voter_ids.len()} " of " {view.participants.len()}
                                    " players have voted"
                                </p>
                            }
                                .into_any()
                        }
                        Some(Ok(VotingPage::Redirect(_))) => view! { "Redirecting..." }.into_any(),
                        _ => view! { "Error loading session" }.into_any(),
                    })
                }}
            </Suspense>

            {move || {
                error_code()
                    .map(|code| view! { <p class="error">{ballot_error_message(&code)}</p> })
            }}

            <form class="ballot" on:submit=submit>
                <label>
                    "I am: "
                    <select
                        class="form-select"
                        prop:value=move || voter_id.get().to_string()
                        on:change=move |ev| {
                            voter_id.set(event_target_value(&ev).parse().unwrap_or(0))
                        }
                    >
                        <option value="0">"Select your name"</option>
                        {move || {
                            voting
                                .with(|maybe_view| {
                                    maybe_view
                                        .iter()
                                        .flat_map(|view| {
                                            view.participants
                                                .iter()
                                                .map(move |player| {
                                                    let voted = view.voter_ids.contains(&player.id);
                                                    view! {
                                                        <option value=player.id.to_string() disabled=voted>
                                                            {player.name.clone()}
                                                            {voted.then_some(" (voted)")}
                                                        </option>
                                                    }
                                                })
                                        })
                                        .collect_view()
                                })
                        }}
                    </select>
                </label>

                <p>"Rank everyone from best (top) to worst (bottom):"</p>
                <ol class="ranking">
                    {move || {
                        let count = ranking.with(|list| list.len());
                        ranking
                            .get()
                            .into_iter()
                            .enumerate()
                            .map(|(index, player)| {
                                let badge = if index == 0 {
                                    " 👑"
                                } else if index + 1 == count {
                                    " 🍦"
                                } else {
                                    ""
                                };
                                view! {
                                    <li>
                                        <span class="name">{player.name} {badge}</span>
                                        <button
                                            type="button"
                                            disabled={index == 0}
                                            on:click=move |_| move_player(index, true)
                                        >
                                            "▲"
                                        </button>
                                        <button
                                            type="button"
                                            disabled={index + 1 == count}
                                            on:click=move |_| move_player(index, false)
                                        >
                                            "▼"
                                        </button>
                                    </li>
                                }
                            })
                            .collect_view()
                    }}
                </ol>
                <button type="submit" class="btn-primary">
                    "Submit ballot"
                </button>
            </form>
            {move || {
                (!form_error.get().is_empty())
                    .then(|| view! { <p class="error">{form_error.get()}</p> })
            }}

            <section class="card qr">
                <h2>"Join from your phone"</h2>
                <Suspense fallback=|| ()>
                    {move || {
                        qr_code
                            .with(|maybe_result| match maybe_result {
                                Some(Ok(svg)) => view! { <div inner_html=svg.clone()></div> }.into_any(),
                                _ => ().into_any(),
                            })
                    }}
                </Suspense>
            </section>
        </div>
    }
}

#[component]
fn GameFilter(games: Vec<crate::model::Game>, selected: Option<i32>, base: String) -> impl IntoView {
    let navigate = use_navigate();
    view! {
        <label class="game-filter">
            "Game: "
            <select
                class="form-select"
                on:change=move |ev| {
                    let value = event_target_value(&ev);
                    let path = match value.parse::<i32>() {
                        Ok(id) => format!("{}?game_id={}", base, id),
                        Err(_) => base.clone(),
                    };
                    navigate(&path, NavigateOptions::default());
                }
            >
                <option value="" selected=selected.is_none()>
                    "All games"
                </option>
                {games
                    .into_iter()
                    .map(|game| {
                        view! {
                            <option value=game.id.to_string() selected={selected == Some(game.id)}>
                                {game.name}
                            </option>
                        }
                    })
                    .collect_view()}
            </select>
        </label>
    }
}

#[component]
fn StatsPage() -> impl IntoView {
    let query = use_query_map();
    let game_filter = move || {
        query
            .read()
            .get("game_id")
            .and_then(|id| id.parse::<i32>().ok())
    };
    let stats = Resource::new(game_filter, get_stats_handler);

    let delete = move |session_id: i32| {
        spawn_local(async move {
            if leptos::leptos_dom::helpers::window()
                .confirm_with_message("Delete this session and all its votes?")
                .unwrap_or(false)
            {
                match delete_session_handler(session_id, game_filter()).await {
                    Ok(_) => stats.refetch(),
                    Err(e) => log!("Error: {}", e),
                }
            }
        });
    };

    view! {
        <div class="page">
            <h1>"Leaderboard"</h1>
            <Suspense fallback=|| {
                view! { "Loading..." }
            }>
                {move || {
                    stats
                        .with(|maybe_result| match maybe_result {
                            Some(Ok(stats)) => {
                                let filter = stats.selected_game_id;
                                view! {
                                    <GameFilter
                                        games=stats.games.clone()
                                        selected=filter
                                        base="/stats".to_string()
                                    />
                                    <table class="leaderboard">
                                        <thead>
                                            <tr>
                                                <th>"#"</th>
                                                <th>"Player"</th>
                                                <th>"Score"</th>
                                                <th>"Sessions"</th>
                                                <th>"👑"</th>
                                                <th>"🍦"</th>
                                            </tr>
                                        </thead>
                                        <tbody>
                                            {stats
                                                .leaderboard
                                                .iter()
                                                .enumerate()
                                                .map(|(index, row)| {
                                                    view! {
                                                        <tr>
                                                            <td>{index + 1}</td>
                                                            <td>
                                                                <a href=player_path(
                                                                    row.player_id,
                                                                    filter,
                                                                )>{row.name.clone()}</a>
                                                            </td>
                                                            <td>{row.score}</td>
                                                            <td>{row.sessions_participated}</td>
                                                            <td>{row.king_count}</td>
                                                            <td>{row.cone_count}</td>
                                                        </tr>
                                                    }
                                                })
                                                .collect_view()}
                                        </tbody>
                                    </table>

                                    <h2>"Sessions"</h2>
                                    <table class="sessions">
                                        <tbody>
                                            {stats
                                                .sessions
                                                .iter()
                                                .map(|summary| {
                                                    let session_id = summary.session.id;
                                                    let status = if summary.session.is_active {
                                                        "open"
                                                    } else {
                                                        "closed"
                                                    };
                                                    view! {
                                                        <tr>
                                                            <td>{format_date(&summary.session.date)}</td>
                                                            <td>{summary.game_name.clone()}</td>
                                                            <td>{participant_names(summary)}</td>
                                                            <td class=status>{status}</td>
                                                            <td>
                                                                <button
                                                                    class="btn-danger"
                                                                    on:click=move |_| delete(session_id)
                                                                >
                                                                    "Delete"
                                                                </button>
                                                            </td>
                                                        </tr>
                                                    }
                                                })
                                                .collect_view()}
                                        </tbody>
                                    </table>
                                }
                                    .into_any()
                            }
                            _ => view! { "Error loading stats" }.into_any(),
                        })
                }}
            </Suspense>
        </div>
    }
}

/// Maps scores to points of a `width` x `height` box, left to right, with the highest score at
/// the top.
pub fn chart_coordinates(scores: &[i32], width: f64, height: f64) -> Vec<(f64, f64)> {
    let max = scores.iter().copied().max().unwrap_or(0).max(1) as f64;
    let step = if scores.len() > 1 {
        width / (scores.len() - 1) as f64
    } else {
        0.0
    };
    scores
        .iter()
        .enumerate()
        .map(|(index, &score)| {
            let x = if scores.len() > 1 {
                index as f64 * step
            } else {
                width / 2.0
            };
            (x, height - (score as f64 / max) * height)
        })
        .collect()
}

#[component]
fn ScoreChart(points: Vec<ChartPoint>) -> impl IntoView {
    const WIDTH: f64 = 600.0;
    const HEIGHT: f64 = 200.0;
    const PAD: f64 = 12.0;

    let scores: Vec<i32> = points.iter().map(|p| p.score).collect();
    let coords = chart_coordinates(&scores, WIDTH, HEIGHT);
    let polyline = coords
        .iter()
        .map(|(x, y)| format!("{:.1},{:.1}", x + PAD, y + PAD))
        .collect::<Vec<_>>()
        .join(" ");
    let view_box = format!("0 0 {} {}", WIDTH + 2.0 * PAD, HEIGHT + 2.0 * PAD + 20.0);

    view! {
        <svg class="score-chart" viewBox=view_box>
            <polyline points=polyline fill="none" stroke="#4a7dff" stroke-width="2" />
            {points
                .into_iter()
                .zip(coords)
                .map(|(point, (x, y))| {
                    let fill = if point.king == 1 {
                        "#f2b600"
                    } else if point.cone == 1 {
                        "#ff7a00"
                    } else {
                        "#4a7dff"
                    };
                    let cx = format!("{:.1}", x + PAD);
                    let cy = format!("{:.1}", y + PAD);
                    view! {
                        <circle cx=cx.clone() cy=cy r="5" fill=fill></circle>
                        <text
                            x=cx
                            y=format!("{:.1}", HEIGHT + 2.0 * PAD + 14.0)
                            text-anchor="middle"
                            font-size="10"
                        >
                            {point.date_label}
                        </text>
                    }
                })
                .collect_view()}
        </svg>
    }
}

#[component]
fn GameBars(points: Vec<GameScorePoint>) -> impl IntoView {
    let max = points.iter().map(|p| p.score).max().unwrap_or(0).max(1);
    view! {
        <div class="game-bars">
            {points
                .into_iter()
                .map(|point| {
                    let width = format!("width: {}%", point.score * 100 / max);
                    view! {
                        <div class="bar-row">
                            <span class="bar-label">{point.game_name}</span>
                            <span class="bar" style=width></span>
                            <span class="bar-value">{point.score}</span>
                        </div>
                    }
                })
                .collect_view()}
        </div>
    }
}

#[component]
fn PlayerStats() -> impl IntoView {
    let params = use_params_map();
    let query = use_query_map();
    let player_id = move || {
        params
            .read()
            .get("id")
            .and_then(|id| id.parse::<i32>().ok())
            .unwrap_or(0)
    };
    let game_filter = move || {
        query
            .read()
            .get("game_id")
            .and_then(|id| id.parse::<i32>().ok())
    };
    let page = Resource::new(
        move || (player_id(), game_filter()),
        |(id, game_id)| get_player_detail_handler(id, game_id),
    );

    let navigate = use_navigate();
    Effect::new(move || {
        page.with(|maybe_result| {
            if let Some(Ok(PlayerPage::Redirect(path))) = maybe_result {
                navigate(path, NavigateOptions::default());
            }
        });
    });

    view! {
        <div class="page">
            <Suspense fallback=|| {
                view! { "Loading..." }
            }>
                {move || {
                    page.with(|maybe_result| match maybe_result {
                        Some(Ok(PlayerPage::Found(data))) => {
                            let detail = &data.detail;
                            let overall = &detail.overall;
                            view! {
                                <h1>{detail.player.name.clone()}</h1>
                                <GameFilter
                                    games=data.games.clone()
                                    selected=data.selected_game_id
                                    base=format!("/player/{}", detail.player.id)
                                />
                                <div class="overall">
                                    <div>"Score: " {overall.score}</div>
                                    <div>"Sessions: " {overall.sessions_count}</div>
                                    <div>"👑 " {overall.king_count}</div>
                                    <div>"🍦 " {overall.cone_count}</div>
                                </div>

                                <h2>"Score over time"</h2>
                                <ScoreChart points=detail.chart_over_time.clone() />

                                <h2>"By game"</h2>
                                <GameBars points=detail.chart_by_game.clone() />
                                <table class="by-game">
                                    <thead>
                                        <tr>
                                            <th>"Game"</th>
                                            <th>"Score"</th>
                                            <th>"Sessions"</th>
                                            <th>"👑"</th>
                                            <th>"🍦"</th>
                                        </tr>
                                    </thead>
                                    <tbody>
                                        {detail
                                            .by_game
                                            .iter()
                                            .map(|game| {
                                                view! {
                                                    <tr>
                                                        <td>{game.game_name.clone()}</td>
                                                        <td>{game.score}</td>
                                                        <td>{game.sessions_count}</td>
                                                        <td>{game.king_count}</td>
                                                        <td>{game.cone_count}</td>
                                                    </tr>
                                                }
                                            })
                                            .collect_view()}
                                    </tbody>
                                </table>

                                <h2>"History"</h2>
                                <table class="history">
                                    <thead>
                                        <tr>
                                            <th>"Date"</th>
                                            <th>"Game"</th>
                                            <th>"Score"</th>
                                            <th>"Rank"</th>
                                            <th></th>
                                        </tr>
                                    </thead>
                                    <tbody>
                                        {detail
                                            .session_history
                                            .iter()
                                            .map(|entry| {
                                                view! {
                                                    <tr>
                                                        <td>{format_date(&entry.date)}</td>
                                                        <td>{entry.game_name.clone()}</td>
                                                        <td>{entry.score_in_session}</td>
                                                        <td>{entry.rank_in_session}</td>
                                                        <td>
                                                            {entry.was_king.then_some("👑")}
                                                            {entry.was_cone.then_some("🍦")}
                                                        </td>
                                                    </tr>
                                                }
                                            })
                                            .collect_view()}
                                    </tbody>
                                </table>
                            }
                                .into_any()
                        }
                        Some(Ok(PlayerPage::Redirect(_))) => view! { "Redirecting..." }.into_any(),
                        _ => view! { "Error loading player" }.into_any(),
                    })
                }}
            </Suspense>
        </div>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_keep_game_filter() {
        assert_eq!(stats_path(None), "/stats");
        assert_eq!(stats_path(Some(3)), "/stats?game_id=3");
        assert_eq!(player_path(2, None), "/player/2");
        assert_eq!(player_path(2, Some(5)), "/player/2?game_id=5");
    }

    #[test]
    fn test_ballot_error_messages() {
        assert_eq!(
            ballot_error_message("already_voted"),
            "You have already voted in this session."
        );
        assert_eq!(
            ballot_error_message("not_participant"),
            "You are not playing in this session."
        );
        assert_eq!(
            ballot_error_message("nonsense"),
            "Something went wrong, try again."
        );
    }

    #[test]
    fn test_chart_coordinates() {
        assert!(chart_coordinates(&[], 100.0, 50.0).is_empty());
        assert_eq!(chart_coordinates(&[4], 100.0, 50.0), vec![(50.0, 0.0)]);
        assert_eq!(
            chart_coordinates(&[2, 4, 0], 100.0, 50.0),
            vec![(0.0, 25.0), (50.0, 0.0), (100.0, 50.0)]
        );
    }

    #[cfg(feature = "ssr")]
    #[test]
    fn test_vote_qr_svg() {
        let svg = vote_qr_svg("http://localhost:3000/vote/1").expect("QR code should render");
        assert!(svg.contains("<svg"));
    }
}
