use std::{error::Error, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        request, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, RequestPartsExt as _, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use derive_more::From;
use itertools::Itertools as _;
use jsonwebtoken::{
    decode, encode, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{fs, net, task};
use tokio_postgres::error::SqlState;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _,
};
use validator::Validate;

use restaurant_voting::{api, db, Config};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = fs::read_to_string("config.toml").await?;
    let config = toml::from_str::<Config>(&config)?;

    let (db_client, db_connection) = db::connect(config.db).await?;

    task::spawn(async move {
        if let Err(e) = db_connection.await {
            panic!("database connection failed: {e}");
        }
    });

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::PATCH, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);
    for origin in &config.http.cors.allowed_origins {
        cors = cors.allow_origin(origin.parse::<HeaderValue>()?);
    }

    let app = Router::new()
        .route("/auth", post(auth))
        .route("/user", get(get_user).post(register_user))
        .route("/user/:id", patch(edit_user))
        .route("/restaurant", get(list_restaurants))
        .route("/vote", post(vote))
        .layer(cors)
        .with_state(Arc::new(AppState {
            db_client,
            jwt_expiration_time: config.jwt.expiration_time,
            jwt_decoding_key: DecodingKey::from_secret(
                config.jwt.secret.as_bytes(),
            ),
            jwt_encoding_key: EncodingKey::from_secret(
                config.jwt.secret.as_bytes(),
            ),
            vote_change_deadline: config.voting.change_deadline,
        }));

    let listener = net::TcpListener::bind(config.http.server.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct AuthInput {
    email: String,
    password: String,
}

async fn auth(
    State(state): State<SharedAppState>,
    Json(AuthInput { email, password }): Json<AuthInput>,
) -> Result<String, AuthError> {
    use AuthError as E;

    let user = state
        .db_client
        .get_user_by_email(&email)
        .await?
        .filter(|u| u.password_hash.verify(&password))
        .ok_or(E::WrongEmailOrPassword)?;
    if !user.enabled {
        return Err(E::UserDisabled);
    }

    let expires_at = OffsetDateTime::now_utc() + state.jwt_expiration_time;
    encode(
        &Header::default(),
        &AuthClaims {
            user_id: user.id,
            exp: expires_at.unix_timestamp(),
        },
        &state.jwt_encoding_key,
    )
    .map_err(|_| E::InvalidToken)
}

#[derive(Debug, From)]
pub enum AuthError {
    #[from]
    DbError(db::Error),
    InvalidToken,
    UserDisabled,
    WrongEmailOrPassword,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::UserDisabled | Self::WrongEmailOrPassword => {
                StatusCode::FORBIDDEN
            }
        }
        .into_response()
    }
}

#[derive(Deserialize, Validate)]
struct RegisterInput {
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[validate(email, length(max = 100))]
    email: String,
    #[validate(length(min = 5, max = 100))]
    password: String,
}

async fn register_user(
    State(state): State<SharedAppState>,
    Json(input): Json<RegisterInput>,
) -> Result<Json<api::User>, RegisterUserError> {
    use RegisterUserError as E;

    input.validate()?;

    let password_hash = api::user::PasswordHash::generate(&input.password)
        .map_err(|_| E::PasswordCannotBeHashed)?;
    let user = db::User::registered_now(
        api::user::Id::new(),
        input.name,
        input.email,
        password_hash,
        [api::user::Role::User],
    );

    match state.db_client.write_user(&user).await {
        Ok(()) => {}
        Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
            return Err(E::EmailAlreadyInUse);
        }
        Err(e) => return Err(e.into()),
    }

    let roles = user.roles().clone();
    Ok(Json(api::User {
        id: user.id,
        name: user.name,
        email: user.email,
        enabled: user.enabled,
        registered: user.registered,
        roles,
        votes: Vec::new(),
    }))
}

#[derive(Debug, From)]
pub enum RegisterUserError {
    #[from]
    DbError(db::Error),
    EmailAlreadyInUse,
    #[from]
    InvalidInput(validator::ValidationErrors),
    PasswordCannotBeHashed,
}

impl IntoResponse for RegisterUserError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) | Self::PasswordCannotBeHashed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::EmailAlreadyInUse => StatusCode::CONFLICT,
            Self::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
        .into_response()
    }
}

async fn get_user(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
) -> Result<Json<api::User>, GetUserError> {
    use GetUserError as E;

    let my = state
        .db_client
        .get_user_by_id(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;

    let votes = state.db_client.get_votes_by_user(my.id).await?;
    let restaurant_ids = votes
        .iter()
        .map(|vote| vote.restaurant)
        .unique()
        .collect::<Vec<_>>();
    let restaurants =
        state.db_client.get_restaurants_by_ids(&restaurant_ids).await?;

    let votes = votes
        .into_iter()
        .map(|vote| {
            let restaurant = restaurants
                .get(&vote.restaurant)
                .ok_or(E::RestaurantNotFound(vote.restaurant))?;
            Ok::<_, E>(api::Vote {
                id: vote.id,
                date: vote.date,
                restaurant: api::Restaurant {
                    id: restaurant.id,
                    name: restaurant.name.clone(),
                },
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let roles = my.roles().clone();
    Ok(Json(api::User {
        id: my.id,
        name: my.name,
        email: my.email,
        enabled: my.enabled,
        registered: my.registered,
        roles,
        votes,
    }))
}

#[derive(Debug, From)]
pub enum GetUserError {
    #[from]
    DbError(db::Error),
    RestaurantNotFound(api::restaurant::Id),
    UserNotFound,
}

impl IntoResponse for GetUserError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_)
            | Self::RestaurantNotFound(_)
            | Self::UserNotFound => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

#[derive(Deserialize)]
#[serde(content = "data", rename_all = "camelCase", tag = "op")]
enum EditUserInput {
    SetRoles { roles: Vec<api::user::Role> },
    Enable,
    Disable,
}

async fn edit_user(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Path(id): Path<api::user::Id>,
    Json(op): Json<EditUserInput>,
) -> Result<Json<api::User>, EditUserError> {
    use EditUserError as E;
    use EditUserInput as Op;

    let my = state
        .db_client
        .get_user_by_id(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;
    if !my.roles().contains(&api::user::Role::Admin) {
        return Err(E::UserCannotBeModified);
    }

    let mut user = state
        .db_client
        .get_user_by_id(id)
        .await?
        .ok_or(E::UserNotFound)?;

    match op {
        Op::SetRoles { roles } => user.set_roles(roles),
        Op::Enable => user.enabled = true,
        Op::Disable => user.enabled = false,
    }

    state.db_client.write_user(&user).await?;

    let votes = state.db_client.get_votes_by_user(user.id).await?;
    let restaurant_ids = votes
        .iter()
        .map(|vote| vote.restaurant)
        .unique()
        .collect::<Vec<_>>();
    let restaurants =
        state.db_client.get_restaurants_by_ids(&restaurant_ids).await?;

    let votes = votes
        .into_iter()
        .map(|vote| {
            let restaurant = restaurants
                .get(&vote.restaurant)
                .ok_or(E::RestaurantNotFound(vote.restaurant))?;
            Ok::<_, E>(api::Vote {
                id: vote.id,
                date: vote.date,
                restaurant: api::Restaurant {
                    id: restaurant.id,
                    name: restaurant.name.clone(),
                },
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let roles = user.roles().clone();
    Ok(Json(api::User {
        id: user.id,
        name: user.name,
        email: user.email,
        enabled: user.enabled,
        registered: user.registered,
        roles,
        votes,
    }))
}

#[derive(Debug, From)]
pub enum EditUserError {
    #[from]
    DbError(db::Error),
    RestaurantNotFound(api::restaurant::Id),
    UserCannotBeModified,
    UserNotFound,
}

impl IntoResponse for EditUserError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) | Self::RestaurantNotFound(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::UserCannotBeModified => StatusCode::FORBIDDEN,
            Self::UserNotFound => StatusCode::NOT_FOUND,
        }
        .into_response()
    }
}

async fn list_restaurants(
    State(state): State<SharedAppState>,
    _: AuthClaims,
) -> Result<Json<Vec<api::Restaurant>>, ListRestaurantsError> {
    let restaurants = state
        .db_client
        .list_restaurants()
        .await?
        .into_iter()
        .map(|restaurant| api::Restaurant {
            id: restaurant.id,
            name: restaurant.name,
        })
        .collect();

    Ok(Json(restaurants))
}

#[derive(Debug, From)]
pub enum ListRestaurantsError {
    #[from]
    DbError(db::Error),
}

impl IntoResponse for ListRestaurantsError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteInput {
    restaurant_id: api::restaurant::Id,
}

async fn vote(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Json(VoteInput { restaurant_id }): Json<VoteInput>,
) -> Result<Json<api::Vote>, VoteError> {
    use VoteError as E;

    let my = state
        .db_client
        .get_user_by_id(auth_claims.user_id)
        .await?
        .ok_or(E::UserNotFound)?;
    let restaurant = state
        .db_client
        .get_restaurant_by_id(restaurant_id)
        .await?
        .ok_or(E::RestaurantNotFound)?;

    let now = OffsetDateTime::now_utc();
    let existing = state.db_client.get_vote_by_user_on(my.id, now.date()).await?;
    if existing.is_some()
        && !db::vote::change_allowed(now, state.vote_change_deadline)
    {
        return Err(E::VoteCannotBeChanged);
    }

    let vote = db::Vote {
        id: existing.map_or_else(db::vote::Id::new, |vote| vote.id),
        user: my.id,
        restaurant: restaurant.id,
        date: now.date(),
    };
    state.db_client.write_vote(&vote).await?;

    Ok(Json(api::Vote {
        id: vote.id,
        date: vote.date,
        restaurant: api::Restaurant {
            id: restaurant.id,
            name: restaurant.name,
        },
    }))
}

#[derive(Debug, From)]
pub enum VoteError {
    #[from]
    DbError(db::Error),
    RestaurantNotFound,
    UserNotFound,
    VoteCannotBeChanged,
}

impl IntoResponse for VoteError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) | Self::UserNotFound => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::RestaurantNotFound => StatusCode::NOT_FOUND,
            Self::VoteCannotBeChanged => StatusCode::BAD_REQUEST,
        }
        .into_response()
    }
}

type SharedAppState = Arc<AppState>;

struct AppState {
    db_client: db::Client,

    jwt_expiration_time: Duration,

    jwt_decoding_key: DecodingKey,

    jwt_encoding_key: EncodingKey,

    vote_change_deadline: Duration,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct AuthClaims {
    user_id: api::user::Id,
    exp: i64,
}

#[async_trait]
impl FromRequestParts<SharedAppState> for AuthClaims {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut request::Parts,
        state: &SharedAppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::InvalidToken)?;
        let token_data = decode::<Self>(
            bearer.token(),
            &state.jwt_decoding_key,
            &Validation::default(),
        )
        .map_err(|_| AuthError::InvalidToken)?;

        Ok(token_data.claims)
    }
}
