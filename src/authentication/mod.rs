use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use warp::{Filter, Rejection};
use zeroize::Zeroizing;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OperatorClaims {
    pub sub: String, // Who is driving the presentation
    pub exp: usize,
}

#[derive(Debug)]
pub struct Unauthorized;

impl warp::reject::Reject for Unauthorized {}

/// Check an `Authorization: Bearer <jwt>` header against the operator
/// secret. Tokens are HS256 and must not be expired.
pub fn authorize_operator(
    header: Option<String>,
    secret: Option<&Zeroizing<String>>,
) -> Result<OperatorClaims, Rejection> {
    let secret = secret.ok_or_else(|| {
        warn!("Operator request refused: no operator secret configured");
        warp::reject::custom(Unauthorized)
    })?;

    let header = header.ok_or_else(|| warp::reject::custom(Unauthorized))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| warp::reject::custom(Unauthorized))?;

    let token = jsonwebtoken::decode::<OperatorClaims>(
        token.trim(),
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| {
        error!("Operator rejected due to JWT error: {e}");
        warp::reject::custom(Unauthorized)
    })?;

    Ok(token.claims)
}

pub fn with_operator(
    secret: Option<Zeroizing<String>>,
) -> impl Filter<Extract = (OperatorClaims,), Error = Rejection> + Clone {
    let secret = Arc::new(secret);
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let secret = secret.clone();
        async move { authorize_operator(header, Option::as_ref(&secret)) }
    })
}
