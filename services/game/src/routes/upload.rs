//! Upload page, photo submission, name entry and release

use axum::{
    Extension, Form,
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use common::credentials::mask;

use crate::{
    error::{GateError, GateResult},
    gate::{HolderRole, UploadContext},
    models::NewUploadLog,
    mutators,
    repositories::StoreError,
    session::SessionRecord,
    state::AppState,
    storage::NewContribution,
    validation::{sanitize_comment, sanitize_player_city, sanitize_player_name, validate_consent},
    views::{Page, encode_query},
};

/// Query of the upload page
#[derive(Debug, Deserialize)]
pub struct UploadPageQuery {
    pub uploaded: Option<String>,
}

/// Name-entry form
#[derive(Debug, Deserialize)]
pub struct SetNameForm {
    pub player_name: Option<String>,
    pub player_city: Option<String>,
    pub agree_privacy: Option<String>,
}

/// A photo as read from the multipart body.
struct UploadForm {
    derive_number: i32,
    comment: Option<String>,
    file_name: String,
    content_type: String,
    bytes: Vec<u8>,
}

fn upload_location(token: &str, uploaded: bool) -> String {
    if uploaded {
        format!("/upload?uploaded=1&token={}", encode_query(token))
    } else {
        format!("/upload?token={}", encode_query(token))
    }
}

fn require_holder(context: &UploadContext) -> GateResult<()> {
    if context.is_holder() {
        Ok(())
    } else {
        Err(GateError::Forbidden(
            "Bitte gib zuerst deinen Namen ein".to_string(),
        ))
    }
}

/// Show the upload page with this round's uploads
pub async fn show(
    State(state): State<AppState>,
    Extension(context): Extension<UploadContext>,
    Query(query): Query<UploadPageQuery>,
) -> GateResult<Page> {
    require_holder(&context)?;

    let uploads = state
        .tokens
        .session_uploads(context.token_id, context.session_number)
        .await?;
    let just_uploaded = query.uploaded.as_deref() == Some("1");

    Ok(Page::upload(&context, &uploads, just_uploaded))
}

async fn read_upload_form(mut multipart: Multipart) -> GateResult<UploadForm> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        warn!("Unreadable upload form: {}", e);
        GateError::BadRequest("Das Formular konnte nicht gelesen werden".to_string())
    };

    let mut derive_number = None;
    let mut comment = None;
    let mut image = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        match field.name().unwrap_or_default() {
            "derive_number" => {
                let text = field.text().await.map_err(invalid)?;
                derive_number = text.trim().parse::<i32>().ok();
            }
            "comment" => {
                let text = field.text().await.map_err(invalid)?;
                comment = sanitize_comment(Some(&text));
            }
            "image" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(invalid)?;
                image = Some((file_name, content_type, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let derive_number = derive_number.filter(|n| *n > 0).ok_or_else(|| {
        GateError::BadRequest("Bitte gib eine gültige Aufgabennummer an".to_string())
    })?;
    let (file_name, content_type, bytes) = image
        .filter(|(_, _, bytes)| !bytes.is_empty())
        .ok_or_else(|| GateError::BadRequest("Bitte wähle ein Foto aus".to_string()))?;
    if !content_type.starts_with("image/") {
        return Err(GateError::BadRequest(
            "Nur Bilddateien sind erlaubt".to_string(),
        ));
    }

    Ok(UploadForm {
        derive_number,
        comment,
        file_name,
        content_type,
        bytes,
    })
}

/// Accept one photo
///
/// The image is stored first; the upload only counts once
/// `record_upload` accepts it. A refused upload removes the stored image
/// again.
pub async fn submit(
    State(state): State<AppState>,
    Extension(context): Extension<UploadContext>,
    multipart: Multipart,
) -> GateResult<Redirect> {
    require_holder(&context)?;
    let form = read_upload_form(multipart).await?;

    let contribution_id = state
        .contributions
        .store(NewContribution {
            token_id: context.token_id,
            session_number: context.session_number,
            player_name: context.current_player.clone(),
            derive_number: form.derive_number,
            comment: form.comment.clone(),
            file_name: form.file_name,
            content_type: form.content_type,
            bytes: form.bytes,
        })
        .await?;

    let log = NewUploadLog {
        token_id: context.token_id,
        session_number: context.session_number,
        session_uuid: context.session_uuid.clone(),
        player_name: context.current_player.clone(),
        contribution_id,
        derive_number: form.derive_number,
        comment: form.comment,
    };

    match state.tokens.record_upload(&log).await {
        Ok(recorded) => {
            info!(
                "Upload {} on token {} round {} by {}",
                recorded.id, context.token_id, context.session_number, context.current_player
            );
            Ok(Redirect::to(&upload_location(&context.token, true)))
        }
        Err(err) => {
            if let Err(e) = state.contributions.discard(contribution_id).await {
                warn!("Failed to discard contribution {}: {}", contribution_id, e);
            }
            Err(refused_upload(&state, &context, err).await)
        }
    }
}

async fn refused_upload(state: &AppState, context: &UploadContext, err: StoreError) -> GateError {
    match err {
        StoreError::QuotaExhausted => match state.tokens.find_by_id(context.token_id).await {
            Ok(Some(token)) => GateError::QuotaExhausted {
                total_uploads: token.total_uploads,
                max_uploads: token.max_uploads,
            },
            _ => GateError::QuotaExhausted {
                total_uploads: 0,
                max_uploads: 0,
            },
        },
        StoreError::StaleRound => GateError::Conflict {
            bag_name: context.bag_name.clone(),
            current_player: String::new(),
        },
        other => other.into(),
    }
}

/// Take the bag under a name, or rename an admitted session
pub async fn set_name(
    State(state): State<AppState>,
    Extension(context): Extension<UploadContext>,
    Extension(mut record): Extension<SessionRecord>,
    Form(form): Form<SetNameForm>,
) -> GateResult<Response> {
    let retry = |error: String| {
        Page::enter_name(&context.token, &context.bag_name, &context.csrf_token)
            .with_error(error)
            .with_status(StatusCode::BAD_REQUEST)
    };

    if let Err(error) = validate_consent(form.agree_privacy.as_deref()) {
        return Ok(retry(error).into_response());
    }
    let name = match sanitize_player_name(form.player_name.as_deref().unwrap_or_default()) {
        Ok(name) => name,
        Err(error) => return Ok(retry(error).into_response()),
    };
    let city = sanitize_player_city(form.player_city.as_deref());

    match context.role {
        HolderRole::Secondary {
            authorized_session_id,
        } => {
            state.sessions.rename(authorized_session_id, &name).await?;
            record.remember_player(&name, city.as_deref());
        }
        HolderRole::Primary | HolderRole::Anonymous => {
            let bound = match state
                .tokens
                .bind_primary(context.token_id, &context.session_uuid, &name, city.as_deref())
                .await
            {
                Ok(bound) => bound,
                Err(StoreError::AlreadyBound) => {
                    let holder = state.tokens.find_by_id(context.token_id).await?;
                    info!(
                        "Session {} lost the race for token {}",
                        mask(&context.session_uuid),
                        context.token_id
                    );
                    return Err(GateError::Conflict {
                        bag_name: context.bag_name.clone(),
                        current_player: holder
                            .as_ref()
                            .and_then(|token| token.current_player())
                            .unwrap_or_default()
                            .to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            info!(
                "Session {} holds token {} as {}",
                mask(&context.session_uuid),
                bound.id,
                name
            );
            record.remember_player(&name, city.as_deref());
            record.sync_round(&bound);
        }
    }

    Ok((
        Extension(record),
        Redirect::to(&upload_location(&context.token, false)),
    )
        .into_response())
}

/// Give the bag back and forget it in this browser
pub async fn release(
    State(state): State<AppState>,
    Extension(context): Extension<UploadContext>,
    Extension(mut record): Extension<SessionRecord>,
) -> GateResult<Response> {
    mutators::release_bag(&state, &context).await?;
    record.forget_token();

    Ok((Extension(record), Redirect::to("/upload/released")).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_location_encodes_token() {
        assert_eq!(upload_location("a+b/c", false), "/upload?token=a%2Bb%2Fc");
        assert_eq!(upload_location("abc", true), "/upload?uploaded=1&token=abc");
    }
}
