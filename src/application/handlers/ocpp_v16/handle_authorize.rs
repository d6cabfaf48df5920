//! Authorize handler

use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use serde_json::Value;
use tracing::info;

use super::{id_tag_info, parse_payload};
use crate::application::handlers::actions::InboundAction;
use crate::application::handlers::{CallFault, CallOutcome, HandlerResult, OcppHandlerV16};

pub async fn handle_authorize(handler: &OcppHandlerV16, payload: &Value) -> HandlerResult {
    let req: AuthorizeRequest = parse_payload(InboundAction::Authorize, payload)?;

    let own_connector = (!handler.identity.is_aggregate()).then_some(handler.identity.connector_id);
    let authorization = handler
        .system
        .transactions
        .authorize(&handler.identity, &req.id_tag, own_connector)
        .await
        .map_err(CallFault::internal)?;

    info!(
        charge_point_id = %handler.identity,
        id_tag = req.id_tag.as_str(),
        status = %authorization.status,
        "Authorize"
    );

    Ok(CallOutcome::typed(&AuthorizeResponse {
        id_tag_info: id_tag_info(&authorization),
    }))
}
