//! Request dispatch for the daemon.
//!
//! Every method validates its params at the boundary, then calls into the
//! tracker. Tracker errors map to stable `ErrorInfo` codes.

use flyover_core::{SessionStore, SessionTracker, SightingOutcome, TrackerError};
use flyover_protocol::{
    parse_key_query, parse_sighting, ErrorInfo, KeyQuery, Method, Request, Response,
    SightingReceipt, PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use tracing::{debug, info};

pub fn handle_request<S: SessionStore>(request: Request, tracker: &SessionTracker<S>) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => Response::ok(
            request.id,
            json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "retry_max_attempts": tracker.retry_policy().max_attempts,
            }),
        ),
        Method::RecordSighting => handle_record_sighting(request.id, request.params, tracker),
        Method::GetSightingCount => {
            let query = match require_key_query(request.params) {
                Ok(query) => query,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match tracker.get_sighting_count(&query.hex) {
                Ok(count) => {
                    debug!(key = %query.hex, sighting_count = count, "Sighting count query");
                    Response::ok(
                        request.id,
                        json!({ "hex": query.hex, "sighting_count": count }),
                    )
                }
                Err(err) => Response::error_with_info(request.id, tracker_error_info(&err)),
            }
        }
        Method::GetPreviousSessionEnd => {
            let query = match require_key_query(request.params) {
                Ok(query) => query,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match tracker.get_previous_session_end(&query.hex) {
                Ok(ended_at) => Response::ok(
                    request.id,
                    json!({ "hex": query.hex, "previous_session_ended_at": ended_at }),
                ),
                Err(err) => Response::error_with_info(request.id, tracker_error_info(&err)),
            }
        }
    }
}

fn handle_record_sighting<S: SessionStore>(
    id: Option<String>,
    params: Option<Value>,
    tracker: &SessionTracker<S>,
) -> Response {
    let params = match params {
        Some(params) => params,
        None => return Response::error(id, "invalid_params", "sighting payload is required"),
    };

    let sighting = match parse_sighting(params) {
        Ok(sighting) => sighting,
        Err(err) => return Response::error_with_info(id, err),
    };

    let attributes = sighting.describe();
    info!(key = %sighting.hex, aircraft = %attributes, "Received sighting");

    let receipt = tracker
        .record_now(&sighting.hex, &attributes)
        .map(|outcome| receipt_for(&outcome));

    match receipt {
        Ok(receipt) => match serde_json::to_value(&receipt) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize sighting receipt: {}", err),
            ),
        },
        Err(err) => Response::error_with_info(id, tracker_error_info(&err)),
    }
}

fn receipt_for(outcome: &SightingOutcome) -> SightingReceipt {
    let session = outcome.session();
    SightingReceipt {
        session_id: outcome.id.to_string(),
        sighting_count: session.sighting_count,
        previous_session_ended_at: session.previous_session_ended_at,
    }
}

fn require_key_query(params: Option<Value>) -> Result<KeyQuery, ErrorInfo> {
    match params {
        Some(params) => parse_key_query(params),
        None => Err(ErrorInfo::new("invalid_params", "hex is required")),
    }
}

fn tracker_error_info(err: &TrackerError) -> ErrorInfo {
    match err {
        TrackerError::InvalidKey => ErrorInfo::new("invalid_key", err.to_string()),
        TrackerError::StoreUnavailable { .. } => {
            ErrorInfo::new("store_unavailable", err.to_string())
        }
    }
}
