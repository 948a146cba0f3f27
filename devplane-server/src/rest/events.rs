//! `GET /v1/events/subscribe?resourceTypes=…` — server-push event stream
//! via SSE, the same `axum::response::sse::Sse` shape this pack's
//! `spinploy` example uses for its own deploy-log stream.

use std::collections::HashSet;
use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;

use devplane_types::models::ResourceType;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct SubscribeQuery {
    #[serde(rename = "resourceTypes")]
    resource_types: Option<String>,
    #[allow(dead_code)]
    token: Option<String>,
}

pub async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let resource_types: HashSet<ResourceType> = query
        .resource_types
        .as_deref()
        .map(parse_resource_types)
        .unwrap_or_default();

    let mut subscriber = state.event_bus.subscribe(resource_types);

    let stream = async_stream::stream! {
        while let Some(event) = subscriber.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(SseEvent::default().event(event_name(&event)).data(data));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn event_name(event: &devplane_types::models::Event) -> &'static str {
    match event.kind {
        devplane_types::models::EventKind::ResubscribeHint => "resubscribe",
        _ => "event",
    }
}

fn parse_resource_types(raw: &str) -> HashSet<ResourceType> {
    raw.split(',')
        .filter_map(|s| match s.trim().to_ascii_uppercase().as_str() {
            "CONTAINER" => Some(ResourceType::Container),
            "APP" => Some(ResourceType::App),
            "COLLABORATOR" => Some(ResourceType::Collaborator),
            "ROUTE" => Some(ResourceType::Route),
            _ => None,
        })
        .collect()
}
