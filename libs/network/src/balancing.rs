//! Candidate selection and failover
//!
//! [`select_destinations`] ranks data centers and collects destinations;
//! [`execute`] walks the candidates until one answers, an application
//! error comes back, or the attempt budget runs out.

use crate::data_center::DataCenter;
use crate::error::{Result, RpcClientError};
use crate::pool::Destination;
use crate::rpc::{RpcRequest, RpcResponse};
use rand::seq::SliceRandom;
use rand::Rng;
use rpc_types::Guid;
use std::sync::Arc;
use tracing::{debug, warn};

/// Ranked candidate destinations across data centers
///
/// The data center named `local`, wherever it sits in the slice, is taken
/// first whatever the scores or `randomize_order` say. The rest are sorted
/// by descending score; ties keep their slice order unless `randomize_order`
/// shuffles them first.
pub fn select_destinations<R: Rng + ?Sized>(
    data_centers: &[Arc<DataCenter>],
    local: Option<&str>,
    count: usize,
    rng: &mut R,
    randomize_order: bool,
) -> Vec<Destination> {
    let is_local = |dc: &Arc<DataCenter>| local == Some(dc.name());
    let local = data_centers.iter().find(|dc| is_local(dc));

    let mut ranked: Vec<&Arc<DataCenter>> = data_centers
        .iter()
        .filter(|dc| !is_local(dc) && !dc.is_closed())
        .collect();
    if randomize_order {
        ranked.shuffle(rng);
    }
    // Stable: ties keep the (possibly shuffled) order
    ranked.sort_by(|a, b| b.score().total_cmp(&a.score()));

    let mut candidates = Vec::with_capacity(count);
    for dc in local.into_iter().chain(ranked) {
        if candidates.len() >= count {
            break;
        }
        candidates.extend(dc.select_destinations(count - candidates.len()));
    }
    candidates
}

/// Send `request` to the candidates in order until one succeeds
///
/// Transport failures move on to the next candidate with the same request
/// id and the retry flag set. A remote application error, or any other
/// non-retryable error, is returned at once.
pub async fn execute(
    request: &RpcRequest,
    candidates: &[Destination],
    attempt_budget: usize,
) -> Result<RpcResponse> {
    if candidates.is_empty() {
        return Err(RpcClientError::no_proxies("all"));
    }

    let mut request = request.clone();
    let request_id = *request.request_id.get_or_insert_with(Guid::create);
    let mut last_error = None;

    for (attempt, destination) in candidates.iter().take(attempt_budget.max(1)).enumerate() {
        if attempt > 0 {
            request.retry = true;
        }
        debug!(
            request_id = %request_id,
            address = %destination.address(),
            attempt,
            "Dispatching request"
        );

        match destination.client().send(&request).await {
            Ok(response) => return Ok(response),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    address = %destination.address(),
                    attempt,
                    error = %e,
                    "Request attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| RpcClientError::no_proxies("all")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DestinationPool;
    use crate::rpc::RpcClientOptions;
    use crate::test_utils::{MockBusConnector, MockReply};
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rpc_codec::RpcError;
    use std::time::Duration;

    async fn data_center(connector: &MockBusConnector, name: &str, proxies: &[&str]) -> Arc<DataCenter> {
        let dc = DataCenter::new(DestinationPool::new(
            name,
            Arc::new(connector.clone()),
            RpcClientOptions::default(),
            Duration::from_secs(1),
        ));
        dc.set_proxies(proxies.iter().map(|p| p.to_string()).collect())
            .await
            .unwrap();
        Arc::new(dc)
    }

    fn request() -> RpcRequest {
        RpcRequest::new("ApiService", "GetNode", Bytes::from_static(b"//tmp"))
            .with_timeout(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_local_first_then_by_score() {
        let connector = MockBusConnector::new();
        let local = data_center(&connector, "sas", &["sas:1"]).await;
        let low = data_center(&connector, "man", &["man:1"]).await;
        let high = data_center(&connector, "vla", &["vla:1"]).await;
        local.set_score(0.1);
        low.set_score(0.2);
        high.set_score(0.9);

        // Local sits in the middle; only its name makes it local
        let dcs = vec![low, local, high];
        let mut rng = StdRng::seed_from_u64(1);
        for randomize in [false, true] {
            let picked = select_destinations(&dcs, Some("sas"), 3, &mut rng, randomize);
            let addresses: Vec<&str> = picked.iter().map(|d| d.address()).collect();
            assert_eq!(addresses, vec!["sas:1", "vla:1", "man:1"]);
        }

        let picked = select_destinations(&dcs, None, 3, &mut rng, false);
        assert_eq!(picked[0].address(), "vla:1");
        let picked = select_destinations(&dcs, Some("unknown"), 3, &mut rng, false);
        assert_eq!(picked[0].address(), "vla:1");
    }

    #[tokio::test]
    async fn test_count_limits_candidates() {
        let connector = MockBusConnector::new();
        let local = data_center(&connector, "sas", &["sas:1", "sas:2"]).await;
        let remote = data_center(&connector, "vla", &["vla:1", "vla:2"]).await;
        let dcs = vec![local, remote];
        let mut rng = StdRng::seed_from_u64(2);

        let picked = select_destinations(&dcs, Some("sas"), 3, &mut rng, false);
        assert_eq!(picked.len(), 3);
        assert!(picked[..2].iter().all(|d| d.address().starts_with("sas")));
        assert!(picked[2].address().starts_with("vla"));
    }

    #[tokio::test]
    async fn test_retries_on_transport_failure_with_same_id() {
        let connector = MockBusConnector::new();
        connector.set_responder(|address, _request| match address {
            "h:1" => Some(MockReply::Disconnect),
            _ => Some(MockReply::body(&b"ok"[..])),
        });
        let dc = data_center(&connector, "sas", &["h:1", "h:2"]).await;
        let candidates = vec![
            dc.pool().destination("h:1").unwrap(),
            dc.pool().destination("h:2").unwrap(),
        ];

        let response = execute(&request(), &candidates, 3).await.unwrap();
        assert_eq!(&response.body[..], b"ok");

        let first = connector.bus("h:1").unwrap().sent_requests();
        let second = connector.bus("h:2").unwrap().sent_requests();
        assert!(!first[0].header.retry);
        assert!(second[0].header.retry);
        assert_eq!(first[0].header.request_id, second[0].header.request_id);
    }

    #[tokio::test]
    async fn test_malformed_response_fails_over() {
        let connector = MockBusConnector::new();
        connector.set_responder(|address, _request| match address {
            "h:1" => Some(MockReply::Malformed),
            _ => Some(MockReply::body(&b"ok"[..])),
        });
        let dc = data_center(&connector, "sas", &["h:1", "h:2"]).await;
        let candidates = vec![
            dc.pool().destination("h:1").unwrap(),
            dc.pool().destination("h:2").unwrap(),
        ];

        let response = execute(&request(), &candidates, 3).await.unwrap();
        assert_eq!(&response.body[..], b"ok");
        let second = connector.bus("h:2").unwrap().sent_requests();
        assert_eq!(second.len(), 1);
        assert!(second[0].header.retry);
    }

    #[tokio::test]
    async fn test_remote_error_is_not_retried() {
        let connector = MockBusConnector::new();
        connector.set_responder(|_address, _request| {
            Some(MockReply::Error(RpcError::new(RpcError::GENERIC, "no such node")))
        });
        let dc = data_center(&connector, "sas", &["h:1", "h:2"]).await;
        let candidates = vec![
            dc.pool().destination("h:1").unwrap(),
            dc.pool().destination("h:2").unwrap(),
        ];

        let error = execute(&request(), &candidates, 3).await.unwrap_err();
        assert_eq!(error.rpc_error().map(|e| e.code), Some(RpcError::GENERIC));
        assert!(connector.bus("h:2").unwrap().sent_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_bounds_attempts_and_surfaces_last_error() {
        let connector = MockBusConnector::new();
        connector.set_responder(|_address, _request| None);
        let dc = data_center(&connector, "sas", &["h:1", "h:2", "h:3"]).await;
        let candidates = vec![
            dc.pool().destination("h:1").unwrap(),
            dc.pool().destination("h:2").unwrap(),
            dc.pool().destination("h:3").unwrap(),
        ];

        let error = execute(&request(), &candidates, 2).await.unwrap_err();
        assert!(matches!(error, RpcClientError::Timeout { .. }));
        assert!(connector.bus("h:3").unwrap().sent_requests().is_empty());
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let error = execute(&request(), &[], 3).await.unwrap_err();
        assert!(matches!(error, RpcClientError::NoProxiesAvailable { .. }));
    }
}
