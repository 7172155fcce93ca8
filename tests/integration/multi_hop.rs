use super::{Network, RecordingClient};
use aodv_mesh::aodv::interfaces::RouteInfo;
use aodv_mesh::aodv::messages::{AodvMessage, RouteErrorMessage};
use aodv_mesh::common::Address;
use std::sync::Arc;

#[test]
fn discovery_along_a_chain() {
    color_backtrace::install();
    let network = Network::build(&[(1, 2), (2, 3), (3, 4)], &[]);
    let client = Arc::new(RecordingClient::default());

    let rreq_id = network.node(1).request_route(Address(4), client.clone(), Some(77));
    assert!(rreq_id.is_some());
    network.run();

    assert_eq!(
        client.calls(),
        vec![(RouteInfo::new(Address(4), Address(2), 3), Some(77))]
    );
    //Forward and reverse paths are in place at every hop
    assert_eq!(
        network.node(1).lookup(Address(4)),
        RouteInfo::new(Address(4), Address(2), 3)
    );
    assert_eq!(
        network.node(2).lookup(Address(4)),
        RouteInfo::new(Address(4), Address(3), 2)
    );
    assert_eq!(
        network.node(4).lookup(Address(1)),
        RouteInfo::new(Address(1), Address(3), 3)
    );
    assert!(network.node(1).request_table().entries_for(Address(4)).is_empty());

    let stats = network.node(2).stats();
    assert_eq!(stats.requests_forwarded, 1);
    assert_eq!(stats.replies_forwarded, 1);
    assert_eq!(network.node(4).stats().replies_sent, 1);
    assert_eq!(network.node(1).stats().routes_resolved, 1);

    //Once known, the route is answered without a new discovery
    let again = Arc::new(RecordingClient::default());
    assert_eq!(network.node(1).request_route(Address(4), again.clone(), None), None);
    assert_eq!(network.run(), 0);
    assert_eq!(again.calls().len(), 1);
}

#[test]
fn flooded_request_is_answered_once() {
    color_backtrace::install();
    let network = Network::build(&[(1, 2), (1, 3), (2, 4), (3, 4)], &[]);
    let client = Arc::new(RecordingClient::default());

    network.node(1).request_route(Address(4), client.clone(), Some(1));
    network.run();

    assert_eq!(
        client.calls(),
        vec![(RouteInfo::new(Address(4), Address(2), 2), Some(1))]
    );
    let destination = network.node(4).stats();
    assert_eq!(destination.requests_received, 1);
    assert_eq!(destination.requests_duplicate, 1);
    assert_eq!(destination.replies_sent, 1);
    //The originator hears its own request echoed back by both neighbours
    assert_eq!(network.node(1).stats().requests_duplicate, 2);
}

#[test]
fn route_error_travels_back_to_originator() {
    color_backtrace::install();
    let network = Network::build(&[(1, 2), (2, 3), (3, 4)], &[]);
    let client = Arc::new(RecordingClient::default());
    network.node(1).request_route(Address(4), client.clone(), None);
    network.run();
    assert!(network.node(1).lookup(Address(4)).is_valid());

    //The link between 3 and 4 breaks
    network.cut(3, 4);
    assert_eq!(network.node(3).report_link_failure(Address(4)), vec![Address(4)]);
    let error = AodvMessage::RERR(RouteErrorMessage {
        originator: Address(1),
        destination: Address(4),
        hop_count: 0,
    });
    network.inject(3, 2, error);
    network.run();

    assert!(!network.node(2).lookup(Address(4)).is_valid());
    assert!(!network.node(1).lookup(Address(4)).is_valid());
    assert_eq!(network.node(2).stats().errors_forwarded, 1);
    assert_eq!(network.node(1).stats().errors_received, 1);
    assert_eq!(network.node(1).stats().errors_forwarded, 0);

    //Rediscovery can't reach the destination and times out
    let retry = Arc::new(RecordingClient::default());
    network.node(1).request_route(Address(4), retry.clone(), Some(5));
    network.run();
    assert!(retry.calls().is_empty());

    let node1 = network.node(1);
    let requests = node1.request_table();
    let deadline = requests.next_expiry().expect("Discovery should be pending");
    requests.sweep_at(deadline);
    assert_eq!(retry.calls(), vec![(RouteInfo::no_route(Address(4)), Some(5))]);
    assert_eq!(network.node(1).stats().routes_not_found, 1);
}

#[test]
fn end_nodes_do_not_relay() {
    color_backtrace::install();
    let network = Network::build(&[(1, 2), (2, 3)], &[2]);
    let client = Arc::new(RecordingClient::default());

    network.node(1).request_route(Address(3), client.clone(), None);
    network.run();

    assert!(client.calls().is_empty());
    assert_eq!(network.node(2).stats().requests_received, 1);
    assert_eq!(network.node(2).stats().requests_forwarded, 0);
    assert_eq!(network.node(3).stats().requests_received, 0);
    //The end node still learns the reverse route
    assert!(network.node(2).lookup(Address(1)).is_valid());
}

#[test]
fn end_node_answers_requests_for_itself() {
    color_backtrace::install();
    let network = Network::build(&[(1, 2), (2, 3)], &[3]);
    let client = Arc::new(RecordingClient::default());

    network.node(1).request_route(Address(3), client.clone(), Some(3));
    network.run();

    assert_eq!(
        client.calls(),
        vec![(RouteInfo::new(Address(3), Address(2), 2), Some(3))]
    );
}
